use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by fallible engine constructors.
///
/// Per-frame operations never fail; absent results are expressed as `Option`.
#[derive(Error, Debug)]
pub enum PacingError {
    #[error("invalid config value for `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("failed to open trace output {path:?}: {source}")]
    Trace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("submission adapter error: {0}")]
    Adapter(String),
}

impl PacingError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig { field, reason: reason.into() }
    }
}
