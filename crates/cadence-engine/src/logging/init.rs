use std::sync::Once;

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "CADENCE_LOG";

/// Logger configuration.
///
/// `env_filter` follows the `env_logger` filter syntax (e.g. "info", "warn",
/// "cadence_engine=debug").
///
/// `write_style` controls ANSI coloring behavior.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
        }
    }
}

impl LoggingConfig {
    pub fn with_filter(filter: impl Into<String>) -> Self {
        Self {
            env_filter: Some(filter.into()),
            ..Self::default()
        }
    }

    /// Filter actually applied: explicit, then `CADENCE_LOG`, then `RUST_LOG`.
    fn resolve_filter<F>(&self, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.env_filter
            .clone()
            .or_else(|| lookup(LOG_ENV))
            .or_else(|| lookup("RUST_LOG"))
            .filter(|f| !f.trim().is_empty())
    }
}

static INIT: Once = Once::new();

/// Initializes the global logger once.
///
/// This function is idempotent; subsequent calls are ignored. A logger
/// installed by the host beforehand is left in place.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        match config.resolve_filter(|key| std::env::var(key).ok()) {
            Some(filter) => {
                builder.parse_filters(&filter);
            }
            None => {
                builder.filter_level(log::LevelFilter::Info);
            }
        }

        builder.write_style(config.write_style);

        if builder.try_init().is_ok() {
            log::debug!("logging initialized");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn explicit_filter_wins() {
        let config = LoggingConfig::with_filter("warn");
        let lookup = env(&[("CADENCE_LOG", "debug"), ("RUST_LOG", "trace")]);
        assert_eq!(config.resolve_filter(lookup).as_deref(), Some("warn"));
    }

    #[test]
    fn cadence_log_before_rust_log() {
        let lookup = env(&[("CADENCE_LOG", "debug"), ("RUST_LOG", "trace")]);
        assert_eq!(
            LoggingConfig::default().resolve_filter(lookup).as_deref(),
            Some("debug")
        );
    }

    #[test]
    fn falls_back_to_default_level() {
        let lookup = env(&[("RUST_LOG", "  ")]);
        assert_eq!(LoggingConfig::default().resolve_filter(lookup), None);
    }

    #[test]
    fn init_is_idempotent() {
        init_logging(LoggingConfig::default());
        init_logging(LoggingConfig::with_filter("trace"));
    }
}
