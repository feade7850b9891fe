//! Logging utilities.
//!
//! The engine logs through the `log` facade only. `init_logging` installs an
//! `env_logger` backend for binaries and the C ABI, which has no host `main`
//! to do it.

mod init;

pub use init::{init_logging, LoggingConfig, LOG_ENV};
