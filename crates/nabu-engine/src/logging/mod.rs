//! Logging utilities.
//!
//! Centralizes logger initialization. Library code only talks to the `log`
//! facade; binaries and tests opt into `env_logger` through [`init_logging`].

mod init;

pub use init::{LoggingConfig, init_logging};
