//! CLI command implementations.
//!
//! Output formatting lives in [`format`] as pure functions; the command
//! modules wire configuration, the sandbox context and printing together.

pub mod exec;
pub mod format;
pub mod init;
pub mod run;
pub mod templates;
