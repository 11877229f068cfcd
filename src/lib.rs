//! Warm pooling and session management for ephemeral sandboxes.
//!
//! Creating a remote sandbox takes seconds. This crate keeps a pool of
//! pre-created, warmed-up sandboxes per template so requests are served
//! immediately, reconnects sessions to the sandbox they were using, and
//! makes sure superseded sandboxes get killed.
//!
//! The pieces:
//! - [`sandbox`]: the provisioning contract plus Docker and HTTP backends
//! - [`pool::SandboxPool`]: the warm pool with background refill and maintenance
//! - [`session::ActiveSandboxManager`]: which sandbox each session is using
//! - [`session::ReconnectionManager`]: session id to working sandbox
//! - [`context::SandboxContext`]: all of the above wired from a [`config::Config`]

/// `sandpool.toml` loading and defaults.
pub mod config;
/// Process-wide wiring of pool and session managers.
pub mod context;
/// Warm sandbox pool.
pub mod pool;
/// Provisioning contract and backends.
pub mod sandbox;
/// Session-level sandbox ownership.
pub mod session;
/// Template catalog and embedded default files.
pub mod templates;

pub use config::Config;
pub use context::SandboxContext;
pub use pool::SandboxPool;
pub use sandbox::{Provisioner, Sandbox, SandboxError, SandboxRef};
pub use session::{ActiveSandboxManager, ReconnectionManager};
