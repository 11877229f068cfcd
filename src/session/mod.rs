//! Session-level sandbox ownership.
//!
//! [`ActiveSandboxManager`] decides which sandbox a session is currently using
//! and kills the ones it replaces. [`ReconnectionManager`] sits in front of it
//! and turns a session id into a working sandbox.

mod active;
mod reconnect;

pub use active::ActiveSandboxManager;
pub use reconnect::{Acquired, Binding, ReconnectionManager};
