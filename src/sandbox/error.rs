//! Domain-specific error types for sandbox operations.
//!
//! Typed errors let the pool and session managers match on specific
//! failure modes (not found, timeout, shutting down) instead of parsing
//! error message strings.

use std::time::Duration;

/// Errors that can occur during sandbox operations.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Provisioning backend (Docker daemon, HTTP service) is not reachable.
    #[error("Provisioning backend is not available: {message}")]
    Unavailable { message: String },

    /// Sandbox does not exist (or no longer exists) on the backend.
    #[error("Sandbox not found: {id}")]
    NotFound { id: String },

    /// Image backing a template was not found.
    #[error("Sandbox image not found: {image}")]
    ImageNotFound { image: String },

    /// Operation exceeded its deadline.
    #[error("Sandbox operation timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Sandbox creation failed.
    #[error("Failed to create sandbox for template {template}: {message}")]
    CreateFailed { template: String, message: String },

    /// Reconnecting to an existing sandbox failed.
    #[error("Failed to connect to sandbox {id}: {message}")]
    ConnectFailed { id: String, message: String },

    /// Command execution or file listing inside the sandbox failed.
    #[error("Sandbox command failed: {message}")]
    CommandFailed { message: String },

    /// Transport-level failure talking to the backend.
    #[error("Provisioning request failed: {message}")]
    Request { message: String },

    /// The pool has been shut down and no longer hands out sandboxes.
    #[error("Sandbox pool is shutting down")]
    ShuttingDown,
}

impl SandboxError {
    /// Creates an `Unavailable` error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a `NotFound` error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates an `ImageNotFound` error.
    pub fn image_not_found(image: impl Into<String>) -> Self {
        Self::ImageNotFound {
            image: image.into(),
        }
    }

    /// Creates a `Timeout` error from a `Duration`.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout {
            timeout_secs: duration.as_secs(),
        }
    }

    /// Creates a `CreateFailed` error.
    pub fn create_failed(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CreateFailed {
            template: template.into(),
            message: message.into(),
        }
    }

    /// Creates a `ConnectFailed` error.
    pub fn connect_failed(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectFailed {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Creates a `CommandFailed` error.
    pub fn command_failed(message: impl Into<String>) -> Self {
        Self::CommandFailed {
            message: message.into(),
        }
    }

    /// Creates a `Request` error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if the sandbox or its image does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::ImageNotFound { .. })
    }

    /// Returns true if the pool refused the request because it is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, Self::ShuttingDown)
    }
}
