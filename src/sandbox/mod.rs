//! Provisioning contract for remote sandboxes.
//!
//! A [`Provisioner`] creates or reconnects to sandboxes; the resulting
//! [`Sandbox`] handles are shared as [`SandboxRef`] between the pool, the
//! session managers and callers. Backends:
//! - `docker`: local containers through the Docker daemon
//! - `http`: a REST provisioning service

mod docker;
mod error;
mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use docker::{DockerProvisioner, DockerSandbox};
pub use error::SandboxError;
pub use http::{HttpProvisioner, HttpSandbox};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Shared handle to a live sandbox.
pub type SandboxRef = Arc<dyn Sandbox>;

/// A live remote execution environment.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Globally unique identifier assigned by the provisioning service.
    fn id(&self) -> &str;

    /// Terminates the sandbox.
    async fn kill(&self) -> Result<(), SandboxError>;

    /// Runs a shell command inside the sandbox and waits for it to exit.
    async fn run_command(&self, cmd: &str) -> Result<CommandOutput, SandboxError>;

    /// Lists the entries of a directory inside the sandbox.
    async fn list_files(&self, path: &str) -> Result<Vec<FileInfo>, SandboxError>;
}

impl std::fmt::Debug for dyn Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox").field("id", &self.id()).finish()
    }
}

/// Creates new sandboxes and reconnects to existing ones.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Creates a sandbox from a template.
    async fn create(
        &self,
        template_id: &str,
        options: &CreateOptions,
    ) -> Result<SandboxRef, SandboxError>;

    /// Reconnects to a previously created sandbox.
    async fn connect(&self, sandbox_id: &str) -> Result<SandboxRef, SandboxError>;
}

/// Options passed to [`Provisioner::create`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Free-form labels attached to the sandbox.
    pub metadata: HashMap<String, String>,
    /// Lifetime requested from the provisioning service.
    pub timeout: Duration,
}

impl CreateOptions {
    /// Options with the given lifetime and no metadata.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            metadata: HashMap::new(),
            timeout,
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Result of [`Sandbox::run_command`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    /// Process exit code.
    pub exit_code: i64,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns true if the command exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Regular file (or anything that is not a directory).
    File,
    /// Directory.
    Dir,
}

/// Directory entry returned by [`Sandbox::list_files`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Entry name.
    pub name: String,
    /// Full path inside the sandbox.
    pub path: String,
    /// Entry kind.
    #[serde(rename = "type")]
    pub kind: FileKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_options_builder() {
        let options = CreateOptions::with_timeout(Duration::from_secs(60))
            .meta("template", "nextjs-developer")
            .meta("pooled", "true");

        assert_eq!(options.timeout, Duration::from_secs(60));
        assert_eq!(options.metadata.len(), 2);
        assert_eq!(options.metadata["template"], "nextjs-developer");
    }

    #[test]
    fn test_command_output_success() {
        let ok = CommandOutput::default();
        let failed = CommandOutput {
            exit_code: 127,
            ..Default::default()
        };
        assert!(ok.success());
        assert!(!failed.success());
    }

    #[test]
    fn test_sandbox_debug_shows_id() {
        let (_, sandbox) = mock::MockSandbox::shared("sbx-42");
        assert_eq!(format!("{sandbox:?}"), r#"Sandbox { id: "sbx-42" }"#);

        let failed: Result<SandboxRef, SandboxError> = Err(SandboxError::ShuttingDown);
        assert!(failed.unwrap_err().is_shutting_down());
    }

    #[test]
    fn test_file_info_json_shape() {
        let info = FileInfo {
            name: "app".to_string(),
            path: "/home/user/app".to_string(),
            kind: FileKind::Dir,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "dir");
        assert_eq!(json["path"], "/home/user/app");
    }
}
