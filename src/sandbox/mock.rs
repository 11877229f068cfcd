//! Mock provisioner for testing.
//!
//! Hands out in-memory sandboxes and tracks every create, connect and kill
//! so tests can assert on exactly how the pool and managers used the backend.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{
    CommandOutput, CreateOptions, FileInfo, FileKind, Provisioner, Sandbox, SandboxError,
    SandboxRef,
};

/// Scripted outcome for one provisioner call.
#[derive(Debug, Clone)]
pub(crate) enum MockResponse {
    /// Succeed.
    Success,
    /// Fail with the given message.
    Error(String),
}

/// In-memory sandbox with call tracking.
#[derive(Debug)]
pub(crate) struct MockSandbox {
    id: String,
    kill_count: AtomicUsize,
    fail_kill: bool,
    commands: Mutex<Vec<String>>,
    command_result: Mutex<Result<CommandOutput, String>>,
    command_delay: Option<Duration>,
}

impl MockSandbox {
    /// A sandbox whose commands succeed with empty output.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kill_count: AtomicUsize::new(0),
            fail_kill: false,
            commands: Mutex::new(Vec::new()),
            command_result: Mutex::new(Ok(CommandOutput::default())),
            command_delay: None,
        }
    }

    /// A sandbox whose `kill` always fails.
    pub fn failing_kill(id: &str) -> Self {
        Self {
            fail_kill: true,
            ..Self::new(id)
        }
    }

    /// Shared handle to a new sandbox, plus the concrete type for assertions.
    pub fn shared(id: &str) -> (Arc<Self>, SandboxRef) {
        let sandbox = Arc::new(Self::new(id));
        let handle: SandboxRef = sandbox.clone();
        (sandbox, handle)
    }

    /// Number of times `kill` was called.
    pub fn kill_count(&self) -> usize {
        self.kill_count.load(Ordering::SeqCst)
    }

    /// Commands run so far.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn kill(&self) -> Result<(), SandboxError> {
        self.kill_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_kill {
            return Err(SandboxError::request("kill rejected"));
        }
        Ok(())
    }

    async fn run_command(&self, cmd: &str) -> Result<CommandOutput, SandboxError> {
        self.commands.lock().unwrap().push(cmd.to_string());
        if let Some(delay) = self.command_delay {
            tokio::time::sleep(delay).await;
        }
        self.command_result
            .lock()
            .unwrap()
            .clone()
            .map_err(SandboxError::command_failed)
    }

    async fn list_files(&self, path: &str) -> Result<Vec<FileInfo>, SandboxError> {
        Ok(vec![FileInfo {
            name: "package.json".to_string(),
            path: format!("{}/package.json", path.trim_end_matches('/')),
            kind: FileKind::File,
        }])
    }
}

/// A mock provisioner with scripted create/connect outcomes.
#[derive(Debug, Default)]
pub(crate) struct MockProvisioner {
    create_script: Mutex<VecDeque<MockResponse>>,
    connect_fails: Mutex<bool>,
    create_delay: Option<Duration>,
    command_delay: Option<Duration>,
    command_exit_code: i64,
    fail_kills: bool,
    create_count: AtomicUsize,
    connect_count: AtomicUsize,
    sandboxes: Mutex<HashMap<String, Arc<MockSandbox>>>,
    created_order: Mutex<Vec<String>>,
    templates: Mutex<Vec<String>>,
    next_id: AtomicUsize,
}

impl MockProvisioner {
    /// A provisioner whose calls always succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creations take this long.
    #[must_use]
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Commands in created sandboxes take this long.
    #[must_use]
    pub fn with_command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = Some(delay);
        self
    }

    /// Commands in created sandboxes exit with this code.
    #[must_use]
    pub fn with_command_exit_code(mut self, code: i64) -> Self {
        self.command_exit_code = code;
        self
    }

    /// Created sandboxes reject `kill`.
    #[must_use]
    pub fn with_failing_kills(mut self) -> Self {
        self.fail_kills = true;
        self
    }

    /// Queue outcomes for the next creations; once drained, creations succeed.
    pub fn script_creates(&self, responses: impl IntoIterator<Item = MockResponse>) {
        self.create_script.lock().unwrap().extend(responses);
    }

    /// Make every `connect` fail (or succeed again).
    pub fn set_connect_fails(&self, fails: bool) {
        *self.connect_fails.lock().unwrap() = fails;
    }

    /// Registers an existing sandbox that `connect` can find.
    pub fn register(&self, id: &str) -> Arc<MockSandbox> {
        let sandbox = Arc::new(MockSandbox::new(id));
        self.sandboxes
            .lock()
            .unwrap()
            .insert(id.to_string(), sandbox.clone());
        sandbox
    }

    /// Number of `create` calls, including failed ones.
    pub fn create_count(&self) -> usize {
        self.create_count.load(Ordering::SeqCst)
    }

    /// Number of `connect` calls, including failed ones.
    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Sandbox by id, if this provisioner created or registered it.
    pub fn sandbox(&self, id: &str) -> Option<Arc<MockSandbox>> {
        self.sandboxes.lock().unwrap().get(id).cloned()
    }

    /// Ids of successfully created sandboxes, in creation order.
    pub fn created_ids(&self) -> Vec<String> {
        self.created_order.lock().unwrap().clone()
    }

    /// Template requested by each `create` call, in call order.
    pub fn requested_templates(&self) -> Vec<String> {
        self.templates.lock().unwrap().clone()
    }

    /// Total kills across all sandboxes.
    pub fn total_kills(&self) -> usize {
        self.sandboxes
            .lock()
            .unwrap()
            .values()
            .map(|s| s.kill_count())
            .sum()
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create(
        &self,
        template_id: &str,
        _options: &CreateOptions,
    ) -> Result<SandboxRef, SandboxError> {
        self.create_count.fetch_add(1, Ordering::SeqCst);
        self.templates.lock().unwrap().push(template_id.to_string());

        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.create_script.lock().unwrap().pop_front();
        if let Some(MockResponse::Error(msg)) = scripted {
            return Err(SandboxError::create_failed(template_id, msg));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("mock-{n}");
        let sandbox = Arc::new(MockSandbox {
            command_result: Mutex::new(Ok(CommandOutput {
                exit_code: self.command_exit_code,
                ..Default::default()
            })),
            command_delay: self.command_delay,
            fail_kill: self.fail_kills,
            ..MockSandbox::new(&id)
        });
        self.sandboxes
            .lock()
            .unwrap()
            .insert(id.clone(), sandbox.clone());
        self.created_order.lock().unwrap().push(id);

        Ok(sandbox)
    }

    async fn connect(&self, sandbox_id: &str) -> Result<SandboxRef, SandboxError> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);

        if *self.connect_fails.lock().unwrap() {
            return Err(SandboxError::connect_failed(sandbox_id, "connection refused"));
        }

        let sandbox = self.sandbox(sandbox_id).ok_or_else(|| SandboxError::not_found(sandbox_id))?;
        Ok(sandbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_create_assigns_sequential_ids() {
        let provisioner = MockProvisioner::new();
        let options = CreateOptions::default();

        let a = provisioner.create("nextjs-developer", &options).await.unwrap();
        let b = provisioner.create("nextjs-developer", &options).await.unwrap();

        assert_eq!(a.id(), "mock-1");
        assert_eq!(b.id(), "mock-2");
        assert_eq!(provisioner.create_count(), 2);
        assert_eq!(provisioner.created_ids(), vec!["mock-1", "mock-2"]);
    }

    #[tokio::test]
    async fn test_mock_scripted_failure_then_success() {
        let provisioner = MockProvisioner::new();
        provisioner.script_creates([MockResponse::Error("quota".to_string()), MockResponse::Success]);
        let options = CreateOptions::default();

        let first = provisioner.create("t", &options).await;
        let second = provisioner.create("t", &options).await;
        let third = provisioner.create("t", &options).await;

        assert!(first.unwrap_err().to_string().contains("quota"));
        assert!(second.is_ok());
        assert!(third.is_ok());
        assert_eq!(provisioner.create_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_connect() {
        let provisioner = MockProvisioner::new();
        provisioner.register("sbx-old");

        assert_eq!(provisioner.connect("sbx-old").await.unwrap().id(), "sbx-old");
        assert!(provisioner.connect("missing").await.unwrap_err().is_not_found());

        provisioner.set_connect_fails(true);
        assert!(provisioner.connect("sbx-old").await.is_err());
        assert_eq!(provisioner.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_sandbox_tracks_kills() {
        let sandbox = MockSandbox::failing_kill("sbx-1");
        assert!(sandbox.kill().await.is_err());
        assert!(sandbox.kill().await.is_err());
        assert_eq!(sandbox.kill_count(), 2);
    }
}
