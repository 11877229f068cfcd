//! Session-to-sandbox bindings with bounded reconnection.
//!
//! A session that already owns a sandbox gets it back without a network call.
//! A session bound to a sandbox id it no longer holds a handle for tries to
//! reconnect, a bounded number of times with linear backoff. Once the attempts
//! are used up the binding is dropped and a fresh sandbox is created.
//!
//! Calls for the same session are serialized, so concurrent requests share
//! one sandbox instead of superseding each other.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::ActiveSandboxManager;
use crate::config::ReconnectConfig;
use crate::pool::SandboxPool;
use crate::sandbox::{CreateOptions, Provisioner, SandboxError, SandboxRef};

const DEFAULT_SANDBOX_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// A session's bound sandbox and its failed reconnect count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Sandbox the session last owned.
    pub sandbox_id: String,
    /// Consecutive failed reconnects.
    pub attempts: u32,
}

/// Result of [`ReconnectionManager::get_or_create_sandbox`].
pub struct Acquired {
    /// Usable sandbox, now the session's active one.
    pub sandbox: SandboxRef,
    /// True if the sandbox was freshly obtained rather than reused.
    pub is_new: bool,
}

#[derive(Default)]
struct Bindings {
    sessions: HashMap<String, String>,
    attempts: HashMap<String, u32>,
}

/// Resolves a working sandbox for a session.
pub struct ReconnectionManager {
    provisioner: Arc<dyn Provisioner>,
    active: Arc<ActiveSandboxManager>,
    pool: Option<Arc<SandboxPool>>,
    config: ReconnectConfig,
    sandbox_timeout: Duration,
    bindings: Mutex<Bindings>,
    turns: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ReconnectionManager {
    /// Creates a manager that provisions fresh sandboxes directly.
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        active: Arc<ActiveSandboxManager>,
        config: ReconnectConfig,
    ) -> Self {
        Self {
            provisioner,
            active,
            pool: None,
            config,
            sandbox_timeout: DEFAULT_SANDBOX_TIMEOUT,
            bindings: Mutex::new(Bindings::default()),
            turns: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Obtain fresh sandboxes from `pool` instead of creating them directly.
    #[must_use]
    pub fn with_pool(mut self, pool: Arc<SandboxPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Lifetime requested for directly created sandboxes.
    #[must_use]
    pub fn with_sandbox_timeout(mut self, timeout: Duration) -> Self {
        self.sandbox_timeout = timeout;
        self
    }

    /// Returns a usable sandbox for `session`, preferring reuse.
    ///
    /// In order: the session's active sandbox; a reconnect to its bound
    /// sandbox; a fresh sandbox for `template`. Only a failure of the fresh
    /// creation is returned as an error.
    pub async fn get_or_create_sandbox(
        &self,
        session: &str,
        template: &str,
    ) -> Result<Acquired, SandboxError> {
        let turn = self.turn(session);
        let result = {
            let _turn = turn.lock().await;
            self.acquire(session, template).await
        };
        drop(turn);
        self.forget_idle_turn(session);
        result
    }

    /// Tears the session down: kills its active sandbox, stops the pool
    /// tracking it and forgets the binding. Returns the closed sandbox id.
    pub async fn close_session(&self, session: &str) -> Option<String> {
        let turn = self.turn(session);
        let closed = {
            let _turn = turn.lock().await;
            let closed = self.active.close_session(session).await;
            if let (Some(id), Some(pool)) = (&closed, &self.pool) {
                pool.discard(id).await;
            }
            self.clear_session(session).await;
            closed
        };
        drop(turn);
        self.forget_idle_turn(session);
        closed
    }

    async fn acquire(&self, session: &str, template: &str) -> Result<Acquired, SandboxError> {
        if let Some(sandbox) = self.active.get_current(session).await {
            debug!(session, sandbox = %sandbox.id(), "Reusing active sandbox");
            return Ok(Acquired {
                sandbox,
                is_new: false,
            });
        }

        if let Some(sandbox) = self.reconnect(session).await {
            self.promote(session, &sandbox).await;
            return Ok(Acquired {
                sandbox,
                is_new: false,
            });
        }

        let sandbox = self.create(session, template).await?;
        self.bind(session, sandbox.id()).await;
        self.promote(session, &sandbox).await;
        info!(session, template, sandbox = %sandbox.id(), "Created sandbox for session");

        Ok(Acquired {
            sandbox,
            is_new: true,
        })
    }

    /// Binds `session` to `sandbox_id` with a fresh attempt budget.
    pub async fn bind(&self, session: &str, sandbox_id: &str) {
        let mut bindings = self.bindings.lock().await;
        if let Some(previous) = bindings
            .sessions
            .insert(session.to_string(), sandbox_id.to_string())
        {
            bindings.attempts.remove(&previous);
        }
        bindings.attempts.insert(sandbox_id.to_string(), 0);
    }

    /// Forgets the session's binding and attempt count.
    pub async fn clear_session(&self, session: &str) -> bool {
        let mut bindings = self.bindings.lock().await;
        match bindings.sessions.remove(session) {
            Some(sandbox_id) => {
                bindings.attempts.remove(&sandbox_id);
                debug!(session, sandbox = %sandbox_id, "Cleared session binding");
                true
            }
            None => false,
        }
    }

    /// Current binding for `session`.
    pub async fn binding(&self, session: &str) -> Option<Binding> {
        let bindings = self.bindings.lock().await;
        let sandbox_id = bindings.sessions.get(session)?;
        Some(Binding {
            sandbox_id: sandbox_id.clone(),
            attempts: bindings.attempts.get(sandbox_id).copied().unwrap_or(0),
        })
    }

    /// Failed reconnect count for `sandbox_id`.
    pub async fn attempts(&self, sandbox_id: &str) -> Option<u32> {
        self.bindings.lock().await.attempts.get(sandbox_id).copied()
    }

    fn turn(&self, session: &str) -> Arc<Mutex<()>> {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session.to_string())
            .or_default()
            .clone()
    }

    /// Drops the session's lock once nobody holds or waits on it.
    fn forget_idle_turn(&self, session: &str) {
        let mut turns = self.turns.lock().unwrap_or_else(PoisonError::into_inner);
        if turns.get(session).is_some_and(|turn| Arc::strong_count(turn) == 1) {
            turns.remove(session);
        }
    }

    /// Tries the session's bound sandbox until it answers or the budget runs out.
    async fn reconnect(&self, session: &str) -> Option<SandboxRef> {
        let sandbox_id = self.bindings.lock().await.sessions.get(session)?.clone();
        let max_attempts = self.config.max_attempts;

        loop {
            let attempt = {
                let bindings = self.bindings.lock().await;
                let used = bindings.attempts.get(&sandbox_id).copied().unwrap_or(0);
                (used < max_attempts).then_some(used + 1)
            };
            let Some(attempt) = attempt else {
                break;
            };

            debug!(session, sandbox = %sandbox_id, attempt, max_attempts, "Reconnecting");
            match self.provisioner.connect(&sandbox_id).await {
                Ok(sandbox) => {
                    self.bindings
                        .lock()
                        .await
                        .attempts
                        .insert(sandbox_id.clone(), 0);
                    info!(session, sandbox = %sandbox_id, attempt, "Reconnected to sandbox");
                    return Some(sandbox);
                }
                Err(e) => {
                    let used = {
                        let mut bindings = self.bindings.lock().await;
                        let used = bindings.attempts.entry(sandbox_id.clone()).or_default();
                        *used += 1;
                        *used
                    };
                    warn!(
                        session,
                        sandbox = %sandbox_id,
                        attempt = used,
                        max_attempts,
                        error = %e,
                        "Reconnect failed"
                    );
                    if used >= max_attempts {
                        break;
                    }
                    tokio::time::sleep(self.config.backoff() * used).await;
                }
            }
        }

        let mut bindings = self.bindings.lock().await;
        if bindings.sessions.get(session) == Some(&sandbox_id) {
            bindings.sessions.remove(session);
        }
        bindings.attempts.remove(&sandbox_id);
        info!(session, sandbox = %sandbox_id, "Reconnect attempts exhausted, dropping binding");
        None
    }

    async fn create(&self, session: &str, template: &str) -> Result<SandboxRef, SandboxError> {
        match &self.pool {
            Some(pool) => pool.get_sandbox(template).await,
            None => {
                let options = CreateOptions::with_timeout(self.sandbox_timeout)
                    .meta("template", template)
                    .meta("session", session);
                self.provisioner.create(template, &options).await
            }
        }
    }

    /// Registers `sandbox` as active; a superseded pool sandbox is already
    /// dead, so the pool stops tracking it.
    async fn promote(&self, session: &str, sandbox: &SandboxRef) {
        let superseded = self.active.set_active(session, sandbox.clone()).await;
        if let (Some(previous), Some(pool)) = (superseded, &self.pool) {
            pool.discard(previous.id()).await;
        }
    }
}
