//! Enforces a single active sandbox per session, or process-wide.

use futures_util::future::join_all;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ActivePolicy;
use crate::sandbox::SandboxRef;

/// Tracks which sandbox is active and kills the ones it supersedes.
pub struct ActiveSandboxManager {
    policy: ActivePolicy,
    active: Mutex<HashMap<String, SandboxRef>>,
}

impl ActiveSandboxManager {
    /// Creates an empty manager.
    pub fn new(policy: ActivePolicy) -> Self {
        Self {
            policy,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Active sandbox for `session`, if any.
    pub async fn get_current(&self, session: &str) -> Option<SandboxRef> {
        self.active.lock().await.get(session).cloned()
    }

    /// Returns true if `session` has an active sandbox.
    pub async fn is_active(&self, session: &str) -> bool {
        self.active.lock().await.contains_key(session)
    }

    /// Number of active records.
    pub async fn len(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Returns true if nothing is active.
    pub async fn is_empty(&self) -> bool {
        self.active.lock().await.is_empty()
    }

    /// Makes `sandbox` the active sandbox for `session`.
    ///
    /// Any sandbox it supersedes is killed before this returns: the session's
    /// previous sandbox under [`ActivePolicy::PerSession`], or whichever
    /// sandbox was active for any session under [`ActivePolicy::SingleGlobal`].
    /// Kill failures are logged and do not stop the promotion. Returns the
    /// superseded sandbox.
    pub async fn set_active(&self, session: &str, sandbox: SandboxRef) -> Option<SandboxRef> {
        // The lock spans the kill so no other promotion can interleave
        let mut active = self.active.lock().await;

        let superseded = match self.policy {
            ActivePolicy::PerSession => active.remove(session),
            ActivePolicy::SingleGlobal => active.drain().next().map(|(_, sandbox)| sandbox),
        }
        .filter(|previous| previous.id() != sandbox.id());

        if let Some(previous) = &superseded {
            info!(
                session,
                superseded = %previous.id(),
                sandbox = %sandbox.id(),
                "Killing superseded sandbox"
            );
            if let Err(e) = previous.kill().await {
                warn!(sandbox = %previous.id(), error = %e, "Failed to kill superseded sandbox");
            }
        }

        debug!(session, sandbox = %sandbox.id(), "Sandbox is now active");
        active.insert(session.to_string(), sandbox);
        superseded
    }

    /// Kills and forgets the active sandbox for `session`.
    ///
    /// The record is removed even if the kill fails. Returns the closed id.
    /// Pooled sandboxes should be closed through
    /// [`ReconnectionManager::close_session`](super::ReconnectionManager::close_session)
    /// so the pool stops tracking them.
    pub async fn close_session(&self, session: &str) -> Option<String> {
        let sandbox = self.active.lock().await.remove(session)?;
        kill_logged(session, &sandbox).await;
        Some(sandbox.id().to_string())
    }

    /// Kills and forgets every active sandbox. Returns the closed ids.
    pub async fn close_current(&self) -> Vec<String> {
        let closed: Vec<(String, SandboxRef)> = self.active.lock().await.drain().collect();
        join_all(
            closed
                .iter()
                .map(|(session, sandbox)| kill_logged(session, sandbox)),
        )
        .await;
        closed
            .into_iter()
            .map(|(_, sandbox)| sandbox.id().to_string())
            .collect()
    }
}

async fn kill_logged(session: &str, sandbox: &SandboxRef) {
    match sandbox.kill().await {
        Ok(()) => info!(session, sandbox = %sandbox.id(), "Closed active sandbox"),
        Err(e) => warn!(session, sandbox = %sandbox.id(), error = %e, "Failed to kill active sandbox"),
    }
}
