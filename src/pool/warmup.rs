//! Template readiness checks run on freshly created sandboxes.

use std::time::Duration;
use tracing::{debug, warn};

use crate::sandbox::SandboxRef;
use crate::templates::Template;

/// Result of a warm-up check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Warmup {
    /// The check ran and exited zero.
    Verified,
    /// The template has nothing to check.
    Skipped,
    /// The check ran and failed.
    Failed(String),
    /// The check did not finish before the deadline.
    TimedOut,
}

impl Warmup {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

/// Runs the template's warm-up command, bounded by `timeout`.
///
/// Failures are logged and reported, never propagated: a sandbox that failed
/// its warm-up is still usable and stays in the pool.
pub(crate) async fn warm_up(sandbox: &SandboxRef, template: &Template, timeout: Duration) -> Warmup {
    let Some(command) = template.warmup() else {
        return Warmup::Skipped;
    };

    debug!(sandbox = %sandbox.id(), template = %template.id, command, "Running warm-up check");

    let outcome = match tokio::time::timeout(timeout, sandbox.run_command(command)).await {
        Ok(Ok(output)) if output.success() => Warmup::Verified,
        Ok(Ok(output)) => Warmup::Failed(format!(
            "exit code {}: {}",
            output.exit_code,
            output.stderr.trim()
        )),
        Ok(Err(e)) => Warmup::Failed(e.to_string()),
        Err(_) => Warmup::TimedOut,
    };

    match &outcome {
        Warmup::Failed(reason) => {
            warn!(sandbox = %sandbox.id(), template = %template.id, reason = %reason, "Warm-up check failed");
        }
        Warmup::TimedOut => {
            warn!(
                sandbox = %sandbox.id(),
                template = %template.id,
                timeout_secs = timeout.as_secs(),
                "Warm-up check timed out"
            );
        }
        Warmup::Verified | Warmup::Skipped => {}
    }

    outcome
}
