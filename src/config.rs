use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::templates::Template;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "sandpool.toml";

/// Top-level `sandpool.toml` configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Warm pool sizing and timing.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Session reconnection policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Active sandbox policy.
    #[serde(default)]
    pub active: ActiveConfig,
    /// Provisioning backend selection.
    #[serde(default)]
    pub provisioner: ProvisionerConfig,
    /// Extra or overriding template definitions.
    #[serde(default)]
    pub templates: Vec<Template>,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Warm pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Target number of idle sandboxes per template
    #[serde(default = "default_pool_size")]
    pub size: usize,

    /// Maximum age and idle time of a pooled sandbox, in seconds
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Interval between maintenance sweeps, in seconds
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,

    /// Deadline for template warm-up checks, in seconds
    #[serde(default = "default_warmup_timeout_secs")]
    pub warmup_timeout_secs: u64,

    /// Maximum number of sandboxes created in parallel by one refill
    #[serde(default = "default_warmup_batch")]
    pub warmup_batch: usize,

    /// Delay before a follow-up refill when a batch did not reach the target
    #[serde(default = "default_refill_delay_ms")]
    pub refill_delay_ms: u64,

    /// Delay before a refill triggered by a checkout draining the pool
    #[serde(default = "default_refill_fast_ms")]
    pub refill_fast_ms: u64,

    /// Delay before retrying a refill whose creations failed, in seconds
    #[serde(default = "default_refill_retry_secs")]
    pub refill_retry_secs: u64,

    /// Lifetime requested from the provisioning service, in seconds
    #[serde(default = "default_sandbox_timeout_secs")]
    pub sandbox_timeout_secs: u64,

    /// Templates warmed by `initialize` when none are given explicitly
    #[serde(default = "default_templates")]
    pub templates: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            max_age_secs: default_max_age_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            warmup_timeout_secs: default_warmup_timeout_secs(),
            warmup_batch: default_warmup_batch(),
            refill_delay_ms: default_refill_delay_ms(),
            refill_fast_ms: default_refill_fast_ms(),
            refill_retry_secs: default_refill_retry_secs(),
            sandbox_timeout_secs: default_sandbox_timeout_secs(),
            templates: default_templates(),
        }
    }
}

impl PoolConfig {
    /// Maximum age and idle time of a pooled sandbox.
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Interval between maintenance sweeps.
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    /// Deadline for warm-up checks.
    pub fn warmup_timeout(&self) -> Duration {
        Duration::from_secs(self.warmup_timeout_secs)
    }

    /// Delay before a follow-up refill.
    pub fn refill_delay(&self) -> Duration {
        Duration::from_millis(self.refill_delay_ms)
    }

    /// Delay before a refill triggered by checkout.
    pub fn refill_fast(&self) -> Duration {
        Duration::from_millis(self.refill_fast_ms)
    }

    /// Delay before retrying a failed refill.
    pub fn refill_retry(&self) -> Duration {
        Duration::from_secs(self.refill_retry_secs)
    }

    /// Lifetime requested for new sandboxes.
    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox_timeout_secs)
    }
}

/// Reconnection policy for session-bound sandboxes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Connect attempts per sandbox before the binding is dropped
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between attempts, multiplied by the attempt number
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl ReconnectConfig {
    /// Base delay between attempts.
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// How many sandboxes may be active at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivePolicy {
    /// One active sandbox per session.
    #[default]
    PerSession,
    /// One active sandbox for the whole process.
    SingleGlobal,
}

impl std::fmt::Display for ActivePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerSession => write!(f, "per-session"),
            Self::SingleGlobal => write!(f, "single-global"),
        }
    }
}

/// Active sandbox configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActiveConfig {
    /// Active sandbox policy
    #[serde(default)]
    pub policy: ActivePolicy,
}

/// Provisioning backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Local Docker daemon.
    #[default]
    Docker,
    /// Remote REST provisioning service.
    Http,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Docker => write!(f, "docker"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Provisioning backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Which backend creates sandboxes
    #[serde(default)]
    pub backend: Backend,

    /// Docker backend settings
    #[serde(default)]
    pub docker: DockerConfig,

    /// HTTP backend settings
    #[serde(default)]
    pub http: HttpConfig,
}

/// Docker backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Memory limit per sandbox (e.g., "2g", "512m")
    #[serde(default = "default_memory")]
    pub memory: String,

    /// CPU limit per sandbox (e.g., "1", "0.5")
    #[serde(default = "default_cpus")]
    pub cpus: String,

    /// Docker network mode ("bridge", "none", or a network name)
    #[serde(default = "default_network")]
    pub network: String,

    /// Command that keeps the container alive
    #[serde(default = "default_keepalive")]
    pub keepalive: Vec<String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            memory: default_memory(),
            cpus: default_cpus(),
            network: default_network(),
            keepalive: default_keepalive(),
        }
    }
}

/// HTTP backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Base URL of the provisioning service
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl HttpConfig {
    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for daily-rolling log files (stderr only when unset)
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_pool_size() -> usize {
    3
}

fn default_max_age_secs() -> u64 {
    10 * 60
}

fn default_maintenance_interval_secs() -> u64 {
    2 * 60
}

fn default_warmup_timeout_secs() -> u64 {
    30
}

fn default_warmup_batch() -> usize {
    2
}

fn default_refill_delay_ms() -> u64 {
    2000
}

fn default_refill_fast_ms() -> u64 {
    100
}

fn default_refill_retry_secs() -> u64 {
    5
}

fn default_sandbox_timeout_secs() -> u64 {
    10 * 60
}

fn default_templates() -> Vec<String> {
    vec!["nextjs-developer".to_string()]
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_memory() -> String {
    "2g".to_string()
}

fn default_cpus() -> String {
    "1".to_string()
}

fn default_network() -> String {
    "bridge".to_string()
}

fn default_keepalive() -> Vec<String> {
    vec!["sleep".to_string(), "infinity".to_string()]
}

fn default_base_url() -> String {
    "http://127.0.0.1:49982".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Config {
    /// Load configuration from a file, using defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pool cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pool.warmup_batch == 0 {
            anyhow::bail!("pool.warmup_batch must be at least 1");
        }
        if self.pool.max_age_secs == 0 {
            anyhow::bail!("pool.max_age_secs must be at least 1");
        }
        if self.pool.maintenance_interval_secs == 0 {
            anyhow::bail!("pool.maintenance_interval_secs must be at least 1");
        }
        if self.reconnect.max_attempts == 0 {
            anyhow::bail!("reconnect.max_attempts must be at least 1");
        }
        Ok(())
    }
}
