//! Process-wide wiring of the pool and session managers.
//!
//! Nothing here starts on construction: the entry point calls
//! [`SandboxContext::start`] once and [`SandboxContext::shutdown`] on exit.

use std::sync::Arc;
use tracing::info;

use crate::config::{Backend, Config};
use crate::pool::SandboxPool;
use crate::sandbox::{DockerProvisioner, HttpProvisioner, Provisioner, SandboxError};
use crate::session::{ActiveSandboxManager, ReconnectionManager};
use crate::templates::TemplateCatalog;

/// Everything a request handler needs to get sandboxes for sessions.
pub struct SandboxContext {
    catalog: Arc<TemplateCatalog>,
    pool: Arc<SandboxPool>,
    active: Arc<ActiveSandboxManager>,
    sessions: ReconnectionManager,
}

impl SandboxContext {
    /// Connects to the configured backend and builds the managers.
    pub async fn from_config(config: &Config) -> Result<Self, SandboxError> {
        let catalog = Arc::new(catalog(config));
        let provisioner: Arc<dyn Provisioner> = match config.provisioner.backend {
            Backend::Docker => Arc::new(
                DockerProvisioner::connect_local(catalog.clone(), config.provisioner.docker.clone())
                    .await?,
            ),
            Backend::Http => Arc::new(HttpProvisioner::new(&config.provisioner.http)?),
        };
        Ok(Self::with_provisioner(config, catalog, provisioner))
    }

    /// Builds the managers around an existing provisioner.
    pub fn with_provisioner(
        config: &Config,
        catalog: Arc<TemplateCatalog>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        let pool = SandboxPool::new(provisioner.clone(), catalog.clone(), config.pool.clone());
        let active = Arc::new(ActiveSandboxManager::new(config.active.policy));
        let sessions = ReconnectionManager::new(provisioner, active.clone(), config.reconnect.clone())
            .with_pool(pool.clone())
            .with_sandbox_timeout(config.pool.sandbox_timeout());

        Self {
            catalog,
            pool,
            active,
            sessions,
        }
    }

    /// Template catalog in use.
    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    /// The warm pool.
    pub fn pool(&self) -> &Arc<SandboxPool> {
        &self.pool
    }

    /// Active sandbox registry.
    pub fn active(&self) -> &ActiveSandboxManager {
        &self.active
    }

    /// Session-level entry point for getting sandboxes.
    pub fn sessions(&self) -> &ReconnectionManager {
        &self.sessions
    }

    /// Warms the pool. Empty `templates` means the configured defaults.
    pub async fn start(&self, templates: &[String]) {
        self.pool.initialize(templates).await;
    }

    /// Closes active sandboxes, then shuts the pool down.
    pub async fn shutdown(&self) {
        let closed = self.active.close_current().await;
        for id in &closed {
            self.pool.discard(id).await;
        }
        info!(closed = closed.len(), "Closed active sandboxes");
        self.pool.shutdown().await;
    }
}

/// Built-in templates with the config's additions and overrides.
pub fn catalog(config: &Config) -> TemplateCatalog {
    TemplateCatalog::builtin().with_overrides(config.templates.iter().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::sandbox::mock::MockProvisioner;
    use crate::templates::{Runtime, Template};

    fn context(provisioner: Arc<MockProvisioner>) -> SandboxContext {
        let config = Config {
            pool: PoolConfig {
                size: 2,
                ..PoolConfig::default()
            },
            ..Config::default()
        };
        SandboxContext::with_provisioner(&config, Arc::new(catalog(&config)), provisioner)
    }

    #[test]
    fn test_catalog_applies_overrides() {
        let config = Config {
            templates: vec![
                Template::new("nextjs-developer", Runtime::Node).with_image("node:22"),
                Template::new("rust-dev", Runtime::Plain).with_image("rust:1"),
            ],
            ..Config::default()
        };
        let catalog = catalog(&config);

        assert_eq!(catalog.get("nextjs-developer").unwrap().image(), "node:22");
        assert_eq!(catalog.get("rust-dev").unwrap().image(), "rust:1");
        assert!(catalog.get("vue-developer").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle() {
        let provisioner = Arc::new(MockProvisioner::new());
        let ctx = context(provisioner.clone());

        ctx.start(&[]).await;
        assert_eq!(ctx.pool().get_total_sandboxes().await, 2);

        let acquired = ctx
            .sessions()
            .get_or_create_sandbox("s1", "nextjs-developer")
            .await
            .unwrap();
        assert!(ctx.active().is_active("s1").await);

        ctx.shutdown().await;

        assert!(ctx.active().is_empty().await);
        assert_eq!(ctx.pool().get_total_sandboxes().await, 0);
        // Every sandbox is killed exactly once, the active one included
        assert_eq!(provisioner.sandbox(acquired.sandbox.id()).unwrap().kill_count(), 1);
        assert_eq!(provisioner.total_kills(), provisioner.created_ids().len());
    }
}
