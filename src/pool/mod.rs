//! Per-template pools of pre-warmed sandboxes.
//!
//! The pool keeps a target number of idle, verified sandboxes per template so
//! callers get a ready environment without waiting for creation. Checkouts
//! that drain a pool schedule a debounced refill; a periodic maintenance sweep
//! retires sandboxes that are too old, idle too long, or failing.

mod entry;
mod scheduler;
mod stats;
mod warmup;

pub use stats::{PoolStats, TemplateStats};

use futures_util::future::join_all;
use futures_util::{stream, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::sandbox::{CreateOptions, Provisioner, SandboxError, SandboxRef};
use crate::templates::TemplateCatalog;
use entry::PooledSandbox;
use scheduler::Debouncer;

/// Pre-warmed sandboxes, keyed by template.
pub struct SandboxPool {
    provisioner: Arc<dyn Provisioner>,
    catalog: Arc<TemplateCatalog>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    refills: Arc<Debouncer>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

#[derive(Default)]
struct PoolState {
    pools: HashMap<String, Vec<PooledSandbox>>,
    stats: HashMap<String, PoolStats>,
    target_sizes: HashMap<String, usize>,
    /// Creations reserved by refills that have not finished yet.
    pending: HashMap<String, usize>,
}

impl PoolState {
    fn entries(&mut self, template: &str) -> &mut Vec<PooledSandbox> {
        self.pools.entry(template.to_string()).or_default()
    }

    fn stats(&mut self, template: &str) -> &mut PoolStats {
        self.stats.entry(template.to_string()).or_default()
    }

    fn find(&mut self, template: &str, sandbox_id: &str) -> Option<&mut PooledSandbox> {
        self.pools
            .get_mut(template)?
            .iter_mut()
            .find(|e| e.id() == sandbox_id)
    }

    fn target_size(&self, template: &str, default: usize) -> usize {
        self.target_sizes.get(template).copied().unwrap_or(default)
    }

    fn available(&self, template: &str, now: Instant, max_age: Duration) -> usize {
        self.pools.get(template).map_or(0, |entries| {
            entries
                .iter()
                .filter(|e| e.is_available(now, max_age))
                .count()
        })
    }

    fn pending(&self, template: &str) -> usize {
        self.pending.get(template).copied().unwrap_or(0)
    }

    fn reserve(&mut self, template: &str, count: usize) {
        *self.pending.entry(template.to_string()).or_default() += count;
    }

    fn settle(&mut self, template: &str, count: usize) {
        if let Some(pending) = self.pending.get_mut(template) {
            *pending = pending.saturating_sub(count);
        }
    }

    /// Drops entries that are neither valid nor checked out and returns them.
    fn evict_stale(&mut self, template: &str, now: Instant, max_age: Duration) -> Vec<SandboxRef> {
        let mut stale = Vec::new();
        if let Some(entries) = self.pools.get_mut(template) {
            entries.retain(|e| {
                if e.in_use || e.is_valid(now, max_age) {
                    true
                } else {
                    stale.push(e.sandbox.clone());
                    false
                }
            });
        }
        stale
    }
}

impl SandboxPool {
    /// Creates an empty pool. Call [`SandboxPool::initialize`] to warm it.
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        catalog: Arc<TemplateCatalog>,
        config: PoolConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            provisioner,
            catalog,
            config,
            state: Mutex::new(PoolState::default()),
            refills: Debouncer::new(),
            maintenance: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Pool settings.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Returns true once [`SandboxPool::shutdown`] has started.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Warms the given templates and starts periodic maintenance.
    ///
    /// With no templates, the configured defaults are used. Each template gets
    /// an initial burst of at most `warmup_batch` sandboxes created in
    /// parallel; a delayed refill tops it up to the target size afterwards.
    /// Individual creation failures are logged and do not fail the call.
    pub async fn initialize(self: &Arc<Self>, templates: &[String]) {
        self.shutting_down.store(false, Ordering::SeqCst);

        let templates: Vec<String> = if templates.is_empty() {
            self.config.templates.clone()
        } else {
            templates.to_vec()
        };

        info!(
            templates = ?templates,
            pool_size = self.config.size,
            backend = self.provisioner.name(),
            "Initializing sandbox pool"
        );

        join_all(templates.iter().map(|t| self.warm_template(t))).await;
        self.start_maintenance().await;
    }

    async fn warm_template(self: &Arc<Self>, template: &str) {
        let burst = {
            let mut state = self.state.lock().await;
            let target = state.target_size(template, self.config.size);
            let have = state.available(template, Instant::now(), self.config.max_age())
                + state.pending(template);
            let burst = target.saturating_sub(have).min(self.config.warmup_batch);
            state.reserve(template, burst);
            burst
        };

        let failures = self.create_batch(template, burst).await;
        info!(
            template,
            warmed = burst - failures,
            requested = burst,
            "Initial warm-up finished"
        );

        self.schedule_refill(template, self.config.refill_delay());
    }

    /// Checks out a sandbox for `template`.
    ///
    /// Returns the first idle, valid, warmed sandbox if there is one (a hit).
    /// Otherwise creates one synchronously; creation errors propagate. Either
    /// way the returned sandbox is marked in use until released.
    pub async fn get_sandbox(self: &Arc<Self>, template: &str) -> Result<SandboxRef, SandboxError> {
        if self.is_shutting_down() {
            return Err(SandboxError::ShuttingDown);
        }

        let now = Instant::now();
        let max_age = self.config.max_age();

        let hit = {
            let mut state = self.state.lock().await;
            let target = state.target_size(template, self.config.size);
            state.stats(template).requests += 1;

            let entries = state.entries(template);
            let sandbox = entries
                .iter_mut()
                .find(|e| e.is_ready(now, max_age))
                .map(|e| {
                    e.checkout(now);
                    e.sandbox.clone()
                });
            let remaining = entries
                .iter()
                .filter(|e| e.is_available(now, max_age))
                .count();

            if sandbox.is_some() {
                state.stats(template).hits += 1;
            }
            sandbox.map(|sandbox| (sandbox, remaining, target))
        };

        if let Some((sandbox, remaining, target)) = hit {
            debug!(template, sandbox = %sandbox.id(), remaining, "Checked out warm sandbox");
            if remaining < target.div_ceil(2) {
                self.schedule_refill(template, self.config.refill_fast());
            }
            return Ok(sandbox);
        }

        debug!(template, "No warm sandbox available, creating one");
        let started = Instant::now();
        let created = self
            .provisioner
            .create(template, &self.create_options(template, false))
            .await;

        match created {
            Ok(sandbox) => {
                let now = Instant::now();
                {
                    let mut state = self.state.lock().await;
                    if !self.is_shutting_down() {
                        state.entries(template).push(PooledSandbox::checked_out(
                            sandbox.clone(),
                            now,
                            now.saturating_duration_since(started),
                        ));
                    }
                }
                self.schedule_refill(template, Duration::ZERO);
                Ok(sandbox)
            }
            Err(e) => {
                self.state.lock().await.stats(template).errors += 1;
                warn!(template, error = %e, "Failed to create sandbox on demand");
                Err(e)
            }
        }
    }

    /// Returns a checked-out sandbox to the pool.
    ///
    /// Unknown or already-released sandboxes are ignored. Returns whether the
    /// sandbox was released by this call.
    pub async fn release_sandbox(&self, sandbox: &SandboxRef, template: &str) -> bool {
        let mut state = self.state.lock().await;
        let released = state
            .find(template, sandbox.id())
            .is_some_and(|e| e.release(Instant::now()));
        if released {
            debug!(template, sandbox = %sandbox.id(), "Released sandbox");
        }
        released
    }

    /// Records a failure observed on a pooled sandbox.
    ///
    /// After enough reports the sandbox is no longer handed out and the next
    /// maintenance sweep retires it. Returns the new error count.
    pub async fn report_error(&self, sandbox: &SandboxRef, template: &str) -> Option<u32> {
        let mut state = self.state.lock().await;
        let entry = state.find(template, sandbox.id())?;
        entry.error_count += 1;
        if entry.error_count >= entry::MAX_ERRORS {
            warn!(template, sandbox = %sandbox.id(), errors = entry.error_count, "Sandbox marked unhealthy");
        }
        Some(entry.error_count)
    }

    /// Stops tracking a sandbox without killing it.
    ///
    /// Used when ownership moves elsewhere, e.g. a sandbox that was killed as
    /// a superseded session sandbox. Returns whether it was tracked.
    pub async fn discard(&self, sandbox_id: &str) -> bool {
        let mut state = self.state.lock().await;
        for entries in state.pools.values_mut() {
            if let Some(pos) = entries.iter().position(|e| e.id() == sandbox_id) {
                entries.remove(pos);
                debug!(sandbox = %sandbox_id, "Discarded sandbox from pool");
                return true;
            }
        }
        false
    }

    /// Schedules a refill of `template` after `delay`, replacing any pending one.
    fn schedule_refill(self: &Arc<Self>, template: &str, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        let pool = Arc::downgrade(self);
        let key = template.to_string();
        self.refills.schedule(template, delay, async move {
            if let Some(pool) = pool.upgrade() {
                pool.refill_pool(&key).await;
            }
        });
    }

    /// Retires stale sandboxes and creates one batch toward the target size.
    async fn refill_pool(self: &Arc<Self>, template: &str) {
        if self.is_shutting_down() {
            return;
        }

        let now = Instant::now();
        let max_age = self.config.max_age();

        let (stale, needed, batch) = {
            let mut state = self.state.lock().await;
            let stale = state.evict_stale(template, now, max_age);
            let target = state.target_size(template, self.config.size);
            let have = state.available(template, now, max_age) + state.pending(template);
            let needed = target.saturating_sub(have);
            let batch = needed.min(self.config.warmup_batch);
            state.reserve(template, batch);
            (stale, needed, batch)
        };

        kill_all(&stale).await;

        if batch == 0 {
            return;
        }

        debug!(template, needed, batch, "Refilling pool");
        let failures = self.create_batch(template, batch).await;

        if failures > 0 {
            warn!(
                template,
                failures,
                retry_secs = self.config.refill_retry().as_secs(),
                "Refill incomplete, retrying later"
            );
            self.schedule_refill(template, self.config.refill_retry());
        } else if needed > batch {
            self.schedule_refill(template, self.config.refill_delay());
        }
    }

    /// Creates `count` sandboxes in parallel against an existing reservation.
    /// Returns the number of failures.
    async fn create_batch(self: &Arc<Self>, template: &str, count: usize) -> usize {
        if count == 0 {
            return 0;
        }
        let results = join_all((0..count).map(|_| self.create_warm(template))).await;
        self.state.lock().await.settle(template, count);

        let mut failures = 0;
        for result in results {
            if let Err(e) = result {
                if !e.is_shutting_down() {
                    warn!(template, error = %e, "Failed to create pooled sandbox");
                }
                failures += 1;
            }
        }
        failures
    }

    /// Creates one sandbox, adds it to the pool and runs its warm-up check.
    async fn create_warm(&self, template: &str) -> Result<(), SandboxError> {
        let started = Instant::now();
        let sandbox = self
            .provisioner
            .create(template, &self.create_options(template, true))
            .await?;

        let accepted = {
            let mut state = self.state.lock().await;
            if self.is_shutting_down() {
                false
            } else {
                state
                    .entries(template)
                    .push(PooledSandbox::warming(sandbox.clone(), Instant::now()));
                true
            }
        };
        if !accepted {
            kill_quietly(&sandbox).await;
            return Err(SandboxError::ShuttingDown);
        }

        let resolved = self.catalog.resolve(template);
        let outcome = warmup::warm_up(&sandbox, &resolved, self.config.warmup_timeout()).await;

        let init_time = started.elapsed();
        if let Some(entry) = self.state.lock().await.find(template, sandbox.id()) {
            entry.warmup_complete = true;
            entry.warmup_verified = outcome.is_verified();
            entry.init_time = init_time;
        }

        debug!(
            template,
            sandbox = %sandbox.id(),
            init_ms = init_time.as_millis(),
            verified = outcome.is_verified(),
            "Sandbox warmed"
        );
        Ok(())
    }

    fn create_options(&self, template: &str, pooled: bool) -> CreateOptions {
        CreateOptions::with_timeout(self.config.sandbox_timeout())
            .meta("template", template)
            .meta("pooled", pooled.to_string())
    }

    /// Retires stale sandboxes across all templates and tops up low pools.
    ///
    /// Returns the number of sandboxes retired.
    pub async fn perform_maintenance(self: &Arc<Self>) -> usize {
        let now = Instant::now();
        let max_age = self.config.max_age();

        let (stale, low) = {
            let mut state = self.state.lock().await;
            let templates: Vec<String> = state.pools.keys().cloned().collect();
            let mut stale = Vec::new();
            let mut low = Vec::new();
            for template in templates {
                stale.extend(state.evict_stale(&template, now, max_age));
                let target = state.target_size(&template, self.config.size);
                if state.available(&template, now, max_age) < target.div_ceil(2) {
                    low.push(template);
                }
            }
            (stale, low)
        };

        if !stale.is_empty() {
            info!(count = stale.len(), "Retiring stale sandboxes");
            kill_all(&stale).await;
        }
        for template in &low {
            debug!(template, "Pool below half capacity, refilling");
            self.schedule_refill(template, Duration::ZERO);
        }

        stale.len()
    }

    async fn start_maintenance(self: &Arc<Self>) {
        let mut slot = self.maintenance.lock().await;
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let period = self.config.maintenance_interval();
        let pool: Weak<Self> = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                pool.perform_maintenance().await;
            }
        }));
    }

    /// Creates `count` additional sandboxes for `template`, at most
    /// `warmup_batch` at a time. Returns how many were created.
    pub async fn pre_warm_template(self: &Arc<Self>, template: &str, count: usize) -> usize {
        info!(template, count, "Pre-warming sandboxes");

        let results: Vec<Result<(), SandboxError>> = stream::iter(0..count)
            .map(|_| self.create_warm(template))
            .buffer_unordered(self.config.warmup_batch.max(1))
            .collect()
            .await;

        let created = results.iter().filter(|r| r.is_ok()).count();
        for e in results.iter().filter_map(|r| r.as_ref().err()) {
            warn!(template, error = %e, "Pre-warm creation failed");
        }
        info!(template, created, requested = count, "Pre-warm finished");
        created
    }

    /// Kills every idle sandbox for `template` and refills immediately.
    /// Checked-out sandboxes are left alone.
    pub async fn force_refresh(self: &Arc<Self>, template: &str) {
        let idle: Vec<SandboxRef> = {
            let mut state = self.state.lock().await;
            let mut idle = Vec::new();
            state.entries(template).retain(|e| {
                if e.in_use {
                    true
                } else {
                    idle.push(e.sandbox.clone());
                    false
                }
            });
            idle
        };

        info!(template, count = idle.len(), "Force refreshing pool");
        self.refills.cancel(template);
        kill_all(&idle).await;
        self.refill_pool(template).await;
    }

    /// Changes the target size for `template`.
    ///
    /// Growing schedules an immediate refill. Shrinking retires surplus idle
    /// sandboxes right away.
    pub async fn set_pool_size(self: &Arc<Self>, template: &str, size: usize) {
        let now = Instant::now();
        let max_age = self.config.max_age();

        let surplus: Vec<SandboxRef> = {
            let mut state = self.state.lock().await;
            state.target_sizes.insert(template.to_string(), size);

            let mut excess = state.available(template, now, max_age).saturating_sub(size);
            let mut surplus = Vec::new();
            // Oldest idle sandboxes go first
            state.entries(template).retain(|e| {
                if excess > 0 && e.is_available(now, max_age) {
                    excess -= 1;
                    surplus.push(e.sandbox.clone());
                    false
                } else {
                    true
                }
            });
            surplus
        };

        info!(template, size, retired = surplus.len(), "Pool size updated");
        kill_all(&surplus).await;
        self.schedule_refill(template, Duration::ZERO);
    }

    /// Per-template snapshot of counters and occupancy.
    pub async fn get_pool_stats(&self) -> BTreeMap<String, TemplateStats> {
        let now = Instant::now();
        let max_age = self.config.max_age();
        let state = self.state.lock().await;

        let mut templates: Vec<&String> = state.pools.keys().collect();
        templates.extend(state.stats.keys());

        templates
            .into_iter()
            .map(|template| {
                let entries = state.pools.get(template).map_or(&[][..], Vec::as_slice);
                let counters = state.stats.get(template).copied().unwrap_or_default();
                let target = state.target_size(template, self.config.size);
                (
                    template.clone(),
                    TemplateStats::collect(counters, entries, target, now, max_age),
                )
            })
            .collect()
    }

    /// Templates that currently have sandboxes, sorted.
    pub async fn get_active_templates(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut templates: Vec<String> = state
            .pools
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(template, _)| template.clone())
            .collect();
        templates.sort();
        templates
    }

    /// Sandboxes tracked across all templates, in use or not.
    pub async fn get_total_sandboxes(&self) -> usize {
        self.state.lock().await.pools.values().map(Vec::len).sum()
    }

    /// Stops background work and kills every tracked sandbox.
    ///
    /// Kill failures are logged and tolerated. Later calls to `get_sandbox`
    /// fail until the pool is initialized again. Safe to call more than once.
    pub async fn shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            info!("Shutting down sandbox pool");
        }

        let cancelled = self.refills.cancel_all();
        if let Some(handle) = self.maintenance.lock().await.take() {
            handle.abort();
        }

        let sandboxes: Vec<SandboxRef> = {
            let mut state = self.state.lock().await;
            let sandboxes = state
                .pools
                .drain()
                .flat_map(|(_, entries)| entries.into_iter().map(|e| e.sandbox))
                .collect();
            state.stats.clear();
            state.pending.clear();
            sandboxes
        };

        let failed = kill_all(&sandboxes).await;
        info!(
            killed = sandboxes.len() - failed,
            failed,
            cancelled_refills = cancelled,
            "Sandbox pool shut down"
        );
    }
}

/// Kills sandboxes concurrently. Returns the number of failures.
async fn kill_all(sandboxes: &[SandboxRef]) -> usize {
    let results = join_all(sandboxes.iter().map(kill_quietly)).await;
    results.into_iter().filter(|killed| !killed).count()
}

async fn kill_quietly(sandbox: &SandboxRef) -> bool {
    match sandbox.kill().await {
        Ok(()) => true,
        Err(e) => {
            warn!(sandbox = %sandbox.id(), error = %e, "Failed to kill sandbox");
            false
        }
    }
}
