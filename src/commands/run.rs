//! Long-running pool process.
//!
//! Warms the configured templates, keeps the pool topped up until a
//! shutdown signal arrives, then kills every sandbox it owns.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sandpool::config::Config;
use sandpool::context::SandboxContext;
use sandpool::pool::TemplateStats;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

use super::format::{format_banner, format_report_header, format_stats, BannerInfo};

/// JSON shape of a stats report.
#[derive(Serialize)]
struct StatsReport<'a> {
    captured_at: DateTime<Utc>,
    templates: &'a BTreeMap<String, TemplateStats>,
}

/// Options for `sandpool run`.
#[derive(Debug, Clone)]
pub(crate) struct RunOptions {
    /// Templates to warm; empty means the configured defaults.
    pub templates: Vec<String>,
    /// Seconds between stats reports (0 disables them).
    pub stats_interval: u64,
    /// Print stats as JSON instead of a table.
    pub json: bool,
}

pub(crate) async fn run(config: Config, options: RunOptions) -> Result<()> {
    let templates = if options.templates.is_empty() {
        config.pool.templates.clone()
    } else {
        options.templates.clone()
    };

    print!(
        "{}",
        format_banner(&BannerInfo {
            backend: config.provisioner.backend.to_string(),
            templates: templates.clone(),
            pool_size: config.pool.size,
            max_age_secs: config.pool.max_age_secs,
            active_policy: config.active.policy.to_string(),
        })
    );

    let ctx = SandboxContext::from_config(&config)
        .await
        .context("Failed to connect to provisioning backend")?;
    ctx.start(&templates).await;
    info!(
        total = ctx.pool().get_total_sandboxes().await,
        "Pool warmed"
    );

    let mut ticker = (options.stats_interval > 0).then(|| {
        let period = Duration::from_secs(options.stats_interval);
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    });

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = async {
                match ticker.as_mut() {
                    Some(ticker) => ticker.tick().await,
                    None => std::future::pending().await,
                }
            } => {
                report(&ctx, options.json).await?;
            }
        }
    }

    info!("Shutdown signal received");
    report(&ctx, options.json).await?;
    ctx.shutdown().await;
    Ok(())
}

async fn report(ctx: &SandboxContext, json: bool) -> Result<()> {
    let stats = ctx.pool().get_pool_stats().await;
    let captured_at = Utc::now();
    if json {
        let report = StatsReport {
            captured_at,
            templates: &stats,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize stats")?
        );
    } else {
        print!(
            "{}{}",
            format_report_header(captured_at),
            format_stats(&stats)
        );
    }
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
