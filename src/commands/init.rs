//! Write a default `sandpool.toml`.
//!
//! The decision logic takes closures for filesystem access so it can be
//! tested without touching disk.

use anyhow::{Context, Result};
use colored::Colorize;
use sandpool::templates::SANDPOOL_TOML;
use std::fs;
use std::path::Path;
use tracing::info;

// -----------------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------------

/// Runs the init command, writing the config file at `path`.
pub(crate) fn run(path: &Path, force: bool) -> Result<()> {
    info!("Writing default configuration to {}", path.display());

    let result = write_config(
        force,
        || path.exists(),
        |content| {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
            fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
        },
    )?;

    print!("{}", format_result(path, result));
    Ok(())
}

// -----------------------------------------------------------------------------
// Internal types
// -----------------------------------------------------------------------------

/// Outcome of writing the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteResult {
    /// File was created.
    Created,
    /// File was overwritten.
    Overwritten,
    /// File was skipped (already exists).
    Skipped,
}

// -----------------------------------------------------------------------------
// Helper functions
// -----------------------------------------------------------------------------

fn write_config<E, W>(force: bool, exists: E, write: W) -> Result<WriteResult>
where
    E: Fn() -> bool,
    W: FnOnce(&str) -> Result<()>,
{
    let existed = exists();
    if existed && !force {
        return Ok(WriteResult::Skipped);
    }

    write(SANDPOOL_TOML)?;
    Ok(if existed {
        WriteResult::Overwritten
    } else {
        WriteResult::Created
    })
}

fn format_result(path: &Path, result: WriteResult) -> String {
    let path = path.display().to_string();
    match result {
        WriteResult::Created => format!(
            "{} Created {}\n  Edit it to choose a backend and templates, then run {}\n",
            "✓".green().bold(),
            path.cyan(),
            "sandpool run".green()
        ),
        WriteResult::Overwritten => format!("{} {} (overwritten)\n", "↻".blue(), path),
        WriteResult::Skipped => format!(
            "{} {} (already exists, use --force to overwrite)\n",
            "⊘".yellow(),
            path
        ),
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
