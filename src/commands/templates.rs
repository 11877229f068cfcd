//! Template listing.

use anyhow::Result;
use sandpool::config::Config;
use sandpool::context;

use super::format::format_catalog;

/// Prints the built-in templates merged with the config's additions.
pub(crate) fn run(config: &Config) -> Result<()> {
    let catalog = context::catalog(config);
    print!("{}", format_catalog(&catalog));
    Ok(())
}
