use anyhow::Result;
use clap::{Parser, Subcommand};
use sandpool::config::{self, Config};
use std::path::PathBuf;

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "sandpool")]
#[command(author, version, about = "Warm sandbox pool with session reconnection")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = config::CONFIG_FILE)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default sandpool.toml
    Init {
        /// Force overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// List available templates
    Templates,

    /// Run the pool until interrupted
    Run {
        /// Templates to warm (defaults to pool.templates)
        #[arg(short, long = "template")]
        templates: Vec<String>,

        /// Seconds between stats reports (0 = disabled)
        #[arg(long, default_value = "60")]
        stats_interval: u64,

        /// Print stats as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a command in a sandbox
    Exec {
        /// Template for a new sandbox
        #[arg(short, long, default_value = "nextjs-developer")]
        template: String,

        /// Reconnect to this sandbox instead of creating one
        #[arg(short, long)]
        sandbox: Option<String>,

        /// Leave the sandbox running afterwards
        #[arg(short, long)]
        keep: bool,

        /// Command to run
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // init must work even when the existing file is broken
    let config = match &cli.command {
        Commands::Init { .. } => Config::load(&cli.config).unwrap_or_default(),
        _ => Config::load(&cli.config)?,
    };
    let _guard = logging::init(cli.verbose, &config.logging)?;

    match cli.command {
        Commands::Init { force } => {
            commands::init::run(&cli.config, force)?;
        }
        Commands::Templates => {
            commands::templates::run(&config)?;
        }
        Commands::Run {
            templates,
            stats_interval,
            json,
        } => {
            commands::run::run(
                config,
                commands::run::RunOptions {
                    templates,
                    stats_interval,
                    json,
                },
            )
            .await?;
        }
        Commands::Exec {
            template,
            sandbox,
            keep,
            command,
        } => {
            commands::exec::run(
                config,
                commands::exec::ExecOptions {
                    template,
                    sandbox,
                    keep,
                    command,
                },
            )
            .await?;
        }
    }

    Ok(())
}
