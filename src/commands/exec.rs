//! One-shot command execution in a sandbox.
//!
//! Either creates a sandbox for the template or reconnects to an existing
//! one by id. The sandbox is killed afterwards unless `--keep` is given, in
//! which case its id can be passed back with `--sandbox`.

use anyhow::{Context, Result};
use sandpool::config::Config;
use sandpool::context::SandboxContext;
use tracing::debug;

use super::format::format_exec_status;

/// Options for `sandpool exec`.
#[derive(Debug, Clone)]
pub(crate) struct ExecOptions {
    pub template: String,
    /// Existing sandbox to reconnect to.
    pub sandbox: Option<String>,
    /// Leave the sandbox running afterwards.
    pub keep: bool,
    pub command: Vec<String>,
}

pub(crate) async fn run(mut config: Config, options: ExecOptions) -> Result<()> {
    // A single argument is taken as a shell snippet as-is
    let command = match options.command.as_slice() {
        [] => anyhow::bail!("No command given"),
        [snippet] => snippet.clone(),
        args => shell_words::join(args),
    };
    let session = format!("cli-{}", uuid::Uuid::new_v4().simple());

    // A single command has no use for spares
    config.pool.size = 0;

    let ctx = SandboxContext::from_config(&config)
        .await
        .context("Failed to connect to provisioning backend")?;

    if let Some(id) = &options.sandbox {
        ctx.sessions().bind(&session, id).await;
    }

    debug!(session = %session, command = %command, "Executing");
    let result = async {
        let acquired = ctx
            .sessions()
            .get_or_create_sandbox(&session, &options.template)
            .await
            .context("Failed to get a sandbox")?;
        let output = acquired
            .sandbox
            .run_command(&command)
            .await
            .context("Failed to run command")?;
        Ok::<_, anyhow::Error>((acquired, output))
    }
    .await;

    match (&result, options.keep) {
        (Ok((acquired, _)), true) => {
            ctx.pool().discard(acquired.sandbox.id()).await;
            ctx.pool().shutdown().await;
        }
        _ => ctx.shutdown().await,
    }
    let (acquired, output) = result?;

    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    eprintln!(
        "{}",
        format_exec_status(acquired.sandbox.id(), acquired.is_new, &output)
    );

    if !output.success() {
        anyhow::bail!("Command exited with status {}", output.exit_code);
    }
    Ok(())
}
