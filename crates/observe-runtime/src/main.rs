//! Standalone observability agent.
//!
//! Boots the runtime from a configuration file, serves diagnostics and
//! reloads whenever the file changes, until interrupted.
//!
//! # Configuration
//!
//! Configuration is loaded from (in order of priority):
//! 1. Default values
//! 2. The file given by `--config` (YAML, or TOML by extension)
//! 3. Standard `OTEL_*` environment variables
//! 4. Environment variables with the `OBSERVE_` prefix, nested with `__`

use anyhow::{Context, Result};
use clap::Parser;
use observe_config::{ConfigLoader, ConfigSource, DEFAULT_CONFIG_PATH};
use observe_runtime::{Client, DEFAULT_DEBOUNCE, init_logging};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "observe-agent", version, about)]
struct Args {
    /// Configuration file to load and watch.
    #[arg(long, short, env = "OBSERVE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Quiet period after the last file change before reloading.
    #[arg(long, default_value_t = DEFAULT_DEBOUNCE.as_millis() as u64)]
    debounce_ms: u64,

    /// Do not watch the configuration file.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let source = ConfigLoader::new().with_file(&args.config).build();

    // The log level comes from the same configuration the runtime uses.
    let initial = source
        .load()
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let logs = init_logging(&initial.logging).context("failed to initialise logging")?;

    let client = Client::builder()
        .source(source)
        .debounce(Duration::from_millis(args.debounce_ms))
        .watch(!args.no_watch)
        .install_global_providers(true)
        .log_handle(logs)
        .init()
        .await
        .context("failed to start observability runtime")?;

    if let Some(addr) = client.current().diagnostics_addr() {
        tracing::info!(%addr, "Diagnostics available at http://{addr}/observe/status");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("Shutting down");

    client
        .shutdown()
        .await
        .context("runtime shutdown failed")?;

    Ok(())
}
