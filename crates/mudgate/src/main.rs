//! The `mudgate` server binary.

use std::path::PathBuf;

use clap::Parser;
use mudgate::logging;
use mudgate::prelude::*;
use tracing::{error, info};

/// Connection and session core for MUD servers.
#[derive(Debug, Parser)]
#[command(name = "mudgate", version, about)]
struct Cli {
    /// Configuration file (TOML). Defaults are used if it does not exist.
    #[arg(short, long, default_value = "mudgate.toml")]
    config: PathBuf,

    /// Address to bind, overriding the config.
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on, overriding the config.
    #[arg(short, long)]
    port: Option<u16>,

    /// Log filter, overriding the config (e.g. `debug`, `mudgate=trace`).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), MudgateError> {
    let cli = Cli::parse();

    let mut config = ServerConfig::load(&cli.config).await?;
    if let Some(bind) = cli.bind {
        config.network.bind_address = bind;
    }
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    let sink = logging::init(&config.logging)?;
    info!(config = %cli.config.display(), "starting mudgate");

    let server = MudServer::builder()
        .config(config)
        .log_sink(sink)
        .build()
        .await?;

    let mut report = server.start().await;
    if !report.is_ok() {
        for (name, e) in &report.failed {
            error!(subsystem = %name, error = %e, "failed to start");
        }
        server.shutdown().await;
        let (_, first) = report.failed.remove(0);
        return Err(first.into());
    }

    if let Some(addr) = server.local_addr() {
        info!(%addr, "mudgate running; press Ctrl-C to stop");
    }
    tokio::signal::ctrl_c().await?;

    server.shutdown().await;
    Ok(())
}
