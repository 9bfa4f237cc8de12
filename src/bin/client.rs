//! muxtun client
//!
//! Maintains a fixed pool of authenticated, encrypted tunnels to the
//! remote peer and multiplexes local TCP connections through whichever
//! tunnel is carrying the least traffic.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use muxtun::{Client, Config};
use std::sync::Arc;
use tracing::info;

/// muxtun client - multiplex local TCP connections over tunnels
#[derive(Parser, Debug)]
#[command(name = "muxtun-client")]
#[command(about = "muxtun client - TCP multiplexing tunnel")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Upstream server address (overrides config)
    #[arg(short, long)]
    server: Option<String>,

    /// Local listen address (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Number of tunnels to maintain (overrides config)
    #[arg(short, long)]
    tunnels: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log_level))
        .init();

    let config = Config::load(&args.config).context("Failed to load configuration")?;
    let mut client_config = config
        .client
        .ok_or_else(|| anyhow!("No [client] section in config file"))?;

    if let Some(server) = args.server {
        client_config.server = server;
    }
    if let Some(listen) = args.listen {
        client_config.listen = listen;
    }
    if let Some(tunnels) = args.tunnels {
        client_config.tunnels = tunnels;
    }

    info!("muxtun client v{}", muxtun::VERSION);
    info!("Server: {}", client_config.server);
    info!("Tunnels: {}", client_config.tunnels);

    let client = Arc::new(Client::new(&client_config));
    client.start().await.context("Startup failed")?;

    // SIGUSR1 dumps pool and hub status without interrupting traffic.
    #[cfg(unix)]
    {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let Ok(mut usr1) = signal(SignalKind::user_defined1()) else {
                return;
            };
            while usr1.recv().await.is_some() {
                client.status();
            }
        });
    }

    tokio::select! {
        _ = client.wait() => {
            info!("Listener stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    Ok(())
}
