//! Magique Node Binary
//!
//! Runs one platform until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use magique_platform::{Agent, BasicAgent, Platform, PlatformConfig, DEFAULT_PORT};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Host a Magique agent platform
#[derive(Parser, Debug)]
#[command(name = "magique-node", version, about, long_about = None)]
struct Args {
    /// Host or IP announced to other platforms [default: the bind address,
    /// or this machine's resolved address when binding every interface]
    #[arg(long)]
    host: Option<String>,

    /// Interface to listen on
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Listening port (0 picks a free one)
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Outbound connect timeout in milliseconds
    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// How long agents get to acknowledge termination, in milliseconds
    #[arg(long, default_value_t = 2000)]
    shutdown_grace_ms: u64,

    /// Short name of a basic agent to create (repeatable)
    #[arg(short, long = "agent")]
    agents: Vec<String>,

    /// Platform to dial at startup, as host:port (repeatable)
    #[arg(short, long = "connect")]
    peers: Vec<String>,
}

impl Args {
    fn config(&self) -> PlatformConfig {
        let mut config = PlatformConfig::default()
            .with_bind_address(self.bind.clone())
            .with_port(self.port)
            .with_shutdown_grace(Duration::from_millis(self.shutdown_grace_ms));

        if let Some(host) = &self.host {
            config = config.with_host(host.clone());
        }
        if let Some(ms) = self.connect_timeout_ms {
            config = config.with_connect_timeout(Duration::from_millis(ms));
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let platform = Platform::start(args.config())
        .await
        .with_context(|| format!("cannot start platform on port {}", args.port))?;
    info!("Platform {} ready", platform.name());

    for short in &args.agents {
        match platform.add_agent(BasicAgent::new(short.as_str())).await {
            Ok(agent) => info!("Hosting {}", agent.name()),
            Err(e) => error!("Cannot create agent {}: {}", short, e),
        }
    }

    for peer in &args.peers {
        if let Err(e) = platform.connect(peer).await {
            warn!("Cannot connect to {}: {}", peer, e);
        }
    }

    tokio::signal::ctrl_c().await.context("cannot listen for Ctrl-C")?;
    info!("Interrupted, stopping platform");
    platform.stop().await;

    Ok(())
}
