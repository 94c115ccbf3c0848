//! Node-local DHCP network configuration agent.
//!
//! Receives resource lifecycle events over HTTP, reconciles them against a
//! local cache of network state, and drives a DHCP backend (dnsmasq) to
//! match.
//!
//! # Architecture Overview
//!
//! ```text
//!   Control plane                ┌────────────────────────────────────┐
//!   lifecycle events             │             DHCP AGENT             │
//!   ─────────────────────────────┼─▶ http/server ──▶ agent/reconciler │
//!                                │                        │           │
//!                                │        agent/cache ◀───┤           │
//!                                │                        ▼           │
//!                                │                  driver/dnsmasq    │
//!                                │                        │           │
//!                                │   process/monitor ◀────┤           │
//!                                │   process/executor ◀───┘           │
//!                                └────────────────────────────────────┘
//!                                         │
//!                                         ▼
//!                              dnsmasq processes (one per network)
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::Parser;
use tokio::net::TcpListener;

use dhcp_agent::agent::{DhcpAgent, NetworkCache, SharedCache};
use dhcp_agent::config::{load_config, AgentConfig};
use dhcp_agent::driver::build_driver;
use dhcp_agent::http::HttpServer;
use dhcp_agent::lifecycle::Shutdown;
use dhcp_agent::observability::{logging, metrics};
use dhcp_agent::process::{PrivilegedExecutor, ProcessMonitor};

#[derive(Parser)]
#[command(
    name = "dhcp-agent",
    version,
    about = "Node-local DHCP network configuration agent"
)]
struct Args {
    /// Path to the TOML configuration file. Built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => AgentConfig::default(),
    };
    logging::init_logging(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        state_path = %config.agent.state_path,
        backend = %config.driver.backend,
        "dhcp-agent starting"
    );

    let config = Arc::new(config);

    // The driver writes per-network pid and lease files under here.
    std::fs::create_dir_all(Path::new(&config.agent.state_path).join("dhcp"))?;

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let shutdown = Arc::new(Shutdown::new());

    let executor = Arc::new(PrivilegedExecutor::new(&config.rootwrap));
    // An unreachable rootwrap daemon is fatal here, not on the first
    // privileged command.
    executor.connect_daemon()?;

    let monitor = Arc::new(ProcessMonitor::new(
        config.process_monitor.clone(),
        shutdown.clone(),
    ));
    let cache: SharedCache = Arc::new(Mutex::new(NetworkCache::new()));
    let driver = build_driver(
        config.clone(),
        executor,
        monitor.clone(),
        cache.clone(),
    )?;

    match driver.check_version() {
        Ok(version) => tracing::info!(backend = %config.driver.backend, version = %version,
            "DHCP backend available"),
        Err(e) => tracing::warn!(backend = %config.driver.backend, error = %e,
            "Unable to determine DHCP backend version"),
    }

    let agent = Arc::new(DhcpAgent::new(config.clone(), driver, cache));

    // Recover networks the backend was already serving before we started.
    {
        let agent = agent.clone();
        tokio::task::spawn_blocking(move || agent.populate_networks_cache()).await?;
    }

    tokio::spawn(monitor.clone().run(shutdown.subscribe()));

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl+C received");
                shutdown.trigger();
            }
        });
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(&config, agent, shutdown.clone());
    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
