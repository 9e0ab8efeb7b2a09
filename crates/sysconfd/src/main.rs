//! sysconfd - system configuration daemon.
//!
//! Applies ietf-system configuration transactions delivered over a Unix
//! socket to the local host.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use sysconf_common::{Host, LinuxHost};
use sysconf_shared::VERSION;
use sysconfd::config::{Config, CONFIG_PATH};
use sysconfd::{rpc_server, startup, DaemonState, Dispatcher};

#[derive(Parser)]
#[command(name = "sysconfd")]
#[command(about = "Applies ietf-system configuration to the local host", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Socket path (overrides [daemon] socket_path)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = Config::load_from_path(&cli.config);
    let log_level = loaded
        .as_ref()
        .map(|c| c.daemon.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));
    fmt().with_env_filter(filter).with_target(true).init();

    let mut config = match loaded {
        Ok(config) => {
            info!("Loaded config from {}", cli.config.display());
            config
        }
        Err(e) => {
            warn!("Config not loaded, using defaults: {:#}", e);
            Config::default()
        }
    };
    if let Some(socket) = cli.socket {
        config.daemon.socket_path = socket;
    }
    config.validate().context("Invalid configuration")?;

    if cli.check_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    info!("sysconfd v{} starting", VERSION);

    let settings = config.reconcile_settings();
    std::fs::create_dir_all(&settings.state_dir)
        .with_context(|| format!("Failed to create {}", settings.state_dir.display()))?;

    let host: Arc<dyn Host> = Arc::new(LinuxHost::new(config.host_paths(), config.service_timeout()));
    let running = startup::synchronize(host.as_ref(), &settings).context("Startup sync failed")?;
    let dispatcher = Dispatcher::new(host.clone(), &settings, running);
    let state = DaemonState::new(host, dispatcher).shared();

    rpc_server::serve(state, &config.daemon.socket_path, shutdown_signal()).await?;
    info!("sysconfd stopped");
    Ok(())
}

/// Resolves on SIGTERM or Ctrl-C.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(e) => {
            error!("Failed to register SIGTERM handler: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to wait for Ctrl-C: {}", e);
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = tokio::signal::ctrl_c() => info!("Interrupt received"),
    }
}
