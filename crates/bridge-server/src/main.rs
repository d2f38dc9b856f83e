//! Bridge-server: HTTP command coordination for terminal trading
//! clients, with venue-side position reconciliation.
//!
//! Usage:
//!   bridge-server [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Config file path (default: config/bridge.toml)
//!   --host <HOST>           Bind address (overrides config)
//!   --port <PORT>           Bind port (overrides config)
//!   --venue-url <URL>       Venue base URL (overrides config)
//!   --no-reconciler         Disable venue polling for this run

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use bridge_common::Journal;
use bridge_server::config::BridgeConfig;
use bridge_server::discovery::{AccountDiscovery, DiscoveryConfig};
use bridge_server::http::{AppContext, run_server};
use bridge_server::inject::{InjectionPolicy, NoInjection, ScriptedSequence};
use bridge_server::reconciler::{PositionReconciler, ReconcilerSupervisor};
use bridge_server::state::BridgeState;
use bridge_venue::client::{VenueClient, VenueClientConfig};

/// CLI arguments for bridge-server.
#[derive(Parser, Debug)]
#[command(name = "bridge-server")]
#[command(about = "Command coordination server for terminal trading clients")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/bridge.toml")]
    config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides config file)
    #[arg(long)]
    port: Option<u16>,

    /// Venue base URL (overrides config file)
    #[arg(long)]
    venue_url: Option<String>,

    /// Disable venue polling for this run
    #[arg(long)]
    no_reconciler: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // Load environment variables from .env file (if present)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let args = Args::parse();

    let mut config = if args.config.exists() {
        BridgeConfig::from_file(&args.config)?
    } else {
        eprintln!(
            "Warning: config file {} not found, using defaults",
            args.config.display()
        );
        BridgeConfig::default()
    };
    config.apply_env_overrides();
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(url) = args.venue_url {
        config.venue.base_url = url;
    }
    if args.no_reconciler {
        config.reconciler.enabled = false;
    }
    config.validate()?;

    let log_level = config
        .log_level
        .parse::<Level>()
        .with_context(|| format!("invalid log_level {:?}", config.log_level))?;
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;

    info!("Starting bridge-server");
    info!("Bind: {}:{}", config.server.host, config.server.port);
    info!("Reconciler enabled: {}", config.reconciler.enabled);

    let state = Arc::new(BridgeState::new());

    let journal = if config.journal.enabled {
        Journal::new(&config.journal.path)
    } else {
        Journal::disabled()
    };

    let policy: Arc<dyn InjectionPolicy> = if config.injection.enabled {
        info!("Scripted injection: {} steps", config.injection.steps.len());
        Arc::new(ScriptedSequence::new(config.injection.steps.clone()))
    } else {
        Arc::new(NoInjection)
    };

    let venue: Arc<dyn bridge_venue::client::VenueApi> = Arc::new(VenueClient::new(
        VenueClientConfig {
            base_url: config.venue.base_url.clone(),
            username: config.venue.username.clone(),
            api_key: config.venue.api_key.clone(),
            request_timeout: Duration::from_secs(config.venue.request_timeout_secs),
        },
    )?);

    let discovery = Arc::new(AccountDiscovery::new(
        Arc::clone(&state),
        Arc::clone(&venue),
        DiscoveryConfig {
            max_age: Duration::from_secs(config.reconciler.account_cache_secs),
            only_active: config.reconciler.only_active_accounts,
        },
    ));

    let reconciler = Arc::new(PositionReconciler::new(
        Arc::clone(&state),
        Arc::clone(&venue),
        Duration::from_secs(config.reconciler.refresh_secs),
    ));
    let supervisor = Arc::new(ReconcilerSupervisor::new(Arc::clone(&reconciler)));

    if config.reconciler.enabled {
        let poll_interval = Duration::from_secs(config.reconciler.poll_interval_secs);
        let cache_interval = Duration::from_secs(config.reconciler.account_cache_secs);
        let discovery = Arc::clone(&discovery);
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move {
            loop {
                let accounts = discovery.refresh().await;
                if accounts.is_empty() {
                    warn!("account discovery returned no accounts");
                }
                for account in &accounts {
                    supervisor.ensure_running(account.id, poll_interval);
                }
                tokio::time::sleep(cache_interval).await;
            }
        });
    }

    let ctx = Arc::new(AppContext {
        state,
        journal,
        policy,
        discovery,
        reconciler,
        online_timeout: Duration::from_secs(config.clients.online_timeout_secs),
    });

    let host = config.server.host.clone();
    let port = config.server.port;
    tokio::select! {
        result = run_server(ctx, &host, port) => {
            if let Err(e) = &result {
                error!("server exited: {:#}", e);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, stopping reconciler workers");
            supervisor.stop_all();
            Ok(())
        }
    }
}
