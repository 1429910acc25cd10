//! SimPi control panel: entry point.
//!
//! Connects to a running SimPi broker, keeps the local register bank in sync
//! with it and reads panel commands (`press BTN1`, `reset`, ...) from stdin.
//!
//! # Usage
//!
//! ```text
//! simpi-client [OPTIONS]
//!
//! Options:
//!   --config <PATH>         TOML config file [default: platform config dir]
//!   --broker <URL>          Broker HTTP base URL [default: http://127.0.0.1:32000]
//!   --ws-url <URL>          Broker socket URL [default: ws://127.0.0.1:32001]
//!   --transport <KIND>      http | websocket [default: http]
//!   --interval-ms <MS>      Sync period in milliseconds [default: 100]
//!   --strict-hex            Reject malformed register values
//!   --use-broker-prefs      Take the sync period from /api/prefs
//!   --log-level <LEVEL>     Log level when RUST_LOG is unset [default: info]
//!   --save-config           Write the effective config file and continue
//! ```
//!
//! # Configuration precedence
//!
//! Command-line flags (or their `SIMPI_*` environment variables) override
//! the config file, which overrides the built-in defaults.
//!
//! | Variable                 | Flag                 |
//! |--------------------------|----------------------|
//! | `SIMPI_CONFIG`           | `--config`           |
//! | `SIMPI_BROKER`           | `--broker`           |
//! | `SIMPI_WS_URL`           | `--ws-url`           |
//! | `SIMPI_TRANSPORT`        | `--transport`        |
//! | `SIMPI_INTERVAL_MS`      | `--interval-ms`      |
//! | `SIMPI_STRICT_HEX`       | `--strict-hex`       |
//! | `SIMPI_USE_BROKER_PREFS` | `--use-broker-prefs` |
//! | `SIMPI_LOG`              | `--log-level`        |

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use simpi_client::application::{SharedBank, SyncScheduler, Transport};
use simpi_client::domain::{BrokerPrefs, ClientConfig, SyncEvent, TransportKind};
use simpi_client::infrastructure::console::{execute, ControlCommand, LedObserver, Reply, HELP};
use simpi_client::infrastructure::storage::config::{
    config_file_path, load_config, save_config, FileConfig,
};
use simpi_client::infrastructure::{HttpTransport, WsTransport};
use simpi_core::{HexParsing, RegisterBank};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Terminal control panel for the SimPi GPIO simulator.
#[derive(Debug, Parser)]
#[command(
    name = "simpi-client",
    about = "Terminal control panel for the SimPi GPIO simulator",
    version
)]
struct Cli {
    /// TOML config file.  Defaults to `client.toml` in the platform config
    /// directory; a missing default file means built-in defaults.
    #[arg(long, env = "SIMPI_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the broker's HTTP API, without `/api`.
    #[arg(long, env = "SIMPI_BROKER")]
    broker: Option<String>,

    /// URL of the broker's WebSocket endpoint.
    #[arg(long, env = "SIMPI_WS_URL")]
    ws_url: Option<String>,

    /// Transport for the periodic exchange: `http` or `websocket`.
    #[arg(long, env = "SIMPI_TRANSPORT")]
    transport: Option<TransportKind>,

    /// Sync period in milliseconds.
    #[arg(long, env = "SIMPI_INTERVAL_MS")]
    interval_ms: Option<u64>,

    /// Treat malformed register values from the broker as errors instead of
    /// reading them as the longest valid hex prefix.
    #[arg(long, env = "SIMPI_STRICT_HEX")]
    strict_hex: bool,

    /// Seed the sync period from the broker's preference document.
    #[arg(long, env = "SIMPI_USE_BROKER_PREFS")]
    use_broker_prefs: bool,

    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, env = "SIMPI_LOG")]
    log_level: Option<String>,

    /// Write the effective configuration to the config file, then run.
    #[arg(long)]
    save_config: bool,
}

impl Cli {
    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => config_file_path().context("no --config given and no platform config directory"),
        }
    }

    /// Layers the command-line overrides on top of the file config.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting broker URLs do not parse or the sync
    /// period is zero.
    fn apply_overrides(&self, mut file: FileConfig) -> anyhow::Result<FileConfig> {
        if let Some(broker) = &self.broker {
            file.broker.http_base = broker.clone();
        }
        if let Some(ws_url) = &self.ws_url {
            file.broker.ws_url = ws_url.clone();
        }
        if let Some(transport) = self.transport {
            file.sync.transport = transport;
        }
        if let Some(interval_ms) = self.interval_ms {
            file.sync.interval_ms = interval_ms;
        }
        if self.strict_hex {
            file.sync.hex_parsing = HexParsing::Strict;
        }
        if self.use_broker_prefs {
            file.sync.use_broker_prefs = true;
        }
        if let Some(level) = &self.log_level {
            file.log_level = level.clone();
        }

        reqwest::Url::parse(&file.broker.http_base)
            .with_context(|| format!("invalid broker URL: '{}'", file.broker.http_base))?;
        reqwest::Url::parse(&file.broker.ws_url)
            .with_context(|| format!("invalid broker socket URL: '{}'", file.broker.ws_url))?;
        anyhow::ensure!(file.sync.interval_ms > 0, "sync interval must be at least 1 ms");
        Ok(file)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = cli.config_path()?;
    if cli.config.is_some() && !cli.save_config && !path.exists() {
        anyhow::bail!("config file {} does not exist", path.display());
    }
    let file = load_config(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    let file = cli.apply_overrides(file)?;

    // ── Logging setup ─────────────────────────────────────────────────────────
    //
    // `RUST_LOG` wins over the configured level when it is set and valid.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&file.log_level)),
        )
        .init();

    if cli.save_config {
        save_config(&file, &path)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        info!("wrote config to {}", path.display());
    }

    run(file.into_client_config()).await
}

async fn run(mut config: ClientConfig) -> anyhow::Result<()> {
    info!(
        "SimPi control panel starting: broker={}, transport={}",
        config.http_base, config.transport
    );

    let http = Arc::new(
        HttpTransport::new(&config.http_base, config.request_timeout, config.sync.profile)
            .context("failed to build HTTP client")?,
    );

    if config.use_broker_prefs {
        match http.fetch_prefs().await {
            Ok(BrokerPrefs {
                update_timeout_ms: Some(ms),
            }) if ms > 0 => {
                info!("using broker sync interval of {ms} ms");
                config.sync.interval = Duration::from_millis(ms);
            }
            Ok(_) => info!("broker prefs carry no sync interval; keeping {:?}", config.sync.interval),
            Err(e) => warn!("could not read broker prefs ({e}); keeping {:?}", config.sync.interval),
        }
    }

    let transport: Arc<dyn Transport> = match config.transport {
        TransportKind::Http => Arc::clone(&http) as Arc<dyn Transport>,
        TransportKind::Websocket => {
            let ws = Arc::new(WsTransport::new(
                config.ws_url.clone(),
                config.sync.profile,
                config.request_timeout,
            ));
            if let Err(e) = ws.connect().await {
                warn!("broker socket unavailable ({e}); retrying on the next tick");
            }
            ws
        }
    };

    let mut bank = RegisterBank::simpi();
    bank.subscribe(Arc::new(LedObserver::new(config.board.clone())));
    let bank: SharedBank = Arc::new(Mutex::new(bank));

    let (mut scheduler, mut events) = SyncScheduler::new(config.sync, bank, transport, http)?;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });
    scheduler.play()?;
    println!("{HELP}");

    // ── Command loop ──────────────────────────────────────────────────────────
    let mut lines = spawn_stdin_reader();
    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    info!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<ControlCommand>() {
                    Ok(command) => match execute(command, &mut scheduler, &config.board).await {
                        Ok(Reply::Silent) => {}
                        Ok(Reply::Text(text)) => println!("{text}"),
                        Ok(Reply::Quit) => break,
                        Err(e) => warn!("{e}"),
                    },
                    Err(e) => warn!("{e}"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::error!("failed to listen for Ctrl+C signal: {e}");
                }
                info!("received Ctrl+C, shutting down");
                break;
            }
        }
    }

    scheduler.pause();
    info!("SimPi control panel stopped");
    Ok(())
}

/// Reads stdin on a plain thread so a pending read never holds up runtime
/// shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::ConnectionChanged(state) => info!("broker connection: {state}"),
        SyncEvent::ActionCompleted { action, message } => info!("{action}: {message}"),
        SyncEvent::ActionFailed { action, reason } => warn!("{action} failed: {reason}"),
        SyncEvent::Terminated => info!("broker has shut down; type `quit` to exit"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
