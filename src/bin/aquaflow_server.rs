//! AquaFlow meter server
//!
//! Runs the simulated meter, the TCP command channel and the optional
//! collaborators (record file, identity, bridge feed on stdin).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing_subscriber::EnvFilter;

use aquaflow::bridge::{pump_json_lines, StateBridge};
use aquaflow::collaborator::{FileIdentity, JsonlRecordStore, StaticIdentity};
use aquaflow::{
    CommandServer, DetectorConfig, IdentityProvider, LeakProfile, Meter, MeterConfig, MeterRuntime, Recorder,
    TickSink,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DetectorKind {
    Threshold,
    Model,
}

/// Simulated water meter with leak detection and auto-shutoff.
#[derive(Debug, Parser)]
#[command(name = "aquaflow-server", version)]
struct Args {
    /// JSON configuration file; flags below override it.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Command channel address.
    #[arg(long, default_value = "127.0.0.1:65432")]
    bind: SocketAddr,

    /// Tick interval in milliseconds (one simulated minute).
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Leak usage profile (minimal or full).
    #[arg(long)]
    profile: Option<LeakProfile>,

    /// Anomaly detector strategy.
    #[arg(long, value_enum)]
    detector: Option<DetectorKind>,

    /// Append usage records to this JSON-lines file.
    #[arg(long)]
    records: Option<PathBuf>,

    /// Fixed user id for records.
    #[arg(long, conflicts_with = "user_file")]
    user_id: Option<String>,

    /// File holding the active user id, written by another process.
    #[arg(long)]
    user_file: Option<PathBuf>,

    /// Read bridge events (JSON lines) from stdin.
    #[arg(long)]
    bridge_stdin: bool,

    /// Seed the usage sampler.
    #[arg(long)]
    seed: Option<u64>,

    /// Default log filter when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn build_config(args: &Args) -> Result<MeterConfig, aquaflow::MeterError> {
    let mut config = match &args.config {
        Some(path) => MeterConfig::from_json_file(path)?,
        None => MeterConfig::default(),
    };
    if let Some(ms) = args.tick_ms {
        config.tick_interval_ms = ms;
    }
    if let Some(profile) = args.profile {
        config.leak_profile = profile;
    }
    match args.detector {
        Some(DetectorKind::Threshold) if !matches!(config.detector, DetectorConfig::Threshold { .. }) => {
            config.detector = DetectorConfig::default();
        }
        Some(DetectorKind::Model) if !matches!(config.detector, DetectorConfig::Model { .. }) => {
            config.detector = DetectorConfig::model();
        }
        _ => {}
    }
    config.validate()?;
    Ok(config)
}

fn identity(args: &Args) -> Arc<dyn IdentityProvider> {
    match &args.user_file {
        Some(path) => Arc::new(FileIdentity::new(path)),
        None => Arc::new(StaticIdentity::new(args.user_id.clone())),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .with_target(false)
        .init();

    let config = build_config(&args)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        tick_ms = config.tick_interval_ms,
        profile = ?config.leak_profile,
        detector = ?config.detector,
        "starting meter"
    );

    let mut builder = Meter::builder(config);
    if let Some(seed) = args.seed {
        builder = builder.seed(seed);
    }
    let meter = Arc::new(builder.build()?);
    let policy = meter.policy();
    tracing::info!(
        trigger = policy.trigger_threshold,
        countdown = policy.countdown_length,
        "shutoff policy"
    );

    let recorder = match &args.records {
        Some(path) => {
            let store = Arc::new(JsonlRecordStore::open(path)?);
            tracing::info!(path = %store.path().display(), "persisting usage records");
            Some(Recorder::start(store, identity(&args), Recorder::DEFAULT_CAPACITY)?)
        }
        None => None,
    };
    let sinks: Vec<Box<dyn TickSink>> = recorder
        .iter()
        .map(|r| Box::new(r.handle()) as Box<dyn TickSink>)
        .collect();

    let runtime = MeterRuntime::start(Arc::clone(&meter), sinks)?;

    let bridge = if args.bridge_stdin {
        let bridge = StateBridge::start(Arc::clone(&meter), StateBridge::DEFAULT_CAPACITY)?;
        let sender = bridge.sender();
        // Detached: blocks on stdin until EOF.
        std::thread::Builder::new()
            .name("aquaflow-bridge-feed".to_string())
            .spawn(move || {
                let accepted = pump_json_lines(std::io::stdin().lock(), &sender);
                tracing::info!(accepted, "bridge feed closed");
            })?;
        Some(bridge)
    } else {
        None
    };

    let server = CommandServer::bind(args.bind, Arc::clone(&meter)).await?;
    tracing::info!(addr = %server.local_addr()?, "press Ctrl+C to stop");
    server
        .serve_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await?;

    runtime.shutdown();
    if let Some(bridge) = bridge {
        bridge.shutdown();
    }
    if let Some(recorder) = recorder {
        recorder.shutdown();
    }
    tracing::info!("shut down");
    Ok(())
}
