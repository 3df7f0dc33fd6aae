use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use bridge_core::{
    build_bridge_app, load_bridge_config_from_env, run_tick, BridgeConfig, BridgeConfigMetadata,
    BridgeMetrics, BridgeRuntime, TransportMode,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Traffic simulator state-synchronization bridge", long_about = None)]
struct Args {
    /// Bridge config JSON (defaults to BRIDGE_CONFIG_PATH, then the builtin)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many ticks instead of running forever
    #[arg(long)]
    ticks: Option<u64>,

    /// Write the vehicle report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Run without connecting to the peer
    #[arg(long)]
    offline: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let (mut config, metadata) = match &args.config {
        Some(path) => {
            let config = BridgeConfig::from_file(path).with_context(|| {
                format!("Failed to load bridge config from {}", path.display())
            })?;
            (config, BridgeConfigMetadata::new(Some(path.clone())))
        }
        None => load_bridge_config_from_env(),
    };
    if let Some(report) = args.report {
        config.recording.report_path = Some(report);
    }

    let mode = if args.offline {
        TransportMode::Disabled
    } else {
        TransportMode::Connect
    };
    let tick = config.tick_duration();
    let log_every = config.metrics_log_interval_ticks.max(1);
    info!(
        target: "traffic_bridge::runtime",
        subscribe = %config.subscribe_addr,
        request = %config.request_addr,
        tick_ms = tick.as_millis() as u64,
        config = ?metadata.path(),
        "bridge.ready"
    );

    let mut app = build_bridge_app(config, mode);
    app.insert_resource(metadata);

    let mut next_tick = Instant::now();
    let mut ticks = 0u64;
    while args.ticks.map_or(true, |limit| ticks < limit) {
        run_tick(&mut app);
        ticks += 1;
        if ticks % log_every == 0 {
            app.world.resource::<BridgeMetrics>().log_summary();
        }

        next_tick += tick;
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        } else {
            // Fell behind; resume pacing from here rather than bursting.
            next_tick = now;
        }
    }

    let exit = app
        .world
        .resource_mut::<BridgeRuntime>()
        .shutdown_transport();
    app.world.resource::<BridgeMetrics>().log_summary();
    info!(target: "traffic_bridge::runtime", ticks, exit = ?exit, "bridge.stopped");
    Ok(())
}
