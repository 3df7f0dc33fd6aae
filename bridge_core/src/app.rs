use std::time::{Duration, Instant};

use bevy::prelude::*;
use tracing::{error, info, warn};

use crate::body::HeadlessWorld;
use crate::bridge::SyncBridge;
use crate::config::BridgeConfig;
use crate::metrics::BridgeMetrics;
use crate::network::{TransportCounters, TransportExit, TransportSettings, TransportWorker};
use crate::queue::{message_queue, QueueConsumer, QueueProducer};
use crate::recording::VehicleReport;
use crate::signals::SignalBoard;

pub type HeadlessBridge = SyncBridge<HeadlessWorld, SignalBoard>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// No worker; payloads are fed through [`BridgeRuntime::producer`].
    Disabled,
    Connect,
}

/// Everything the tick systems share: the bridge itself, both ends of the
/// inbound queue and the transport worker, which is recreated after it exits.
#[derive(Resource)]
pub struct BridgeRuntime {
    pub bridge: HeadlessBridge,
    consumer: QueueConsumer,
    producer: QueueProducer,
    settings: Option<TransportSettings>,
    worker: Option<TransportWorker>,
    restart_at: Option<Instant>,
    reconnect_delay: Duration,
    retired: TransportCounters,
    spawns: u64,
}

impl BridgeRuntime {
    pub fn new(config: &BridgeConfig, mode: TransportMode) -> Self {
        let world = HeadlessWorld::new(config.visuals.clone());
        let mut bridge = SyncBridge::new(config, world, SignalBoard::permissive());
        bridge.spawn_ego();
        if let Some(path) = config.recording.report_path.as_deref() {
            match VehicleReport::create(path, config.recording.sample_interval) {
                Ok(report) => bridge.set_report(report),
                Err(err) => warn!(
                    target: "traffic_bridge::lifecycle",
                    path = %path.display(),
                    error = %err,
                    "recording.open_failed"
                ),
            }
        }

        let (producer, consumer) = message_queue(config.inbound_queue_capacity);
        let settings = match mode {
            TransportMode::Disabled => None,
            TransportMode::Connect => Some(TransportSettings::from_config(config)),
        };
        Self {
            bridge,
            consumer,
            producer,
            settings,
            worker: None,
            restart_at: Some(Instant::now()),
            reconnect_delay: config.reconnect_delay(),
            retired: TransportCounters::default(),
            spawns: 0,
        }
    }

    pub fn producer(&self) -> &QueueProducer {
        &self.producer
    }

    pub fn worker(&self) -> Option<&TransportWorker> {
        self.worker.as_ref()
    }

    pub fn transport_restarts(&self) -> u64 {
        self.spawns.saturating_sub(1)
    }

    pub fn transport_counters(&self) -> TransportCounters {
        let current = self
            .worker
            .as_ref()
            .map(TransportWorker::counters)
            .unwrap_or_default();
        TransportCounters {
            frames_received: self.retired.frames_received + current.frames_received,
            frames_invalid: self.retired.frames_invalid + current.frames_invalid,
            snapshots_sent: self.retired.snapshots_sent + current.snapshots_sent,
            snapshots_dropped: self.retired.snapshots_dropped + current.snapshots_dropped,
        }
    }

    /// Reaps an exited worker and recreates it once the reconnect delay has
    /// elapsed.
    pub fn supervise(&mut self, now: Instant) {
        if self.settings.is_none() {
            return;
        }

        if let Some(worker) = self.worker.as_mut() {
            if !worker.is_finished() {
                return;
            }
            let exit = worker.shutdown().cloned();
            let counters = worker.counters();
            self.retire(counters);
            self.worker = None;
            self.restart_at = Some(now + self.reconnect_delay);
            warn!(
                target: "traffic_bridge::transport",
                exit = ?exit,
                retry_in_ms = self.reconnect_delay.as_millis() as u64,
                "transport.worker_exited"
            );
            return;
        }

        match self.restart_at {
            Some(deadline) if now >= deadline => {}
            _ => return,
        }
        let Some(settings) = self.settings.clone() else {
            return;
        };
        match TransportWorker::spawn(settings, self.producer.clone()) {
            Ok(worker) => {
                self.spawns += 1;
                self.worker = Some(worker);
                self.restart_at = None;
                info!(
                    target: "traffic_bridge::transport",
                    attempt = self.spawns,
                    "transport.worker_started"
                );
            }
            Err(err) => {
                self.restart_at = Some(now + self.reconnect_delay);
                error!(
                    target: "traffic_bridge::transport",
                    error = %err,
                    "transport.spawn_failed"
                );
            }
        }
    }

    pub fn publish_snapshot(&self, payload: String) {
        if let Some(worker) = self.worker.as_ref() {
            worker.publish_snapshot(payload);
        }
    }

    /// Stops the worker for good; no restart follows.
    pub fn shutdown_transport(&mut self) -> Option<TransportExit> {
        self.settings = None;
        let mut worker = self.worker.take()?;
        let exit = worker.shutdown().cloned();
        self.retire(worker.counters());
        exit
    }

    fn retire(&mut self, counters: TransportCounters) {
        self.retired.frames_received += counters.frames_received;
        self.retired.frames_invalid += counters.frames_invalid;
        self.retired.snapshots_sent += counters.snapshots_sent;
        self.retired.snapshots_dropped += counters.snapshots_dropped;
    }
}

/// Construct the bridge app. Each [`run_tick`] runs the chained tick
/// systems once.
pub fn build_bridge_app(config: BridgeConfig, mode: TransportMode) -> App {
    let mut app = App::new();
    let runtime = BridgeRuntime::new(&config, mode);

    app.insert_resource(config)
        .insert_resource(runtime)
        .insert_resource(BridgeMetrics::default())
        .add_plugins(MinimalPlugins)
        .add_systems(
            Update,
            (
                supervise_transport,
                drain_inbound,
                reconcile_proxies,
                step_bodies,
                record_report,
                publish_ego_snapshot,
                advance_clock,
                collect_metrics,
            )
                .chain(),
        );

    app
}

/// Execute a single fixed tick.
///
/// Order: transport supervision → queue drain → reconcile → integrate →
/// report → ego snapshot → clock → metrics. Callers pace the ticks.
pub fn run_tick(app: &mut App) {
    app.update();
}

fn supervise_transport(mut runtime: ResMut<BridgeRuntime>) {
    runtime.supervise(Instant::now());
}

fn drain_inbound(mut runtime: ResMut<BridgeRuntime>) {
    let runtime = &mut *runtime;
    runtime.bridge.drain(&runtime.consumer);
}

fn reconcile_proxies(mut runtime: ResMut<BridgeRuntime>) {
    runtime.bridge.reconcile();
}

fn step_bodies(mut runtime: ResMut<BridgeRuntime>) {
    let dt = runtime.bridge.tick_seconds();
    for body in runtime.bridge.registry_mut().bodies_mut() {
        body.step(dt);
    }
}

fn record_report(mut runtime: ResMut<BridgeRuntime>) {
    runtime.bridge.record();
}

fn publish_ego_snapshot(runtime: Res<BridgeRuntime>) {
    let payload = runtime.bridge.ego_snapshot_payload();
    runtime.publish_snapshot(payload);
}

fn advance_clock(mut runtime: ResMut<BridgeRuntime>) {
    runtime.bridge.advance_clock();
}

fn collect_metrics(runtime: Res<BridgeRuntime>, mut metrics: ResMut<BridgeMetrics>) {
    let transport = runtime.transport_counters();
    *metrics = runtime.bridge.metrics().clone();
    metrics.snapshots_sent = transport.snapshots_sent;
    metrics.snapshots_dropped = transport.snapshots_dropped;
    metrics.transport_restarts = runtime.transport_restarts();
}
