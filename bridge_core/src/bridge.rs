use bevy::math::Vec3;
use sync_proto::{MessageKind, TrafficLightRecord, VehicleRecord};
use tracing::{info, warn};

use crate::body::PhysicalBody;
use crate::config::{BridgeConfig, EgoConfig};
use crate::dispatch::{dispatch_payload, BridgeCommand, MessageHandler};
use crate::ego::{ego_record, encode_ego_payload};
use crate::frames::{orientation_from_peer_angle, position_from_peer};
use crate::kinematics::{KinematicReconciler, PoseSample};
use crate::lifecycle::{ProxyRegistry, ProxyWorld, ReconcileSummary, RemoteEntityId};
use crate::metrics::BridgeMetrics;
use crate::queue::QueueConsumer;
use crate::recording::VehicleReport;
use crate::signals::{SignalPropagator, SignalScene};

/// Main-thread half of the bridge: owns the proxy map, signal cache and
/// report, and applies everything the dispatcher routes to it.
pub struct SyncBridge<W: ProxyWorld, S: SignalScene> {
    world: W,
    scene: S,
    registry: ProxyRegistry<W::Body>,
    reconciler: KinematicReconciler,
    signals: SignalPropagator,
    report: VehicleReport,
    ego: EgoConfig,
    tick_seconds: f32,
    clock: f64,
    metrics: BridgeMetrics,
}

impl<W: ProxyWorld, S: SignalScene> SyncBridge<W, S> {
    pub fn new(config: &BridgeConfig, world: W, scene: S) -> Self {
        Self {
            world,
            scene,
            registry: ProxyRegistry::new(),
            reconciler: KinematicReconciler::new(&config.kinematics, config.peer_step_length),
            signals: SignalPropagator::new(),
            report: VehicleReport::disabled(),
            ego: config.ego.clone(),
            tick_seconds: config.tick_seconds,
            clock: 0.0,
            metrics: BridgeMetrics::default(),
        }
    }

    /// Spawns the ego body at its configured pose and registers it as the
    /// protected proxy, replacing any earlier ego.
    pub fn spawn_ego(&mut self) -> RemoteEntityId {
        let id = RemoteEntityId::new(self.ego.vehicle_id.clone());
        let pose = PoseSample {
            position: position_from_peer(self.ego.initial_position),
            orientation: orientation_from_peer_angle(self.ego.initial_angle),
            long_speed: 0.0,
            vert_speed: 0.0,
            lat_speed: 0.0,
            sample_time: self.clock,
        };
        let visual = self
            .world
            .resolve_visual(&self.ego.type_tag)
            .unwrap_or_else(|| self.world.default_visual());
        let body = self.world.spawn_body(&id, &visual, &pose);
        let type_tag = self.ego.type_tag.clone();
        if let Some(previous) = self.registry.register_ego(id.clone(), body, type_tag, visual) {
            self.world.release_body(&id, previous);
        }
        self.metrics.live_proxies = self.registry.len();
        info!(target: "traffic_bridge::lifecycle", ego = %id, "ego.spawned");
        id
    }

    pub fn set_report(&mut self, report: VehicleReport) {
        self.report = report;
    }

    /// Decodes and applies one inbound payload. Malformed payloads are logged
    /// and counted.
    pub fn handle_payload(&mut self, payload: &str) -> Option<MessageKind> {
        let kind = dispatch_payload(payload, self);
        match kind {
            Some(_) => self.metrics.messages_dispatched += 1,
            None => self.metrics.messages_dropped += 1,
        }
        kind
    }

    /// Applies everything queued so far, in arrival order.
    pub fn drain(&mut self, consumer: &QueueConsumer) -> usize {
        let payloads = consumer.drain();
        for payload in &payloads {
            self.handle_payload(payload);
        }
        self.metrics.inbound_dropped = consumer.dropped();
        payloads.len()
    }

    pub fn reconcile(&mut self) -> ReconcileSummary {
        self.registry
            .reconcile_all(&self.reconciler, self.tick_seconds)
    }

    /// Feeds the current proxy positions to the report. Rows are ordered by
    /// vehicle id.
    pub fn record(&mut self) -> usize {
        if !self.report.is_active() {
            return 0;
        }
        let mut rows: Vec<(&str, Vec3)> = self
            .registry
            .iter()
            .map(|proxy| (proxy.id().as_str(), proxy.body().position()))
            .collect();
        rows.sort_unstable_by(|a, b| a.0.cmp(b.0));
        self.report.tick(self.clock, self.tick_seconds, rows)
    }

    pub fn ego_snapshot(&self) -> Option<VehicleRecord> {
        self.registry
            .ego()
            .map(|proxy| ego_record(proxy.id().as_str(), proxy.type_tag(), proxy.body()))
    }

    /// Outbound payload for this tick: the ego record, or `{}` without one.
    pub fn ego_snapshot_payload(&self) -> String {
        encode_ego_payload(self.ego_snapshot().as_ref())
    }

    pub fn advance_clock(&mut self) {
        self.clock += self.tick_seconds as f64;
        self.metrics.ticks += 1;
    }

    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn tick_seconds(&self) -> f32 {
        self.tick_seconds
    }

    pub fn registry(&self) -> &ProxyRegistry<W::Body> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ProxyRegistry<W::Body> {
        &mut self.registry
    }

    /// Local control surface for the ego body.
    pub fn ego_body_mut(&mut self) -> Option<&mut W::Body> {
        self.registry.ego_mut().map(|proxy| proxy.body_mut())
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn signals(&self) -> &SignalPropagator {
        &self.signals
    }

    pub fn reconciler(&self) -> &KinematicReconciler {
        &self.reconciler
    }

    pub fn report(&self) -> &VehicleReport {
        &self.report
    }

    pub fn metrics(&self) -> &BridgeMetrics {
        &self.metrics
    }
}

impl<W: ProxyWorld, S: SignalScene> MessageHandler for SyncBridge<W, S> {
    fn on_command(&mut self, command: BridgeCommand) {
        info!(target: "traffic_bridge::dispatch", command = %command, "command.received");
        match command {
            BridgeCommand::StartRecording => {
                if !self.report.is_enabled() {
                    warn!(
                        target: "traffic_bridge::lifecycle",
                        "recording.no_report_path"
                    );
                }
                self.report.start();
            }
            BridgeCommand::StopRecording => {
                self.report.stop();
                let cleared = self.registry.clear_remote(&mut self.world);
                self.metrics.proxies_destroyed += cleared.len() as u64;
                self.metrics.live_proxies = self.registry.len();
            }
        }
    }

    fn on_vehicles(&mut self, vehicles: Vec<VehicleRecord>) {
        let outcome = self
            .registry
            .apply_batch(&mut self.world, &vehicles, self.clock);
        self.metrics.proxies_created += outcome.created.len() as u64;
        self.metrics.proxies_destroyed += outcome.destroyed.len() as u64;
        self.metrics.live_proxies = self.registry.len();
    }

    fn on_traffic_lights(&mut self, lights: Vec<TrafficLightRecord>) {
        let outcome = self.signals.apply(&mut self.scene, &lights);
        self.metrics.signal_writes += outcome.heads_written as u64;
    }
}
