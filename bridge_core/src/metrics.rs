use bevy::prelude::Resource;
use tracing::info;

#[derive(Resource, Default, Debug, Clone, PartialEq, Eq)]
pub struct BridgeMetrics {
    pub ticks: u64,
    pub messages_dispatched: u64,
    /// Malformed payloads and unknown commands.
    pub messages_dropped: u64,
    pub proxies_created: u64,
    pub proxies_destroyed: u64,
    pub live_proxies: usize,
    pub signal_writes: u64,
    /// Inbound payloads rejected by a full queue.
    pub inbound_dropped: u64,
    pub snapshots_sent: u64,
    pub snapshots_dropped: u64,
    pub transport_restarts: u64,
}

impl BridgeMetrics {
    pub fn log_summary(&self) {
        info!(
            target: "traffic_bridge::metrics",
            ticks = self.ticks,
            dispatched = self.messages_dispatched,
            dropped = self.messages_dropped,
            created = self.proxies_created,
            destroyed = self.proxies_destroyed,
            live = self.live_proxies,
            signal_writes = self.signal_writes,
            inbound_dropped = self.inbound_dropped,
            snapshots_sent = self.snapshots_sent,
            snapshots_dropped = self.snapshots_dropped,
            restarts = self.transport_restarts,
            "metrics.summary"
        );
    }
}
