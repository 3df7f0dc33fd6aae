use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use sync_proto::{encode_frame, frame_text, DecodeError, FrameDecoder, FRAME_HEADER_LEN};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::BridgeConfig;
use crate::queue::QueueProducer;

const READ_CHUNK: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// Inbound broadcast state.
    Subscribe,
    /// Outbound ego snapshots; replies are treated like broadcasts.
    Request,
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelRole::Subscribe => "subscribe",
            ChannelRole::Request => "request",
        })
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect {role} channel to {addr}: {source}")]
    Connect {
        role: ChannelRole,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("send on {role} channel failed: {source}")]
    Send {
        role: ChannelRole,
        #[source]
        source: io::Error,
    },
    #[error("receive on {role} channel failed: {source}")]
    Receive {
        role: ChannelRole,
        #[source]
        source: io::Error,
    },
    #[error("{role} channel is backed up: {pending} bytes pending, high-water mark {high_water}")]
    Backpressure {
        role: ChannelRole,
        pending: usize,
        high_water: usize,
    },
    #[error("peer closed the {role} channel")]
    PeerClosed { role: ChannelRole },
    #[error("{role} channel framing error: {source}")]
    Codec {
        role: ChannelRole,
        #[source]
        source: DecodeError,
    },
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub subscribe_addr: SocketAddr,
    pub request_addr: SocketAddr,
    pub connect_timeout: Duration,
    pub poll_interval: Duration,
    pub outbound_high_water_bytes: usize,
    pub max_frame_bytes: usize,
}

impl TransportSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            subscribe_addr: config.subscribe_addr,
            request_addr: config.request_addr,
            connect_timeout: config.connect_timeout(),
            poll_interval: config.poll_interval(),
            outbound_high_water_bytes: config.outbound_high_water_bytes,
            max_frame_bytes: config.max_frame_bytes,
        }
    }
}

/// Latest-value hand-off of the outbound snapshot. Publishing replaces any
/// snapshot the worker has not picked up yet.
#[derive(Debug, Clone, Default)]
pub struct OutboundSlot {
    latest: Arc<Mutex<Option<String>>>,
}

impl OutboundSlot {
    pub fn publish(&self, payload: String) {
        *self.latest.lock() = Some(payload);
    }

    pub fn take(&self) -> Option<String> {
        self.latest.lock().take()
    }
}

#[derive(Debug, Default)]
pub struct TransportStats {
    frames_received: AtomicU64,
    frames_invalid: AtomicU64,
    snapshots_sent: AtomicU64,
    snapshots_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportCounters {
    pub frames_received: u64,
    pub frames_invalid: u64,
    pub snapshots_sent: u64,
    /// Snapshots refused because the request channel was above its
    /// high-water mark. Each one also ends the loop.
    pub snapshots_dropped: u64,
}

impl TransportStats {
    pub fn counters(&self) -> TransportCounters {
        TransportCounters {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_invalid: self.frames_invalid.load(Ordering::Relaxed),
            snapshots_sent: self.snapshots_sent.load(Ordering::Relaxed),
            snapshots_dropped: self.snapshots_dropped.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportExit {
    Stopped,
    Failed(String),
}

/// Owns the background thread that talks to the peer. The thread connects,
/// then alternates non-blocking sends and receives until stopped or until a
/// transport error ends it. It is never restarted in place.
#[derive(Debug)]
pub struct TransportWorker {
    stop: Arc<AtomicBool>,
    outbound: OutboundSlot,
    stats: Arc<TransportStats>,
    handle: Option<JoinHandle<TransportExit>>,
    exit: Option<TransportExit>,
}

impl TransportWorker {
    pub fn spawn(settings: TransportSettings, producer: QueueProducer) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let outbound = OutboundSlot::default();
        let stats = Arc::new(TransportStats::default());

        let thread_stop = Arc::clone(&stop);
        let thread_outbound = outbound.clone();
        let thread_stats = Arc::clone(&stats);
        let handle = thread::Builder::new()
            .name("bridge-transport".to_string())
            .spawn(move || {
                run_transport(
                    &settings,
                    &producer,
                    &thread_stop,
                    &thread_outbound,
                    &thread_stats,
                )
            })?;

        Ok(Self {
            stop,
            outbound,
            stats,
            handle: Some(handle),
            exit: None,
        })
    }

    /// Hands a snapshot to the worker for the next send.
    pub fn publish_snapshot(&self, payload: String) {
        self.outbound.publish(payload);
    }

    pub fn counters(&self) -> TransportCounters {
        self.stats.counters()
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Exit status once the loop has ended; `None` while it is still running.
    pub fn exit_status(&mut self) -> Option<&TransportExit> {
        if self.handle.as_ref().is_some_and(|handle| handle.is_finished()) {
            self.join();
        }
        self.exit.as_ref()
    }

    /// Signals the loop to stop and joins the thread. Safe to call repeatedly.
    pub fn shutdown(&mut self) -> Option<&TransportExit> {
        self.stop.store(true, Ordering::Release);
        self.join();
        self.exit.as_ref()
    }

    fn join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let exit = handle
            .join()
            .unwrap_or_else(|_| TransportExit::Failed("transport thread panicked".to_string()));
        self.exit = Some(exit);
    }
}

impl Drop for TransportWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_transport(
    settings: &TransportSettings,
    producer: &QueueProducer,
    stop: &AtomicBool,
    outbound: &OutboundSlot,
    stats: &TransportStats,
) -> TransportExit {
    let mut session = match PeerSession::connect(settings) {
        Ok(session) => session,
        Err(err) => {
            error!(
                target: "traffic_bridge::transport",
                error = %err,
                "transport.loop_exited=connect_failed"
            );
            return TransportExit::Failed(err.to_string());
        }
    };
    info!(
        target: "traffic_bridge::transport",
        subscribe = %settings.subscribe_addr,
        request = %settings.request_addr,
        "transport.connected"
    );

    while !stop.load(Ordering::Acquire) {
        if let Err(err) = session.pump(producer, outbound, stats) {
            error!(
                target: "traffic_bridge::transport",
                error = %err,
                "transport.loop_exited=failed"
            );
            return TransportExit::Failed(err.to_string());
        }
        thread::sleep(settings.poll_interval);
    }

    info!(target: "traffic_bridge::transport", "transport.loop_exited=stopped");
    TransportExit::Stopped
}

struct PeerSession {
    subscribe: PeerChannel,
    request: PeerChannel,
    high_water: usize,
}

impl PeerSession {
    fn connect(settings: &TransportSettings) -> Result<Self, TransportError> {
        Ok(Self {
            subscribe: PeerChannel::connect(ChannelRole::Subscribe, settings)?,
            request: PeerChannel::connect(ChannelRole::Request, settings)?,
            high_water: settings.outbound_high_water_bytes,
        })
    }

    fn pump(
        &mut self,
        producer: &QueueProducer,
        outbound: &OutboundSlot,
        stats: &TransportStats,
    ) -> Result<(), TransportError> {
        self.request.flush()?;
        if let Some(snapshot) = outbound.take() {
            let pending = self.request.pending.len();
            if pending > self.high_water {
                TransportStats::bump(&stats.snapshots_dropped);
                return Err(TransportError::Backpressure {
                    role: ChannelRole::Request,
                    pending,
                    high_water: self.high_water,
                });
            }
            self.request.queue(snapshot.as_bytes());
            TransportStats::bump(&stats.snapshots_sent);
            self.request.flush()?;
        }

        let mut forward = |payload: String| {
            TransportStats::bump(&stats.frames_received);
            producer.push(payload);
        };
        self.subscribe.receive(stats, &mut forward)?;
        self.request.receive(stats, &mut forward)?;
        Ok(())
    }
}

struct PeerChannel {
    role: ChannelRole,
    stream: TcpStream,
    decoder: FrameDecoder,
    pending: Vec<u8>,
    read_budget: usize,
}

impl PeerChannel {
    fn connect(role: ChannelRole, settings: &TransportSettings) -> Result<Self, TransportError> {
        let addr = match role {
            ChannelRole::Subscribe => settings.subscribe_addr,
            ChannelRole::Request => settings.request_addr,
        };
        let connect_err = |source| TransportError::Connect { role, addr, source };
        let stream =
            TcpStream::connect_timeout(&addr, settings.connect_timeout).map_err(connect_err)?;
        if let Err(err) = stream.set_nodelay(true) {
            warn!(
                target: "traffic_bridge::transport",
                role = %role,
                error = %err,
                "transport.nodelay_failed"
            );
        }
        stream.set_nonblocking(true).map_err(connect_err)?;
        Ok(Self {
            role,
            stream,
            decoder: FrameDecoder::new(settings.max_frame_bytes),
            pending: Vec::new(),
            read_budget: (settings.max_frame_bytes + FRAME_HEADER_LEN).max(READ_CHUNK),
        })
    }

    fn queue(&mut self, payload: &[u8]) {
        self.pending.extend_from_slice(&encode_frame(payload));
    }

    /// Writes as much pending output as the socket accepts right now.
    fn flush(&mut self) -> Result<(), TransportError> {
        while !self.pending.is_empty() {
            match self.stream.write(&self.pending) {
                Ok(0) => return Err(TransportError::PeerClosed { role: self.role }),
                Ok(written) => {
                    self.pending.drain(..written);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(TransportError::Send {
                        role: self.role,
                        source,
                    })
                }
            }
        }
        Ok(())
    }

    /// Reads until the socket would block or the per-pump read budget is
    /// spent, forwarding complete frames after every chunk. At most one
    /// partial frame stays buffered between pumps. Frames that arrived before
    /// an orderly close are still forwarded.
    fn receive(
        &mut self,
        stats: &TransportStats,
        sink: &mut dyn FnMut(String),
    ) -> Result<(), TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut budget = self.read_budget;
        while budget > 0 {
            let limit = budget.min(READ_CHUNK);
            match self.stream.read(&mut chunk[..limit]) {
                Ok(0) => {
                    self.forward_frames(stats, sink)?;
                    return Err(TransportError::PeerClosed { role: self.role });
                }
                Ok(read) => {
                    budget -= read;
                    self.decoder.extend(&chunk[..read]);
                    self.forward_frames(stats, sink)?;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(TransportError::Receive {
                        role: self.role,
                        source,
                    })
                }
            }
        }
        Ok(())
    }

    fn forward_frames(
        &mut self,
        stats: &TransportStats,
        sink: &mut dyn FnMut(String),
    ) -> Result<(), TransportError> {
        let role = self.role;
        while let Some(frame) = self
            .decoder
            .next_frame()
            .map_err(|source| TransportError::Codec { role, source })?
        {
            match frame_text(frame) {
                Ok(payload) => sink(payload),
                Err(err) => {
                    TransportStats::bump(&stats.frames_invalid);
                    warn!(
                        target: "traffic_bridge::transport",
                        role = %role,
                        error = %err,
                        "transport.frame_dropped"
                    );
                }
            }
        }
        Ok(())
    }
}
