//! State-synchronization bridge between a fixed-tick local simulation and an
//! independently stepped traffic simulator.
//!
//! A background [`TransportWorker`] exchanges frames with the peer and feeds
//! inbound payloads through a bounded queue; each tick of the app built by
//! [`build_bridge_app`] drains that queue, reconciles the proxy set, drives
//! proxy bodies with the [`KinematicReconciler`] and hands an ego snapshot
//! back to the worker.

pub mod app;
pub mod body;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod ego;
pub mod frames;
pub mod kinematics;
pub mod lifecycle;
pub mod metrics;
pub mod network;
pub mod queue;
pub mod recording;
pub mod signals;

pub use app::{build_bridge_app, run_tick, BridgeRuntime, HeadlessBridge, TransportMode};
pub use body::{HeadlessWorld, KinematicBody, PhysicalBody};
pub use bridge::SyncBridge;
pub use config::{
    load_bridge_config_from_env, BridgeConfig, BridgeConfigError, BridgeConfigMetadata,
    KinematicsConfig,
};
pub use dispatch::{dispatch, dispatch_payload, BridgeCommand, DispatchError, MessageHandler};
pub use kinematics::{KinematicReconciler, MotionBranch, MotionState, PoseSample};
pub use lifecycle::{BatchOutcome, EntityProxy, ProxyRegistry, ProxyWorld, RemoteEntityId};
pub use metrics::BridgeMetrics;
pub use network::{TransportError, TransportExit, TransportSettings, TransportWorker};
pub use queue::{message_queue, QueueConsumer, QueueProducer};
pub use recording::VehicleReport;
pub use signals::{SignalAspect, SignalBoard, SignalLamps, SignalPropagator, SignalScene};
