#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Once;

use bevy::math::Vec3;
use bridge_core::kinematics::PoseSample;
use bridge_core::{
    BridgeConfig, KinematicBody, ProxyWorld, RemoteEntityId, SignalLamps, SignalScene, SyncBridge,
};
use sync_proto::{encode_inbound, InboundMessage, TrafficLightRecord, VehicleRecord};

static INIT: Once = Once::new();

pub fn fixture_config_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("test_bridge_config.json")
}

pub fn ensure_test_config() {
    INIT.call_once(|| {
        let config_path = fixture_config_path();

        debug_assert!(
            config_path.exists(),
            "missing test bridge config at {}",
            config_path.display()
        );

        std::env::set_var("BRIDGE_CONFIG_PATH", &config_path);
    });
}

pub fn test_config() -> BridgeConfig {
    BridgeConfig::from_file(&fixture_config_path()).expect("fixture config parses")
}

pub fn vehicle(id: &str, position: [f64; 3], angle: f64, type_tag: &str, long: f32) -> VehicleRecord {
    VehicleRecord {
        vehicle_id: id.to_string(),
        position,
        angle,
        type_tag: type_tag.to_string(),
        long_speed: long,
        vert_speed: 0.0,
        lat_speed: 0.0,
    }
}

pub fn vehicles_payload(vehicles: Vec<VehicleRecord>) -> String {
    encode_inbound(&InboundMessage::Vehicles { vehicles }).expect("vehicles encode")
}

pub fn lights_payload(lights: &[(&str, &str)]) -> String {
    let lights = lights
        .iter()
        .map(|(junction, state)| TrafficLightRecord {
            junction_id: junction.to_string(),
            state: state.to_string(),
        })
        .collect();
    encode_inbound(&InboundMessage::TrafficLights { lights }).expect("lights encode")
}

pub fn command_payload(token: &str) -> String {
    encode_inbound(&InboundMessage::Command {
        command: token.to_string(),
    })
    .expect("command encodes")
}

/// Proxy world that records every spawn and release.
#[derive(Debug, Default)]
pub struct CountingWorld {
    pub models: BTreeMap<String, String>,
    pub spawned: Vec<(String, String)>,
    pub released: Vec<String>,
}

impl CountingWorld {
    pub fn with_model(mut self, type_tag: &str, model: &str) -> Self {
        self.models.insert(type_tag.to_string(), model.to_string());
        self
    }

    pub fn released_count(&self, id: &str) -> usize {
        self.released.iter().filter(|released| *released == id).count()
    }
}

impl ProxyWorld for CountingWorld {
    type Body = KinematicBody;

    fn resolve_visual(&self, type_tag: &str) -> Option<String> {
        self.models.get(type_tag).cloned()
    }

    fn default_visual(&self) -> String {
        "Fallback".to_string()
    }

    fn spawn_body(&mut self, id: &RemoteEntityId, visual: &str, pose: &PoseSample) -> KinematicBody {
        self.spawned.push((id.to_string(), visual.to_string()));
        KinematicBody::new(pose.position, pose.orientation)
    }

    fn release_body(&mut self, id: &RemoteEntityId, _body: KinematicBody) {
        self.released.push(id.to_string());
    }
}

/// Signal scene with fixed junctions that logs every head write.
#[derive(Debug, Default)]
pub struct RecordingScene {
    pub heads: BTreeMap<String, usize>,
    pub writes: Vec<(String, String, SignalLamps)>,
}

impl RecordingScene {
    pub fn with_junction(mut self, junction: &str, heads: usize) -> Self {
        self.heads.insert(junction.to_string(), heads);
        self
    }

    pub fn last_write(&self, junction: &str, head: &str) -> Option<SignalLamps> {
        self.writes
            .iter()
            .rev()
            .find(|(j, h, _)| j == junction && h == head)
            .map(|(_, _, lamps)| *lamps)
    }
}

impl SignalScene for RecordingScene {
    fn has_junction(&self, junction_id: &str) -> bool {
        self.heads.contains_key(junction_id)
    }

    fn set_head(&mut self, junction_id: &str, head: &str, lamps: SignalLamps) -> bool {
        let Some(count) = self.heads.get(junction_id) else {
            return false;
        };
        let known = (0..*count).any(|index| format!("Head{index}") == head);
        if known {
            self.writes
                .push((junction_id.to_string(), head.to_string(), lamps));
        }
        known
    }
}

pub type TestBridge = SyncBridge<CountingWorld, RecordingScene>;

pub fn test_bridge() -> TestBridge {
    let config = test_config();
    let world = CountingWorld::default().with_model("car", "Sedan");
    let scene = RecordingScene::default().with_junction("J1", 2);
    let mut bridge = SyncBridge::new(&config, world, scene);
    bridge.spawn_ego();
    bridge
}

pub fn approx_vec(a: Vec3, b: Vec3) -> bool {
    a.abs_diff_eq(b, 1e-4)
}
