use bevy::math::{Quat, Vec3};

use crate::config::VisualCatalogConfig;
use crate::kinematics::PoseSample;
use crate::lifecycle::{ProxyWorld, RemoteEntityId};

/// Physical-body surface the reconciler drives. Implemented by the host
/// engine; [`KinematicBody`] is the headless stand-in.
pub trait PhysicalBody {
    fn position(&self) -> Vec3;
    fn set_position(&mut self, position: Vec3);
    fn orientation(&self) -> Quat;
    fn set_orientation(&mut self, orientation: Quat);
    fn linear_velocity(&self) -> Vec3;
    fn set_linear_velocity(&mut self, velocity: Vec3);
    fn angular_velocity(&self) -> Vec3;
    fn set_angular_velocity(&mut self, velocity: Vec3);
}

#[derive(Debug, Clone, PartialEq)]
pub struct KinematicBody {
    position: Vec3,
    orientation: Quat,
    linear_velocity: Vec3,
    angular_velocity: Vec3,
    visual: String,
}

impl KinematicBody {
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            visual: String::new(),
        }
    }

    pub fn with_visual(mut self, visual: impl Into<String>) -> Self {
        self.visual = visual.into();
        self
    }

    pub fn visual(&self) -> &str {
        &self.visual
    }

    /// Explicit Euler integration over `dt` seconds.
    pub fn step(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        self.position += self.linear_velocity * dt;
        let spin = self.angular_velocity * dt;
        if spin != Vec3::ZERO {
            self.orientation = (Quat::from_scaled_axis(spin) * self.orientation).normalize();
        }
    }
}

impl PhysicalBody for KinematicBody {
    fn position(&self) -> Vec3 {
        self.position
    }

    fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    fn orientation(&self) -> Quat {
        self.orientation
    }

    fn set_orientation(&mut self, orientation: Quat) {
        self.orientation = orientation;
    }

    fn linear_velocity(&self) -> Vec3 {
        self.linear_velocity
    }

    fn set_linear_velocity(&mut self, velocity: Vec3) {
        self.linear_velocity = velocity;
    }

    fn angular_velocity(&self) -> Vec3 {
        self.angular_velocity
    }

    fn set_angular_velocity(&mut self, velocity: Vec3) {
        self.angular_velocity = velocity;
    }
}

/// Headless proxy world: bodies are [`KinematicBody`] values and visuals are
/// model names resolved from the configured catalog.
#[derive(Debug, Clone, Default)]
pub struct HeadlessWorld {
    catalog: VisualCatalogConfig,
    spawned: u64,
    released: u64,
}

impl HeadlessWorld {
    pub fn new(catalog: VisualCatalogConfig) -> Self {
        Self {
            catalog,
            spawned: 0,
            released: 0,
        }
    }

    pub fn spawned(&self) -> u64 {
        self.spawned
    }

    pub fn released(&self) -> u64 {
        self.released
    }
}

impl ProxyWorld for HeadlessWorld {
    type Body = KinematicBody;

    fn resolve_visual(&self, type_tag: &str) -> Option<String> {
        self.catalog.model_for(type_tag).map(str::to_owned)
    }

    fn default_visual(&self) -> String {
        self.catalog.default_model.clone()
    }

    fn spawn_body(&mut self, _id: &RemoteEntityId, visual: &str, pose: &PoseSample) -> KinematicBody {
        self.spawned += 1;
        KinematicBody::new(pose.position, pose.orientation).with_visual(visual)
    }

    fn release_body(&mut self, _id: &RemoteEntityId, _body: KinematicBody) {
        self.released += 1;
    }
}
