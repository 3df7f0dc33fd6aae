//! Motion reconstruction for remote proxies.
//!
//! The peer publishes absolute, low-rate poses. Each fixed tick a proxy is
//! classified from its last two samples:
//!
//! - **straight**: velocity comes from the sample's body-frame speeds rotated
//!   into world space, and any spin left over from a turn fades out over
//!   [`KinematicsConfig::angular_decay_window`] before the orientation is
//!   snapped back onto the sample;
//! - **turning**: velocity is the positional difference over the sample
//!   interval and angular velocity is the quaternion delta over the same
//!   interval, which is also kept as the residual spin;
//! - **degenerate**: a non-positive interval zeroes both velocities and snaps
//!   the orientation.
//!
//! Every branch then blends the position a fixed fraction toward the latest
//! sample.

use bevy::math::{Quat, Vec3};
use sync_proto::VehicleRecord;

use crate::body::PhysicalBody;
use crate::config::KinematicsConfig;
use crate::frames::{orientation_from_peer_angle, position_from_peer, world_velocity, wrap_degrees};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSample {
    pub position: Vec3,
    pub orientation: Quat,
    pub long_speed: f32,
    pub vert_speed: f32,
    pub lat_speed: f32,
    /// Local bridge time, in seconds, at which the sample arrived.
    pub sample_time: f64,
}

impl PoseSample {
    pub fn from_record(record: &VehicleRecord, sample_time: f64) -> Self {
        Self {
            position: position_from_peer(record.position),
            orientation: orientation_from_peer_angle(record.angle),
            long_speed: record.long_speed,
            vert_speed: record.vert_speed,
            lat_speed: record.lat_speed,
            sample_time,
        }
    }

    pub fn world_velocity(&self) -> Vec3 {
        world_velocity(
            self.orientation,
            self.long_speed,
            self.vert_speed,
            self.lat_speed,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionBranch {
    Degenerate,
    Straight,
    Turning,
}

/// Per-proxy sample history and residual spin.
#[derive(Debug, Clone)]
pub struct MotionState {
    previous: PoseSample,
    current: PoseSample,
    residual_angular: Vec3,
    residual_remaining: f32,
}

impl MotionState {
    /// A fresh proxy starts with both slots holding its first sample, which
    /// makes the interval zero until a second sample arrives.
    pub fn new(first: PoseSample) -> Self {
        Self {
            previous: first,
            current: first,
            residual_angular: Vec3::ZERO,
            residual_remaining: 0.0,
        }
    }

    pub fn push_sample(&mut self, mut sample: PoseSample) {
        if sample.sample_time < self.current.sample_time {
            sample.sample_time = self.current.sample_time;
        }
        self.previous = self.current;
        self.current = sample;
    }

    pub fn previous(&self) -> &PoseSample {
        &self.previous
    }

    pub fn current(&self) -> &PoseSample {
        &self.current
    }

    pub fn interval(&self) -> f64 {
        self.current.sample_time - self.previous.sample_time
    }

    pub fn heading_delta_degrees(&self) -> f32 {
        self.previous
            .orientation
            .angle_between(self.current.orientation)
            .to_degrees()
    }

    pub fn residual_angular_velocity(&self) -> Vec3 {
        self.residual_angular
    }

    pub fn residual_remaining(&self) -> f32 {
        self.residual_remaining
    }

    fn clear_residual(&mut self) {
        self.residual_angular = Vec3::ZERO;
        self.residual_remaining = 0.0;
    }
}

/// Heading change (degrees) between consecutive samples at and above which a
/// proxy is treated as turning.
pub fn turn_threshold_degrees(config: &KinematicsConfig, peer_step_length: f32) -> f32 {
    let low = config.min_turn_threshold_deg.min(config.max_turn_threshold_deg);
    let high = config.min_turn_threshold_deg.max(config.max_turn_threshold_deg);
    (config.turn_rate_deg_per_sec * peer_step_length.max(0.0)).clamp(low, high)
}

const MIN_SPIN_DEG: f32 = 1e-4;

/// World-space angular velocity carrying `from` onto `to` in `dt` seconds,
/// always along the short way round.
pub fn angular_velocity_between(from: Quat, to: Quat, dt: f32) -> Vec3 {
    if dt <= 0.0 {
        return Vec3::ZERO;
    }
    let delta = (to * from.inverse()).normalize();
    let (axis, angle) = delta.to_axis_angle();
    let angle_deg = wrap_degrees(angle.to_degrees());
    if angle_deg.abs() < MIN_SPIN_DEG || !axis.is_finite() {
        return Vec3::ZERO;
    }
    axis * (angle_deg.to_radians() / dt)
}

#[derive(Debug, Clone)]
pub struct KinematicReconciler {
    turn_threshold_deg: f32,
    decay_window: f32,
    decay_sharpness: f32,
    position_blend: f32,
}

impl KinematicReconciler {
    pub fn new(config: &KinematicsConfig, peer_step_length: f32) -> Self {
        Self {
            turn_threshold_deg: turn_threshold_degrees(config, peer_step_length),
            decay_window: config.angular_decay_window.max(0.0),
            decay_sharpness: config.angular_decay_sharpness.max(0.0),
            position_blend: config.position_blend.clamp(0.0, 1.0),
        }
    }

    pub fn turn_threshold_deg(&self) -> f32 {
        self.turn_threshold_deg
    }

    pub fn decay_window(&self) -> f32 {
        self.decay_window
    }

    pub fn classify(&self, state: &MotionState) -> MotionBranch {
        if state.interval() <= 0.0 {
            MotionBranch::Degenerate
        } else if state.heading_delta_degrees() < self.turn_threshold_deg {
            MotionBranch::Straight
        } else {
            MotionBranch::Turning
        }
    }

    /// Drives `body` for one fixed tick of `tick_seconds`.
    pub fn apply<B: PhysicalBody + ?Sized>(
        &self,
        state: &mut MotionState,
        body: &mut B,
        tick_seconds: f32,
    ) -> MotionBranch {
        let branch = self.classify(state);
        match branch {
            MotionBranch::Degenerate => {
                state.clear_residual();
                body.set_linear_velocity(Vec3::ZERO);
                body.set_angular_velocity(Vec3::ZERO);
                body.set_orientation(state.current.orientation);
            }
            MotionBranch::Straight => {
                body.set_linear_velocity(state.current.world_velocity());
                self.fade_residual(state, body, tick_seconds);
            }
            MotionBranch::Turning => {
                let dt = state.interval() as f32;
                let velocity = (state.current.position - state.previous.position) / dt;
                let spin = angular_velocity_between(
                    state.previous.orientation,
                    state.current.orientation,
                    dt,
                );
                body.set_linear_velocity(velocity);
                body.set_angular_velocity(spin);
                state.residual_angular = spin;
                state.residual_remaining = self.decay_window;
            }
        }

        let blended = body
            .position()
            .lerp(state.current.position, self.position_blend);
        body.set_position(blended);
        branch
    }

    fn fade_residual<B: PhysicalBody + ?Sized>(
        &self,
        state: &mut MotionState,
        body: &mut B,
        tick_seconds: f32,
    ) {
        if state.residual_remaining > 0.0 {
            state.residual_remaining -= tick_seconds.max(0.0);
        }
        if state.residual_remaining <= 0.0 {
            state.clear_residual();
            body.set_angular_velocity(Vec3::ZERO);
            body.set_orientation(state.current.orientation);
            return;
        }

        let progress = 1.0 - state.residual_remaining / self.decay_window;
        let fade = (-self.decay_sharpness * progress).exp();
        body.set_angular_velocity(state.residual_angular * fade);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::KinematicBody;

    fn sample(position: Vec3, angle: f64, speeds: (f32, f32, f32), time: f64) -> PoseSample {
        PoseSample {
            position,
            orientation: orientation_from_peer_angle(angle),
            long_speed: speeds.0,
            vert_speed: speeds.1,
            lat_speed: speeds.2,
            sample_time: time,
        }
    }

    fn reconciler() -> KinematicReconciler {
        KinematicReconciler::new(&KinematicsConfig::default(), 0.1)
    }

    #[test]
    fn threshold_scales_with_step_and_clamps() {
        let config = KinematicsConfig::default();
        assert!((turn_threshold_degrees(&config, 0.1) - 2.0).abs() < 1e-6);
        assert_eq!(turn_threshold_degrees(&config, 0.0), 1.0);
        assert_eq!(turn_threshold_degrees(&config, 10.0), 15.0);

        let inverted = KinematicsConfig {
            min_turn_threshold_deg: 8.0,
            max_turn_threshold_deg: 4.0,
            ..KinematicsConfig::default()
        };
        assert_eq!(turn_threshold_degrees(&inverted, 0.0), 4.0);
    }

    #[test]
    fn straight_velocity_uses_body_speeds() {
        let reconciler = reconciler();
        let first = sample(Vec3::ZERO, 45.0, (5.0, 1.0, 0.0), 0.0);
        let mut state = MotionState::new(first);
        state.push_sample(sample(Vec3::new(0.3, 0.0, 0.3), 45.0, (5.0, 1.0, 0.0), 0.1));
        let mut body = KinematicBody::new(Vec3::ZERO, first.orientation);

        let branch = reconciler.apply(&mut state, &mut body, 0.02);

        assert_eq!(branch, MotionBranch::Straight);
        let expected = state.current().orientation * Vec3::new(5.0, 1.0, 0.0);
        assert!(body.linear_velocity().abs_diff_eq(expected, 1e-5));
        assert_eq!(body.angular_velocity(), Vec3::ZERO);
        assert_eq!(body.orientation(), state.current().orientation);
    }

    #[test]
    fn zero_interval_zeroes_motion_and_snaps_orientation() {
        let reconciler = reconciler();
        let mut state = MotionState::new(sample(Vec3::ZERO, 0.0, (3.0, 0.0, 0.0), 1.0));
        state.push_sample(sample(Vec3::X, 120.0, (3.0, 0.0, 0.0), 1.0));
        let mut body = KinematicBody::new(Vec3::ZERO, Quat::IDENTITY);
        body.set_linear_velocity(Vec3::ONE);
        body.set_angular_velocity(Vec3::ONE);

        let branch = reconciler.apply(&mut state, &mut body, 0.02);

        assert_eq!(branch, MotionBranch::Degenerate);
        assert_eq!(body.linear_velocity(), Vec3::ZERO);
        assert_eq!(body.angular_velocity(), Vec3::ZERO);
        assert_eq!(body.orientation(), state.current().orientation);
    }

    #[test]
    fn inverted_timestamps_collapse_to_zero_interval() {
        let mut state = MotionState::new(sample(Vec3::ZERO, 0.0, (0.0, 0.0, 0.0), 2.0));
        state.push_sample(sample(Vec3::X, 0.0, (0.0, 0.0, 0.0), 1.5));
        assert_eq!(state.interval(), 0.0);
        assert_eq!(reconciler().classify(&state), MotionBranch::Degenerate);
    }

    #[test]
    fn large_heading_change_is_turning() {
        let reconciler = reconciler();
        let mut state = MotionState::new(sample(Vec3::ZERO, 0.0, (5.0, 0.0, 0.0), 0.0));
        state.push_sample(sample(Vec3::new(0.2, 0.0, 0.4), 90.0, (5.0, 0.0, 0.0), 0.5));
        let mut body = KinematicBody::new(Vec3::ZERO, state.previous().orientation);

        let branch = reconciler.apply(&mut state, &mut body, 0.02);

        assert_eq!(branch, MotionBranch::Turning);
        assert!(body
            .linear_velocity()
            .abs_diff_eq(Vec3::new(0.4, 0.0, 0.8), 1e-5));
        // 90 degrees in half a second about the vertical axis.
        let spin = body.angular_velocity();
        assert!((spin.length() - std::f32::consts::PI).abs() < 1e-4);
        assert!(spin.x.abs() < 1e-5 && spin.z.abs() < 1e-5);
        assert_eq!(state.residual_angular_velocity(), spin);
        assert_eq!(state.residual_remaining(), reconciler.decay_window());
    }

    #[test]
    fn angular_velocity_takes_short_way_round() {
        let from = orientation_from_peer_angle(350.0);
        let to = orientation_from_peer_angle(10.0);
        let spin = angular_velocity_between(from, to, 1.0);
        assert!((spin.length().to_degrees() - 20.0).abs() < 1e-3);
        assert_eq!(angular_velocity_between(from, to, 0.0), Vec3::ZERO);
        assert_eq!(angular_velocity_between(from, from, 1.0), Vec3::ZERO);
    }

    #[test]
    fn residual_spin_fades_monotonically_then_snaps() {
        let reconciler = reconciler();
        let tick = 0.02;
        let mut state = MotionState::new(sample(Vec3::ZERO, 0.0, (5.0, 0.0, 0.0), 0.0));
        state.push_sample(sample(Vec3::new(0.0, 0.0, 0.5), 90.0, (5.0, 0.0, 0.0), 0.1));
        let mut body = KinematicBody::new(Vec3::ZERO, state.previous().orientation);
        assert_eq!(
            reconciler.apply(&mut state, &mut body, tick),
            MotionBranch::Turning
        );
        let initial = body.angular_velocity().length();
        assert!(initial > 0.0);

        // Next sample keeps the heading, so the proxy runs straight.
        state.push_sample(sample(Vec3::new(0.5, 0.0, 0.5), 90.0, (5.0, 0.0, 0.0), 0.2));
        let ticks = (reconciler.decay_window() / tick).ceil() as usize + 1;
        let mut last = initial;
        let mut reached_zero = false;
        for _ in 0..ticks {
            assert_eq!(
                reconciler.apply(&mut state, &mut body, tick),
                MotionBranch::Straight
            );
            let speed = body.angular_velocity().length();
            assert!(speed < last || (speed == 0.0 && last == 0.0));
            last = speed;
            if speed == 0.0 {
                reached_zero = true;
                assert_eq!(body.orientation(), state.current().orientation);
            }
        }
        assert!(reached_zero);
        assert_eq!(state.residual_remaining(), 0.0);
    }

    #[test]
    fn position_blends_toward_latest_sample() {
        let reconciler = reconciler();
        let mut state = MotionState::new(sample(Vec3::new(10.0, 0.0, 0.0), 90.0, (0.0, 0.0, 0.0), 0.0));
        let mut body = KinematicBody::new(Vec3::ZERO, Quat::IDENTITY);

        reconciler.apply(&mut state, &mut body, 0.02);

        assert!(body
            .position()
            .abs_diff_eq(Vec3::new(10.0 * 0.02, 0.0, 0.0), 1e-5));
    }
}
