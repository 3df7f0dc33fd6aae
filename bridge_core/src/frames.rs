//! Conversions between the peer's frame (z up, compass headings) and the
//! local y-up frame whose bodies face +X.

use bevy::math::{EulerRot, Quat, Vec3};

pub fn position_from_peer(position: [f64; 3]) -> Vec3 {
    Vec3::new(position[0] as f32, position[2] as f32, position[1] as f32)
}

pub fn position_to_peer(position: Vec3) -> [f64; 3] {
    [position.x as f64, position.z as f64, position.y as f64]
}

/// Peer heading 90 (east) maps to the identity orientation.
pub fn orientation_from_peer_angle(angle_deg: f64) -> Quat {
    Quat::from_rotation_y(((angle_deg - 90.0) as f32).to_radians())
}

pub fn peer_angle_from_orientation(orientation: Quat) -> f64 {
    let (yaw, _, _) = orientation.to_euler(EulerRot::YXZ);
    (yaw.to_degrees() as f64 + 90.0).rem_euclid(360.0)
}

/// Rotates body-frame (longitudinal, vertical, lateral) speeds into world space.
pub fn world_velocity(orientation: Quat, long_speed: f32, vert_speed: f32, lat_speed: f32) -> Vec3 {
    orientation * Vec3::new(long_speed, vert_speed, lat_speed)
}

/// Inverse of [`world_velocity`]: returns (longitudinal, vertical, lateral).
pub fn body_speeds(orientation: Quat, velocity: Vec3) -> (f32, f32, f32) {
    let local = orientation.inverse() * velocity;
    (local.x, local.y, local.z)
}

/// Wraps an angle in degrees into (-180, 180].
pub fn wrap_degrees(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}
