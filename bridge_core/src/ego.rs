use sync_proto::{encode_ego_snapshot, VehicleRecord, EMPTY_SNAPSHOT};
use tracing::warn;

use crate::body::PhysicalBody;
use crate::frames::{body_speeds, peer_angle_from_orientation, position_to_peer};

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Samples the ego body in peer coordinates, every value rounded to two
/// decimals.
pub fn ego_record<B>(vehicle_id: &str, type_tag: &str, body: &B) -> VehicleRecord
where
    B: PhysicalBody + ?Sized,
{
    let orientation = body.orientation();
    let (long, vert, lat) = body_speeds(orientation, body.linear_velocity());
    VehicleRecord {
        vehicle_id: vehicle_id.to_string(),
        position: position_to_peer(body.position()).map(round2),
        angle: round2(peer_angle_from_orientation(orientation)),
        type_tag: type_tag.to_string(),
        long_speed: round2(long as f64) as f32,
        vert_speed: round2(vert as f64) as f32,
        lat_speed: round2(lat as f64) as f32,
    }
}

pub fn encode_ego_payload(record: Option<&VehicleRecord>) -> String {
    let Some(record) = record else {
        return EMPTY_SNAPSHOT.to_string();
    };
    match encode_ego_snapshot(record) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(
                target: "traffic_bridge::transport",
                error = %err,
                "ego.encode_failed"
            );
            EMPTY_SNAPSHOT.to_string()
        }
    }
}
