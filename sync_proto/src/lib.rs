//! Wire protocol shared by the traffic bridge and its peer simulator.
//!
//! Every payload is a single UTF-8 JSON document. Inbound broadcast payloads
//! are objects carrying a `type` discriminator; the outbound ego snapshot is
//! `{"vehicles":[record]}` with a single [`VehicleRecord`], or `{}` when there
//! is no ego to report.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub mod framing;

pub use framing::{encode_frame, frame_text, FrameDecoder, FRAME_HEADER_LEN};

/// Payload published when no ego vehicle is available to report.
pub const EMPTY_SNAPSHOT: &str = "{}";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VehicleRecord {
    pub vehicle_id: String,
    pub position: [f64; 3],
    #[serde(default)]
    pub angle: f64,
    #[serde(rename = "type", default)]
    pub type_tag: String,
    #[serde(default)]
    pub long_speed: f32,
    #[serde(default)]
    pub vert_speed: f32,
    #[serde(default)]
    pub lat_speed: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrafficLightRecord {
    pub junction_id: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    Command { command: String },
    Vehicles { vehicles: Vec<VehicleRecord> },
    #[serde(rename = "trafficlights")]
    TrafficLights { lights: Vec<TrafficLightRecord> },
}

impl InboundMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            InboundMessage::Command { .. } => MessageKind::Command,
            InboundMessage::Vehicles { .. } => MessageKind::Vehicles,
            InboundMessage::TrafficLights { .. } => MessageKind::TrafficLights,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Command,
    Vehicles,
    TrafficLights,
}

impl MessageKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "command" => Some(MessageKind::Command),
            "vehicles" => Some(MessageKind::Vehicles),
            "trafficlights" => Some(MessageKind::TrafficLights),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Command => "command",
            MessageKind::Vehicles => "vehicles",
            MessageKind::TrafficLights => "trafficlights",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload has no string `type` discriminator")]
    MissingType,
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("invalid `{kind}` message body: {source}")]
    InvalidBody {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },
    #[error("frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

#[derive(Deserialize)]
struct CommandBody {
    command: String,
}

#[derive(Deserialize)]
struct VehiclesBody {
    vehicles: Vec<VehicleRecord>,
}

#[derive(Serialize)]
struct EgoSnapshotBody<'a> {
    vehicles: &'a [VehicleRecord],
}

#[derive(Deserialize)]
struct TrafficLightsBody {
    lights: Vec<TrafficLightRecord>,
}

/// Decode one inbound payload.
///
/// The `type` discriminator is resolved before the body is looked at, so a
/// missing or unknown tag is reported as such rather than as a shape error.
pub fn decode_inbound(text: &str) -> Result<InboundMessage, DecodeError> {
    let value: JsonValue = serde_json::from_str(text)?;
    let JsonValue::Object(mut fields) = value else {
        return Err(DecodeError::NotAnObject);
    };
    let tag = match fields.remove("type") {
        Some(JsonValue::String(tag)) => tag,
        _ => return Err(DecodeError::MissingType),
    };
    let kind = MessageKind::from_tag(&tag).ok_or(DecodeError::UnknownType(tag))?;
    let body = JsonValue::Object(fields);
    let invalid = |source: serde_json::Error| DecodeError::InvalidBody { kind, source };

    match kind {
        MessageKind::Command => {
            let body: CommandBody = serde_json::from_value(body).map_err(invalid)?;
            Ok(InboundMessage::Command {
                command: body.command,
            })
        }
        MessageKind::Vehicles => {
            let body: VehiclesBody = serde_json::from_value(body).map_err(invalid)?;
            Ok(InboundMessage::Vehicles {
                vehicles: body.vehicles,
            })
        }
        MessageKind::TrafficLights => {
            let body: TrafficLightsBody = serde_json::from_value(body).map_err(invalid)?;
            Ok(InboundMessage::TrafficLights {
                lights: body.lights,
            })
        }
    }
}

pub fn encode_inbound(message: &InboundMessage) -> serde_json::Result<String> {
    serde_json::to_string(message)
}

pub fn encode_ego_snapshot(record: &VehicleRecord) -> serde_json::Result<String> {
    serde_json::to_string(&EgoSnapshotBody {
        vehicles: std::slice::from_ref(record),
    })
}

/// Decode an outbound snapshot as the peer sees it. `{}` and an empty
/// `vehicles` list both mean "no ego".
pub fn decode_ego_snapshot(text: &str) -> Result<Option<VehicleRecord>, DecodeError> {
    let value: JsonValue = serde_json::from_str(text)?;
    let JsonValue::Object(fields) = value else {
        return Err(DecodeError::NotAnObject);
    };
    if fields.is_empty() {
        return Ok(None);
    }
    let body: VehiclesBody =
        serde_json::from_value(JsonValue::Object(fields)).map_err(|source| {
            DecodeError::InvalidBody {
                kind: MessageKind::Vehicles,
                source,
            }
        })?;
    Ok(body.vehicles.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_vehicle_batch() {
        let text = r#"{"type":"vehicles","vehicles":[{"vehicle_id":"v1","position":[1.0,2.0,3.0],"angle":90,"type":"car","long_speed":5,"vert_speed":0,"lat_speed":0.5}]}"#;
        let message = decode_inbound(text).expect("vehicles decode");
        let InboundMessage::Vehicles { vehicles } = message else {
            panic!("expected vehicles message");
        };
        assert_eq!(vehicles.len(), 1);
        assert_eq!(vehicles[0].vehicle_id, "v1");
        assert_eq!(vehicles[0].position, [1.0, 2.0, 3.0]);
        assert_eq!(vehicles[0].type_tag, "car");
        assert_eq!(vehicles[0].lat_speed, 0.5);
    }

    #[test]
    fn missing_speeds_default_to_zero() {
        // Ego rows published by the peer carry no speed fields.
        let text = r#"{"type":"vehicles","vehicles":[{"vehicle_id":"f_0.0","position":[0,0,0],"angle":12.5,"type":"ego","timestamp":1.0}]}"#;
        let InboundMessage::Vehicles { vehicles } = decode_inbound(text).unwrap() else {
            panic!("expected vehicles message");
        };
        assert_eq!(vehicles[0].long_speed, 0.0);
        assert_eq!(vehicles[0].vert_speed, 0.0);
    }

    #[test]
    fn decodes_traffic_lights_and_commands() {
        let lights = decode_inbound(
            r#"{"type":"trafficlights","lights":[{"junction_id":"J1","state":"Gr"}]}"#,
        )
        .unwrap();
        assert_eq!(lights.kind(), MessageKind::TrafficLights);

        let command = decode_inbound(r#"{"type":"command","command":"START_RECORDING"}"#).unwrap();
        assert_eq!(
            command,
            InboundMessage::Command {
                command: "START_RECORDING".into()
            }
        );
    }

    #[test]
    fn discriminator_errors_are_distinct() {
        assert!(matches!(
            decode_inbound("not json"),
            Err(DecodeError::InvalidJson(_))
        ));
        assert!(matches!(decode_inbound("[1,2]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(
            decode_inbound(r#"{"vehicles":[]}"#),
            Err(DecodeError::MissingType)
        ));
        assert!(matches!(
            decode_inbound(r#"{"type":7}"#),
            Err(DecodeError::MissingType)
        ));
        match decode_inbound(r#"{"type":"weather"}"#) {
            Err(DecodeError::UnknownType(tag)) => assert_eq!(tag, "weather"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            decode_inbound(r#"{"type":"vehicles"}"#),
            Err(DecodeError::InvalidBody {
                kind: MessageKind::Vehicles,
                ..
            })
        ));
    }

    #[test]
    fn encoded_inbound_carries_type_tag() {
        let message = InboundMessage::TrafficLights {
            lights: vec![TrafficLightRecord {
                junction_id: "J1".into(),
                state: "rG".into(),
            }],
        };
        let text = encode_inbound(&message).unwrap();
        assert!(text.contains(r#""type":"trafficlights""#));
        assert_eq!(decode_inbound(&text).unwrap(), message);
    }

    #[test]
    fn ego_snapshot_wraps_record_in_vehicles_list() {
        let record = VehicleRecord {
            vehicle_id: "f_0.0".into(),
            position: [10.0, 20.0, 0.0],
            angle: 90.0,
            type_tag: "ego".into(),
            long_speed: 3.5,
            vert_speed: 0.0,
            lat_speed: 0.0,
        };
        let text = encode_ego_snapshot(&record).unwrap();
        let value: JsonValue = serde_json::from_str(&text).unwrap();
        let vehicles = value
            .get("vehicles")
            .and_then(JsonValue::as_array)
            .expect("vehicles list");
        assert_eq!(vehicles.len(), 1);
        assert_eq!(vehicles[0]["vehicle_id"], "f_0.0");
        assert_eq!(decode_ego_snapshot(&text).unwrap(), Some(record));
    }

    #[test]
    fn empty_snapshots_mean_no_ego() {
        assert_eq!(decode_ego_snapshot(EMPTY_SNAPSHOT).unwrap(), None);
        assert_eq!(decode_ego_snapshot(r#"{"vehicles":[]}"#).unwrap(), None);
        assert!(matches!(
            decode_ego_snapshot(r#"[{"vehicle_id":"f_0.0","position":[0,0,0]}]"#),
            Err(DecodeError::NotAnObject)
        ));
        assert!(matches!(
            decode_ego_snapshot(r#"{"lights":[]}"#),
            Err(DecodeError::InvalidBody { .. })
        ));
    }
}
