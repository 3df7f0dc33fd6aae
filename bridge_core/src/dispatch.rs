use std::fmt;

use sync_proto::{
    decode_inbound, DecodeError, InboundMessage, MessageKind, TrafficLightRecord, VehicleRecord,
};
use thiserror::Error;
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeCommand {
    StartRecording,
    StopRecording,
}

impl BridgeCommand {
    pub const START_RECORDING: &'static str = "START_RECORDING";
    pub const STOP_RECORDING: &'static str = "STOP_RECORDING";

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            Self::START_RECORDING => Some(BridgeCommand::StartRecording),
            Self::STOP_RECORDING => Some(BridgeCommand::StopRecording),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeCommand::StartRecording => Self::START_RECORDING,
            BridgeCommand::StopRecording => Self::STOP_RECORDING,
        }
    }
}

impl fmt::Display for BridgeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed message: {0}")]
    Malformed(#[from] DecodeError),
    #[error("unknown command token `{0}`")]
    UnknownCommand(String),
}

/// Receives routed messages. The dispatcher owns no state; all side effects
/// land here.
pub trait MessageHandler {
    fn on_command(&mut self, command: BridgeCommand);
    fn on_vehicles(&mut self, vehicles: Vec<VehicleRecord>);
    fn on_traffic_lights(&mut self, lights: Vec<TrafficLightRecord>);
}

/// Decodes one payload and routes it. Nothing reaches `handler` unless the
/// whole payload is valid.
pub fn dispatch<H>(payload: &str, handler: &mut H) -> Result<MessageKind, DispatchError>
where
    H: MessageHandler + ?Sized,
{
    let message = decode_inbound(payload)?;
    let kind = message.kind();
    match message {
        InboundMessage::Command { command } => {
            let parsed =
                BridgeCommand::parse(&command).ok_or(DispatchError::UnknownCommand(command))?;
            handler.on_command(parsed);
        }
        InboundMessage::Vehicles { vehicles } => handler.on_vehicles(vehicles),
        InboundMessage::TrafficLights { lights } => handler.on_traffic_lights(lights),
    }
    trace!(target: "traffic_bridge::dispatch", kind = %kind, "message.dispatched");
    Ok(kind)
}

/// [`dispatch`] with errors contained: failures are logged and the payload
/// is dropped.
pub fn dispatch_payload<H>(payload: &str, handler: &mut H) -> Option<MessageKind>
where
    H: MessageHandler + ?Sized,
{
    match dispatch(payload, handler) {
        Ok(kind) => Some(kind),
        Err(err) => {
            warn!(
                target: "traffic_bridge::dispatch",
                error = %err,
                payload_len = payload.len(),
                "message.dropped"
            );
            None
        }
    }
}
