use crate::types::*;
use serde::{Deserialize, Serialize};

/// Wire unit in both directions: `{"type": ..., "payload": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

/// Errors produced while decoding inbound frames.
///
/// All of them drop the single offending message; none closes the connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),

    #[error("invalid {kind} payload: {source}")]
    MalformedPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown message type: {0}")]
    UnknownType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerAction {
    Start,
    Pause,
    Reset,
    /// Anything else; ignored by the dispatcher
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimerControl {
    pub action: TimerAction,
    #[serde(default)]
    pub seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Handshake {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetResult {
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientCommand {
    /// Connection id or remote address of the display to act on
    pub target: String,
    /// `rename`, or a display mode such as `show_timer`
    pub command: String,
    #[serde(default)]
    pub value: String,
}

/// Inbound commands after payload validation
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    TimerControl(TimerControl),
    Handshake(Handshake),
    SetResult(SetResult),
    ClientCommand(ClientCommand),
}

impl Envelope {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::MalformedEnvelope)
    }

    fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        T::deserialize(&self.payload).map_err(|source| ProtocolError::MalformedPayload {
            kind: self.kind.clone(),
            source,
        })
    }
}

impl TryFrom<&Envelope> for ClientMessage {
    type Error = ProtocolError;

    fn try_from(envelope: &Envelope) -> Result<Self, Self::Error> {
        match envelope.kind.as_str() {
            "timer_control" => Ok(Self::TimerControl(envelope.payload_as()?)),
            "handshake" => Ok(Self::Handshake(envelope.payload_as()?)),
            "set_result" => Ok(Self::SetResult(envelope.payload_as()?)),
            "client_command" => Ok(Self::ClientCommand(envelope.payload_as()?)),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

/// Outbound messages, serialized as `{"type": "<snake_case>", "payload": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    TimerUpdate(TimerState),
    SetResult(SetResult),
    DisplayMode(String),
    UpdateConfig { key: String, value: String },
    ClientList(Vec<RosterEntry>),
    Error(String),
}
