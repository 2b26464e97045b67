// Wire protocol: JSON event envelopes exchanged over the WebSocket.
//
// Every frame is `{"event": "<name>", "data": <payload>}`. Payload-less events
// omit `data` when sent and ignore it when received.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::session::{BuzzerResult, BuzzerSession, ClientId, Participant};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not a JSON event envelope: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("unknown event `{0}`")]
    UnknownEvent(String),

    #[error("invalid payload for `{event}`: {source}")]
    InvalidPayload {
        event: String,
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// Raw envelope; `data` is decoded per event once the name is known.
#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    name: String,
}

/// Events a browser client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Join the game under a display name.
    Register { name: String },
    BuzzerPressed,
    /// Admin: open a round.
    StartBuzzer,
    /// Admin: close the current round.
    StopBuzzer,
    /// Admin: wipe the whole session.
    ResetBuzzer,
}

impl ClientMessage {
    /// Decode one text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;

        match envelope.event.as_str() {
            "register" => {
                let payload: RegisterPayload =
                    serde_json::from_value(envelope.data).map_err(|source| {
                        ProtocolError::InvalidPayload {
                            event: envelope.event.clone(),
                            source,
                        }
                    })?;
                Ok(ClientMessage::Register { name: payload.name })
            }
            "buzzerPressed" => Ok(ClientMessage::BuzzerPressed),
            "startBuzzer" => Ok(ClientMessage::StartBuzzer),
            "stopBuzzer" => Ok(ClientMessage::StopBuzzer),
            "resetBuzzer" => Ok(ClientMessage::ResetBuzzer),
            _ => Err(ProtocolError::UnknownEvent(envelope.event)),
        }
    }

    /// Event name as it appears on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::Register { .. } => "register",
            ClientMessage::BuzzerPressed => "buzzerPressed",
            ClientMessage::StartBuzzer => "startBuzzer",
            ClientMessage::StopBuzzer => "stopBuzzer",
            ClientMessage::ResetBuzzer => "resetBuzzer",
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Events the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// First frame on every connection: tells the client its own id.
    Connected { id: ClientId },
    /// Full session snapshot for a newly connected client.
    CurrentState(BuzzerSession),
    BuzzerStarted { round: u32 },
    BuzzerStopped,
    BuzzerReset,
    ParticipantJoined(Participant),
    UpdateParticipants(Vec<Participant>),
    BuzzerResult(BuzzerResult),
    /// Results of the current round, in position order.
    UpdateResults(Vec<BuzzerResult>),
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
