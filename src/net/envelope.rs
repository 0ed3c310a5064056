//! JSON envelopes carried over the event connection.
//!
//! Inbound messages are `{ "event": string, "data": object }`; outbound messages
//! are `{ "action": string, "data": object }`. The field-name asymmetry is the
//! backend's contract and is kept as-is.

#[cfg(test)]
#[path = "envelope_test.rs"]
mod envelope_test;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Local event: connection opened. Payload `{roomId, userId}`.
pub const CONNECTED: &str = "connected";
/// Local event: connection closed unexpectedly.
pub const DISCONNECTED: &str = "disconnected";
/// Local event: a connection attempt failed. Payload `{message}`.
pub const ERROR: &str = "error";
/// Local event: reconnect attempts exhausted.
pub const RECONNECT_FAILED: &str = "reconnectFailed";

pub const PLAYER_JOINED: &str = "playerJoined";
pub const PLAYER_LEFT: &str = "playerLeft";
pub const GAME_STARTED: &str = "gameStarted";
pub const ROUND_STARTED: &str = "roundStarted";
pub const ANSWER_PHASE_ENDED: &str = "answerPhaseEnded";
pub const GUESS_PHASE_ENDED: &str = "guessPhaseEnded";
pub const GAME_FINISHED: &str = "gameFinished";

/// Error returned by [`decode_event`].
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The text is not JSON or lacks an `event` name.
    #[error("malformed event envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The `event` field is present but empty.
    #[error("event envelope has an empty event name")]
    EmptyEvent,
    /// A binary message did not hold UTF-8 text.
    #[error("event envelope is not UTF-8")]
    NotUtf8,
}

/// A server-pushed event.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct InboundEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    action: &'a str,
    data: &'a Value,
}

/// Decode a text message into an event envelope.
///
/// # Errors
///
/// Returns [`EnvelopeError::Malformed`] for non-JSON text or a missing `event`
/// field and [`EnvelopeError::EmptyEvent`] for a blank event name.
pub fn decode_event(text: &str) -> Result<InboundEnvelope, EnvelopeError> {
    let envelope = serde_json::from_str::<InboundEnvelope>(text)?;
    if envelope.event.trim().is_empty() {
        return Err(EnvelopeError::EmptyEvent);
    }
    Ok(envelope)
}

/// Decode a binary message holding UTF-8 JSON.
///
/// # Errors
///
/// Returns [`EnvelopeError::NotUtf8`] for non-UTF-8 bytes, otherwise the same
/// errors as [`decode_event`].
pub fn decode_event_bytes(bytes: &[u8]) -> Result<InboundEnvelope, EnvelopeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| EnvelopeError::NotUtf8)?;
    decode_event(text)
}

/// Encode an outbound action as JSON text.
#[must_use]
pub fn encode_action(action: &str, data: &Value) -> String {
    let envelope = OutboundEnvelope { action, data };
    // Serializing a `&str` and a `Value` cannot fail.
    serde_json::to_string(&envelope).unwrap_or_default()
}

// =============================================================================
// SERVER EVENTS
// =============================================================================

/// Known game push events, classified by what the client should re-read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerEvent {
    PlayerJoined,
    PlayerLeft,
    GameStarted { session_id: Option<String> },
    RoundStarted,
    AnswerPhaseEnded,
    GuessPhaseEnded,
    GameFinished,
    Other(String),
}

impl ServerEvent {
    /// Classify an event by name and payload.
    #[must_use]
    pub fn classify(event: &str, data: &Value) -> Self {
        match event {
            PLAYER_JOINED => Self::PlayerJoined,
            PLAYER_LEFT => Self::PlayerLeft,
            GAME_STARTED => Self::GameStarted {
                session_id: data
                    .get("sessionId")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned),
            },
            ROUND_STARTED => Self::RoundStarted,
            ANSWER_PHASE_ENDED => Self::AnswerPhaseEnded,
            GUESS_PHASE_ENDED => Self::GuessPhaseEnded,
            GAME_FINISHED => Self::GameFinished,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Whether the room record should be re-fetched.
    #[must_use]
    pub fn refreshes_room(&self) -> bool {
        matches!(self, Self::PlayerJoined | Self::PlayerLeft)
    }

    /// Whether the game session should be re-fetched.
    #[must_use]
    pub fn refreshes_game(&self) -> bool {
        matches!(
            self,
            Self::GameStarted { .. }
                | Self::RoundStarted
                | Self::AnswerPhaseEnded
                | Self::GuessPhaseEnded
                | Self::GameFinished
        )
    }

    /// Names of every game event, for bulk subscription.
    #[must_use]
    pub fn names() -> [&'static str; 7] {
        [
            PLAYER_JOINED,
            PLAYER_LEFT,
            GAME_STARTED,
            ROUND_STARTED,
            ANSWER_PHASE_ENDED,
            GUESS_PHASE_ENDED,
            GAME_FINISHED,
        ]
    }
}
