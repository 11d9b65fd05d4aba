//! Wire codec for signaling messages.
//!
//! Every message is a flat JSON object with a `type` discriminant and exactly one
//! payload field:
//!
//! ```text
//! {"type":"offer","sdp":"..."}
//! {"type":"answer","sdp":"..."}
//! {"type":"ice-candidate","candidate":"..."}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecodeError;

/// A signaling message exchanged with the remote peer through the relay.
///
/// The `sdp` and `candidate` strings are opaque and passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate { candidate: String },
}

impl SignalingMessage {
    pub const OFFER: &'static str = "offer";
    pub const ANSWER: &'static str = "answer";
    pub const ICE_CANDIDATE: &'static str = "ice-candidate";

    /// The wire discriminant of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => Self::OFFER,
            Self::Answer { .. } => Self::ANSWER,
            Self::IceCandidate { .. } => Self::ICE_CANDIDATE,
        }
    }

    fn is_known_kind(kind: &str) -> bool {
        matches!(kind, Self::OFFER | Self::ANSWER | Self::ICE_CANDIDATE)
    }
}

/// Serializes a message to its wire text.
pub fn encode(message: &SignalingMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

/// Parses wire text into a message.
///
/// Returns [`DecodeError::UnknownType`] for a well-formed object whose `type` is not
/// one of the three known kinds, and [`DecodeError::Malformed`] for everything else
/// that cannot be turned into a [`SignalingMessage`].
pub fn decode(bytes: &[u8]) -> Result<SignalingMessage, DecodeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let object = value
        .as_object()
        .ok_or_else(|| DecodeError::Malformed("message is not a JSON object".to_string()))?;

    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::Malformed("missing string field `type`".to_string()))?;

    if !SignalingMessage::is_known_kind(kind) {
        return Err(DecodeError::UnknownType(kind.to_string()));
    }

    serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))
}
