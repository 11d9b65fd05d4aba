use thiserror::Error;

/// Failure to turn wire text into a [`SignalingMessage`](crate::codec::SignalingMessage).
///
/// Neither variant is fatal: the offending message is logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed signaling message: {0}")]
    Malformed(String),
    #[error("unknown signaling message type: {0}")]
    UnknownType(String),
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling transport is not connected")]
    NotConnected,
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("send failed: {0}")]
    Send(String),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// An operation rejected by the media engine. Fatal to the current call attempt only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("failed to create session description: {0}")]
    Create(String),
    #[error("failed to set session description: {0}")]
    SetDescription(String),
    #[error("failed to add ICE candidate: {0}")]
    AddCandidate(String),
    #[error("local audio track error: {0}")]
    Track(String),
    #[error("media engine is closed")]
    Closed,
}
