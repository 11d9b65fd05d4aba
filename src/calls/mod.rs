//! Peer-to-peer audio calls.
//!
//! # Architecture
//!
//! - [`CallController`]: public handle; owns the controller task
//! - [`Negotiator`]: offer/answer state machine, free of I/O
//! - [`CallState`] & [`CallInfo`]: call state machine for tracking call lifecycle
//! - [`MediaEngine`]: the audio engine the negotiation drives
//! - [`IceCandidate`]: candidate plus the media section it belongs to
//!
//! # Protocol Overview
//!
//! The caller attaches its microphone track, creates an offer, applies it locally and
//! sends it through the relay. The callee applies the offer, answers, and sends the
//! answer back. Both sides trade ICE candidates as they are gathered; remote
//! candidates that arrive before the remote description are queued and replayed.

mod error;
mod manager;
pub mod media;
mod negotiation;
mod state;
mod transport;

pub use error::CallError;
pub use manager::{CallController, CallControllerBuilder, CallSnapshot};
#[cfg(feature = "webrtc-engine")]
pub use media::WebRtcMediaEngine;
pub use media::{
    MediaCompletion, MediaEngine, MediaEvent, MediaEventSink, MediaOp, MediaOpKind,
    MediaOutcome, PeerConnectionState, SdpKind, media_event_channel,
};
pub use negotiation::{
    AcceptRemoteOffer, Action, GlareDecision, GlarePolicy, Input, Negotiator, PendingIceQueue,
};
pub use state::{CallId, CallInfo, CallState, CallTransition, InvalidTransition, Role};
pub use transport::{DEFAULT_SDP_M_LINE_INDEX, DEFAULT_SDP_MID, IceCandidate};
