//! Media engine seam for audio calls.
//!
//! The negotiation core never touches audio or RTP directly. It asks a
//! [`MediaEngine`] to create and apply session descriptions, attach the microphone
//! track and add ICE candidates. The engine reports asynchronous happenings (gathered
//! candidates, peer connection state) back through a [`MediaEventSink`].
//!
//! Engine calls are executed one at a time by a worker task (see [`worker`]) so that
//! their completions reach the controller in the order the operations were issued.

#[cfg(feature = "webrtc-engine")]
mod webrtc;
pub(crate) mod worker;

#[cfg(feature = "webrtc-engine")]
pub use self::webrtc::WebRtcMediaEngine;
pub use worker::MediaCompletion;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

use crate::calls::transport::IceCandidate;
use crate::error::MediaError;

/// Which half of the offer/answer exchange a session description is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => f.write_str("offer"),
            SdpKind::Answer => f.write_str("answer"),
        }
    }
}

/// Peer connection state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Something the engine observed on its own schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// A local ICE candidate was gathered and should be sent to the peer.
    LocalIceCandidate(String),
    ConnectionStateChanged(PeerConnectionState),
    SignalingStateChanged(String),
    IceConnectionStateChanged(String),
    IceGatheringStateChanged(String),
    /// The peer's audio track arrived. Carries the track id.
    RemoteTrackAdded(String),
}

/// Handle an engine uses to report [`MediaEvent`]s to the controller.
#[derive(Debug, Clone)]
pub struct MediaEventSink {
    tx: mpsc::UnboundedSender<MediaEvent>,
}

impl MediaEventSink {
    /// Returns false once the controller has gone away.
    pub fn emit(&self, event: MediaEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

pub fn media_event_channel() -> (MediaEventSink, mpsc::UnboundedReceiver<MediaEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MediaEventSink { tx }, rx)
}

/// The audio/RTP engine the negotiation drives.
///
/// Every method may be called again after [`close`](MediaEngine::close) for a fresh
/// call. After [`dispose`](MediaEngine::dispose) all operations fail with
/// [`MediaError::Closed`].
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Whether local audio capture is permitted. A call is not started without it.
    fn audio_capture_available(&self) -> bool {
        true
    }

    async fn attach_local_audio_track(&self) -> Result<(), MediaError>;

    async fn create_local_offer(&self) -> Result<String, MediaError>;

    async fn create_local_answer(&self) -> Result<String, MediaError>;

    async fn set_local_description(&self, kind: SdpKind, sdp: &str) -> Result<(), MediaError>;

    async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<(), MediaError>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), MediaError>;

    /// Releases the audio track, audio source and peer connection of the current call.
    async fn close(&self) -> Result<(), MediaError>;

    /// Releases engine-wide resources. Terminal.
    async fn dispose(&self) -> Result<(), MediaError>;
}

/// One engine operation requested by the negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaOp {
    AttachLocalAudioTrack,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription { kind: SdpKind, sdp: String },
    SetRemoteDescription { kind: SdpKind, sdp: String },
    AddIceCandidate(IceCandidate),
    Release,
    Dispose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaOpKind {
    AttachLocalAudioTrack,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    AddIceCandidate,
    Release,
    Dispose,
}

impl MediaOpKind {
    /// A failure of this operation ends the current call attempt.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::AttachLocalAudioTrack
                | Self::CreateOffer
                | Self::CreateAnswer
                | Self::SetLocalDescription
                | Self::SetRemoteDescription
        )
    }
}

impl MediaOp {
    pub fn kind(&self) -> MediaOpKind {
        match self {
            MediaOp::AttachLocalAudioTrack => MediaOpKind::AttachLocalAudioTrack,
            MediaOp::CreateOffer => MediaOpKind::CreateOffer,
            MediaOp::CreateAnswer => MediaOpKind::CreateAnswer,
            MediaOp::SetLocalDescription { .. } => MediaOpKind::SetLocalDescription,
            MediaOp::SetRemoteDescription { .. } => MediaOpKind::SetRemoteDescription,
            MediaOp::AddIceCandidate(_) => MediaOpKind::AddIceCandidate,
            MediaOp::Release => MediaOpKind::Release,
            MediaOp::Dispose => MediaOpKind::Dispose,
        }
    }
}

/// Successful result of a [`MediaOp`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaOutcome {
    TrackAttached,
    OfferCreated(String),
    AnswerCreated(String),
    LocalDescriptionSet { kind: SdpKind, sdp: String },
    RemoteDescriptionSet(SdpKind),
    CandidateAdded,
    Released,
    Disposed,
}
