//! Media engine backed by webrtc-rs.
//!
//! One peer connection per call, created lazily by the first operation that needs it
//! so that an incoming offer can be applied without a prior local setup step. The
//! local audio track is an Opus sample track; feeding it with captured audio is left
//! to the embedding application.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine as CodecRegistry};
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::{MediaEngine, MediaEvent, MediaEventSink, PeerConnectionState, SdpKind};
use crate::calls::transport::IceCandidate;
use crate::error::MediaError;

pub const AUDIO_TRACK_ID: &str = "audio_track";
pub const AUDIO_STREAM_ID: &str = "audio_stream";

pub struct WebRtcMediaEngine {
    ice_servers: Vec<String>,
    /// `None` once disposed.
    api: Mutex<Option<Arc<API>>>,
    peer_connection: Mutex<Option<Arc<RTCPeerConnection>>>,
    audio_track: Mutex<Option<Arc<TrackLocalStaticSample>>>,
    sink: MediaEventSink,
}

impl WebRtcMediaEngine {
    pub fn new(ice_servers: Vec<String>, sink: MediaEventSink) -> Result<Self, MediaError> {
        let api = Self::create_api().map_err(|e| MediaError::Create(e.to_string()))?;
        Ok(Self {
            ice_servers,
            api: Mutex::new(Some(Arc::new(api))),
            peer_connection: Mutex::new(None),
            audio_track: Mutex::new(None),
            sink,
        })
    }

    fn create_api() -> Result<API, webrtc::Error> {
        let mut codecs = CodecRegistry::default();
        codecs.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut codecs)?;

        Ok(APIBuilder::new()
            .with_media_engine(codecs)
            .with_interceptor_registry(registry)
            .build())
    }

    /// Returns the current peer connection, creating one if the call has none yet.
    async fn peer_connection(&self) -> Result<Arc<RTCPeerConnection>, MediaError> {
        let mut slot = self.peer_connection.lock().await;
        if let Some(pc) = slot.as_ref() {
            return Ok(pc.clone());
        }

        let api = self
            .api
            .lock()
            .await
            .clone()
            .ok_or(MediaError::Closed)?;
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| MediaError::Create(e.to_string()))?,
        );
        self.install_callbacks(&pc);
        info!(target: "Media", "Peer connection created");

        *slot = Some(pc.clone());
        Ok(pc)
    }

    fn install_callbacks(&self, pc: &RTCPeerConnection) {
        let sink = self.sink.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = sink.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!(target: "Media", "ICE gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        sink.emit(MediaEvent::LocalIceCandidate(init.candidate));
                    }
                    Err(e) => warn!(target: "Media", "Unusable local candidate: {e}"),
                }
            })
        }));

        let sink = self.sink.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let sink = sink.clone();
            Box::pin(async move {
                if let Some(state) = map_connection_state(state) {
                    sink.emit(MediaEvent::ConnectionStateChanged(state));
                }
            })
        }));

        let sink = self.sink.clone();
        pc.on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.emit(MediaEvent::SignalingStateChanged(state.to_string()));
            })
        }));

        let sink = self.sink.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.emit(MediaEvent::IceConnectionStateChanged(state.to_string()));
            })
        }));

        let sink = self.sink.clone();
        pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.emit(MediaEvent::IceGatheringStateChanged(state.to_string()));
            })
        }));

        let sink = self.sink.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.emit(MediaEvent::RemoteTrackAdded(track.id().to_string()));
            })
        }));
    }

    fn description(kind: SdpKind, sdp: &str) -> Result<RTCSessionDescription, MediaError> {
        let desc = match kind {
            SdpKind::Offer => RTCSessionDescription::offer(sdp.to_string()),
            SdpKind::Answer => RTCSessionDescription::answer(sdp.to_string()),
        };
        desc.map_err(|e| MediaError::SetDescription(e.to_string()))
    }
}

fn map_connection_state(state: RTCPeerConnectionState) -> Option<PeerConnectionState> {
    Some(match state {
        RTCPeerConnectionState::New => PeerConnectionState::New,
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        _ => return None,
    })
}

#[async_trait]
impl MediaEngine for WebRtcMediaEngine {
    async fn attach_local_audio_track(&self) -> Result<(), MediaError> {
        let pc = self.peer_connection().await?;
        let mut slot = self.audio_track.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            AUDIO_TRACK_ID.to_owned(),
            AUDIO_STREAM_ID.to_owned(),
        ));
        pc.add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| MediaError::Track(e.to_string()))?;
        *slot = Some(track);
        debug!(target: "Media", "Local audio track attached");
        Ok(())
    }

    async fn create_local_offer(&self) -> Result<String, MediaError> {
        let pc = self.peer_connection().await?;
        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| MediaError::Create(e.to_string()))?;
        Ok(offer.sdp)
    }

    async fn create_local_answer(&self) -> Result<String, MediaError> {
        let pc = self.peer_connection().await?;
        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| MediaError::Create(e.to_string()))?;
        Ok(answer.sdp)
    }

    async fn set_local_description(&self, kind: SdpKind, sdp: &str) -> Result<(), MediaError> {
        let pc = self.peer_connection().await?;
        pc.set_local_description(Self::description(kind, sdp)?)
            .await
            .map_err(|e| MediaError::SetDescription(e.to_string()))
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<(), MediaError> {
        let pc = self.peer_connection().await?;
        pc.set_remote_description(Self::description(kind, sdp)?)
            .await
            .map_err(|e| MediaError::SetDescription(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), MediaError> {
        let pc = self.peer_connection().await?;
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: Some(candidate.sdp_mid.clone()),
            sdp_mline_index: Some(candidate.sdp_m_line_index),
            username_fragment: None,
        };
        pc.add_ice_candidate(init)
            .await
            .map_err(|e| MediaError::AddCandidate(e.to_string()))
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.audio_track.lock().await.take();
        if let Some(pc) = self.peer_connection.lock().await.take() {
            if let Err(e) = pc.close().await {
                warn!(target: "Media", "Error closing peer connection: {e}");
            }
            info!(target: "Media", "Peer connection closed");
        }
        Ok(())
    }

    async fn dispose(&self) -> Result<(), MediaError> {
        self.close().await?;
        self.api.lock().await.take();
        info!(target: "Media", "Media engine disposed");
        Ok(())
    }
}
