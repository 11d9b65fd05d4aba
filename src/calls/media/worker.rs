//! Serial executor for media engine operations.

use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{MediaEngine, MediaOp, MediaOpKind, MediaOutcome};
use crate::calls::state::CallId;
use crate::error::MediaError;

#[derive(Debug)]
pub(crate) struct MediaRequest {
    pub call_id: CallId,
    pub op: MediaOp,
}

/// Result of one [`MediaRequest`], tagged with the call that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCompletion {
    pub call_id: CallId,
    pub op: MediaOpKind,
    pub result: Result<MediaOutcome, MediaError>,
}

/// Runs requests one at a time, in arrival order, and reports each completion.
///
/// Exits when the request channel closes or the completion receiver is dropped.
pub(crate) async fn run_media_worker(
    engine: Arc<dyn MediaEngine>,
    mut requests: mpsc::UnboundedReceiver<MediaRequest>,
    completions: mpsc::UnboundedSender<MediaCompletion>,
) {
    while let Some(MediaRequest { call_id, op }) = requests.recv().await {
        let kind = op.kind();
        debug!(target: "Media", "{call_id}: executing {kind:?}");
        let result = execute(engine.as_ref(), op).await;
        if let Err(e) = &result {
            warn!(target: "Media", "{call_id}: {kind:?} failed: {e}");
        }
        let completion = MediaCompletion {
            call_id,
            op: kind,
            result,
        };
        if completions.send(completion).is_err() {
            break;
        }
    }
    debug!(target: "Media", "Media worker stopped");
}

async fn execute(engine: &dyn MediaEngine, op: MediaOp) -> Result<MediaOutcome, MediaError> {
    match op {
        MediaOp::AttachLocalAudioTrack => engine
            .attach_local_audio_track()
            .await
            .map(|_| MediaOutcome::TrackAttached),
        MediaOp::CreateOffer => engine.create_local_offer().await.map(MediaOutcome::OfferCreated),
        MediaOp::CreateAnswer => engine
            .create_local_answer()
            .await
            .map(MediaOutcome::AnswerCreated),
        MediaOp::SetLocalDescription { kind, sdp } => {
            engine.set_local_description(kind, &sdp).await?;
            Ok(MediaOutcome::LocalDescriptionSet { kind, sdp })
        }
        MediaOp::SetRemoteDescription { kind, sdp } => {
            engine.set_remote_description(kind, &sdp).await?;
            Ok(MediaOutcome::RemoteDescriptionSet(kind))
        }
        MediaOp::AddIceCandidate(candidate) => engine
            .add_ice_candidate(&candidate)
            .await
            .map(|_| MediaOutcome::CandidateAdded),
        MediaOp::Release => engine.close().await.map(|_| MediaOutcome::Released),
        MediaOp::Dispose => engine.dispose().await.map(|_| MediaOutcome::Disposed),
    }
}
