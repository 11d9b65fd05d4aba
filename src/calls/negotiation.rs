//! Offer/answer negotiation for a single audio call.
//!
//! [`Negotiator`] performs no I/O. Every local command, remote message, media
//! completion and media event is fed in as an [`Input`]; the returned [`Action`]s
//! say which engine operations to issue, which messages to send and what to report.
//! The caller executes them in order.
//!
//! Remote ICE candidates that arrive before the remote description is applied are
//! held in a [`PendingIceQueue`] and replayed in arrival order the moment it is.

use log::{debug, info, warn};
use std::collections::VecDeque;

use super::media::{
    MediaCompletion, MediaEvent, MediaOp, MediaOutcome, PeerConnectionState, SdpKind,
};
use super::state::{CallId, CallInfo, CallState, CallTransition, Role};
use super::transport::IceCandidate;
use crate::codec::SignalingMessage;
use crate::events::Status;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    StartCall,
    StopCall,
    Remote(SignalingMessage),
    /// The transport wrote a message to the relay.
    Delivered(SignalingMessage),
    MediaCompleted(MediaCompletion),
    Media(MediaEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Media { call_id: CallId, op: MediaOp },
    Send(SignalingMessage),
    Status(Status),
    Log(String),
}

/// What to do with an offer that arrives while a call is already in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlareDecision {
    /// Abandon the current call and answer the incoming offer.
    AcceptRemote,
    /// Keep the current call and drop the incoming offer.
    KeepLocal,
}

pub trait GlarePolicy: Send {
    fn on_offer_collision(&mut self, state: CallState, role: Option<Role>) -> GlareDecision;
}

/// Treats every incoming offer as the start of a fresh call.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptRemoteOffer;

impl GlarePolicy for AcceptRemoteOffer {
    fn on_offer_collision(&mut self, _state: CallState, _role: Option<Role>) -> GlareDecision {
        GlareDecision::AcceptRemote
    }
}

/// Remote candidates waiting for a remote description.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PendingIceQueue {
    candidates: VecDeque<IceCandidate>,
}

impl PendingIceQueue {
    pub fn push(&mut self, candidate: IceCandidate) {
        self.candidates.push_back(candidate);
    }

    /// Removes and returns every queued candidate, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = IceCandidate> + '_ {
        self.candidates.drain(..)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
    }
}

pub struct Negotiator {
    call: Option<CallInfo>,
    last_call_id: CallId,
    remote_description_set: bool,
    pending_ice: PendingIceQueue,
    glare: Box<dyn GlarePolicy>,
}

impl Default for Negotiator {
    fn default() -> Self {
        Self::new(Box::new(AcceptRemoteOffer))
    }
}

impl Negotiator {
    pub fn new(glare: Box<dyn GlarePolicy>) -> Self {
        Self {
            call: None,
            last_call_id: CallId::new(0),
            remote_description_set: false,
            pending_ice: PendingIceQueue::default(),
            glare,
        }
    }

    pub fn state(&self) -> CallState {
        self.call.as_ref().map(|c| c.state).unwrap_or_default()
    }

    pub fn role(&self) -> Option<Role> {
        self.call.as_ref().map(|c| c.role)
    }

    pub fn call(&self) -> Option<&CallInfo> {
        self.call.as_ref()
    }

    pub fn pending_remote_candidates(&self) -> usize {
        self.pending_ice.len()
    }

    pub fn handle(&mut self, input: Input) -> Vec<Action> {
        let mut out = Vec::new();
        match input {
            Input::StartCall => self.start_call(&mut out),
            Input::StopCall => self.stop_call(&mut out),
            Input::Remote(message) => self.on_remote(message, &mut out),
            Input::Delivered(message) => self.on_delivered(&message),
            Input::MediaCompleted(completion) => self.on_completion(completion, &mut out),
            Input::Media(event) => self.on_media_event(event, &mut out),
        }
        out
    }

    /// Replaces the current call with a fresh one. `None` if the transition table
    /// refuses it.
    fn begin_call(&mut self, role: Role, out: &mut Vec<Action>) -> Option<CallId> {
        let call_id = self.last_call_id.next();
        let call = match CallInfo::begin(call_id, role, self.state()) {
            Ok(call) => call,
            Err(e) => {
                warn!(target: "Negotiation", "{call_id}: {e}");
                out.push(Action::Log(format!("Ignored: {e}")));
                return None;
            }
        };
        self.last_call_id = call_id;
        self.remote_description_set = false;
        // Candidates queued before our own offer belong to some earlier session.
        if role == Role::Caller && !self.pending_ice.is_empty() {
            out.push(Action::Log(format!(
                "Discarding {} stale remote ICE candidate(s)",
                self.pending_ice.len()
            )));
            self.pending_ice.clear();
        }
        self.call = Some(call);
        info!(target: "Negotiation", "{call_id}: new call as {role:?}");
        Some(call_id)
    }

    fn transition(&mut self, transition: CallTransition, out: &mut Vec<Action>) -> bool {
        let Some(call) = self.call.as_mut() else {
            return false;
        };
        match call.apply_transition(transition) {
            Ok(()) => {
                debug!(target: "Negotiation", "{}: now {:?}", call.call_id, call.state);
                true
            }
            Err(e) => {
                warn!(target: "Negotiation", "{}: {e}", call.call_id);
                out.push(Action::Log(format!("Ignored: {e}")));
                false
            }
        }
    }

    fn start_call(&mut self, out: &mut Vec<Action>) {
        if !self.state().is_vacant() {
            out.push(Action::Log(format!(
                "Call already in progress ({:?})",
                self.state()
            )));
            return;
        }
        let Some(call_id) = self.begin_call(Role::Caller, out) else {
            return;
        };
        out.push(Action::Status(Status::Calling));
        out.push(Action::Log("Starting call".to_string()));
        out.push(Action::Media {
            call_id,
            op: MediaOp::AttachLocalAudioTrack,
        });
        out.push(Action::Media {
            call_id,
            op: MediaOp::CreateOffer,
        });
    }

    fn stop_call(&mut self, out: &mut Vec<Action>) {
        self.pending_ice.clear();
        self.remote_description_set = false;
        let Some(call) = self.call.as_ref() else {
            out.push(Action::Log("No call to stop".to_string()));
            return;
        };
        if call.state.is_closed() {
            out.push(Action::Log("Call already ended".to_string()));
            return;
        }
        let call_id = call.call_id;
        self.transition(CallTransition::Stop, out);
        out.push(Action::Media {
            call_id,
            op: MediaOp::Release,
        });
        out.push(Action::Status(Status::CallEnded));
        out.push(Action::Log("Call ended".to_string()));
    }

    /// Ends the current call attempt after an engine failure.
    fn fail(&mut self, reason: String, out: &mut Vec<Action>) {
        let Some(call_id) = self.call.as_ref().map(|c| c.call_id) else {
            return;
        };
        warn!(target: "Negotiation", "{call_id}: {reason}");
        self.transition(CallTransition::Fail, out);
        self.pending_ice.clear();
        self.remote_description_set = false;
        out.push(Action::Media {
            call_id,
            op: MediaOp::Release,
        });
        out.push(Action::Log(reason));
        out.push(Action::Status(Status::CallFailed));
    }

    fn on_remote(&mut self, message: SignalingMessage, out: &mut Vec<Action>) {
        match message {
            SignalingMessage::Offer { sdp } => self.on_remote_offer(sdp, out),
            SignalingMessage::Answer { sdp } => self.on_remote_answer(sdp, out),
            SignalingMessage::IceCandidate { candidate } => {
                self.on_remote_candidate(IceCandidate::from_remote(candidate), out)
            }
        }
    }

    fn on_remote_offer(&mut self, sdp: String, out: &mut Vec<Action>) {
        let state = self.state();
        if !state.is_vacant() {
            match self.glare.on_offer_collision(state, self.role()) {
                GlareDecision::KeepLocal => {
                    out.push(Action::Log(format!(
                        "Ignoring offer received while {state:?}"
                    )));
                    return;
                }
                GlareDecision::AcceptRemote => {
                    out.push(Action::Log(format!(
                        "Offer received while {state:?}, restarting negotiation"
                    )));
                    if let Some(old) = self.call.as_ref().map(|c| c.call_id) {
                        out.push(Action::Media {
                            call_id: old,
                            op: MediaOp::Release,
                        });
                    }
                }
            }
        }

        let Some(call_id) = self.begin_call(Role::Callee, out) else {
            return;
        };
        out.push(Action::Status(Status::IncomingCall));
        out.push(Action::Log("Received offer".to_string()));
        out.push(Action::Media {
            call_id,
            op: MediaOp::SetRemoteDescription {
                kind: SdpKind::Offer,
                sdp,
            },
        });
    }

    fn on_remote_answer(&mut self, sdp: String, out: &mut Vec<Action>) {
        let Some(call_id) = self
            .call
            .as_ref()
            .filter(|c| c.state.can_accept_answer())
            .map(|c| c.call_id)
        else {
            out.push(Action::Log(format!(
                "Ignoring answer received while {:?}",
                self.state()
            )));
            return;
        };
        self.transition(CallTransition::RemoteAnswer, out);
        out.push(Action::Log("Received answer".to_string()));
        out.push(Action::Media {
            call_id,
            op: MediaOp::SetRemoteDescription {
                kind: SdpKind::Answer,
                sdp,
            },
        });
    }

    fn on_remote_candidate(&mut self, candidate: IceCandidate, out: &mut Vec<Action>) {
        match self.call.as_ref() {
            Some(call) if self.remote_description_set && !call.state.is_closed() => {
                out.push(Action::Log("Adding remote ICE candidate".to_string()));
                out.push(Action::Media {
                    call_id: call.call_id,
                    op: MediaOp::AddIceCandidate(candidate),
                });
            }
            _ => {
                self.pending_ice.push(candidate);
                out.push(Action::Log(format!(
                    "Queued remote ICE candidate ({} pending)",
                    self.pending_ice.len()
                )));
            }
        }
    }

    fn on_delivered(&mut self, message: &SignalingMessage) {
        if matches!(message, SignalingMessage::Offer { .. })
            && self.state() == CallState::OfferSent
        {
            let mut ignored = Vec::new();
            self.transition(CallTransition::OfferDelivered, &mut ignored);
        }
    }

    fn on_completion(&mut self, completion: MediaCompletion, out: &mut Vec<Action>) {
        let MediaCompletion {
            call_id,
            op,
            result,
        } = completion;

        let live = self
            .call
            .as_ref()
            .is_some_and(|c| c.call_id == call_id && !c.state.is_closed());
        if !live {
            debug!(target: "Negotiation", "{call_id}: late {op:?} completion ignored");
            return;
        }

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) if op.is_fatal() => {
                self.fail(format!("Media error: {e}"), out);
                return;
            }
            Err(e) => {
                out.push(Action::Log(format!("Media error: {e}")));
                return;
            }
        };

        match outcome {
            MediaOutcome::TrackAttached => {
                out.push(Action::Log("Local audio track attached".to_string()));
            }
            MediaOutcome::OfferCreated(sdp) => {
                if self.state() == CallState::AwaitingLocalOffer {
                    out.push(Action::Log("Created offer".to_string()));
                    out.push(Action::Media {
                        call_id,
                        op: MediaOp::SetLocalDescription {
                            kind: SdpKind::Offer,
                            sdp,
                        },
                    });
                }
            }
            MediaOutcome::AnswerCreated(sdp) => {
                if self.state() == CallState::OfferReceived {
                    out.push(Action::Log("Created answer".to_string()));
                    out.push(Action::Media {
                        call_id,
                        op: MediaOp::SetLocalDescription {
                            kind: SdpKind::Answer,
                            sdp,
                        },
                    });
                }
            }
            MediaOutcome::LocalDescriptionSet { kind, sdp } => {
                let (transition, message) = match kind {
                    SdpKind::Offer => (
                        CallTransition::LocalOfferSent,
                        SignalingMessage::Offer { sdp },
                    ),
                    SdpKind::Answer => (
                        CallTransition::LocalAnswerSent,
                        SignalingMessage::Answer { sdp },
                    ),
                };
                if self.transition(transition, out) {
                    out.push(Action::Log(format!("Local {kind} set")));
                    out.push(Action::Send(message));
                }
            }
            MediaOutcome::RemoteDescriptionSet(kind) => {
                self.remote_description_set = true;
                out.push(Action::Log(format!("Remote {kind} set")));
                if !self.pending_ice.is_empty() {
                    out.push(Action::Log(format!(
                        "Applying {} queued ICE candidate(s)",
                        self.pending_ice.len()
                    )));
                }
                for candidate in self.pending_ice.drain() {
                    out.push(Action::Media {
                        call_id,
                        op: MediaOp::AddIceCandidate(candidate),
                    });
                }
                if kind == SdpKind::Offer {
                    out.push(Action::Media {
                        call_id,
                        op: MediaOp::AttachLocalAudioTrack,
                    });
                    out.push(Action::Media {
                        call_id,
                        op: MediaOp::CreateAnswer,
                    });
                }
            }
            MediaOutcome::CandidateAdded => {
                debug!(target: "Negotiation", "{call_id}: remote candidate applied");
            }
            MediaOutcome::Released | MediaOutcome::Disposed => {}
        }
    }

    fn on_media_event(&mut self, event: MediaEvent, out: &mut Vec<Action>) {
        match event {
            MediaEvent::LocalIceCandidate(candidate) => match self.call.as_ref() {
                Some(call) if !call.state.is_closed() => {
                    out.push(Action::Log("Sending local ICE candidate".to_string()));
                    out.push(Action::Send(SignalingMessage::IceCandidate { candidate }));
                }
                _ => {
                    debug!(target: "Negotiation", "Local candidate with no live call: {candidate}");
                    out.push(Action::Log(format!(
                        "Dropping local ICE candidate, no call in progress ({:?})",
                        self.state()
                    )));
                }
            },
            MediaEvent::ConnectionStateChanged(state) => {
                out.push(Action::Log(format!("Connection state: {state:?}")));
                match state {
                    PeerConnectionState::Connected => {
                        if matches!(
                            self.state(),
                            CallState::Negotiating | CallState::AnswerSent
                        ) && self.transition(CallTransition::MediaConnected, out)
                        {
                            out.push(Action::Status(Status::CallConnected));
                        }
                    }
                    PeerConnectionState::Disconnected => {
                        out.push(Action::Status(Status::CallInterrupted));
                    }
                    PeerConnectionState::Failed => {
                        out.push(Action::Status(Status::CallFailed));
                    }
                    _ => {}
                }
            }
            MediaEvent::SignalingStateChanged(state) => {
                out.push(Action::Log(format!("Signaling state: {state}")));
            }
            MediaEvent::IceConnectionStateChanged(state) => {
                out.push(Action::Log(format!("ICE connection state: {state}")));
            }
            MediaEvent::IceGatheringStateChanged(state) => {
                out.push(Action::Log(format!("ICE gathering state: {state}")));
            }
            MediaEvent::RemoteTrackAdded(track) => {
                out.push(Action::Log(format!("Remote track added: {track}")));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::media::MediaOpKind;
    use crate::error::MediaError;

    fn media_ops(actions: &[Action]) -> Vec<MediaOp> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Media { op, .. } => Some(op.clone()),
                _ => None,
            })
            .collect()
    }

    fn sent(actions: &[Action]) -> Vec<SignalingMessage> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    fn statuses(actions: &[Action]) -> Vec<Status> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Status(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    fn current_id(n: &Negotiator) -> CallId {
        n.call().unwrap().call_id
    }

    fn done(n: &Negotiator, outcome: MediaOutcome, op: MediaOpKind) -> Input {
        Input::MediaCompleted(MediaCompletion {
            call_id: current_id(n),
            op,
            result: Ok(outcome),
        })
    }

    fn candidate(c: &str) -> Input {
        Input::Remote(SignalingMessage::IceCandidate {
            candidate: c.to_string(),
        })
    }

    /// Drives a caller through offer creation and returns it in `OfferSent`.
    fn caller_with_offer_sent() -> Negotiator {
        let mut n = Negotiator::default();
        n.handle(Input::StartCall);
        n.handle(done(
            &n,
            MediaOutcome::OfferCreated("local-offer".to_string()),
            MediaOpKind::CreateOffer,
        ));
        n.handle(done(
            &n,
            MediaOutcome::LocalDescriptionSet {
                kind: SdpKind::Offer,
                sdp: "local-offer".to_string(),
            },
            MediaOpKind::SetLocalDescription,
        ));
        n
    }

    #[test]
    fn test_start_call_attaches_track_before_offer() {
        let mut n = Negotiator::default();
        let actions = n.handle(Input::StartCall);
        assert_eq!(n.state(), CallState::AwaitingLocalOffer);
        assert_eq!(n.role(), Some(Role::Caller));
        assert_eq!(
            media_ops(&actions),
            vec![MediaOp::AttachLocalAudioTrack, MediaOp::CreateOffer]
        );
        assert_eq!(statuses(&actions), vec![Status::Calling]);
    }

    #[test]
    fn test_caller_sends_exactly_one_offer() {
        let mut n = Negotiator::default();
        let mut all = n.handle(Input::StartCall);
        all.extend(n.handle(done(
            &n,
            MediaOutcome::OfferCreated("local-offer".to_string()),
            MediaOpKind::CreateOffer,
        )));
        assert_eq!(n.state(), CallState::AwaitingLocalOffer);
        all.extend(n.handle(done(
            &n,
            MediaOutcome::LocalDescriptionSet {
                kind: SdpKind::Offer,
                sdp: "local-offer".to_string(),
            },
            MediaOpKind::SetLocalDescription,
        )));

        assert_eq!(n.state(), CallState::OfferSent);
        assert_eq!(
            sent(&all),
            vec![SignalingMessage::Offer {
                sdp: "local-offer".to_string()
            }]
        );

        n.handle(Input::Delivered(SignalingMessage::Offer {
            sdp: "local-offer".to_string(),
        }));
        assert_eq!(n.state(), CallState::AwaitingAnswer);
    }

    #[test]
    fn test_caller_answer_then_connected() {
        let mut n = caller_with_offer_sent();
        let actions = n.handle(Input::Remote(SignalingMessage::Answer {
            sdp: "remote-answer".to_string(),
        }));
        assert_eq!(n.state(), CallState::Negotiating);
        assert_eq!(
            media_ops(&actions),
            vec![MediaOp::SetRemoteDescription {
                kind: SdpKind::Answer,
                sdp: "remote-answer".to_string()
            }]
        );

        let actions = n.handle(Input::Media(MediaEvent::ConnectionStateChanged(
            PeerConnectionState::Connected,
        )));
        assert_eq!(n.state(), CallState::Active);
        assert_eq!(statuses(&actions), vec![Status::CallConnected]);
    }

    #[test]
    fn test_callee_path_sends_one_answer() {
        let mut n = Negotiator::default();
        let mut all = n.handle(Input::Remote(SignalingMessage::Offer {
            sdp: "X".to_string(),
        }));
        assert_eq!(n.state(), CallState::OfferReceived);
        assert_eq!(n.role(), Some(Role::Callee));
        assert_eq!(
            media_ops(&all),
            vec![MediaOp::SetRemoteDescription {
                kind: SdpKind::Offer,
                sdp: "X".to_string()
            }]
        );

        let actions = n.handle(done(
            &n,
            MediaOutcome::RemoteDescriptionSet(SdpKind::Offer),
            MediaOpKind::SetRemoteDescription,
        ));
        assert_eq!(
            media_ops(&actions),
            vec![MediaOp::AttachLocalAudioTrack, MediaOp::CreateAnswer]
        );
        all.extend(actions);
        all.extend(n.handle(done(
            &n,
            MediaOutcome::AnswerCreated("local-answer".to_string()),
            MediaOpKind::CreateAnswer,
        )));
        all.extend(n.handle(done(
            &n,
            MediaOutcome::LocalDescriptionSet {
                kind: SdpKind::Answer,
                sdp: "local-answer".to_string(),
            },
            MediaOpKind::SetLocalDescription,
        )));

        assert_eq!(n.state(), CallState::AnswerSent);
        assert_eq!(
            sent(&all),
            vec![SignalingMessage::Answer {
                sdp: "local-answer".to_string()
            }]
        );
        assert_eq!(statuses(&all), vec![Status::IncomingCall]);
    }

    #[test]
    fn test_queued_candidates_flush_in_arrival_order() {
        let mut n = Negotiator::default();
        n.handle(candidate("early-1"));
        n.handle(Input::Remote(SignalingMessage::Offer {
            sdp: "X".to_string(),
        }));
        n.handle(candidate("early-2"));
        n.handle(candidate("early-3"));
        assert_eq!(n.pending_remote_candidates(), 3);

        let actions = n.handle(done(
            &n,
            MediaOutcome::RemoteDescriptionSet(SdpKind::Offer),
            MediaOpKind::SetRemoteDescription,
        ));
        let added: Vec<_> = media_ops(&actions)
            .into_iter()
            .filter_map(|op| match op {
                MediaOp::AddIceCandidate(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(
            added,
            vec![
                IceCandidate::from_remote("early-1"),
                IceCandidate::from_remote("early-2"),
                IceCandidate::from_remote("early-3"),
            ]
        );
        assert_eq!(n.pending_remote_candidates(), 0);

        // Later candidates go straight to the engine.
        let actions = n.handle(candidate("late"));
        assert_eq!(
            media_ops(&actions),
            vec![MediaOp::AddIceCandidate(IceCandidate::from_remote("late"))]
        );
    }

    #[test]
    fn test_unexpected_answer_leaves_state_alone() {
        let mut n = Negotiator::default();
        let actions = n.handle(Input::Remote(SignalingMessage::Answer {
            sdp: "A".to_string(),
        }));
        assert_eq!(n.state(), CallState::Idle);
        assert!(media_ops(&actions).is_empty());
    }

    #[test]
    fn test_fatal_media_error_closes_call() {
        let mut n = Negotiator::default();
        n.handle(Input::StartCall);
        let id = current_id(&n);
        let actions = n.handle(Input::MediaCompleted(MediaCompletion {
            call_id: id,
            op: MediaOpKind::SetLocalDescription,
            result: Err(MediaError::SetDescription("rejected".to_string())),
        }));
        assert_eq!(n.state(), CallState::Closed);
        assert_eq!(media_ops(&actions), vec![MediaOp::Release]);
        assert_eq!(statuses(&actions), vec![Status::CallFailed]);
        assert!(sent(&actions).is_empty());

        // A fresh call may follow.
        n.handle(Input::StartCall);
        assert_eq!(n.state(), CallState::AwaitingLocalOffer);
        assert_ne!(current_id(&n), id);
    }

    #[test]
    fn test_candidate_failure_is_not_fatal() {
        let mut n = caller_with_offer_sent();
        let id = current_id(&n);
        n.handle(Input::MediaCompleted(MediaCompletion {
            call_id: id,
            op: MediaOpKind::AddIceCandidate,
            result: Err(MediaError::AddCandidate("bad".to_string())),
        }));
        assert_eq!(n.state(), CallState::OfferSent);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut n = caller_with_offer_sent();
        let first = n.handle(Input::StopCall);
        assert_eq!(n.state(), CallState::Closed);
        assert_eq!(media_ops(&first), vec![MediaOp::Release]);
        assert_eq!(statuses(&first), vec![Status::CallEnded]);

        let second = n.handle(Input::StopCall);
        assert_eq!(n.state(), CallState::Closed);
        assert!(media_ops(&second).is_empty());

        let mut idle = Negotiator::default();
        idle.handle(Input::StopCall);
        assert_eq!(idle.state(), CallState::Idle);
    }

    #[test]
    fn test_late_completion_after_stop_is_ignored() {
        let mut n = Negotiator::default();
        n.handle(Input::StartCall);
        let id = current_id(&n);
        n.handle(Input::StopCall);

        let actions = n.handle(Input::MediaCompleted(MediaCompletion {
            call_id: id,
            op: MediaOpKind::CreateOffer,
            result: Ok(MediaOutcome::OfferCreated("late".to_string())),
        }));
        assert!(actions.is_empty());
        assert_eq!(n.state(), CallState::Closed);
    }

    #[test]
    fn test_offer_collision_restarts_as_callee() {
        let mut n = caller_with_offer_sent();
        let old = current_id(&n);
        let actions = n.handle(Input::Remote(SignalingMessage::Offer {
            sdp: "theirs".to_string(),
        }));
        assert_eq!(n.state(), CallState::OfferReceived);
        assert_eq!(n.role(), Some(Role::Callee));
        assert!(actions.contains(&Action::Media {
            call_id: old,
            op: MediaOp::Release
        }));

        // Completions of the abandoned call no longer apply.
        let stale = n.handle(Input::MediaCompleted(MediaCompletion {
            call_id: old,
            op: MediaOpKind::SetRemoteDescription,
            result: Ok(MediaOutcome::RemoteDescriptionSet(SdpKind::Answer)),
        }));
        assert!(stale.is_empty());
    }

    #[test]
    fn test_keep_local_glare_policy() {
        struct KeepLocal;
        impl GlarePolicy for KeepLocal {
            fn on_offer_collision(&mut self, _: CallState, _: Option<Role>) -> GlareDecision {
                GlareDecision::KeepLocal
            }
        }

        let mut n = Negotiator::new(Box::new(KeepLocal));
        n.handle(Input::StartCall);
        let actions = n.handle(Input::Remote(SignalingMessage::Offer {
            sdp: "theirs".to_string(),
        }));
        assert_eq!(n.state(), CallState::AwaitingLocalOffer);
        assert!(media_ops(&actions).is_empty());
    }

    #[test]
    fn test_local_candidates_sent_while_call_is_live() {
        let mut n = Negotiator::default();
        n.handle(Input::StartCall);
        // Gathering starts before the offer is even created.
        let actions = n.handle(Input::Media(MediaEvent::LocalIceCandidate("mine".to_string())));
        assert_eq!(
            sent(&actions),
            vec![SignalingMessage::IceCandidate {
                candidate: "mine".to_string()
            }]
        );
    }

    #[test]
    fn test_local_candidates_dropped_without_live_call() {
        let mut idle = Negotiator::default();
        let actions = idle.handle(Input::Media(MediaEvent::LocalIceCandidate("c".to_string())));
        assert!(sent(&actions).is_empty());

        let mut n = caller_with_offer_sent();
        n.handle(Input::StopCall);
        let actions = n.handle(Input::Media(MediaEvent::LocalIceCandidate("late".to_string())));
        assert!(sent(&actions).is_empty());
        assert!(media_ops(&actions).is_empty());
        assert_eq!(n.state(), CallState::Closed);
    }

    #[test]
    fn test_caller_queues_candidates_until_answer_applied() {
        let mut n = caller_with_offer_sent();
        n.handle(candidate("r1"));
        n.handle(Input::Delivered(SignalingMessage::Offer {
            sdp: "local-offer".to_string(),
        }));
        assert_eq!(n.state(), CallState::AwaitingAnswer);
        n.handle(candidate("r2"));
        assert_eq!(n.pending_remote_candidates(), 2);

        let actions = n.handle(Input::Remote(SignalingMessage::Answer {
            sdp: "A".to_string(),
        }));
        assert_eq!(n.state(), CallState::Negotiating);
        assert_eq!(
            media_ops(&actions),
            vec![MediaOp::SetRemoteDescription {
                kind: SdpKind::Answer,
                sdp: "A".to_string()
            }]
        );
        // Still queued until the engine has applied the answer.
        n.handle(candidate("r3"));
        assert_eq!(n.pending_remote_candidates(), 3);

        let actions = n.handle(done(
            &n,
            MediaOutcome::RemoteDescriptionSet(SdpKind::Answer),
            MediaOpKind::SetRemoteDescription,
        ));
        assert_eq!(
            media_ops(&actions),
            vec![
                MediaOp::AddIceCandidate(IceCandidate::from_remote("r1")),
                MediaOp::AddIceCandidate(IceCandidate::from_remote("r2")),
                MediaOp::AddIceCandidate(IceCandidate::from_remote("r3")),
            ]
        );
        assert_eq!(n.pending_remote_candidates(), 0);
        assert_eq!(n.state(), CallState::Negotiating);
    }

    #[test]
    fn test_new_outgoing_call_discards_stale_candidates() {
        let mut n = caller_with_offer_sent();
        n.handle(Input::StopCall);
        n.handle(candidate("from-old-session"));
        assert_eq!(n.pending_remote_candidates(), 1);

        n.handle(Input::StartCall);
        assert_eq!(n.pending_remote_candidates(), 0);
        n.handle(done(
            &n,
            MediaOutcome::OfferCreated("local-offer".to_string()),
            MediaOpKind::CreateOffer,
        ));
        n.handle(done(
            &n,
            MediaOutcome::LocalDescriptionSet {
                kind: SdpKind::Offer,
                sdp: "local-offer".to_string(),
            },
            MediaOpKind::SetLocalDescription,
        ));
        n.handle(Input::Remote(SignalingMessage::Answer {
            sdp: "A".to_string(),
        }));
        let actions = n.handle(done(
            &n,
            MediaOutcome::RemoteDescriptionSet(SdpKind::Answer),
            MediaOpKind::SetRemoteDescription,
        ));
        assert!(media_ops(&actions).is_empty());
    }

    #[test]
    fn test_connection_state_statuses() {
        let mut n = caller_with_offer_sent();
        let actions = n.handle(Input::Media(MediaEvent::ConnectionStateChanged(
            PeerConnectionState::Disconnected,
        )));
        assert_eq!(statuses(&actions), vec![Status::CallInterrupted]);
        let actions = n.handle(Input::Media(MediaEvent::ConnectionStateChanged(
            PeerConnectionState::Failed,
        )));
        assert_eq!(statuses(&actions), vec![Status::CallFailed]);
        // Connected before an answer does not activate the call.
        n.handle(Input::Media(MediaEvent::ConnectionStateChanged(
            PeerConnectionState::Connected,
        )));
        assert_eq!(n.state(), CallState::OfferSent);
    }
}
