//! Call state machine implementation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Identifies one call attempt. Media completions carry the id of the call that
/// issued them so that results for an abandoned call can be recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CallId(u64);

impl CallId {
    pub fn new(inner: u64) -> Self {
        CallId(inner)
    }

    pub(crate) fn next(self) -> Self {
        CallId(self.0 + 1)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// Which side of the offer/answer exchange this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    Caller,
    Callee,
}

/// Negotiation phase of the current call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum CallState {
    /// No call has been started or offered.
    #[default]
    Idle,
    /// Caller: local audio attached, local offer being created and applied.
    AwaitingLocalOffer,
    /// Caller: offer handed to signaling, possibly deferred until the relay is reachable.
    OfferSent,
    /// Caller: offer written to the relay, waiting for the peer's answer.
    AwaitingAnswer,
    /// Callee: remote offer being applied, answer being produced.
    OfferReceived,
    /// Callee: answer handed to signaling.
    AnswerSent,
    /// Caller: answer received, ICE exchange in progress.
    Negotiating,
    /// Media engine reports the peer connection as connected.
    Active,
    /// Call stopped or failed.
    Closed,
}

impl CallState {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// A new call may begin from this state.
    pub fn is_vacant(&self) -> bool {
        matches!(self, Self::Idle | Self::Closed)
    }

    pub fn can_accept_answer(&self) -> bool {
        matches!(self, Self::OfferSent | Self::AwaitingAnswer)
    }
}

/// State transitions for calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTransition {
    StartCall,
    LocalOfferSent,
    OfferDelivered,
    RemoteOffer,
    LocalAnswerSent,
    RemoteAnswer,
    MediaConnected,
    Stop,
    Fail,
}

/// Full call session information.
#[derive(Debug, Clone, Serialize)]
pub struct CallInfo {
    pub call_id: CallId,
    pub role: Role,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl CallInfo {
    /// Starts a new call attempt from the state the previous one left behind.
    ///
    /// A caller begins with [`CallTransition::StartCall`], a callee with
    /// [`CallTransition::RemoteOffer`].
    pub fn begin(call_id: CallId, role: Role, from: CallState) -> Result<Self, InvalidTransition> {
        let transition = match role {
            Role::Caller => CallTransition::StartCall,
            Role::Callee => CallTransition::RemoteOffer,
        };
        Ok(Self {
            call_id,
            role,
            state: next_state(from, transition)?,
            created_at: Utc::now(),
            connected_at: None,
        })
    }

    /// Apply a state transition. Returns error if transition is invalid.
    pub fn apply_transition(
        &mut self,
        transition: CallTransition,
    ) -> Result<(), InvalidTransition> {
        self.state = next_state(self.state, transition)?;
        if self.state == CallState::Active && self.connected_at.is_none() {
            self.connected_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// The transition table. A remote offer replaces whatever call is in progress; the
/// glare policy decides beforehand whether it gets that far.
pub fn next_state(
    current: CallState,
    transition: CallTransition,
) -> Result<CallState, InvalidTransition> {
    use CallState as S;
    use CallTransition as T;

    let next = match (current, transition) {
        (S::Idle | S::Closed, T::StartCall) => S::AwaitingLocalOffer,
        (S::AwaitingLocalOffer, T::LocalOfferSent) => S::OfferSent,
        (S::OfferSent, T::OfferDelivered) => S::AwaitingAnswer,
        (S::OfferSent | S::AwaitingAnswer, T::RemoteAnswer) => S::Negotiating,
        (_, T::RemoteOffer) => S::OfferReceived,
        (S::OfferReceived, T::LocalAnswerSent) => S::AnswerSent,
        (S::Negotiating | S::AnswerSent, T::MediaConnected) => S::Active,
        (_, T::Stop) => S::Closed,
        (current, T::Fail) if current != S::Closed => S::Closed,
        (current, transition) => {
            return Err(InvalidTransition {
                current_state: format!("{:?}", current),
                attempted: format!("{:?}", transition),
            });
        }
    };
    Ok(next)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}
