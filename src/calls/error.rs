//! Call-related error types.

use thiserror::Error;

use crate::error::{MediaError, SignalingError};

#[derive(Debug, Error)]
pub enum CallError {
    #[error("call controller has shut down")]
    ControllerClosed,

    #[error("missing required component: {0}")]
    MissingComponent(&'static str),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("media error: {0}")]
    Media(#[from] MediaError),
}
