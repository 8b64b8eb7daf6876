//! Failure taxonomy of the relay.
//!
//! Security relevant failures map to the same user-facing strings no
//! matter which check failed. Protocol races are absorbed where they occur
//! and only show up in debug logs.

use sd_proto::{reasons, PeerId, SessionId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    /// Unknown host or wrong password.
    #[error("authentication failed")]
    AuthenticationFailure,

    #[error("too many authentication attempts from {origin}")]
    RateLimitExceeded { origin: String },

    /// Stale reference after teardown. Never surfaced.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("host denied session {0}")]
    PermissionDenied(SessionId),

    /// The sender is not a party allowed to send this event.
    #[error("{peer} may not send {event} on session {session_id}")]
    IllegalDirection {
        peer: PeerId,
        event: &'static str,
        session_id: SessionId,
    },
}

impl SignalingError {
    /// String shown to the affected party, if the failure is surfaced at all.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            Self::AuthenticationFailure => Some(reasons::INVALID_CREDENTIALS),
            Self::RateLimitExceeded { .. } => Some(reasons::TOO_MANY_ATTEMPTS),
            Self::PermissionDenied(_) => Some(reasons::HOST_DENIED),
            Self::SessionNotFound(_) | Self::IllegalDirection { .. } => None,
        }
    }
}
