//! Error types for session negotiation.

use std::time::Duration;
use thiserror::Error;

/// Failures reported by a [`PeerTransport`](crate::transport::PeerTransport).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The user dismissed the capture picker
    #[error("screen capture cancelled")]
    CaptureCancelled,

    #[error("media error: {0}")]
    Media(String),

    #[error("peer connection error: {0}")]
    Peer(String),

    #[error("peer connection closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    /// A negotiation stage did not complete in time.
    #[error("{stage} timed out after {after:?}")]
    NegotiationTimeout { stage: &'static str, after: Duration },

    /// The peer transport failed or stayed disconnected past the grace window.
    #[error("transport failure: {0}")]
    TransportFailure(#[from] TransportError),

    #[error("signaling channel closed")]
    SignalingClosed,

    #[error("signaling error: {0}")]
    Signaling(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] sd_proto::ProtoError),
}

impl NegotiationError {
    /// Whether the failure should enter the reconnection path. A declined
    /// capture picker is final.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NegotiationTimeout { .. } => true,
            Self::TransportFailure(TransportError::CaptureCancelled) => false,
            Self::TransportFailure(_) => true,
            Self::SignalingClosed | Self::Signaling(_) | Self::MalformedPayload(_) => false,
        }
    }
}
