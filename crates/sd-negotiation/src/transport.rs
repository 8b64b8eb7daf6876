//! Seams between the controller and the outside world.

use async_trait::async_trait;
use sd_proto::{ClientMessage, DataMessage, IceCandidate, SessionDescription};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::{NegotiationError, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Viewer,
}

/// Local media plus one peer connection.
///
/// Implementations report local ICE candidates, connection state changes
/// and inbound data channel messages through the
/// [`ControllerHandle`](crate::controller::ControllerHandle).
#[async_trait]
pub trait PeerTransport: Send {
    /// Build a fresh peer connection for `role`. Hosts acquire capture
    /// media first, keeping media that is still live when `reuse_media`.
    async fn prepare(&mut self, role: Role, reuse_media: bool) -> Result<(), TransportError>;

    async fn create_offer(&mut self) -> Result<SessionDescription, TransportError>;

    /// Create and apply the local answer for the current remote offer.
    async fn create_answer(&mut self) -> Result<SessionDescription, TransportError>;

    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<(), TransportError>;

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), TransportError>;

    async fn send_data(&mut self, message: DataMessage) -> Result<(), TransportError>;

    fn has_live_media(&self) -> bool;

    /// Tear down the peer connection, leaving local media running. The
    /// torn down connection must not report `Closed` afterwards.
    async fn close_peer(&mut self);

    /// Tear down everything, media included.
    async fn shutdown(&mut self);
}

/// Outbound half of the signaling connection.
pub trait SignalSink: Send {
    fn send_signal(&self, message: ClientMessage) -> Result<(), NegotiationError>;
}

impl SignalSink for mpsc::UnboundedSender<ClientMessage> {
    fn send_signal(&self, message: ClientMessage) -> Result<(), NegotiationError> {
        self.send(message).map_err(|_| NegotiationError::SignalingClosed)
    }
}
