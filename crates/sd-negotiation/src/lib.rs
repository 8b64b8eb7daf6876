//! Client side of a SecureDesk session.
//!
//! A [`SessionController`] drives one host or viewer through offer/answer
//! negotiation over the signaling relay, buffers early ICE candidates,
//! watches the peer connection and reconnects with exponential backoff.
//! Media and the peer connection itself sit behind [`PeerTransport`].

pub mod attempt;
pub mod backoff;
pub mod client;
pub mod config;
pub mod controller;
pub mod datachannel;
pub mod errors;
pub mod ice;
pub mod latency;
pub mod state;
pub mod testing;
pub mod transport;

pub use attempt::NegotiationAttempt;
pub use client::SignalingClient;
pub use config::{NegotiationConfig, ReconnectConfig, SignalingClientConfig};
pub use controller::{
    AppEvent, ControllerEvent, ControllerHandle, SessionController, SessionStatus, PEER_CONNECTION_CLOSED,
};
pub use errors::{NegotiationError, TransportError};
pub use state::PeerConnectionState;
pub use transport::{PeerTransport, Role, SignalSink};
