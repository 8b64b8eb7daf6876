//! Wire format shared by the signaling relay and its clients.
//!
//! Every signaling frame is a JSON object `{"event": "<name>", "data": {...}}`.
//! Peer-to-peer data channel traffic uses [`DataMessage`], a `type`-tagged
//! JSON object carrying a millisecond timestamp.

pub mod data_channel;
pub mod ids;
pub mod reasons;
pub mod sdp;
pub mod signaling;
pub mod validation;

#[cfg(test)]
mod proptests;

pub use data_channel::{DataKind, DataMessage};
pub use ids::{HostId, PeerId, SessionId};
pub use sdp::{IceCandidate, SdpType, SessionDescription};
pub use signaling::{ClientMessage, EndReason, ServerMessage};
pub use validation::ValidationError;

/// Errors raised while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame is not valid UTF-8")]
    NotUtf8,
}

/// Decode a client frame from a text payload.
pub fn decode_client(text: &str) -> Result<ClientMessage, ProtoError> {
    Ok(serde_json::from_str(text)?)
}

/// Decode a client frame from a binary payload carrying UTF-8 JSON.
pub fn decode_client_bytes(bytes: &[u8]) -> Result<ClientMessage, ProtoError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ProtoError::NotUtf8)?;
    decode_client(text)
}

/// Decode a relay frame from a text payload.
pub fn decode_server(text: &str) -> Result<ServerMessage, ProtoError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode any frame as JSON text.
pub fn encode<T: serde::Serialize>(message: &T) -> Result<String, ProtoError> {
    Ok(serde_json::to_string(message)?)
}
