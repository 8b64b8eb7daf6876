//! User-facing strings sent by the relay.
//!
//! Clients may match on these, so they are part of the protocol.

pub const HOST_STOPPED_SHARING: &str = "Host stopped sharing.";
pub const HOST_DISCONNECTED: &str = "Host disconnected.";
pub const HOST_DENIED: &str = "Host denied the connection request.";
pub const ENDED_BY_USER: &str = "Session ended by user.";
pub const NEGOTIATION_FAILED: &str = "Connection could not be re-established.";
pub const ALL_VIEWERS_DISCONNECTED: &str = "All viewers disconnected.";
pub const CONTROL_TAKEN: &str = "Another viewer is currently in control.";
pub const INVALID_CREDENTIALS: &str = "Invalid credentials.";
pub const TOO_MANY_ATTEMPTS: &str = "Too many attempts. Please try again later.";
