//! Signaling frames exchanged between parties and the relay.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::ids::{HostId, PeerId, SessionId};

// ============================================================================
// Payloads
// ============================================================================

/// Host id plus plaintext password. Used by `host:register` and
/// `viewer:authenticate`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub host_id: HostId,
    pub password: String,
}

impl Credentials {
    pub fn new(host_id: impl Into<HostId>, password: impl Into<String>) -> Self {
        Self { host_id: host_id.into(), password: password.into() }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host_id", &self.host_id)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRegistered {
    pub host_id: HostId,
    pub success: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerAuthenticated {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    pub session_id: SessionId,
    pub viewer_source_addr: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionResponse {
    pub session_id: SessionId,
    pub granted: bool,
}

/// `host:ready` / `viewer:ready`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ready {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_id: Option<PeerId>,
}

/// `signal:offer` / `signal:answer`. The SDP is never inspected by the relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdpSignal {
    pub session_id: SessionId,
    pub sdp: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_id: Option<PeerId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSignal {
    pub session_id: SessionId,
    pub candidate: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_id: Option<PeerId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    pub session_id: SessionId,
}

/// Why a party asks the relay to end a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    User,
    NegotiationFailed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnd {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<EndReason>,
}

/// `viewer:control_granted`. `granted: false` announces a release.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlGranted {
    pub session_id: SessionId,
    pub granted: bool,
    pub viewer_id: PeerId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlDenied {
    pub session_id: SessionId,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStarted {
    pub session_id: SessionId,
    /// Present on the host's copy: the viewer that joined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_id: Option<PeerId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnded {
    pub session_id: SessionId,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

// ============================================================================
// Frames
// ============================================================================

/// Frames a host or viewer sends to the relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "host:register")]
    HostRegister(Credentials),
    #[serde(rename = "host:unregister")]
    HostUnregister {},
    #[serde(rename = "host:heartbeat")]
    HostHeartbeat {},
    #[serde(rename = "viewer:authenticate")]
    ViewerAuthenticate(Credentials),
    #[serde(rename = "host:permission_response")]
    PermissionResponse(PermissionResponse),
    #[serde(rename = "host:ready")]
    HostReady(Ready),
    #[serde(rename = "viewer:ready")]
    ViewerReady(Ready),
    #[serde(rename = "signal:offer")]
    Offer(SdpSignal),
    #[serde(rename = "signal:answer")]
    Answer(SdpSignal),
    #[serde(rename = "signal:ice_candidate")]
    IceCandidate(CandidateSignal),
    #[serde(rename = "viewer:request_control")]
    RequestControl(SessionRef),
    #[serde(rename = "viewer:release_control")]
    ReleaseControl(SessionRef),
    #[serde(rename = "session:end")]
    SessionEnd(SessionEnd),
}

impl ClientMessage {
    pub fn event(&self) -> &'static str {
        match self {
            Self::HostRegister(_) => "host:register",
            Self::HostUnregister {} => "host:unregister",
            Self::HostHeartbeat {} => "host:heartbeat",
            Self::ViewerAuthenticate(_) => "viewer:authenticate",
            Self::PermissionResponse(_) => "host:permission_response",
            Self::HostReady(_) => "host:ready",
            Self::ViewerReady(_) => "viewer:ready",
            Self::Offer(_) => "signal:offer",
            Self::Answer(_) => "signal:answer",
            Self::IceCandidate(_) => "signal:ice_candidate",
            Self::RequestControl(_) => "viewer:request_control",
            Self::ReleaseControl(_) => "viewer:release_control",
            Self::SessionEnd(_) => "session:end",
        }
    }

    /// Session the frame refers to, if any.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::HostRegister(_)
            | Self::HostUnregister {}
            | Self::HostHeartbeat {}
            | Self::ViewerAuthenticate(_) => None,
            Self::PermissionResponse(p) => Some(&p.session_id),
            Self::HostReady(r) | Self::ViewerReady(r) => Some(&r.session_id),
            Self::Offer(s) | Self::Answer(s) => Some(&s.session_id),
            Self::IceCandidate(c) => Some(&c.session_id),
            Self::RequestControl(r) | Self::ReleaseControl(r) => Some(&r.session_id),
            Self::SessionEnd(e) => Some(&e.session_id),
        }
    }
}

/// Frames the relay sends to a party.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "host:registered")]
    HostRegistered(HostRegistered),
    #[serde(rename = "viewer:authenticated")]
    ViewerAuthenticated(ViewerAuthenticated),
    #[serde(rename = "host:permission_request")]
    PermissionRequest(PermissionRequest),
    #[serde(rename = "host:ready")]
    HostReady(Ready),
    #[serde(rename = "viewer:ready")]
    ViewerReady(Ready),
    #[serde(rename = "signal:offer")]
    Offer(SdpSignal),
    #[serde(rename = "signal:answer")]
    Answer(SdpSignal),
    #[serde(rename = "signal:ice_candidate")]
    IceCandidate(CandidateSignal),
    #[serde(rename = "viewer:control_granted")]
    ControlGranted(ControlGranted),
    #[serde(rename = "viewer:control_denied")]
    ControlDenied(ControlDenied),
    #[serde(rename = "session:started")]
    SessionStarted(SessionStarted),
    #[serde(rename = "session:ended")]
    SessionEnded(SessionEnded),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl ServerMessage {
    pub fn event(&self) -> &'static str {
        match self {
            Self::HostRegistered(_) => "host:registered",
            Self::ViewerAuthenticated(_) => "viewer:authenticated",
            Self::PermissionRequest(_) => "host:permission_request",
            Self::HostReady(_) => "host:ready",
            Self::ViewerReady(_) => "viewer:ready",
            Self::Offer(_) => "signal:offer",
            Self::Answer(_) => "signal:answer",
            Self::IceCandidate(_) => "signal:ice_candidate",
            Self::ControlGranted(_) => "viewer:control_granted",
            Self::ControlDenied(_) => "viewer:control_denied",
            Self::SessionStarted(_) => "session:started",
            Self::SessionEnded(_) => "session:ended",
            Self::Error(_) => "error",
        }
    }

    pub fn session_ended(session_id: SessionId, reason: &str) -> Self {
        Self::SessionEnded(SessionEnded { session_id, reason: reason.to_string() })
    }

    pub fn auth_failed(error: &str) -> Self {
        Self::ViewerAuthenticated(ViewerAuthenticated {
            session_id: None,
            success: false,
            error: Some(error.to_string()),
        })
    }

    pub fn bad_message(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload { code: "bad_message".to_string(), message: message.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_frame_shape() {
        let frame = json!({
            "event": "host:register",
            "data": { "hostId": "123456789", "password": "p4ss" }
        });
        let msg: ClientMessage = serde_json::from_value(frame).unwrap();
        assert_eq!(msg, ClientMessage::HostRegister(Credentials::new("123456789", "p4ss")));
    }

    #[test]
    fn test_empty_payload_frames() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"event": "host:unregister", "data": {}})).unwrap();
        assert_eq!(msg, ClientMessage::HostUnregister {});
        assert_eq!(
            serde_json::to_value(ClientMessage::HostHeartbeat {}).unwrap(),
            json!({"event": "host:heartbeat", "data": {}})
        );
    }

    #[test]
    fn test_offer_keeps_sdp_opaque() {
        let frame = json!({
            "event": "signal:offer",
            "data": { "sessionId": "s1", "sdp": { "type": "offer", "sdp": "v=0", "extra": [1, 2] } }
        });
        let msg: ClientMessage = serde_json::from_value(frame.clone()).unwrap();
        match &msg {
            ClientMessage::Offer(signal) => {
                assert_eq!(signal.sdp["extra"], json!([1, 2]));
                assert!(signal.viewer_id.is_none());
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert_eq!(serde_json::to_value(&msg).unwrap(), frame);
    }

    #[test]
    fn test_session_end_reason_is_optional() {
        let bare: ClientMessage =
            serde_json::from_value(json!({"event": "session:end", "data": {"sessionId": "s1"}})).unwrap();
        assert_eq!(bare.session_id(), Some(&SessionId::from("s1")));

        let failed: ClientMessage = serde_json::from_value(json!({
            "event": "session:end",
            "data": {"sessionId": "s1", "reason": "negotiation_failed"}
        }))
        .unwrap();
        match failed {
            ClientMessage::SessionEnd(end) => assert_eq!(end.reason, Some(EndReason::NegotiationFailed)),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let result: Result<ClientMessage, _> =
            serde_json::from_value(json!({"event": "host:explode", "data": {}}));
        assert!(result.is_err());
    }

    #[test]
    fn test_auth_failure_omits_session_id() {
        let value = serde_json::to_value(ServerMessage::auth_failed("Invalid credentials.")).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "viewer:authenticated",
                "data": { "success": false, "error": "Invalid credentials." }
            })
        );
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("host", "hunter2");
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
