//! Negotiation relay: routes readiness, SDP and ICE frames between the host
//! and the viewers of one active session.
//!
//! Payloads are forwarded untouched. The only checks are that the session
//! exists (done by the caller) and that the direction is legal.

use sd_proto::signaling::{CandidateSignal, Ready, SdpSignal};
use sd_proto::{PeerId, ServerMessage, SessionId};

use crate::error::SignalingError;
use crate::session::ActiveSession;

/// A frame the relay can forward.
#[derive(Debug, Clone, PartialEq)]
pub enum RelaySignal {
    HostReady(Ready),
    ViewerReady(Ready),
    Offer(SdpSignal),
    Answer(SdpSignal),
    Candidate(CandidateSignal),
}

impl RelaySignal {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::HostReady(r) | Self::ViewerReady(r) => &r.session_id,
            Self::Offer(s) | Self::Answer(s) => &s.session_id,
            Self::Candidate(c) => &c.session_id,
        }
    }

    pub fn event(&self) -> &'static str {
        match self {
            Self::HostReady(_) => "host:ready",
            Self::ViewerReady(_) => "viewer:ready",
            Self::Offer(_) => "signal:offer",
            Self::Answer(_) => "signal:answer",
            Self::Candidate(_) => "signal:ice_candidate",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: PeerId,
    pub message: ServerMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Party {
    Host,
    Viewer,
}

/// Compute where `signal` from `from` goes.
///
/// Viewer frames go to the host tagged with the sender's identity. Host
/// frames go to the viewer named in the frame, defaulting to the primary
/// viewer, except `host:ready` which fans out to every viewer when untagged.
pub fn route(
    session: &ActiveSession,
    host_peer: &PeerId,
    from: &PeerId,
    signal: RelaySignal,
) -> Result<Vec<Outbound>, SignalingError> {
    let illegal = |signal: &RelaySignal| SignalingError::IllegalDirection {
        peer: from.clone(),
        event: signal.event(),
        session_id: session.session_id().clone(),
    };

    let party = if from == host_peer {
        Party::Host
    } else if session.is_member(from) {
        Party::Viewer
    } else {
        return Err(illegal(&signal));
    };

    let to_host = |message: ServerMessage| {
        vec![Outbound { to: host_peer.clone(), message }]
    };

    match (signal, party) {
        (RelaySignal::HostReady(ready), Party::Host) => {
            let targets = match ready.viewer_id.clone() {
                Some(viewer) if session.is_member(&viewer) => vec![viewer],
                Some(_) => return Err(illegal(&RelaySignal::HostReady(ready))),
                None => session.viewers().to_vec(),
            };
            Ok(targets
                .into_iter()
                .map(|to| Outbound {
                    to,
                    message: ServerMessage::HostReady(Ready {
                        session_id: ready.session_id.clone(),
                        viewer_id: None,
                    }),
                })
                .collect())
        }
        (RelaySignal::ViewerReady(ready), Party::Viewer) => Ok(to_host(ServerMessage::ViewerReady(Ready {
            viewer_id: Some(from.clone()),
            ..ready
        }))),
        (RelaySignal::Offer(offer), Party::Viewer) => Ok(to_host(ServerMessage::Offer(SdpSignal {
            viewer_id: Some(from.clone()),
            ..offer
        }))),
        (RelaySignal::Answer(answer), Party::Host) => {
            let Some(target) = viewer_target(session, answer.viewer_id.as_ref()) else {
                return Err(illegal(&RelaySignal::Answer(answer)));
            };
            Ok(vec![Outbound {
                to: target.clone(),
                message: ServerMessage::Answer(SdpSignal {
                    viewer_id: Some(target),
                    ..answer
                }),
            }])
        }
        (RelaySignal::Candidate(candidate), Party::Host) => {
            let Some(target) = viewer_target(session, candidate.viewer_id.as_ref()) else {
                return Err(illegal(&RelaySignal::Candidate(candidate)));
            };
            Ok(vec![Outbound {
                to: target.clone(),
                message: ServerMessage::IceCandidate(CandidateSignal {
                    viewer_id: Some(target),
                    ..candidate
                }),
            }])
        }
        (RelaySignal::Candidate(candidate), Party::Viewer) => {
            Ok(to_host(ServerMessage::IceCandidate(CandidateSignal {
                viewer_id: Some(from.clone()),
                ..candidate
            })))
        }
        (signal, _) => Err(illegal(&signal)),
    }
}

/// Named viewer if it is a member, the primary viewer if none is named.
fn viewer_target(session: &ActiveSession, named: Option<&PeerId>) -> Option<PeerId> {
    match named {
        Some(viewer) if session.is_member(viewer) => Some(viewer.clone()),
        Some(_) => None,
        None => Some(session.primary_viewer().clone()),
    }
}
