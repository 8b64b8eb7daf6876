//! Exclusive remote-control token among the viewers of a session.

use sd_proto::PeerId;

use crate::session::ActiveSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlDecision {
    Granted,
    /// The requester already holds the token.
    AlreadyHeld,
    Denied,
    NotMember,
}

/// Grant the token iff nobody holds it.
pub fn request_control(session: &mut ActiveSession, viewer: &PeerId) -> ControlDecision {
    if !session.is_member(viewer) {
        return ControlDecision::NotMember;
    }
    match session.controlling_viewer() {
        None => {
            session.set_controller(Some(viewer.clone()));
            ControlDecision::Granted
        }
        Some(holder) if holder == viewer => ControlDecision::AlreadyHeld,
        Some(_) => ControlDecision::Denied,
    }
}

/// Clear the token only if `viewer` holds it, so a stale release cannot
/// clobber a newer grant.
pub fn release_control(session: &mut ActiveSession, viewer: &PeerId) -> bool {
    if session.controlling_viewer() == Some(viewer) {
        session.set_controller(None);
        true
    } else {
        false
    }
}
