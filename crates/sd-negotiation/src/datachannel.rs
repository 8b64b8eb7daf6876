//! Per-role routing of data channel messages.
//!
//! Every [`DataKind`] is matched explicitly so a new kind is a compile
//! error here until someone decides where it goes.

use sd_proto::{DataKind, DataMessage};

use crate::transport::Role;

#[derive(Debug, Clone, PartialEq)]
pub enum DataRoute {
    /// Host echoes a ping back unchanged.
    ReplyPong { seq: u64, timestamp: u64 },
    /// Viewer received its ping back.
    Rtt { seq: u64, timestamp: u64 },
    /// Host applies remote input.
    Input,
    /// Viewer learns whether the host accepts input.
    ControlPermission(bool),
    /// Hand to the application unchanged.
    Deliver,
    Drop,
}

pub fn route(role: Role, message: &DataMessage, control_allowed: bool) -> DataRoute {
    match (&message.kind, role) {
        (DataKind::Ping { seq }, Role::Host) => DataRoute::ReplyPong { seq: *seq, timestamp: message.timestamp },
        (DataKind::Ping { .. }, Role::Viewer) => DataRoute::Drop,

        (DataKind::Pong { seq }, Role::Viewer) => DataRoute::Rtt { seq: *seq, timestamp: message.timestamp },
        (DataKind::Pong { .. }, Role::Host) => DataRoute::Drop,

        (DataKind::Mouse { .. } | DataKind::Keyboard { .. } | DataKind::ReleaseKeys, Role::Host) => {
            if control_allowed {
                DataRoute::Input
            } else {
                DataRoute::Drop
            }
        }
        (DataKind::Mouse { .. } | DataKind::Keyboard { .. } | DataKind::ReleaseKeys, Role::Viewer) => DataRoute::Drop,

        (DataKind::ControlPermission { allowed }, Role::Viewer) => DataRoute::ControlPermission(*allowed),
        (DataKind::ControlPermission { .. }, Role::Host) => DataRoute::Drop,

        (
            DataKind::Chat { .. }
            | DataKind::Clipboard { .. }
            | DataKind::FileMeta { .. }
            | DataKind::FileChunk { .. }
            | DataKind::FileComplete { .. }
            | DataKind::Quality { .. }
            | DataKind::MonitorSelect { .. }
            | DataKind::E2eReady,
            _,
        ) => DataRoute::Deliver,
    }
}
