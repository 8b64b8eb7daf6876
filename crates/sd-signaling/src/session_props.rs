use proptest::prelude::*;
use sd_proto::{HostId, PeerId};
use std::time::{Duration, Instant};

use crate::control::{release_control, request_control};
use crate::session::{Removal, Resolution, SessionManager};

#[derive(Debug, Clone)]
enum Op {
    Join(u8),
    Leave(u8),
    Request(u8),
    Release(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6).prop_map(Op::Join),
        (0u8..6).prop_map(Op::Leave),
        (0u8..6).prop_map(Op::Request),
        (0u8..6).prop_map(Op::Release),
    ]
}

fn viewer(n: u8) -> PeerId {
    PeerId::from(format!("viewer-{n}"))
}

proptest! {
    // Control token is held by a member, and a live session always has viewers
    #[test]
    fn test_control_holder_is_member(ops in prop::collection::vec(op(), 1..60)) {
        let mut manager = SessionManager::new(Duration::from_secs(30));
        let now = Instant::now();
        let pending = manager.create_pending(HostId::from("h"), viewer(0), "ip".into(), now);
        let session_id = match manager.resolve(&pending, true, now) {
            Resolution::Started { session_id, .. } => session_id,
            other => panic!("unexpected resolution {other:?}"),
        };

        for op in ops {
            match op {
                Op::Join(n) => {
                    manager.add_viewer(&session_id, viewer(n));
                }
                Op::Leave(n) => {
                    if let Removal::Emptied(_) = manager.remove_viewer(&session_id, &viewer(n)) {
                        prop_assert!(manager.active(&session_id).is_none());
                        break;
                    }
                }
                Op::Request(n) => {
                    if let Some(session) = manager.active_mut(&session_id) {
                        request_control(session, &viewer(n));
                    }
                }
                Op::Release(n) => {
                    if let Some(session) = manager.active_mut(&session_id) {
                        release_control(session, &viewer(n));
                    }
                }
            }

            let session = manager.active(&session_id).unwrap();
            prop_assert!(!session.viewers().is_empty());
            prop_assert!(session.is_member(session.primary_viewer()));
            if let Some(holder) = session.controlling_viewer() {
                prop_assert!(session.is_member(holder));
            }
        }
    }

    // A pending session yields at most one outcome no matter how the
    // grant, denial and expiry race
    #[test]
    fn test_pending_resolves_once(
        answers in prop::collection::vec(prop::option::of(any::<bool>()), 1..8),
        late_ms in 0u64..60_000,
    ) {
        let mut manager = SessionManager::new(Duration::from_secs(30));
        let created = Instant::now();
        let pending = manager.create_pending(HostId::from("h"), viewer(0), "ip".into(), created);
        let at = created + Duration::from_millis(late_ms);

        let mut outcomes = 0;
        for answer in answers {
            let resolved = match answer {
                Some(granted) => !matches!(manager.resolve(&pending, granted, at), Resolution::Unknown),
                None => manager.expire(&pending).is_some(),
            };
            if resolved {
                outcomes += 1;
            }
        }

        prop_assert_eq!(outcomes, 1);
        prop_assert_eq!(manager.pending_count(), 0);
        prop_assert!(manager.active_count() <= 1);
    }
}
