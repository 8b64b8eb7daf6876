//! Session lifecycle: pending permission requests and active sessions.
//!
//! A pending session is consumed exactly once, by [`SessionManager::resolve`]
//! or [`SessionManager::expire`]. An active session always has at least one
//! viewer; removing the last one removes the session in the same call.

use sd_proto::{HostId, PeerId, SessionId};
use std::collections::HashMap;
use std::time::{Duration, Instant};

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone)]
pub struct PendingSession {
    pub session_id: SessionId,
    pub host_id: HostId,
    pub viewer: PeerId,
    pub viewer_source: String,
    pub created_at: Instant,
    /// Active session of the same host the viewer will join on grant.
    pub join: Option<SessionId>,
}

#[derive(Debug, Clone)]
pub struct ActiveSession {
    session_id: SessionId,
    host_id: HostId,
    primary_viewer: PeerId,
    /// Join order, used for primary succession.
    viewers: Vec<PeerId>,
    controlling_viewer: Option<PeerId>,
    started_at: Instant,
}

impl ActiveSession {
    fn new(session_id: SessionId, host_id: HostId, viewer: PeerId, now: Instant) -> Self {
        Self {
            session_id,
            host_id,
            primary_viewer: viewer.clone(),
            viewers: vec![viewer],
            controlling_viewer: None,
            started_at: now,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn host_id(&self) -> &HostId {
        &self.host_id
    }

    pub fn primary_viewer(&self) -> &PeerId {
        &self.primary_viewer
    }

    pub fn viewers(&self) -> &[PeerId] {
        &self.viewers
    }

    pub fn is_member(&self, peer: &PeerId) -> bool {
        self.viewers.contains(peer)
    }

    pub fn controlling_viewer(&self) -> Option<&PeerId> {
        self.controlling_viewer.as_ref()
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Set the control holder. Callers guarantee membership.
    pub(crate) fn set_controller(&mut self, viewer: Option<PeerId>) {
        debug_assert!(viewer.as_ref().map(|v| self.is_member(v)).unwrap_or(true));
        self.controlling_viewer = viewer;
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Terminal outcome of a pending session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Started {
        session_id: SessionId,
        host_id: HostId,
        viewer: PeerId,
        /// True when the viewer joined an already active session.
        joined: bool,
    },
    Denied {
        viewer: PeerId,
    },
    /// The response arrived after the TTL. Nothing is notified.
    Expired,
    /// No pending session with that id.
    Unknown,
}

#[derive(Debug, Clone)]
pub enum Removal {
    NotMember,
    Remaining {
        released_control: bool,
        new_primary: Option<PeerId>,
    },
    /// The last viewer left; the session was removed.
    Emptied(ActiveSession),
}

// ============================================================================
// Manager
// ============================================================================

#[derive(Debug)]
pub struct SessionManager {
    pending: HashMap<SessionId, PendingSession>,
    active: HashMap<SessionId, ActiveSession>,
    pending_ttl: Duration,
}

impl SessionManager {
    pub fn new(pending_ttl: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            active: HashMap::new(),
            pending_ttl,
        }
    }

    pub fn pending_ttl(&self) -> Duration {
        self.pending_ttl
    }

    pub fn create_pending(
        &mut self,
        host_id: HostId,
        viewer: PeerId,
        viewer_source: String,
        now: Instant,
    ) -> SessionId {
        let session_id = SessionId::generate();
        let join = self.active_session_of_host(&host_id);
        self.pending.insert(
            session_id.clone(),
            PendingSession {
                session_id: session_id.clone(),
                host_id,
                viewer,
                viewer_source,
                created_at: now,
                join,
            },
        );
        session_id
    }

    pub fn pending(&self, session_id: &SessionId) -> Option<&PendingSession> {
        self.pending.get(session_id)
    }

    /// Consume a pending session with the host's answer.
    pub fn resolve(&mut self, session_id: &SessionId, granted: bool, now: Instant) -> Resolution {
        let Some(pending) = self.pending.remove(session_id) else {
            return Resolution::Unknown;
        };

        if now.saturating_duration_since(pending.created_at) > self.pending_ttl {
            return Resolution::Expired;
        }

        if !granted {
            return Resolution::Denied { viewer: pending.viewer };
        }

        if let Some(target) = pending.join.clone() {
            if self.add_viewer(&target, pending.viewer.clone()) {
                return Resolution::Started {
                    session_id: target,
                    host_id: pending.host_id,
                    viewer: pending.viewer,
                    joined: true,
                };
            }
        }

        let session = ActiveSession::new(
            pending.session_id.clone(),
            pending.host_id.clone(),
            pending.viewer.clone(),
            now,
        );
        self.active.insert(pending.session_id.clone(), session);
        Resolution::Started {
            session_id: pending.session_id,
            host_id: pending.host_id,
            viewer: pending.viewer,
            joined: false,
        }
    }

    /// TTL fired. No-op if the session was already resolved.
    pub fn expire(&mut self, session_id: &SessionId) -> Option<PendingSession> {
        self.pending.remove(session_id)
    }

    /// Remove pending sessions older than the TTL whose timers were lost.
    pub fn expire_stale(&mut self, now: Instant) -> Vec<PendingSession> {
        let ttl = self.pending_ttl;
        let stale: Vec<SessionId> = self
            .pending
            .values()
            .filter(|p| now.saturating_duration_since(p.created_at) > ttl)
            .map(|p| p.session_id.clone())
            .collect();
        stale.iter().filter_map(|id| self.pending.remove(id)).collect()
    }

    pub fn discard_pending_for_viewer(&mut self, viewer: &PeerId) -> Vec<PendingSession> {
        self.drain_pending(|p| &p.viewer == viewer)
    }

    pub fn take_pending_for_host(&mut self, host_id: &HostId) -> Vec<PendingSession> {
        self.drain_pending(|p| &p.host_id == host_id)
    }

    fn drain_pending(&mut self, pred: impl Fn(&PendingSession) -> bool) -> Vec<PendingSession> {
        let ids: Vec<SessionId> = self
            .pending
            .values()
            .filter(|p| pred(p))
            .map(|p| p.session_id.clone())
            .collect();
        ids.iter().filter_map(|id| self.pending.remove(id)).collect()
    }

    pub fn active(&self, session_id: &SessionId) -> Option<&ActiveSession> {
        self.active.get(session_id)
    }

    pub fn active_mut(&mut self, session_id: &SessionId) -> Option<&mut ActiveSession> {
        self.active.get_mut(session_id)
    }

    pub fn end(&mut self, session_id: &SessionId) -> Option<ActiveSession> {
        self.active.remove(session_id)
    }

    /// Admit `viewer` to a live session. False if the session is gone.
    pub fn add_viewer(&mut self, session_id: &SessionId, viewer: PeerId) -> bool {
        match self.active.get_mut(session_id) {
            Some(session) => {
                if !session.is_member(&viewer) {
                    session.viewers.push(viewer);
                }
                true
            }
            None => false,
        }
    }

    /// Remove a viewer, releasing control it held and promoting the next
    /// primary. Removing the last viewer removes the session.
    pub fn remove_viewer(&mut self, session_id: &SessionId, viewer: &PeerId) -> Removal {
        let Some(session) = self.active.get_mut(session_id) else {
            return Removal::NotMember;
        };
        let Some(index) = session.viewers.iter().position(|v| v == viewer) else {
            return Removal::NotMember;
        };

        session.viewers.remove(index);
        if session.viewers.is_empty() {
            return match self.active.remove(session_id) {
                Some(session) => Removal::Emptied(session),
                None => Removal::NotMember,
            };
        }

        let released_control = session.controlling_viewer.as_ref() == Some(viewer);
        if released_control {
            session.controlling_viewer = None;
        }

        let new_primary = if &session.primary_viewer == viewer {
            session.primary_viewer = session.viewers[0].clone();
            Some(session.primary_viewer.clone())
        } else {
            None
        };

        Removal::Remaining { released_control, new_primary }
    }

    pub fn sessions_for_host(&self, host_id: &HostId) -> Vec<SessionId> {
        self.active
            .values()
            .filter(|s| &s.host_id == host_id)
            .map(|s| s.session_id.clone())
            .collect()
    }

    pub fn sessions_for_viewer(&self, viewer: &PeerId) -> Vec<SessionId> {
        self.active
            .values()
            .filter(|s| s.is_member(viewer))
            .map(|s| s.session_id.clone())
            .collect()
    }

    pub fn host_has_active(&self, host_id: &HostId) -> bool {
        self.active.values().any(|s| &s.host_id == host_id)
    }

    fn active_session_of_host(&self, host_id: &HostId) -> Option<SessionId> {
        self.active
            .values()
            .filter(|s| &s.host_id == host_id)
            .min_by_key(|s| s.started_at)
            .map(|s| s.session_id.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_sessions(&self) -> impl Iterator<Item = &ActiveSession> {
        self.active.values()
    }
}
