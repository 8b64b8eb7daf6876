//! Credential and presence registry for connected hosts.

use sd_proto::{HostId, PeerId};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A registered host. Owned exclusively by [`Registry`].
#[derive(Debug, Clone)]
pub struct PresenceRecord {
    pub host_id: HostId,
    /// Signaling connection currently bound to this host.
    pub peer: PeerId,
    password_hash: String,
    pub registered_at: Instant,
    pub last_seen: Instant,
    pub busy: bool,
}

impl PresenceRecord {
    pub fn password_hash(&self) -> &str {
        &self.password_hash
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    hosts: HashMap<HostId, PresenceRecord>,
    by_peer: HashMap<PeerId, HostId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an already-hashed credential for `host_id` bound to `peer`.
    ///
    /// Last register wins: a previous record for the same host is replaced
    /// and returned, and its connection loses the binding.
    pub fn register(
        &mut self,
        host_id: HostId,
        peer: PeerId,
        password_hash: String,
        now: Instant,
    ) -> Option<PresenceRecord> {
        let previous = self.hosts.remove(&host_id);
        if let Some(prev) = &previous {
            self.by_peer.remove(&prev.peer);
        }

        self.by_peer.insert(peer.clone(), host_id.clone());
        self.hosts.insert(
            host_id.clone(),
            PresenceRecord {
                host_id,
                peer,
                password_hash,
                registered_at: now,
                last_seen: now,
                // Re-registration keeps live sessions attached to the host
                busy: previous.as_ref().map(|p| p.busy).unwrap_or(false),
            },
        );
        previous
    }

    pub fn lookup(&self, host_id: &HostId) -> Option<&PresenceRecord> {
        self.hosts.get(host_id)
    }

    /// Owned copy of the stored hash, for verification off the hub task.
    pub fn stored_hash(&self, host_id: &HostId) -> Option<String> {
        self.hosts.get(host_id).map(|record| record.password_hash.clone())
    }

    pub fn unregister(&mut self, host_id: &HostId) -> Option<PresenceRecord> {
        let record = self.hosts.remove(host_id)?;
        self.by_peer.remove(&record.peer);
        Some(record)
    }

    /// Refresh liveness for a host. Does not touch the credential.
    pub fn heartbeat(&mut self, host_id: &HostId, now: Instant) -> bool {
        match self.hosts.get_mut(host_id) {
            Some(record) => {
                record.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Refresh liveness for whichever host `peer` is bound to.
    pub fn touch_peer(&mut self, peer: &PeerId, now: Instant) {
        if let Some(host_id) = self.by_peer.get(peer) {
            if let Some(record) = self.hosts.get_mut(host_id) {
                record.last_seen = now;
            }
        }
    }

    pub fn host_for_peer(&self, peer: &PeerId) -> Option<&HostId> {
        self.by_peer.get(peer)
    }

    pub fn set_busy(&mut self, host_id: &HostId, busy: bool) {
        if let Some(record) = self.hosts.get_mut(host_id) {
            record.busy = busy;
        }
    }

    /// Hosts not seen for longer than `timeout`.
    pub fn idle_hosts(&self, now: Instant, timeout: Duration) -> Vec<HostId> {
        self.hosts
            .values()
            .filter(|r| now.saturating_duration_since(r.last_seen) > timeout)
            .map(|r| r.host_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
