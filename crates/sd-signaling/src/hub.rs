//! The hub: single owner of every relay entity.
//!
//! [`SignalingCore`] is a synchronous state machine. Each [`CoreEvent`] is
//! handled to completion and yields a list of [`Effect`]s. [`Hub`] runs the
//! core on one task, executes effects (socket writes, password hashing on
//! the blocking pool, TTL timers) and feeds their results back in as events.

use sd_proto::signaling::{
    ControlDenied, ControlGranted, Credentials, HostRegistered, PermissionRequest,
    PermissionResponse, SessionEnd, SessionStarted, ViewerAuthenticated,
};
use sd_proto::{reasons, ClientMessage, EndReason, HostId, PeerId, ServerMessage, SessionId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::control::{self, ControlDecision};
use crate::credentials::{CredentialError, CredentialHasher};
use crate::error::SignalingError;
use crate::metrics::SignalingMetrics;
use crate::rate_limit::AuthRateLimiter;
use crate::registry::Registry;
use crate::relay::{self, RelaySignal};
use crate::session::{Removal, Resolution, SessionManager};

// ============================================================================
// Events and effects
// ============================================================================

#[derive(Debug)]
pub enum CoreEvent {
    Connected { peer: PeerId, source: String },
    Inbound { peer: PeerId, message: ClientMessage },
    /// Transport-level liveness (pong) without a frame.
    Activity { peer: PeerId },
    Disconnected { peer: PeerId },
    CredentialHashed {
        peer: PeerId,
        host_id: HostId,
        hash: Result<String, CredentialError>,
    },
    PasswordChecked {
        peer: PeerId,
        host_id: HostId,
        valid: bool,
    },
    PendingExpired { session_id: SessionId },
    Sweep,
}

#[derive(Debug)]
pub enum Effect {
    Send { to: PeerId, message: ServerMessage },
    HashPassword { peer: PeerId, host_id: HostId, password: String },
    VerifyPassword { peer: PeerId, host_id: HostId, stored: String, candidate: String },
    ArmPendingTtl { session_id: SessionId, after: Duration },
    /// Drop the connection's outbox, closing its socket.
    Close { peer: PeerId },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStatus {
    pub connected_peers: usize,
    pub connected_hosts: usize,
    pub active_sessions: usize,
    pub pending_sessions: usize,
}

struct PeerInfo {
    source: String,
    /// A `host:register` hash is in flight for this connection.
    hashing: bool,
}

// ============================================================================
// Core
// ============================================================================

pub struct SignalingCore {
    registry: Registry,
    sessions: SessionManager,
    limiter: AuthRateLimiter,
    peers: HashMap<PeerId, PeerInfo>,
    heartbeat_timeout: Duration,
    metrics: Arc<SignalingMetrics>,
    effects: Vec<Effect>,
}

impl SignalingCore {
    pub fn new(config: &ServerConfig, metrics: Arc<SignalingMetrics>) -> Self {
        Self {
            registry: Registry::new(),
            sessions: SessionManager::new(config.pending_ttl()),
            limiter: AuthRateLimiter::new(config.rate_limit.clone()),
            peers: HashMap::new(),
            heartbeat_timeout: config.heartbeat_timeout(),
            metrics,
            effects: Vec::new(),
        }
    }

    pub fn status(&self) -> HubStatus {
        HubStatus {
            connected_peers: self.peers.len(),
            connected_hosts: self.registry.len(),
            active_sessions: self.sessions.active_count(),
            pending_sessions: self.sessions.pending_count(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn handle(&mut self, event: CoreEvent, now: Instant) -> Vec<Effect> {
        match event {
            CoreEvent::Connected { peer, source } => {
                debug!(peer = %peer, source = %source, "Peer connected");
                self.peers.insert(peer, PeerInfo { source, hashing: false });
            }
            CoreEvent::Inbound { peer, message } => self.on_inbound(peer, message, now),
            CoreEvent::Activity { peer } => self.registry.touch_peer(&peer, now),
            CoreEvent::Disconnected { peer } => self.on_disconnected(peer),
            CoreEvent::CredentialHashed { peer, host_id, hash } => self.on_hashed(peer, host_id, hash, now),
            CoreEvent::PasswordChecked { peer, host_id, valid } => {
                self.on_password_checked(peer, host_id, valid, now)
            }
            CoreEvent::PendingExpired { session_id } => {
                if let Some(pending) = self.sessions.expire(&session_id) {
                    info!(session_id = %session_id, host_id = %pending.host_id, "Pending session expired");
                }
            }
            CoreEvent::Sweep => self.on_sweep(now),
        }
        std::mem::take(&mut self.effects)
    }

    fn send(&mut self, to: PeerId, message: ServerMessage) {
        self.effects.push(Effect::Send { to, message });
    }

    fn host_peer(&self, host_id: &HostId) -> Option<PeerId> {
        self.registry.lookup(host_id).map(|r| r.peer.clone())
    }

    fn on_inbound(&mut self, peer: PeerId, message: ClientMessage, now: Instant) {
        if !self.peers.contains_key(&peer) {
            debug!(peer = %peer, event = message.event(), "Frame from unknown peer dropped");
            return;
        }
        self.registry.touch_peer(&peer, now);

        match message {
            ClientMessage::HostRegister(creds) => self.on_register(peer, creds),
            ClientMessage::HostUnregister {} => {
                if let Some(host_id) = self.registry.host_for_peer(&peer).cloned() {
                    self.remove_host(&host_id, reasons::HOST_STOPPED_SHARING);
                }
            }
            ClientMessage::HostHeartbeat {} => {
                if let Some(host_id) = self.registry.host_for_peer(&peer).cloned() {
                    self.registry.heartbeat(&host_id, now);
                }
            }
            ClientMessage::ViewerAuthenticate(creds) => self.on_authenticate(peer, creds, now),
            ClientMessage::PermissionResponse(response) => self.on_permission_response(&peer, response, now),
            ClientMessage::HostReady(ready) => self.on_relay(&peer, RelaySignal::HostReady(ready)),
            ClientMessage::ViewerReady(ready) => self.on_relay(&peer, RelaySignal::ViewerReady(ready)),
            ClientMessage::Offer(offer) => self.on_relay(&peer, RelaySignal::Offer(offer)),
            ClientMessage::Answer(answer) => self.on_relay(&peer, RelaySignal::Answer(answer)),
            ClientMessage::IceCandidate(candidate) => self.on_relay(&peer, RelaySignal::Candidate(candidate)),
            ClientMessage::RequestControl(r) => self.on_request_control(&peer, &r.session_id),
            ClientMessage::ReleaseControl(r) => self.on_release_control(&peer, &r.session_id),
            ClientMessage::SessionEnd(end) => self.on_session_end(&peer, end),
        }
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    fn on_register(&mut self, peer: PeerId, creds: Credentials) {
        if let Err(e) = creds.validate() {
            debug!(peer = %peer, error = %e, "Host registration rejected");
            self.send(
                peer,
                ServerMessage::HostRegistered(HostRegistered { host_id: creds.host_id, success: false }),
            );
            return;
        }

        let Some(info) = self.peers.get_mut(&peer) else {
            return;
        };
        if info.hashing {
            debug!(peer = %peer, host_id = %creds.host_id, "Registration already in progress");
            self.send(
                peer,
                ServerMessage::HostRegistered(HostRegistered { host_id: creds.host_id, success: false }),
            );
            return;
        }
        info.hashing = true;

        self.effects.push(Effect::HashPassword {
            peer,
            host_id: creds.host_id,
            password: creds.password,
        });
    }

    fn on_hashed(
        &mut self,
        peer: PeerId,
        host_id: HostId,
        hash: Result<String, CredentialError>,
        now: Instant,
    ) {
        match self.peers.get_mut(&peer) {
            Some(info) => info.hashing = false,
            None => {
                debug!(peer = %peer, host_id = %host_id, "Connection closed before registration completed");
                return;
            }
        }

        let hash = match hash {
            Ok(hash) => hash,
            Err(e) => {
                warn!(host_id = %host_id, error = %e, "Password hashing failed");
                self.send(peer, ServerMessage::HostRegistered(HostRegistered { host_id, success: false }));
                return;
            }
        };

        // A connection hosts one id at a time
        if let Some(old) = self.registry.host_for_peer(&peer).cloned() {
            if old != host_id {
                self.remove_host(&old, reasons::HOST_STOPPED_SHARING);
            }
        }

        if let Some(previous) = self.registry.register(host_id.clone(), peer.clone(), hash, now) {
            if previous.peer != peer {
                info!(host_id = %host_id, old_peer = %previous.peer, new_peer = %peer, "Host rebound to new connection");
            }
        }
        info!(host_id = %host_id, peer = %peer, "Host registered");
        self.send(peer, ServerMessage::HostRegistered(HostRegistered { host_id, success: true }));
    }

    fn remove_host(&mut self, host_id: &HostId, reason: &str) {
        for session_id in self.sessions.sessions_for_host(host_id) {
            self.end_session(&session_id, reason);
        }
        for pending in self.sessions.take_pending_for_host(host_id) {
            self.send(pending.viewer, ServerMessage::session_ended(pending.session_id, reason));
        }
        if self.registry.unregister(host_id).is_some() {
            info!(host_id = %host_id, reason, "Host removed");
        }
    }

    // ------------------------------------------------------------------------
    // Authentication
    // ------------------------------------------------------------------------

    fn on_authenticate(&mut self, peer: PeerId, creds: Credentials, now: Instant) {
        let Some(source) = self.peers.get(&peer).map(|p| p.source.clone()) else {
            return;
        };

        if self.limiter.is_blocked(&source, now) {
            self.metrics.rate_limit_rejections.inc();
            warn!(source = %source, host_id = %creds.host_id, "Authentication rejected by rate limiter");
            self.fail_auth(peer, SignalingError::RateLimitExceeded { origin: source });
            return;
        }

        // Charged before verification starts, returned once it succeeds
        let attempts = self.limiter.record_attempt(&source, now);

        let stored = match creds.validate() {
            Ok(()) => self.registry.stored_hash(&creds.host_id),
            Err(_) => None,
        };
        match stored {
            Some(stored) => {
                debug!(source = %source, host_id = %creds.host_id, attempts, "Verifying viewer password");
                self.effects.push(Effect::VerifyPassword {
                    peer,
                    host_id: creds.host_id,
                    stored,
                    candidate: creds.password,
                });
            }
            None => self.reject_credentials(peer, &source, &creds.host_id),
        }
    }

    fn on_password_checked(&mut self, peer: PeerId, host_id: HostId, valid: bool, now: Instant) {
        let Some(source) = self.peers.get(&peer).map(|p| p.source.clone()) else {
            debug!(peer = %peer, "Viewer left before password check completed");
            return;
        };

        if !valid {
            self.reject_credentials(peer, &source, &host_id);
            return;
        }
        self.limiter.release(&source, now);

        let Some(host_peer) = self.host_peer(&host_id) else {
            debug!(host_id = %host_id, "Host left during password check");
            self.fail_auth(peer, SignalingError::AuthenticationFailure);
            return;
        };

        let session_id = self.sessions.create_pending(host_id.clone(), peer.clone(), source.clone(), now);
        info!(session_id = %session_id, host_id = %host_id, source = %source, "Viewer authenticated, awaiting host permission");

        self.send(
            host_peer,
            ServerMessage::PermissionRequest(PermissionRequest {
                session_id: session_id.clone(),
                viewer_source_addr: source,
                timestamp: chrono::Utc::now().timestamp_millis(),
            }),
        );
        self.send(
            peer,
            ServerMessage::ViewerAuthenticated(ViewerAuthenticated {
                session_id: Some(session_id.clone()),
                success: true,
                error: None,
            }),
        );
        let after = self.sessions.pending_ttl();
        self.effects.push(Effect::ArmPendingTtl { session_id, after });
    }

    fn reject_credentials(&mut self, peer: PeerId, source: &str, host_id: &HostId) {
        self.metrics.auth_failures.inc();
        warn!(source = %source, host_id = %host_id, "Authentication failed");
        self.fail_auth(peer, SignalingError::AuthenticationFailure);
    }

    fn fail_auth(&mut self, peer: PeerId, error: SignalingError) {
        let message = error.user_message().unwrap_or(reasons::INVALID_CREDENTIALS);
        self.send(peer, ServerMessage::auth_failed(message));
    }

    // ------------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------------

    fn on_permission_response(&mut self, peer: &PeerId, response: PermissionResponse, now: Instant) {
        let Some(pending) = self.sessions.pending(&response.session_id) else {
            debug!(session_id = %response.session_id, "Permission response for unknown session");
            return;
        };
        if self.registry.host_for_peer(peer) != Some(&pending.host_id) {
            debug!(session_id = %response.session_id, peer = %peer, "Permission response from non-owner dropped");
            return;
        }

        match self.sessions.resolve(&response.session_id, response.granted, now) {
            Resolution::Started { session_id, host_id, viewer, joined } => {
                self.registry.set_busy(&host_id, true);
                self.metrics.sessions_started.inc();
                info!(session_id = %session_id, host_id = %host_id, viewer = %viewer, joined, "Session started");
                self.send(
                    peer.clone(),
                    ServerMessage::SessionStarted(SessionStarted {
                        session_id: session_id.clone(),
                        viewer_id: Some(viewer.clone()),
                    }),
                );
                self.send(viewer, ServerMessage::SessionStarted(SessionStarted { session_id, viewer_id: None }));
            }
            Resolution::Denied { viewer } => {
                let denied = SignalingError::PermissionDenied(response.session_id.clone());
                info!(viewer = %viewer, "{denied}");
                let reason = denied.user_message().unwrap_or(reasons::HOST_DENIED);
                self.send(viewer, ServerMessage::session_ended(response.session_id, reason));
            }
            Resolution::Expired => {
                debug!(session_id = %response.session_id, "Permission response arrived after TTL");
            }
            Resolution::Unknown => {}
        }
    }

    fn on_session_end(&mut self, peer: &PeerId, end: SessionEnd) {
        let Some(session) = self.sessions.active(&end.session_id) else {
            debug!(error = %SignalingError::SessionNotFound(end.session_id), "Ignoring session:end");
            return;
        };
        let is_host = self.registry.host_for_peer(peer) == Some(session.host_id());
        if !is_host && !session.is_member(peer) {
            debug!(session_id = %end.session_id, peer = %peer, "session:end from outsider dropped");
            return;
        }

        let reason = match end.reason {
            Some(EndReason::NegotiationFailed) => reasons::NEGOTIATION_FAILED,
            Some(EndReason::User) | None => reasons::ENDED_BY_USER,
        };
        self.end_session(&end.session_id, reason);
    }

    fn end_session(&mut self, session_id: &SessionId, reason: &str) {
        let Some(session) = self.sessions.end(session_id) else {
            return;
        };

        if let Some(host_peer) = self.host_peer(session.host_id()) {
            self.send(host_peer, ServerMessage::session_ended(session_id.clone(), reason));
        }
        for viewer in session.viewers() {
            self.send(viewer.clone(), ServerMessage::session_ended(session_id.clone(), reason));
        }

        let still_busy = self.sessions.host_has_active(session.host_id());
        self.registry.set_busy(session.host_id(), still_busy);
        self.metrics.sessions_ended.inc();
        info!(session_id = %session_id, host_id = %session.host_id(), reason, "Session ended");
    }

    fn on_disconnected(&mut self, peer: PeerId) {
        if self.peers.remove(&peer).is_none() {
            return;
        }
        debug!(peer = %peer, "Peer disconnected");

        if let Some(host_id) = self.registry.host_for_peer(&peer).cloned() {
            self.remove_host(&host_id, reasons::HOST_DISCONNECTED);
        }

        for pending in self.sessions.discard_pending_for_viewer(&peer) {
            debug!(session_id = %pending.session_id, "Discarded pending session of departed viewer");
        }

        for session_id in self.sessions.sessions_for_viewer(&peer) {
            let host_id = match self.sessions.active(&session_id) {
                Some(session) => session.host_id().clone(),
                None => continue,
            };
            match self.sessions.remove_viewer(&session_id, &peer) {
                Removal::Remaining { released_control, new_primary } => {
                    if released_control {
                        if let Some(host_peer) = self.host_peer(&host_id) {
                            self.send(
                                host_peer,
                                ServerMessage::ControlGranted(ControlGranted {
                                    session_id: session_id.clone(),
                                    granted: false,
                                    viewer_id: peer.clone(),
                                }),
                            );
                        }
                    }
                    if let Some(primary) = new_primary {
                        debug!(session_id = %session_id, primary = %primary, "Primary viewer handed over");
                    }
                }
                Removal::Emptied(session) => {
                    if let Some(host_peer) = self.host_peer(&host_id) {
                        self.send(
                            host_peer,
                            ServerMessage::session_ended(session_id.clone(), reasons::ALL_VIEWERS_DISCONNECTED),
                        );
                    }
                    let still_busy = self.sessions.host_has_active(&host_id);
                    self.registry.set_busy(&host_id, still_busy);
                    self.metrics.sessions_ended.inc();
                    info!(session_id = %session.session_id(), "Session ended, all viewers disconnected");
                }
                Removal::NotMember => {}
            }
        }
    }

    // ------------------------------------------------------------------------
    // Relay and control
    // ------------------------------------------------------------------------

    fn on_relay(&mut self, peer: &PeerId, signal: RelaySignal) {
        let session_id = signal.session_id().clone();
        let Some(session) = self.sessions.active(&session_id) else {
            debug!(event = signal.event(), error = %SignalingError::SessionNotFound(session_id), "Signal dropped");
            return;
        };
        let Some(host_peer) = self.host_peer(session.host_id()) else {
            debug!(session_id = %session_id, "Signal for session without host dropped");
            return;
        };

        match relay::route(session, &host_peer, peer, signal) {
            Ok(outbound) => {
                self.metrics.signals_relayed.inc_by(outbound.len() as f64);
                for out in outbound {
                    self.send(out.to, out.message);
                }
            }
            Err(e) => debug!(error = %e, "Signal dropped"),
        }
    }

    fn on_request_control(&mut self, peer: &PeerId, session_id: &SessionId) {
        let Some(session) = self.sessions.active_mut(session_id) else {
            debug!(session_id = %session_id, "Control request for unknown session");
            return;
        };
        let host_id = session.host_id().clone();
        let decision = control::request_control(session, peer);

        let granted = ServerMessage::ControlGranted(ControlGranted {
            session_id: session_id.clone(),
            granted: true,
            viewer_id: peer.clone(),
        });
        match decision {
            ControlDecision::Granted => {
                info!(session_id = %session_id, viewer = %peer, "Control granted");
                if let Some(host_peer) = self.host_peer(&host_id) {
                    self.send(host_peer, granted.clone());
                }
                self.send(peer.clone(), granted);
            }
            ControlDecision::AlreadyHeld => self.send(peer.clone(), granted),
            ControlDecision::Denied => self.send(
                peer.clone(),
                ServerMessage::ControlDenied(ControlDenied {
                    session_id: session_id.clone(),
                    reason: reasons::CONTROL_TAKEN.to_string(),
                }),
            ),
            ControlDecision::NotMember => {
                debug!(session_id = %session_id, peer = %peer, "Control request from non-member dropped");
            }
        }
    }

    fn on_release_control(&mut self, peer: &PeerId, session_id: &SessionId) {
        let Some(session) = self.sessions.active_mut(session_id) else {
            return;
        };
        let host_id = session.host_id().clone();
        if !control::release_control(session, peer) {
            debug!(session_id = %session_id, peer = %peer, "Stale control release ignored");
            return;
        }

        let released = ServerMessage::ControlGranted(ControlGranted {
            session_id: session_id.clone(),
            granted: false,
            viewer_id: peer.clone(),
        });
        if let Some(host_peer) = self.host_peer(&host_id) {
            self.send(host_peer, released.clone());
        }
        self.send(peer.clone(), released);
    }

    // ------------------------------------------------------------------------
    // Housekeeping
    // ------------------------------------------------------------------------

    fn on_sweep(&mut self, now: Instant) {
        for host_id in self.registry.idle_hosts(now, self.heartbeat_timeout) {
            let peer = self.host_peer(&host_id);
            warn!(host_id = %host_id, timeout_secs = self.heartbeat_timeout.as_secs(), "Evicting silent host");
            self.remove_host(&host_id, reasons::HOST_DISCONNECTED);
            if let Some(peer) = peer {
                self.effects.push(Effect::Close { peer });
            }
        }

        let stale = self.sessions.expire_stale(now).len();
        let purged = self.limiter.cleanup(now);
        if stale > 0 || purged > 0 {
            debug!(stale_pending = stale, purged_windows = purged, "Sweep complete");
        }
    }
}

// ============================================================================
// Hub task
// ============================================================================

pub enum HubCommand {
    Attach {
        peer: PeerId,
        source: String,
        outbox: mpsc::Sender<ServerMessage>,
    },
    Event(CoreEvent),
    Status(oneshot::Sender<HubStatus>),
}

/// Cheap handle used by connection tasks to reach the hub.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    pub fn attach(&self, peer: PeerId, source: String, outbox: mpsc::Sender<ServerMessage>) -> bool {
        self.tx.send(HubCommand::Attach { peer, source, outbox }).is_ok()
    }

    pub fn event(&self, event: CoreEvent) -> bool {
        self.tx.send(HubCommand::Event(event)).is_ok()
    }

    pub async fn status(&self) -> Option<HubStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(HubCommand::Status(tx)).ok()?;
        rx.await.ok()
    }
}

pub struct Hub {
    core: SignalingCore,
    outboxes: HashMap<PeerId, mpsc::Sender<ServerMessage>>,
    hasher: CredentialHasher,
    /// Bounds argon2 jobs on the blocking pool.
    hash_permits: Arc<Semaphore>,
    commands: mpsc::UnboundedReceiver<HubCommand>,
    handle: HubHandle,
    metrics: Arc<SignalingMetrics>,
    sweep_interval: Duration,
}

impl Hub {
    pub fn new(config: &ServerConfig, metrics: Arc<SignalingMetrics>) -> anyhow::Result<(Self, HubHandle)> {
        let hasher = CredentialHasher::new(&config.password_hash)?;
        let (tx, commands) = mpsc::unbounded_channel();
        let handle = HubHandle { tx };

        let hub = Self {
            core: SignalingCore::new(config, Arc::clone(&metrics)),
            outboxes: HashMap::new(),
            hasher,
            hash_permits: Arc::new(Semaphore::new(config.max_concurrent_hashes)),
            commands,
            handle: handle.clone(),
            metrics,
            sweep_interval: config.sweep_interval(),
        };
        Ok((hub, handle))
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let start = tokio::time::Instant::now() + self.sweep_interval;
        let mut sweep = tokio::time::interval_at(start, self.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(HubCommand::Attach { peer, source, outbox }) => {
                        self.outboxes.insert(peer.clone(), outbox);
                        self.dispatch(CoreEvent::Connected { peer, source });
                    }
                    Some(HubCommand::Event(event)) => {
                        if let CoreEvent::Disconnected { peer } = &event {
                            self.outboxes.remove(peer);
                        }
                        self.dispatch(event);
                    }
                    Some(HubCommand::Status(reply)) => {
                        let _ = reply.send(self.core.status());
                    }
                    None => break,
                },
                _ = sweep.tick() => self.dispatch(CoreEvent::Sweep),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(peers = self.outboxes.len(), "Signaling hub stopped");
    }

    fn dispatch(&mut self, event: CoreEvent) {
        for effect in self.core.handle(event, Instant::now()) {
            self.execute(effect);
        }
        self.metrics.observe(&self.core.status());
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Send { to, message } => {
                let Some(outbox) = self.outboxes.get(&to) else {
                    return;
                };
                match outbox.try_send(message) {
                    Ok(()) => {}
                    Err(TrySendError::Full(message)) => {
                        // Dropping the outbox ends the socket task, which reports the disconnect
                        warn!(peer = %to, event = message.event(), "Outbox full, closing slow connection");
                        self.metrics.slow_consumers_dropped.inc();
                        self.outboxes.remove(&to);
                    }
                    Err(TrySendError::Closed(_)) => debug!(peer = %to, "Outbox closed"),
                }
            }
            Effect::HashPassword { peer, host_id, password } => {
                let hasher = self.hasher.clone();
                let handle = self.handle.clone();
                let permits = Arc::clone(&self.hash_permits);
                tokio::spawn(async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
                        .await
                        .unwrap_or_else(|e| Err(CredentialError::Hash(e.to_string())));
                    handle.event(CoreEvent::CredentialHashed { peer, host_id, hash });
                });
            }
            Effect::VerifyPassword { peer, host_id, stored, candidate } => {
                let hasher = self.hasher.clone();
                let handle = self.handle.clone();
                let permits = Arc::clone(&self.hash_permits);
                tokio::spawn(async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    let valid = tokio::task::spawn_blocking(move || hasher.verify(&stored, &candidate))
                        .await
                        .unwrap_or(false);
                    handle.event(CoreEvent::PasswordChecked { peer, host_id, valid });
                });
            }
            Effect::ArmPendingTtl { session_id, after } => {
                let handle = self.handle.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    handle.event(CoreEvent::PendingExpired { session_id });
                });
            }
            Effect::Close { peer } => {
                self.outboxes.remove(&peer);
            }
        }
    }
}
