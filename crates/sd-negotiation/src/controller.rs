//! Per-session negotiation state machine.
//!
//! One [`SessionController`] serves one host/viewer pairing. Everything it
//! reacts to (relay frames, transport callbacks, timers, user actions)
//! arrives as a [`ControllerEvent`] and is handled to completion before the
//! next one, so per-attempt guards never race.

use sd_proto::signaling::{CandidateSignal, Ready, SdpSignal, SessionEnd, SessionRef};
use sd_proto::{
    reasons, ClientMessage, DataKind, DataMessage, EndReason, IceCandidate, PeerId, ServerMessage,
    SessionDescription, SessionId,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::attempt::NegotiationAttempt;
use crate::backoff::{ReconnectDecision, ReconnectPolicy, ReconnectState};
use crate::config::NegotiationConfig;
use crate::datachannel::{self, DataRoute};
use crate::errors::{NegotiationError, TransportError};
use crate::ice::CandidateBuffer;
use crate::latency::LatencyProbe;
use crate::state::{ConnectionMonitor, MonitorAction, PeerConnectionState};
use crate::transport::{PeerTransport, Role, SignalSink};

/// Terminal status text once the peer connection reports `closed`.
pub const PEER_CONNECTION_CLOSED: &str = "Peer connection closed.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Negotiating { attempt: u32 },
    Connected,
    Reconnecting { attempt: u32, delay: Duration },
    Ended { reason: String },
    Failed { reason: String },
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended { .. } | Self::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    DisconnectGrace,
    Reconnect,
    Readiness,
    Answer,
    LatencyProbe,
}

#[derive(Debug)]
pub enum ControllerEvent {
    Signal(ServerMessage),
    LocalCandidate(IceCandidate),
    PeerState(PeerConnectionState),
    /// Inbound data channel message.
    Data(DataMessage),
    /// Application wants to send on the data channel.
    SendData(DataKind),
    /// Host toggles whether viewer input is applied.
    AllowControl(bool),
    RequestControl,
    ReleaseControl,
    Hangup,
    Timer { kind: TimerKind, epoch: u64 },
}

/// What the controller reports to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    Status(SessionStatus),
    Data(DataMessage),
    /// Host: remote input to apply.
    Input(DataMessage),
    /// Viewer: round trip of a latency probe.
    Rtt(Duration),
    /// Viewer: whether the host accepts input.
    ControlPermission(bool),
    Control { granted: bool, viewer_id: PeerId },
    ControlDenied { reason: String },
}

/// Cloneable entry point for feeding a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    events: mpsc::UnboundedSender<ControllerEvent>,
    status: watch::Receiver<SessionStatus>,
}

impl ControllerHandle {
    pub fn send(&self, event: ControllerEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn signal(&self, message: ServerMessage) -> bool {
        self.send(ControllerEvent::Signal(message))
    }

    pub fn local_candidate(&self, candidate: IceCandidate) -> bool {
        self.send(ControllerEvent::LocalCandidate(candidate))
    }

    pub fn peer_state(&self, state: PeerConnectionState) -> bool {
        self.send(ControllerEvent::PeerState(state))
    }

    pub fn data(&self, message: DataMessage) -> bool {
        self.send(ControllerEvent::Data(message))
    }

    pub fn hangup(&self) -> bool {
        self.send(ControllerEvent::Hangup)
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Wait until the status satisfies `pred`. `None` once the controller
    /// is gone.
    pub async fn wait_for(&self, pred: impl FnMut(&SessionStatus) -> bool) -> Option<SessionStatus> {
        let mut status = self.status.clone();
        let matched = status.wait_for(pred).await.ok()?.clone();
        Some(matched)
    }
}

struct ArmedTimer {
    epoch: u64,
    task: JoinHandle<()>,
}

pub struct SessionController<T: PeerTransport, S: SignalSink> {
    role: Role,
    session_id: SessionId,
    config: NegotiationConfig,
    transport: T,
    signals: S,
    events: mpsc::UnboundedReceiver<ControllerEvent>,
    timer_events: mpsc::WeakUnboundedSender<ControllerEvent>,
    status: watch::Sender<SessionStatus>,
    app: mpsc::UnboundedSender<AppEvent>,

    attempt: NegotiationAttempt,
    candidates: CandidateBuffer,
    monitor: ConnectionMonitor,
    reconnect: ReconnectState,
    // Remote-initiated restarts since the last connection
    restarts: u32,
    probe: LatencyProbe,
    timers: HashMap<TimerKind, ArmedTimer>,
    timer_epoch: u64,

    // Host: the viewer this controller negotiates with
    target_viewer: Option<PeerId>,
    // Host: offer that arrived while no transport was prepared
    pending_offer: Option<SessionDescription>,
    control_allowed: bool,
    has_control: bool,
    finished: bool,
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

impl<T: PeerTransport, S: SignalSink> SessionController<T, S> {
    pub fn new(
        role: Role,
        session_id: SessionId,
        config: NegotiationConfig,
        transport: T,
        signals: S,
    ) -> (Self, ControllerHandle, mpsc::UnboundedReceiver<AppEvent>) {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(SessionStatus::Idle);
        let (app, app_rx) = mpsc::unbounded_channel();

        let controller = Self {
            role,
            session_id,
            reconnect: ReconnectState::new(ReconnectPolicy::new(&config.reconnect)),
            control_allowed: role == Role::Host && config.allow_control,
            config,
            transport,
            signals,
            events,
            timer_events: events_tx.downgrade(),
            status,
            app,
            attempt: NegotiationAttempt::new(0),
            candidates: CandidateBuffer::new(),
            monitor: ConnectionMonitor::new(),
            restarts: 0,
            probe: LatencyProbe::new(),
            timers: HashMap::new(),
            timer_epoch: 0,
            target_viewer: None,
            pending_offer: None,
            has_control: false,
            finished: false,
        };
        let handle = ControllerHandle { events: events_tx, status: status_rx };
        (controller, handle, app_rx)
    }

    /// Host: negotiate only with `viewer`, tagging every frame for it.
    pub fn with_target_viewer(mut self, viewer: PeerId) -> Self {
        self.target_viewer = Some(viewer);
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn attempt(&self) -> &NegotiationAttempt {
        &self.attempt
    }

    pub fn target_viewer(&self) -> Option<&PeerId> {
        self.target_viewer.as_ref()
    }

    pub fn has_control(&self) -> bool {
        self.has_control
    }

    pub fn control_allowed(&self) -> bool {
        self.control_allowed
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Start the first attempt and process events until the session ends.
    pub async fn run(mut self) -> SessionStatus {
        self.start().await;
        while !self.finished {
            if !self.step().await {
                // Every handle is gone
                self.cancel_all_timers();
                self.transport.shutdown().await;
                break;
            }
        }
        self.status()
    }

    /// Wait for the next event and handle it. False once all handles are
    /// dropped.
    pub async fn step(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.handle(event).await;
                true
            }
            None => false,
        }
    }

    /// Handle events that are already queued without waiting.
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle(event).await;
            handled += 1;
        }
        handled
    }

    pub async fn start(&mut self) {
        if self.finished || self.attempt.number != 0 {
            return;
        }
        info!(session_id = %self.session_id, role = ?self.role, "Starting negotiation");
        self.attempt = self.attempt.next();
        self.set_status(SessionStatus::Negotiating { attempt: self.attempt.number });
        self.prepare_attempt(false).await;
    }

    pub async fn handle(&mut self, event: ControllerEvent) {
        if self.finished {
            debug!(session_id = %self.session_id, ?event, "Event after session end ignored");
            return;
        }

        match event {
            ControllerEvent::Signal(message) => self.on_signal(message).await,
            ControllerEvent::LocalCandidate(candidate) => {
                let viewer_id = self.outbound_viewer_tag();
                self.signal(ClientMessage::IceCandidate(CandidateSignal {
                    session_id: self.session_id.clone(),
                    candidate: candidate.to_value(),
                    viewer_id,
                }));
            }
            ControllerEvent::PeerState(state) => self.on_peer_state(state).await,
            ControllerEvent::Data(message) => self.on_data(message).await,
            ControllerEvent::SendData(kind) => {
                if self.status() == SessionStatus::Connected {
                    self.send_data(DataMessage::new(kind, now_ms())).await;
                } else {
                    debug!(kind = kind.name(), "Not connected, data message dropped");
                }
            }
            ControllerEvent::AllowControl(allowed) => {
                if self.role == Role::Host && self.control_allowed != allowed {
                    self.control_allowed = allowed;
                    if self.status() == SessionStatus::Connected {
                        self.announce_control_permission().await;
                    }
                }
            }
            ControllerEvent::RequestControl => {
                self.signal(ClientMessage::RequestControl(SessionRef { session_id: self.session_id.clone() }));
            }
            ControllerEvent::ReleaseControl => {
                self.signal(ClientMessage::ReleaseControl(SessionRef { session_id: self.session_id.clone() }));
            }
            ControllerEvent::Hangup => self.end_locally(EndReason::User, reasons::ENDED_BY_USER).await,
            ControllerEvent::Timer { kind, epoch } => self.on_timer(kind, epoch).await,
        }
    }

    // ------------------------------------------------------------------------
    // Attempts
    // ------------------------------------------------------------------------

    async fn prepare_attempt(&mut self, reuse_media: bool) {
        let role = self.role;
        let deadline = self.config.readiness_timeout();

        match tokio::time::timeout(deadline, self.transport.prepare(role, reuse_media)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                if role == Role::Host && self.attempt.number == 1 {
                    warn!(session_id = %self.session_id, error = %error, "Host media unavailable, ending session");
                    self.end_locally(EndReason::User, reasons::ENDED_BY_USER).await;
                } else {
                    self.escalate(error.into()).await;
                }
                return;
            }
            Err(_) => {
                self.escalate(NegotiationError::NegotiationTimeout { stage: "readiness", after: deadline })
                    .await;
                return;
            }
        }

        self.attempt.mark_transport_ready();
        debug!(session_id = %self.session_id, attempt = self.attempt.number, "Transport prepared");

        match role {
            Role::Host => {
                self.send_host_ready();
                if let Some(offer) = self.pending_offer.take() {
                    self.answer_offer(offer).await;
                }
            }
            Role::Viewer => {
                if self.attempt.try_mark_viewer_ready_sent() {
                    self.signal(ClientMessage::ViewerReady(Ready {
                        session_id: self.session_id.clone(),
                        viewer_id: None,
                    }));
                }
                if self.attempt.take_early_host_ready() {
                    self.send_offer().await;
                } else {
                    self.arm(TimerKind::Readiness, deadline);
                }
            }
        }
    }

    fn reset_attempt_state(&mut self) {
        self.cancel_attempt_timers();
        self.candidates.clear();
        self.monitor.reset();
        self.probe.reset();
    }

    /// The remote side started over; drop the current attempt and begin a
    /// new one right away.
    async fn restart_attempt(&mut self, why: &str) {
        self.restarts += 1;
        if self.restarts > self.config.reconnect.max_attempts {
            warn!(session_id = %self.session_id, restarts = self.restarts, why, "Too many restarts without connecting");
            self.fail().await;
            return;
        }
        info!(session_id = %self.session_id, attempt = self.attempt.number, why, "Restarting negotiation");
        if self.attempt.transport_ready() {
            self.transport.close_peer().await;
        }
        if self.reconnect.is_scheduled() {
            self.cancel(TimerKind::Reconnect);
            self.reconnect.fired();
        }
        self.attempt = self.attempt.next();
        self.reset_attempt_state();
        self.set_status(SessionStatus::Negotiating { attempt: self.attempt.number });
        let reuse = self.transport.has_live_media();
        self.prepare_attempt(reuse).await;
    }

    /// Enter the reconnection path.
    async fn escalate(&mut self, error: NegotiationError) {
        if self.finished {
            return;
        }
        warn!(session_id = %self.session_id, attempt = self.attempt.number, error = %error, "Negotiation attempt failed");
        if !error.is_recoverable() {
            self.fail().await;
            return;
        }

        self.cancel_attempt_timers();
        self.probe.reset();
        if self.attempt.transport_ready() {
            self.attempt.mark_transport_lost();
            self.transport.close_peer().await;
        }

        match self.reconnect.schedule() {
            ReconnectDecision::AlreadyScheduled => {
                debug!(session_id = %self.session_id, "Reconnection already pending");
            }
            ReconnectDecision::Scheduled { attempt, delay } => {
                info!(session_id = %self.session_id, attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
                self.set_status(SessionStatus::Reconnecting { attempt, delay });
                self.arm(TimerKind::Reconnect, delay);
            }
            ReconnectDecision::Exhausted => {
                warn!(session_id = %self.session_id, attempts = self.reconnect.attempts(), "Reconnection attempts exhausted");
                self.fail().await;
            }
        }
    }

    /// Give up: tell the relay and settle on a failed status.
    async fn fail(&mut self) {
        self.signal(ClientMessage::SessionEnd(SessionEnd {
            session_id: self.session_id.clone(),
            reason: Some(EndReason::NegotiationFailed),
        }));
        self.finish(SessionStatus::Failed { reason: reasons::NEGOTIATION_FAILED.to_string() }).await;
    }

    async fn end_locally(&mut self, reason: EndReason, text: &str) {
        self.signal(ClientMessage::SessionEnd(SessionEnd {
            session_id: self.session_id.clone(),
            reason: Some(reason),
        }));
        self.finish(SessionStatus::Ended { reason: text.to_string() }).await;
    }

    async fn finish(&mut self, status: SessionStatus) {
        self.cancel_all_timers();
        self.pending_offer = None;
        self.candidates.clear();
        self.transport.shutdown().await;
        self.finished = true;
        info!(session_id = %self.session_id, ?status, "Session finished");
        self.set_status(status);
    }

    // ------------------------------------------------------------------------
    // Relay frames
    // ------------------------------------------------------------------------

    async fn on_signal(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::HostReady(ready) if ready.session_id == self.session_id => self.on_host_ready().await,
            ServerMessage::ViewerReady(ready) if ready.session_id == self.session_id => {
                self.on_viewer_ready(ready.viewer_id).await
            }
            ServerMessage::Offer(offer) if offer.session_id == self.session_id => self.on_offer(offer).await,
            ServerMessage::Answer(answer) if answer.session_id == self.session_id => self.on_answer(answer).await,
            ServerMessage::IceCandidate(candidate) if candidate.session_id == self.session_id => {
                self.on_remote_candidate(candidate).await
            }
            ServerMessage::ControlGranted(grant) if grant.session_id == self.session_id => {
                if self.role == Role::Viewer {
                    self.has_control = grant.granted;
                }
                self.emit(AppEvent::Control { granted: grant.granted, viewer_id: grant.viewer_id });
            }
            ServerMessage::ControlDenied(denied) if denied.session_id == self.session_id => {
                self.emit(AppEvent::ControlDenied { reason: denied.reason });
            }
            ServerMessage::SessionEnded(ended) if ended.session_id == self.session_id => {
                info!(session_id = %self.session_id, reason = %ended.reason, "Session ended by relay");
                self.finish(SessionStatus::Ended { reason: ended.reason }).await;
            }
            other => debug!(session_id = %self.session_id, event = other.event(), "Frame not for this controller"),
        }
    }

    fn accepts_viewer(&self, tag: Option<&PeerId>) -> bool {
        match (&self.target_viewer, tag) {
            (Some(target), Some(viewer)) => target == viewer,
            _ => true,
        }
    }

    fn outbound_viewer_tag(&self) -> Option<PeerId> {
        match self.role {
            Role::Host => self.target_viewer.clone(),
            Role::Viewer => None,
        }
    }

    fn send_host_ready(&mut self) {
        if self.attempt.try_mark_host_ready_sent() {
            self.signal(ClientMessage::HostReady(Ready {
                session_id: self.session_id.clone(),
                viewer_id: self.target_viewer.clone(),
            }));
        }
    }

    async fn on_host_ready(&mut self) {
        if self.role != Role::Viewer {
            return;
        }
        if !self.attempt.transport_ready() {
            debug!(session_id = %self.session_id, "host:ready before transport prepared, remembering it");
            self.attempt.note_early_host_ready();
            return;
        }
        self.send_offer().await;
    }

    async fn send_offer(&mut self) {
        if !self.attempt.try_mark_offer_sent() {
            debug!(session_id = %self.session_id, "Offer already sent this attempt");
            return;
        }
        self.cancel(TimerKind::Readiness);

        match self.transport.create_offer().await {
            Ok(offer) => {
                self.signal(ClientMessage::Offer(SdpSignal {
                    session_id: self.session_id.clone(),
                    sdp: offer.to_value(),
                    viewer_id: None,
                }));
                let deadline = self.config.answer_timeout();
                self.arm(TimerKind::Answer, deadline);
            }
            Err(error) => self.escalate(error.into()).await,
        }
    }

    async fn on_viewer_ready(&mut self, viewer_id: Option<PeerId>) {
        if self.role != Role::Host || !self.accepts_viewer(viewer_id.as_ref()) {
            return;
        }
        if !self.attempt.transport_ready() {
            // host:ready goes out once preparation finishes
            return;
        }
        if self.attempt.answer_sent() {
            self.restart_attempt("viewer restarted negotiation").await;
            return;
        }
        if self.attempt.host_ready_sent() && self.attempt.try_mark_host_ready_resent() {
            self.signal(ClientMessage::HostReady(Ready {
                session_id: self.session_id.clone(),
                viewer_id: self.target_viewer.clone(),
            }));
        }
    }

    async fn on_offer(&mut self, signal: SdpSignal) {
        if self.role != Role::Host || !self.accepts_viewer(signal.viewer_id.as_ref()) {
            debug!(session_id = %self.session_id, "Offer for another viewer ignored");
            return;
        }
        let SdpSignal { sdp, viewer_id, .. } = signal;
        let offer = match SessionDescription::from_value(sdp) {
            Ok(offer) => offer,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %NegotiationError::from(e), "Dropping offer");
                return;
            }
        };
        if self.target_viewer.is_none() {
            self.target_viewer = viewer_id;
        }

        if !self.attempt.transport_ready() {
            debug!(session_id = %self.session_id, "Offer queued until transport is prepared");
            self.pending_offer = Some(offer);
            return;
        }
        if self.attempt.answer_sent() {
            self.pending_offer = Some(offer);
            self.restart_attempt("viewer sent a new offer").await;
            return;
        }
        self.answer_offer(offer).await;
    }

    async fn answer_offer(&mut self, offer: SessionDescription) {
        let deadline = self.config.answer_timeout();
        let queued = self.candidates.drain();
        let transport = &mut self.transport;

        let outcome = tokio::time::timeout(deadline, async move {
            transport.set_remote_description(offer).await?;
            for candidate in queued {
                transport.add_ice_candidate(candidate).await?;
            }
            transport.create_answer().await
        })
        .await;

        match outcome {
            Ok(Ok(answer)) => {
                self.attempt.mark_remote_description_set();
                self.attempt.mark_answer_sent();
                self.signal(ClientMessage::Answer(SdpSignal {
                    session_id: self.session_id.clone(),
                    sdp: answer.to_value(),
                    viewer_id: self.target_viewer.clone(),
                }));
            }
            Ok(Err(error)) => self.escalate(error.into()).await,
            Err(_) => {
                self.escalate(NegotiationError::NegotiationTimeout { stage: "answer", after: deadline })
                    .await
            }
        }
    }

    async fn on_answer(&mut self, signal: SdpSignal) {
        if self.role != Role::Viewer {
            return;
        }
        if !self.attempt.offer_sent() || self.attempt.remote_description_set() {
            debug!(session_id = %self.session_id, "Unexpected answer ignored");
            return;
        }
        let answer = match SessionDescription::from_value(signal.sdp) {
            Ok(answer) => answer,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %NegotiationError::from(e), "Dropping answer");
                return;
            }
        };

        self.cancel(TimerKind::Answer);
        if let Err(error) = self.transport.set_remote_description(answer).await {
            self.escalate(error.into()).await;
            return;
        }
        self.attempt.mark_remote_description_set();

        for candidate in self.candidates.drain() {
            if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                warn!(session_id = %self.session_id, error = %e, "Buffered candidate rejected");
            }
        }
    }

    async fn on_remote_candidate(&mut self, signal: CandidateSignal) {
        if self.role == Role::Host && !self.accepts_viewer(signal.viewer_id.as_ref()) {
            return;
        }
        let candidate = match IceCandidate::from_value(signal.candidate) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %NegotiationError::from(e), "Dropping candidate");
                return;
            }
        };

        if !self.attempt.remote_description_set() {
            self.candidates.push(candidate);
            debug!(session_id = %self.session_id, buffered = self.candidates.len(), "Candidate buffered");
            return;
        }
        if let Err(e) = self.transport.add_ice_candidate(candidate).await {
            warn!(session_id = %self.session_id, error = %e, "Candidate rejected");
        }
    }

    // ------------------------------------------------------------------------
    // Peer connection
    // ------------------------------------------------------------------------

    async fn on_peer_state(&mut self, state: PeerConnectionState) {
        debug!(session_id = %self.session_id, ?state, "Peer connection state");
        match self.monitor.on_state(state) {
            MonitorAction::Connected => self.on_connected().await,
            MonitorAction::ArmGrace => {
                let grace = self.config.disconnect_grace();
                info!(session_id = %self.session_id, grace_ms = grace.as_millis() as u64, "Peer disconnected, waiting for recovery");
                self.arm(TimerKind::DisconnectGrace, grace);
            }
            MonitorAction::Escalate => {
                self.cancel(TimerKind::DisconnectGrace);
                self.escalate(TransportError::Peer("connection failed".to_string()).into()).await;
            }
            MonitorAction::Closed => {
                if !self.attempt.transport_ready() {
                    debug!(session_id = %self.session_id, "Closed reported for a torn down connection");
                    return;
                }
                info!(session_id = %self.session_id, "Peer connection closed");
                self.signal(ClientMessage::SessionEnd(SessionEnd {
                    session_id: self.session_id.clone(),
                    reason: None,
                }));
                self.finish(SessionStatus::Ended { reason: PEER_CONNECTION_CLOSED.to_string() }).await;
            }
            MonitorAction::None => {}
        }
    }

    async fn on_connected(&mut self) {
        self.cancel(TimerKind::DisconnectGrace);
        self.cancel(TimerKind::Readiness);
        self.cancel(TimerKind::Answer);
        if self.reconnect.is_scheduled() {
            self.cancel(TimerKind::Reconnect);
        }
        self.reconnect.reset();
        self.restarts = 0;
        self.set_status(SessionStatus::Connected);

        match self.role {
            Role::Host => self.announce_control_permission().await,
            Role::Viewer => {
                let interval = self.config.ping_interval();
                self.arm(TimerKind::LatencyProbe, interval);
            }
        }
    }

    async fn announce_control_permission(&mut self) {
        let message = DataMessage::new(DataKind::ControlPermission { allowed: self.control_allowed }, now_ms());
        self.send_data(message).await;
    }

    async fn on_data(&mut self, message: DataMessage) {
        match datachannel::route(self.role, &message, self.control_allowed) {
            DataRoute::ReplyPong { seq, timestamp } => {
                self.send_data(DataMessage::new(DataKind::Pong { seq }, timestamp)).await;
            }
            DataRoute::Rtt { seq, timestamp } => {
                if let Some(rtt) = self.probe.on_pong(seq, timestamp, now_ms()) {
                    debug!(session_id = %self.session_id, rtt_ms = rtt.as_millis() as u64, "Latency sample");
                    self.emit(AppEvent::Rtt(rtt));
                }
            }
            DataRoute::Input => self.emit(AppEvent::Input(message)),
            DataRoute::ControlPermission(allowed) => {
                self.control_allowed = allowed;
                self.emit(AppEvent::ControlPermission(allowed));
            }
            DataRoute::Deliver => self.emit(AppEvent::Data(message)),
            DataRoute::Drop => {
                debug!(session_id = %self.session_id, kind = message.kind.name(), "Data message dropped");
            }
        }
    }

    async fn send_data(&mut self, message: DataMessage) {
        if let Err(e) = self.transport.send_data(message).await {
            debug!(session_id = %self.session_id, error = %e, "Data channel send failed");
        }
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    async fn on_timer(&mut self, kind: TimerKind, epoch: u64) {
        match self.timers.get(&kind) {
            Some(timer) if timer.epoch == epoch => {
                self.timers.remove(&kind);
            }
            _ => {
                debug!(?kind, epoch, "Stale timer ignored");
                return;
            }
        }

        match kind {
            TimerKind::DisconnectGrace => {
                if self.monitor.on_grace_expired() {
                    self.escalate(TransportError::Peer("disconnected beyond grace window".to_string()).into())
                        .await;
                }
            }
            TimerKind::Reconnect => {
                self.reconnect.fired();
                self.attempt = self.attempt.next();
                self.reset_attempt_state();
                self.set_status(SessionStatus::Negotiating { attempt: self.attempt.number });
                let reuse = self.transport.has_live_media();
                self.prepare_attempt(reuse).await;
            }
            TimerKind::Readiness => {
                let after = self.config.readiness_timeout();
                self.escalate(NegotiationError::NegotiationTimeout { stage: "readiness", after }).await;
            }
            TimerKind::Answer => {
                let after = self.config.answer_timeout();
                self.escalate(NegotiationError::NegotiationTimeout { stage: "answer", after }).await;
            }
            TimerKind::LatencyProbe => {
                if self.role == Role::Viewer && self.status() == SessionStatus::Connected {
                    let ping = self.probe.next_ping(now_ms());
                    self.send_data(ping).await;
                    let interval = self.config.ping_interval();
                    self.arm(TimerKind::LatencyProbe, interval);
                }
            }
        }
    }

    fn arm(&mut self, kind: TimerKind, after: Duration) {
        self.cancel(kind);
        self.timer_epoch += 1;
        let epoch = self.timer_epoch;
        let events = self.timer_events.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(events) = events.upgrade() {
                let _ = events.send(ControllerEvent::Timer { kind, epoch });
            }
        });
        self.timers.insert(kind, ArmedTimer { epoch, task });
    }

    fn cancel(&mut self, kind: TimerKind) {
        if let Some(timer) = self.timers.remove(&kind) {
            timer.task.abort();
        }
    }

    fn cancel_attempt_timers(&mut self) {
        for kind in [TimerKind::Readiness, TimerKind::Answer, TimerKind::DisconnectGrace, TimerKind::LatencyProbe] {
            self.cancel(kind);
        }
    }

    fn cancel_all_timers(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.task.abort();
        }
        self.reconnect.fired();
    }

    // ------------------------------------------------------------------------
    // Outputs
    // ------------------------------------------------------------------------

    fn signal(&self, message: ClientMessage) {
        if let Err(e) = self.signals.send_signal(message) {
            warn!(session_id = %self.session_id, error = %e, "Signal not sent");
        }
    }

    fn emit(&self, event: AppEvent) {
        let _ = self.app.send(event);
    }

    fn set_status(&self, status: SessionStatus) {
        self.status.send_replace(status.clone());
        self.emit(AppEvent::Status(status));
    }
}
