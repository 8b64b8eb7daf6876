use sd_negotiation::testing::{MockLog, MockPeer, PeerCall};
use sd_negotiation::{
    AppEvent, ControllerEvent, ControllerHandle, NegotiationConfig, PeerConnectionState, Role,
    SessionController, SessionStatus, TransportError, PEER_CONNECTION_CLOSED,
};
use sd_proto::signaling::{CandidateSignal, Ready, SdpSignal};
use sd_proto::{
    reasons, ClientMessage, DataKind, DataMessage, EndReason, IceCandidate, PeerId, ServerMessage,
    SessionDescription, SessionId,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

const SESSION: &str = "session-1";
const VIEWER: &str = "viewer-1";

struct Rig {
    controller: SessionController<MockPeer, mpsc::UnboundedSender<ClientMessage>>,
    _handle: ControllerHandle,
    app: mpsc::UnboundedReceiver<AppEvent>,
    signals: mpsc::UnboundedReceiver<ClientMessage>,
    log: MockLog,
}

impl Rig {
    fn new(role: Role, peer: MockPeer) -> Self {
        let log = peer.log();
        let (tx, signals) = mpsc::unbounded_channel();
        let (controller, handle, app) =
            SessionController::new(role, SessionId::from(SESSION), NegotiationConfig::default(), peer, tx);
        Self { controller, _handle: handle, app, signals, log }
    }

    fn viewer() -> Self {
        Self::new(Role::Viewer, MockPeer::new())
    }

    fn host(peer: MockPeer) -> Self {
        let mut rig = Self::new(Role::Host, peer);
        rig.controller = rig.controller.with_target_viewer(PeerId::from(VIEWER));
        rig
    }

    async fn signal(&mut self, message: ServerMessage) {
        self.controller.handle(ControllerEvent::Signal(message)).await;
    }

    async fn peer_state(&mut self, state: PeerConnectionState) {
        self.controller.handle(ControllerEvent::PeerState(state)).await;
    }

    fn sent(&mut self) -> Vec<ClientMessage> {
        let mut out = Vec::new();
        while let Ok(message) = self.signals.try_recv() {
            out.push(message);
        }
        out
    }

    fn app_events(&mut self) -> Vec<AppEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.app.try_recv() {
            out.push(event);
        }
        out
    }

    /// Step until the status matches, returning how long it took.
    async fn step_until(&mut self, pred: impl Fn(&SessionStatus) -> bool) -> Duration {
        let started = Instant::now();
        while !pred(&self.controller.status()) {
            assert!(self.controller.step().await, "controller channel closed");
        }
        started.elapsed()
    }

    /// Viewer: run through offer and answer to a connected peer.
    async fn connect_viewer(&mut self) {
        self.controller.start().await;
        self.signal(host_ready(None)).await;
        self.signal(answer()).await;
        self.peer_state(PeerConnectionState::Connecting).await;
        self.peer_state(PeerConnectionState::Connected).await;
        assert_eq!(self.controller.status(), SessionStatus::Connected);
    }
}

fn session() -> SessionId {
    SessionId::from(SESSION)
}

fn host_ready(viewer: Option<&str>) -> ServerMessage {
    ServerMessage::HostReady(Ready { session_id: session(), viewer_id: viewer.map(PeerId::from) })
}

fn viewer_ready(viewer: &str) -> ServerMessage {
    ServerMessage::ViewerReady(Ready { session_id: session(), viewer_id: Some(PeerId::from(viewer)) })
}

fn offer_from(viewer: &str, sdp: &str) -> ServerMessage {
    ServerMessage::Offer(SdpSignal {
        session_id: session(),
        sdp: SessionDescription::offer(sdp).to_value(),
        viewer_id: Some(PeerId::from(viewer)),
    })
}

fn answer() -> ServerMessage {
    ServerMessage::Answer(SdpSignal {
        session_id: session(),
        sdp: SessionDescription::answer("v=0\r\ns=remote-answer\r\n").to_value(),
        viewer_id: None,
    })
}

fn candidate(name: &str) -> ServerMessage {
    ServerMessage::IceCandidate(CandidateSignal {
        session_id: session(),
        candidate: IceCandidate::new(name).to_value(),
        viewer_id: None,
    })
}

fn count<F: Fn(&ClientMessage) -> bool>(messages: &[ClientMessage], pred: F) -> usize {
    messages.iter().filter(|m| pred(m)).count()
}

// ----------------------------------------------------------------------------
// Viewer
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_duplicate_host_ready_sends_one_offer() {
    let mut rig = Rig::viewer();
    rig.controller.start().await;

    rig.signal(host_ready(None)).await;
    rig.signal(host_ready(None)).await;

    let sent = rig.sent();
    assert!(matches!(sent[0], ClientMessage::ViewerReady(_)));
    assert_eq!(count(&sent, |m| matches!(m, ClientMessage::Offer(_))), 1);
    assert_eq!(rig.log.count(|c| matches!(c, PeerCall::CreateOffer)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_early_host_ready_is_remembered() {
    let mut rig = Rig::viewer();

    // Arrives before the transport exists
    rig.signal(host_ready(None)).await;
    assert!(rig.sent().is_empty());

    rig.controller.start().await;
    let sent = rig.sent();
    assert_eq!(sent.len(), 2);
    assert!(matches!(sent[0], ClientMessage::ViewerReady(_)));
    assert!(matches!(sent[1], ClientMessage::Offer(_)));
}

#[tokio::test(start_paused = true)]
async fn test_candidates_applied_in_order_after_answer() {
    let mut rig = Rig::viewer();
    rig.controller.start().await;
    rig.signal(host_ready(None)).await;

    for name in ["candidate:1", "candidate:2", "candidate:3"] {
        rig.signal(candidate(name)).await;
    }
    assert!(rig.log.applied_candidates().is_empty());

    rig.signal(answer()).await;
    rig.signal(candidate("candidate:4")).await;

    assert_eq!(
        rig.log.applied_candidates(),
        vec!["candidate:1", "candidate:2", "candidate:3", "candidate:4"]
    );

    let calls = rig.log.calls();
    let remote = calls.iter().position(|c| matches!(c, PeerCall::SetRemote(_))).unwrap();
    let first_candidate = calls.iter().position(|c| matches!(c, PeerCall::AddCandidate(_))).unwrap();
    assert!(remote < first_candidate);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_answer_ignored() {
    let mut rig = Rig::viewer();
    rig.controller.start().await;
    rig.signal(host_ready(None)).await;

    rig.signal(answer()).await;
    rig.signal(answer()).await;
    assert_eq!(rig.log.count(|c| matches!(c, PeerCall::SetRemote(_))), 1);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_then_fails() {
    let mut rig = Rig::viewer();
    rig.controller.start().await;

    let mut delays = Vec::new();
    for attempt in 1..=5u32 {
        rig.peer_state(PeerConnectionState::Failed).await;
        let delay = match rig.controller.status() {
            SessionStatus::Reconnecting { attempt: n, delay } => {
                assert_eq!(n, attempt);
                delay
            }
            other => panic!("expected reconnecting, got {other:?}"),
        };
        delays.push(delay.as_millis() as u64);

        let waited = rig.step_until(|s| matches!(s, SessionStatus::Negotiating { .. })).await;
        assert_eq!(waited, delay);
        assert_eq!(rig.controller.status(), SessionStatus::Negotiating { attempt: attempt + 1 });
    }
    assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);

    rig.sent();
    rig.peer_state(PeerConnectionState::Failed).await;

    assert_eq!(
        rig.controller.status(),
        SessionStatus::Failed { reason: reasons::NEGOTIATION_FAILED.to_string() }
    );
    let sent = rig.sent();
    assert!(matches!(
        sent.as_slice(),
        [ClientMessage::SessionEnd(end)] if end.reason == Some(EndReason::NegotiationFailed)
    ));
    assert_eq!(rig.log.count(|c| matches!(c, PeerCall::Shutdown)), 1);
    assert!(rig.controller.is_finished());
}

#[tokio::test(start_paused = true)]
async fn test_each_attempt_sends_viewer_ready_again() {
    let mut rig = Rig::viewer();
    rig.controller.start().await;
    rig.peer_state(PeerConnectionState::Failed).await;
    rig.step_until(|s| matches!(s, SessionStatus::Negotiating { .. })).await;

    let sent = rig.sent();
    assert_eq!(count(&sent, |m| matches!(m, ClientMessage::ViewerReady(_))), 2);
    assert_eq!(rig.log.prepares(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_session_ended_cancels_reconnect() {
    let mut rig = Rig::viewer();
    rig.controller.start().await;
    rig.peer_state(PeerConnectionState::Failed).await;
    assert!(matches!(rig.controller.status(), SessionStatus::Reconnecting { .. }));

    rig.signal(ServerMessage::session_ended(session(), reasons::HOST_DISCONNECTED)).await;
    assert_eq!(
        rig.controller.status(),
        SessionStatus::Ended { reason: reasons::HOST_DISCONNECTED.to_string() }
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(rig.controller.process_pending().await, 0);
    assert_eq!(rig.log.prepares(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_answer_timeout_reconnects() {
    let mut rig = Rig::viewer();
    rig.controller.start().await;
    rig.signal(host_ready(None)).await;

    let waited = rig.step_until(|s| matches!(s, SessionStatus::Reconnecting { .. })).await;
    assert_eq!(waited, Duration::from_secs(15));
    assert_eq!(
        rig.controller.status(),
        SessionStatus::Reconnecting { attempt: 1, delay: Duration::from_secs(1) }
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_grace_window() {
    let mut rig = Rig::viewer();
    rig.connect_viewer().await;

    // Recovers inside the window
    rig.peer_state(PeerConnectionState::Disconnected).await;
    tokio::time::sleep(Duration::from_secs(4)).await;
    rig.peer_state(PeerConnectionState::Connected).await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    rig.controller.process_pending().await;
    assert_eq!(rig.controller.status(), SessionStatus::Connected);

    // Stays down past the window
    rig.peer_state(PeerConnectionState::Disconnected).await;
    let waited = rig.step_until(|s| matches!(s, SessionStatus::Reconnecting { .. })).await;
    assert_eq!(waited, Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_closed_peer_ends_session() {
    let mut rig = Rig::viewer();
    rig.connect_viewer().await;
    rig.sent();

    rig.peer_state(PeerConnectionState::Closed).await;
    assert_eq!(
        rig.controller.status(),
        SessionStatus::Ended { reason: PEER_CONNECTION_CLOSED.to_string() }
    );
    assert!(rig.controller.is_finished());
    assert!(matches!(rig.sent().as_slice(), [ClientMessage::SessionEnd(end)] if end.reason.is_none()));
    assert_eq!(rig.log.count(|c| matches!(c, PeerCall::Shutdown)), 1);

    // No ping or grace timer survives
    tokio::time::sleep(Duration::from_secs(30)).await;
    tokio::task::yield_now().await;
    assert_eq!(rig.controller.process_pending().await, 0);
    assert!(rig.log.sent_data().iter().all(|m| !matches!(m.kind, DataKind::Ping { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_closed_after_own_teardown_ignored() {
    let mut rig = Rig::viewer();
    rig.connect_viewer().await;
    rig.peer_state(PeerConnectionState::Failed).await;
    assert!(matches!(rig.controller.status(), SessionStatus::Reconnecting { .. }));

    rig.peer_state(PeerConnectionState::Closed).await;
    assert!(matches!(rig.controller.status(), SessionStatus::Reconnecting { .. }));
    assert!(!rig.controller.is_finished());
}

#[tokio::test(start_paused = true)]
async fn test_unrecoverable_failure_skips_backoff() {
    let mut rig = Rig::new(Role::Viewer, MockPeer::new().with_prepare_failure(TransportError::CaptureCancelled));
    rig.controller.start().await;

    assert_eq!(
        rig.controller.status(),
        SessionStatus::Failed { reason: reasons::NEGOTIATION_FAILED.to_string() }
    );
    assert!(!rig.app_events().iter().any(|e| matches!(e, AppEvent::Status(SessionStatus::Reconnecting { .. }))));
    assert!(matches!(
        rig.sent().as_slice(),
        [ClientMessage::SessionEnd(end)] if end.reason == Some(EndReason::NegotiationFailed)
    ));
    assert_eq!(rig.log.prepares(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_latency_probe_reports_rtt() {
    let mut rig = Rig::viewer();
    rig.connect_viewer().await;
    rig.app_events();

    // The ping timer is the only one armed once connected
    let started = Instant::now();
    assert!(rig.controller.step().await);
    assert_eq!(started.elapsed(), Duration::from_secs(2));

    let ping = rig
        .log
        .sent_data()
        .into_iter()
        .find(|m| matches!(m.kind, DataKind::Ping { .. }))
        .expect("ping sent");
    assert_eq!(ping.kind, DataKind::Ping { seq: 0 });

    rig.controller
        .handle(ControllerEvent::Data(DataMessage::new(DataKind::Pong { seq: 0 }, ping.timestamp)))
        .await;
    assert!(rig.app_events().iter().any(|e| matches!(e, AppEvent::Rtt(_))));

    // Unknown sequence numbers are ignored
    rig.controller
        .handle(ControllerEvent::Data(DataMessage::new(DataKind::Pong { seq: 99 }, ping.timestamp)))
        .await;
    assert!(rig.app_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_control_grant_tracked() {
    let mut rig = Rig::viewer();
    rig.connect_viewer().await;

    rig.controller.handle(ControllerEvent::RequestControl).await;
    assert!(matches!(rig.sent().last(), Some(ClientMessage::RequestControl(_))));

    rig.signal(ServerMessage::ControlGranted(sd_proto::signaling::ControlGranted {
        session_id: session(),
        granted: true,
        viewer_id: PeerId::from(VIEWER),
    }))
    .await;
    assert!(rig.controller.has_control());
}

// ----------------------------------------------------------------------------
// Host
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_host_ready_resent_at_most_once() {
    let mut rig = Rig::host(MockPeer::new());
    rig.controller.start().await;

    rig.signal(viewer_ready(VIEWER)).await;
    rig.signal(viewer_ready(VIEWER)).await;
    rig.signal(viewer_ready("viewer-2")).await;

    let sent = rig.sent();
    assert_eq!(sent.len(), 2);
    for message in &sent {
        match message {
            ClientMessage::HostReady(ready) => assert_eq!(ready.viewer_id, Some(PeerId::from(VIEWER))),
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_host_answers_target_viewer_only() {
    let mut rig = Rig::host(MockPeer::new());
    rig.controller.start().await;
    rig.sent();

    rig.signal(offer_from("viewer-2", "v=0\r\ns=other\r\n")).await;
    assert!(rig.sent().is_empty());

    rig.signal(offer_from(VIEWER, "v=0\r\ns=mine\r\n")).await;
    let sent = rig.sent();
    match sent.as_slice() {
        [ClientMessage::Answer(answer)] => {
            assert_eq!(answer.viewer_id, Some(PeerId::from(VIEWER)));
            assert_eq!(answer.sdp["type"], "answer");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(rig.log.count(|c| matches!(c, PeerCall::CreateAnswer)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_host_connected_announces_permission_and_echoes_ping() {
    let mut rig = Rig::host(MockPeer::new());
    rig.controller.start().await;
    rig.signal(offer_from(VIEWER, "v=0\r\n")).await;
    rig.peer_state(PeerConnectionState::Connected).await;

    let data = rig.log.sent_data();
    assert_eq!(data[0].kind, DataKind::ControlPermission { allowed: true });

    rig.controller
        .handle(ControllerEvent::Data(DataMessage::new(DataKind::Ping { seq: 3 }, 77)))
        .await;
    let echoed = rig.log.sent_data().pop().unwrap();
    assert_eq!(echoed, DataMessage::new(DataKind::Pong { seq: 3 }, 77));
}

#[tokio::test(start_paused = true)]
async fn test_host_drops_input_when_control_disabled() {
    let mut rig = Rig::host(MockPeer::new());
    rig.controller.start().await;
    rig.signal(offer_from(VIEWER, "v=0\r\n")).await;
    rig.peer_state(PeerConnectionState::Connected).await;
    rig.app_events();

    rig.controller.handle(ControllerEvent::AllowControl(false)).await;
    let data = rig.log.sent_data();
    assert_eq!(data.last().unwrap().kind, DataKind::ControlPermission { allowed: false });

    rig.controller
        .handle(ControllerEvent::Data(DataMessage::new(DataKind::ReleaseKeys, 1)))
        .await;
    assert!(!rig.app_events().iter().any(|e| matches!(e, AppEvent::Input(_))));
}

#[tokio::test(start_paused = true)]
async fn test_offer_during_backoff_answered_once() {
    let mut rig = Rig::host(MockPeer::new());
    rig.controller.start().await;
    rig.signal(offer_from(VIEWER, "v=0\r\ns=first\r\n")).await;
    rig.peer_state(PeerConnectionState::Connected).await;
    rig.peer_state(PeerConnectionState::Failed).await;
    assert!(matches!(rig.controller.status(), SessionStatus::Reconnecting { .. }));
    rig.sent();

    // The viewer restarted first; its offer waits for our next attempt
    rig.signal(offer_from(VIEWER, "v=0\r\ns=second\r\n")).await;
    assert!(rig.sent().is_empty());

    rig.step_until(|s| matches!(s, SessionStatus::Negotiating { .. })).await;
    let sent = rig.sent();
    assert!(matches!(sent[0], ClientMessage::HostReady(_)));
    assert_eq!(count(&sent, |m| matches!(m, ClientMessage::Answer(_))), 1);

    let prepares: Vec<PeerCall> = rig
        .log
        .calls()
        .into_iter()
        .filter(|c| matches!(c, PeerCall::Prepare { .. }))
        .collect();
    assert_eq!(
        prepares,
        vec![
            PeerCall::Prepare { role: Role::Host, reuse_media: false },
            PeerCall::Prepare { role: Role::Host, reuse_media: true },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_viewer_restart_renegotiates() {
    let mut rig = Rig::host(MockPeer::new());
    rig.controller.start().await;
    rig.signal(offer_from(VIEWER, "v=0\r\n")).await;
    rig.sent();

    rig.signal(viewer_ready(VIEWER)).await;
    assert_eq!(rig.controller.attempt().number, 2);
    assert!(matches!(rig.sent().as_slice(), [ClientMessage::HostReady(_)]));
}

#[tokio::test(start_paused = true)]
async fn test_host_restarts_share_the_reconnect_budget() {
    let mut rig = Rig::host(MockPeer::new());
    rig.controller.start().await;

    // Answer, then the viewer starts over
    async fn answered_then_restarted(rig: &mut Rig) {
        rig.signal(offer_from(VIEWER, "v=0\r\n")).await;
        rig.signal(viewer_ready(VIEWER)).await;
    }

    for n in 1..=5 {
        answered_then_restarted(&mut rig).await;
        assert_eq!(rig.controller.attempt().number, n + 1);
    }

    // Connecting refills the budget
    rig.peer_state(PeerConnectionState::Connected).await;
    for _ in 0..5 {
        answered_then_restarted(&mut rig).await;
    }
    assert_eq!(rig.controller.status(), SessionStatus::Negotiating { attempt: 11 });
    rig.sent();

    answered_then_restarted(&mut rig).await;
    assert_eq!(
        rig.controller.status(),
        SessionStatus::Failed { reason: reasons::NEGOTIATION_FAILED.to_string() }
    );
    let sent = rig.sent();
    assert!(matches!(
        sent.last(),
        Some(ClientMessage::SessionEnd(end)) if end.reason == Some(EndReason::NegotiationFailed)
    ));
    assert_eq!(rig.log.prepares(), 11);
}

#[tokio::test(start_paused = true)]
async fn test_host_capture_cancelled_ends_session() {
    let mut rig = Rig::host(MockPeer::new().with_prepare_failure(TransportError::CaptureCancelled));
    rig.controller.start().await;

    assert_eq!(
        rig.controller.status(),
        SessionStatus::Ended { reason: reasons::ENDED_BY_USER.to_string() }
    );
    assert!(matches!(
        rig.sent().as_slice(),
        [ClientMessage::SessionEnd(end)] if end.reason == Some(EndReason::User)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_slow_prepare_hits_readiness_timeout() {
    let peer = MockPeer::new().with_prepare_delay(Duration::from_secs(30));
    let mut rig = Rig::new(Role::Viewer, peer);

    let started = Instant::now();
    rig.controller.start().await;
    assert_eq!(started.elapsed(), Duration::from_secs(10));
    assert!(matches!(rig.controller.status(), SessionStatus::Reconnecting { attempt: 1, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_run_until_hangup() {
    let rig = Rig::viewer();
    let Rig { controller, _handle: handle, .. } = rig;
    let task = tokio::spawn(controller.run());

    handle.wait_for(|s| matches!(s, SessionStatus::Negotiating { .. })).await.unwrap();
    assert!(handle.hangup());

    let status = task.await.unwrap();
    assert_eq!(status, SessionStatus::Ended { reason: reasons::ENDED_BY_USER.to_string() });
}
