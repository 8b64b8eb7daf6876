//! Relay plus two negotiation controllers over real WebSocket connections.

use sd_negotiation::testing::{MockLog, MockPeer, PeerCall};
use sd_negotiation::{
    ControllerHandle, NegotiationConfig, PeerConnectionState, Role, SessionController, SessionStatus,
    SignalingClient,
};
use sd_proto::signaling::{Credentials, PermissionResponse};
use sd_proto::{reasons, ClientMessage, PeerId, ServerMessage, SessionId};
use sd_signaling::config::ServerConfig;
use sd_signaling::credentials::PasswordHashConfig;
use sd_signaling::SignalingServer;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const HOST_ID: &str = "123456789";
const PASSWORD: &str = "correct horse";
const WAIT: Duration = Duration::from_secs(5);

async fn start_server() -> (Arc<SignalingServer>, String) {
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        password_hash: PasswordHashConfig { memory_kib: 1024, iterations: 1, parallelism: 1 },
        ..ServerConfig::default()
    };
    let server = Arc::new(SignalingServer::new(config).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let serving = Arc::clone(&server);
    tokio::spawn(async move { serving.serve(listener).await });
    (server, format!("ws://{addr}/ws"))
}

async fn next_matching(
    rx: &mut mpsc::UnboundedReceiver<ServerMessage>,
    pred: impl Fn(&ServerMessage) -> bool,
) -> ServerMessage {
    timeout(WAIT, async {
        loop {
            let message = rx.recv().await.expect("relay connection closed");
            if pred(&message) {
                return message;
            }
        }
    })
    .await
    .expect("timed out waiting for relay frame")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

/// Forward relay frames into a controller.
fn pump(mut rx: mpsc::UnboundedReceiver<ServerMessage>, handle: ControllerHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if !handle.signal(message) {
                break;
            }
        }
    })
}

struct Started {
    host: SignalingClient,
    host_rx: mpsc::UnboundedReceiver<ServerMessage>,
    viewer: SignalingClient,
    viewer_rx: mpsc::UnboundedReceiver<ServerMessage>,
    session_id: SessionId,
    viewer_id: PeerId,
}

/// Register a host, authenticate a viewer and grant the session.
async fn start_session(url: &str) -> Started {
    let (host, mut host_rx) = SignalingClient::connect(url).await.unwrap();
    host.send(ClientMessage::HostRegister(Credentials::new(HOST_ID, PASSWORD))).unwrap();
    let registered = next_matching(&mut host_rx, |m| matches!(m, ServerMessage::HostRegistered(_))).await;
    assert!(matches!(registered, ServerMessage::HostRegistered(r) if r.success));

    let (viewer, mut viewer_rx) = SignalingClient::connect(url).await.unwrap();

    viewer.send(ClientMessage::ViewerAuthenticate(Credentials::new(HOST_ID, "wrong"))).unwrap();
    match next_matching(&mut viewer_rx, |m| matches!(m, ServerMessage::ViewerAuthenticated(_))).await {
        ServerMessage::ViewerAuthenticated(auth) => {
            assert!(!auth.success);
            assert_eq!(auth.error.as_deref(), Some(reasons::INVALID_CREDENTIALS));
        }
        other => panic!("unexpected {other:?}"),
    }

    viewer.send(ClientMessage::ViewerAuthenticate(Credentials::new(HOST_ID, PASSWORD))).unwrap();
    let session_id = match next_matching(&mut host_rx, |m| matches!(m, ServerMessage::PermissionRequest(_))).await {
        ServerMessage::PermissionRequest(request) => {
            assert_eq!(request.viewer_source_addr, "127.0.0.1");
            request.session_id
        }
        other => panic!("unexpected {other:?}"),
    };
    match next_matching(&mut viewer_rx, |m| matches!(m, ServerMessage::ViewerAuthenticated(_))).await {
        ServerMessage::ViewerAuthenticated(auth) => {
            assert!(auth.success);
            assert_eq!(auth.session_id.as_ref(), Some(&session_id));
        }
        other => panic!("unexpected {other:?}"),
    }

    host.send(ClientMessage::PermissionResponse(PermissionResponse {
        session_id: session_id.clone(),
        granted: true,
    }))
    .unwrap();

    let viewer_id = match next_matching(&mut host_rx, |m| matches!(m, ServerMessage::SessionStarted(_))).await {
        ServerMessage::SessionStarted(started) => started.viewer_id.expect("host copy names the viewer"),
        other => panic!("unexpected {other:?}"),
    };
    match next_matching(&mut viewer_rx, |m| matches!(m, ServerMessage::SessionStarted(_))).await {
        ServerMessage::SessionStarted(started) => assert_eq!(started.session_id, session_id),
        other => panic!("unexpected {other:?}"),
    }

    Started { host, host_rx, viewer, viewer_rx, session_id, viewer_id }
}

struct Party {
    handle: ControllerHandle,
    log: MockLog,
    task: JoinHandle<SessionStatus>,
}

fn spawn_party(
    role: Role,
    session_id: &SessionId,
    client: &SignalingClient,
    rx: mpsc::UnboundedReceiver<ServerMessage>,
    target_viewer: Option<PeerId>,
) -> Party {
    let peer = MockPeer::new();
    let log = peer.log();
    let (controller, handle, _app) =
        SessionController::new(role, session_id.clone(), NegotiationConfig::default(), peer, client.sender());
    let controller = match target_viewer {
        Some(viewer) => controller.with_target_viewer(viewer),
        None => controller,
    };
    let task = tokio::spawn(controller.run());
    pump(rx, handle.clone());
    Party { handle, log, task }
}

async fn finished(party: Party) -> SessionStatus {
    timeout(WAIT, party.task).await.expect("controller did not finish").unwrap()
}

#[tokio::test]
async fn test_host_and_viewer_negotiate_then_host_stops_sharing() {
    let (server, url) = start_server().await;
    let started = start_session(&url).await;

    let host = spawn_party(
        Role::Host,
        &started.session_id,
        &started.host,
        started.host_rx,
        Some(started.viewer_id.clone()),
    );
    let viewer = spawn_party(Role::Viewer, &started.session_id, &started.viewer, started.viewer_rx, None);

    // Offer travels viewer -> host, answer host -> viewer
    wait_until(|| {
        host.log.count(|c| matches!(c, PeerCall::CreateAnswer)) == 1
            && viewer.log.count(|c| matches!(c, PeerCall::SetRemote(_))) == 1
    })
    .await;
    assert_eq!(viewer.log.count(|c| matches!(c, PeerCall::CreateOffer)), 1);

    host.handle.peer_state(PeerConnectionState::Connected);
    viewer.handle.peer_state(PeerConnectionState::Connected);
    for party in [&host, &viewer] {
        let status = timeout(WAIT, party.handle.wait_for(|s| *s == SessionStatus::Connected)).await.unwrap();
        assert_eq!(status, Some(SessionStatus::Connected));
    }

    started.host.send(ClientMessage::HostUnregister {}).unwrap();

    let stopped = SessionStatus::Ended { reason: reasons::HOST_STOPPED_SHARING.to_string() };
    assert_eq!(finished(viewer).await, stopped);
    assert_eq!(finished(host).await, stopped);

    server.shutdown();
}

#[tokio::test]
async fn test_viewer_told_when_host_connection_drops() {
    let (server, url) = start_server().await;
    let started = start_session(&url).await;

    let viewer = spawn_party(Role::Viewer, &started.session_id, &started.viewer, started.viewer_rx, None);
    timeout(WAIT, viewer.handle.wait_for(|s| matches!(s, SessionStatus::Negotiating { .. })))
        .await
        .unwrap();

    drop(started.host_rx);
    started.host.close().await;

    assert_eq!(
        finished(viewer).await,
        SessionStatus::Ended { reason: reasons::HOST_DISCONNECTED.to_string() }
    );

    server.shutdown();
}
