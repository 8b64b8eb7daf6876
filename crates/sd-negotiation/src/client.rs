//! WebSocket connection to the signaling relay.
//!
//! The connection task reconnects with capped exponential backoff after the
//! socket drops. The last `host:register` sent through the client is replayed
//! on every new socket, and `host:heartbeat` is sent while registered.

use futures_util::{Sink, SinkExt, StreamExt};
use sd_proto::signaling::Credentials;
use sd_proto::{ClientMessage, ServerMessage};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::config::SignalingClientConfig;
use crate::errors::NegotiationError;

type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Relay connection. Outgoing frames go through an unbounded queue that
/// survives reconnects; relay frames arrive on the receiver returned by
/// [`SignalingClient::connect`].
pub struct SignalingClient {
    outgoing: mpsc::UnboundedSender<ClientMessage>,
    connected: watch::Receiver<bool>,
    close: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SignalingClient {
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerMessage>), NegotiationError> {
        Self::connect_with(url, SignalingClientConfig::default()).await
    }

    /// The first connection must succeed; later drops are retried.
    pub async fn connect_with(
        url: &str,
        config: SignalingClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerMessage>), NegotiationError> {
        let stream = open(url).await?;

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (incoming, incoming_rx) = mpsc::unbounded_channel::<ServerMessage>();
        let (connected_tx, connected) = watch::channel(true);
        let (close, close_rx) = oneshot::channel::<()>();

        let link = Link {
            url: url.to_string(),
            policy: ReconnectPolicy::new(&config.reconnect),
            heartbeat: config.heartbeat_interval(),
            outgoing: outgoing_rx,
            incoming,
            connected: connected_tx,
            registration: None,
        };
        let task = tokio::spawn(link.run(stream, close_rx));

        Ok((Self { outgoing, connected, close: Some(close), task }, incoming_rx))
    }

    /// Queue for controllers; implements [`SignalSink`](crate::transport::SignalSink).
    pub fn sender(&self) -> mpsc::UnboundedSender<ClientMessage> {
        self.outgoing.clone()
    }

    pub fn send(&self, message: ClientMessage) -> Result<(), NegotiationError> {
        self.outgoing.send(message).map_err(|_| NegotiationError::SignalingClosed)
    }

    /// Whether a relay socket is currently open.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Follows the relay socket going down and coming back.
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    /// Close the socket and wait for the connection task to finish.
    pub async fn close(mut self) {
        if let Some(close) = self.close.take() {
            let _ = close.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        if self.close.is_some() {
            self.task.abort();
        }
    }
}

async fn open(url: &str) -> Result<RelayStream, NegotiationError> {
    let (stream, _) = connect_async(url)
        .await
        .map_err(|e| NegotiationError::Signaling(format!("connect {url}: {e}")))?;
    info!(url, "Connected to signaling relay");
    Ok(stream)
}

enum Ended {
    /// Closed on request or nobody is listening any more.
    Closed,
    Lost,
}

struct Link {
    url: String,
    policy: ReconnectPolicy,
    heartbeat: Option<Duration>,
    outgoing: mpsc::UnboundedReceiver<ClientMessage>,
    incoming: mpsc::UnboundedSender<ServerMessage>,
    connected: watch::Sender<bool>,
    registration: Option<Credentials>,
}

impl Link {
    async fn run(mut self, mut stream: RelayStream, mut close_rx: oneshot::Receiver<()>) {
        loop {
            self.connected.send_replace(true);
            let ended = self.pump(stream, &mut close_rx).await;
            self.connected.send_replace(false);

            if let Ended::Closed = ended {
                break;
            }
            match self.reconnect(&mut close_rx).await {
                Some(next) => stream = next,
                None => break,
            }
        }
        debug!(url = %self.url, "Signaling connection task finished");
    }

    async fn pump(&mut self, stream: RelayStream, close_rx: &mut oneshot::Receiver<()>) -> Ended {
        let (mut sink, mut source) = stream.split();

        if let Some(creds) = self.registration.clone() {
            info!(host_id = %creds.host_id, "Registering again after reconnect");
            if !write(&mut sink, &ClientMessage::HostRegister(creds)).await {
                return Ended::Lost;
            }
        }

        let period = self.heartbeat.unwrap_or(Duration::from_secs(3600));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = self.outgoing.recv() => {
                    let Some(message) = message else { return Ended::Closed };
                    match &message {
                        ClientMessage::HostRegister(creds) => self.registration = Some(creds.clone()),
                        ClientMessage::HostUnregister {} => self.registration = None,
                        _ => {}
                    }
                    if !write(&mut sink, &message).await {
                        return Ended::Lost;
                    }
                }
                frame = source.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => match sd_proto::decode_server(&text) {
                            Ok(message) => {
                                if self.incoming.send(message).is_err() {
                                    return Ended::Closed;
                                }
                            }
                            Err(e) => warn!(error = %e, "Unparseable relay frame"),
                        },
                        Some(Ok(Message::Close(_))) | None => return Ended::Lost,
                        // tungstenite answers pings on the next write
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(error = %e, "Relay read failed");
                            return Ended::Lost;
                        }
                    }
                }
                _ = heartbeat.tick(), if self.heartbeat.is_some() && self.registration.is_some() => {
                    if !write(&mut sink, &ClientMessage::HostHeartbeat {}).await {
                        return Ended::Lost;
                    }
                }
                _ = &mut *close_rx => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ended::Closed;
                }
            }
        }
    }

    async fn reconnect(&mut self, close_rx: &mut oneshot::Receiver<()>) -> Option<RelayStream> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(delay) = self.policy.delay_for(attempt) else {
                warn!(url = %self.url, attempts = attempt - 1, "Giving up on signaling relay");
                return None;
            };
            info!(url = %self.url, attempt, delay_ms = delay.as_millis() as u64, "Signaling connection lost, reconnecting");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut *close_rx => return None,
            }
            match open(&self.url).await {
                Ok(stream) => return Some(stream),
                Err(e) => debug!(error = %e, attempt, "Reconnect failed"),
            }
        }
    }
}

async fn write<S>(sink: &mut S, message: &ClientMessage) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = match sd_proto::encode(message) {
        Ok(text) => text,
        Err(e) => {
            warn!(event = message.event(), error = %e, "Failed to encode frame");
            return true;
        }
    };
    match sink.send(Message::Text(text)).await {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "Relay write failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reconnect_delays_double_to_cap() {
        let policy = ReconnectPolicy::new(&SignalingClientConfig::default().reconnect);
        let delays: Vec<u64> = (1..=6).map(|n| policy.delay_for(n).unwrap().as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 30, 30]);
        assert_eq!(policy.delay_for(1_000), Some(Duration::from_secs(30)));
    }
}
