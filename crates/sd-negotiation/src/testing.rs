//! Test doubles for the peer transport.

use async_trait::async_trait;
use parking_lot::Mutex;
use sd_proto::{DataMessage, IceCandidate, SessionDescription};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::errors::TransportError;
use crate::transport::{PeerTransport, Role};

/// One call made on a [`MockPeer`].
#[derive(Debug, Clone, PartialEq)]
pub enum PeerCall {
    Prepare { role: Role, reuse_media: bool },
    CreateOffer,
    CreateAnswer,
    SetRemote(SessionDescription),
    AddCandidate(IceCandidate),
    SendData(DataMessage),
    ClosePeer,
    Shutdown,
}

/// Shared view of the calls recorded by a [`MockPeer`].
#[derive(Debug, Clone, Default)]
pub struct MockLog {
    calls: Arc<Mutex<Vec<PeerCall>>>,
}

impl MockLog {
    pub fn calls(&self) -> Vec<PeerCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&PeerCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn prepares(&self) -> usize {
        self.count(|c| matches!(c, PeerCall::Prepare { .. }))
    }

    /// Candidates applied, in order.
    pub fn applied_candidates(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                PeerCall::AddCandidate(candidate) => Some(candidate.candidate.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sent_data(&self) -> Vec<DataMessage> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                PeerCall::SendData(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: PeerCall) {
        self.calls.lock().push(call);
    }
}

/// Scripted peer transport that records every call.
pub struct MockPeer {
    log: MockLog,
    prepare_failures: VecDeque<TransportError>,
    prepare_delay: Duration,
    media_live: bool,
    descriptions: u32,
}

impl MockPeer {
    pub fn new() -> Self {
        Self {
            log: MockLog::default(),
            prepare_failures: VecDeque::new(),
            prepare_delay: Duration::ZERO,
            media_live: false,
            descriptions: 0,
        }
    }

    /// Fail the next `prepare` call with `error`. Stacks.
    pub fn with_prepare_failure(mut self, error: TransportError) -> Self {
        self.prepare_failures.push_back(error);
        self
    }

    /// Make `prepare` take `delay` of (virtual) time.
    pub fn with_prepare_delay(mut self, delay: Duration) -> Self {
        self.prepare_delay = delay;
        self
    }

    pub fn log(&self) -> MockLog {
        self.log.clone()
    }

    fn next_sdp(&mut self, kind: &str) -> String {
        self.descriptions += 1;
        format!("v=0\r\ns=mock-{kind}-{}\r\n", self.descriptions)
    }
}

impl Default for MockPeer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerTransport for MockPeer {
    async fn prepare(&mut self, role: Role, reuse_media: bool) -> Result<(), TransportError> {
        self.log.record(PeerCall::Prepare { role, reuse_media });
        if !self.prepare_delay.is_zero() {
            sleep(self.prepare_delay).await;
        }
        if let Some(error) = self.prepare_failures.pop_front() {
            return Err(error);
        }
        if role == Role::Host {
            self.media_live = true;
        }
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription, TransportError> {
        self.log.record(PeerCall::CreateOffer);
        Ok(SessionDescription::offer(self.next_sdp("offer")))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, TransportError> {
        self.log.record(PeerCall::CreateAnswer);
        Ok(SessionDescription::answer(self.next_sdp("answer")))
    }

    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<(), TransportError> {
        self.log.record(PeerCall::SetRemote(description));
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.log.record(PeerCall::AddCandidate(candidate));
        Ok(())
    }

    async fn send_data(&mut self, message: DataMessage) -> Result<(), TransportError> {
        self.log.record(PeerCall::SendData(message));
        Ok(())
    }

    fn has_live_media(&self) -> bool {
        self.media_live
    }

    async fn close_peer(&mut self) {
        self.log.record(PeerCall::ClosePeer);
    }

    async fn shutdown(&mut self) {
        self.log.record(PeerCall::Shutdown);
        self.media_live = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_prepare_failure() {
        let mut peer = MockPeer::new().with_prepare_failure(TransportError::CaptureCancelled);
        let log = peer.log();

        assert_eq!(peer.prepare(Role::Host, false).await, Err(TransportError::CaptureCancelled));
        assert!(!peer.has_live_media());
        assert_eq!(peer.prepare(Role::Host, false).await, Ok(()));
        assert!(peer.has_live_media());
        assert_eq!(log.prepares(), 2);
    }
}
