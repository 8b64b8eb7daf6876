//! Round-trip probe over the data channel.

use sd_proto::{DataKind, DataMessage};
use std::collections::VecDeque;
use std::time::Duration;

/// Unanswered pings remembered at once.
const MAX_OUTSTANDING: usize = 16;

#[derive(Debug, Default)]
pub struct LatencyProbe {
    next_seq: u64,
    outstanding: VecDeque<u64>,
    last_rtt: Option<Duration>,
}

impl LatencyProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the next ping, stamped with `now_ms`.
    pub fn next_ping(&mut self, now_ms: u64) -> DataMessage {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.outstanding.push_back(seq);
        while self.outstanding.len() > MAX_OUTSTANDING {
            self.outstanding.pop_front();
        }
        DataMessage::new(DataKind::Ping { seq }, now_ms)
    }

    /// Match an echo. Unknown sequence numbers are ignored.
    pub fn on_pong(&mut self, seq: u64, echoed_ms: u64, now_ms: u64) -> Option<Duration> {
        let index = self.outstanding.iter().position(|s| *s == seq)?;
        // Older pings are not going to be answered any more
        self.outstanding.drain(..=index);
        let rtt = Duration::from_millis(now_ms.saturating_sub(echoed_ms));
        self.last_rtt = Some(rtt);
        Some(rtt)
    }

    pub fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }

    pub fn reset(&mut self) {
        self.outstanding.clear();
    }
}
