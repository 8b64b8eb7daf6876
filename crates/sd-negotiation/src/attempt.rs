//! One-shot guards for a single negotiation attempt.
//!
//! A fresh [`NegotiationAttempt`] is installed every time the controller
//! (re)starts negotiation, so every guard resets together.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationAttempt {
    pub number: u32,
    offer_sent: bool,
    host_ready_sent: bool,
    host_ready_resent: bool,
    viewer_ready_sent: bool,
    transport_ready: bool,
    remote_description_set: bool,
    answer_sent: bool,
    early_host_ready: bool,
}

fn mark_once(flag: &mut bool) -> bool {
    !std::mem::replace(flag, true)
}

impl NegotiationAttempt {
    pub fn new(number: u32) -> Self {
        Self { number, ..Self::default() }
    }

    /// Start the next attempt. A `host:ready` that arrived while no
    /// transport was prepared still counts for the new attempt.
    pub fn next(&self) -> Self {
        Self {
            early_host_ready: self.early_host_ready,
            ..Self::new(self.number + 1)
        }
    }

    /// True the first time only.
    pub fn try_mark_offer_sent(&mut self) -> bool {
        mark_once(&mut self.offer_sent)
    }

    pub fn try_mark_host_ready_sent(&mut self) -> bool {
        mark_once(&mut self.host_ready_sent)
    }

    pub fn try_mark_host_ready_resent(&mut self) -> bool {
        mark_once(&mut self.host_ready_resent)
    }

    pub fn try_mark_viewer_ready_sent(&mut self) -> bool {
        mark_once(&mut self.viewer_ready_sent)
    }

    pub fn mark_transport_ready(&mut self) {
        self.transport_ready = true;
    }

    /// The peer connection backing this attempt is gone.
    pub fn mark_transport_lost(&mut self) {
        self.transport_ready = false;
    }

    pub fn mark_remote_description_set(&mut self) {
        self.remote_description_set = true;
    }

    pub fn mark_answer_sent(&mut self) {
        self.answer_sent = true;
    }

    pub fn note_early_host_ready(&mut self) {
        self.early_host_ready = true;
    }

    pub fn take_early_host_ready(&mut self) -> bool {
        std::mem::take(&mut self.early_host_ready)
    }

    pub fn offer_sent(&self) -> bool {
        self.offer_sent
    }

    pub fn host_ready_sent(&self) -> bool {
        self.host_ready_sent
    }

    pub fn transport_ready(&self) -> bool {
        self.transport_ready
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn answer_sent(&self) -> bool {
        self.answer_sent
    }
}
