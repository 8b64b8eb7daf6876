use prometheus::{
    register_counter_with_registry, register_gauge_with_registry, Counter, Encoder, Gauge, Registry,
    TextEncoder,
};
use std::sync::Arc;

use crate::hub::HubStatus;

pub struct SignalingMetrics {
    pub connected_peers: Gauge,
    pub registered_hosts: Gauge,
    pub active_sessions: Gauge,
    pub pending_sessions: Gauge,
    pub auth_failures: Counter,
    pub rate_limit_rejections: Counter,
    pub sessions_started: Counter,
    pub sessions_ended: Counter,
    pub signals_relayed: Counter,
    pub slow_consumers_dropped: Counter,
    pub registry: Arc<Registry>,
}

impl SignalingMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Arc::new(Registry::new());

        let connected_peers = register_gauge_with_registry!(
            "sd_signaling_connected_peers",
            "Number of open signaling connections",
            registry
        )?;

        let registered_hosts = register_gauge_with_registry!(
            "sd_signaling_registered_hosts",
            "Number of hosts currently registered",
            registry
        )?;

        let active_sessions = register_gauge_with_registry!(
            "sd_signaling_active_sessions",
            "Number of active sessions",
            registry
        )?;

        let pending_sessions = register_gauge_with_registry!(
            "sd_signaling_pending_sessions",
            "Number of sessions awaiting host permission",
            registry
        )?;

        let auth_failures = register_counter_with_registry!(
            "sd_signaling_auth_failures_total",
            "Viewer authentications rejected for bad credentials",
            registry
        )?;

        let rate_limit_rejections = register_counter_with_registry!(
            "sd_signaling_rate_limit_rejections_total",
            "Viewer authentications rejected by the rate limiter",
            registry
        )?;

        let sessions_started = register_counter_with_registry!(
            "sd_signaling_sessions_started_total",
            "Viewers admitted to a session",
            registry
        )?;

        let sessions_ended = register_counter_with_registry!(
            "sd_signaling_sessions_ended_total",
            "Active sessions torn down",
            registry
        )?;

        let signals_relayed = register_counter_with_registry!(
            "sd_signaling_signals_relayed_total",
            "Readiness, SDP and ICE frames forwarded",
            registry
        )?;

        let slow_consumers_dropped = register_counter_with_registry!(
            "sd_signaling_slow_consumers_dropped_total",
            "Connections closed because their outbox filled up",
            registry
        )?;

        Ok(Self {
            connected_peers,
            registered_hosts,
            active_sessions,
            pending_sessions,
            auth_failures,
            rate_limit_rejections,
            sessions_started,
            sessions_ended,
            signals_relayed,
            slow_consumers_dropped,
            registry,
        })
    }

    pub fn observe(&self, status: &HubStatus) {
        self.connected_peers.set(status.connected_peers as f64);
        self.registered_hosts.set(status.connected_hosts as f64);
        self.active_sessions.set(status.active_sessions as f64);
        self.pending_sessions.set(status.pending_sessions as f64);
    }

    pub fn export_prometheus(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
