pub mod api;
pub mod config;
pub mod control;
pub mod credentials;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod rate_limit;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod ws;

#[cfg(test)]
mod session_props;

pub use error::SignalingError;
pub use server::SignalingServer;
