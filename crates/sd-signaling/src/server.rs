use axum::{
    http::{HeaderValue, Method},
    routing::get,
    Router,
};
use std::future::IntoFuture;
use std::{net::SocketAddr, sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::hub::{Hub, HubHandle};
use crate::metrics::SignalingMetrics;

pub struct SignalingServer {
    config: Arc<ServerConfig>,
    metrics: Arc<SignalingMetrics>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    started_at: Instant,
}

impl SignalingServer {
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let metrics = Arc::new(SignalingMetrics::new()?);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            metrics,
            shutdown_tx: Arc::new(shutdown_tx),
            started_at: Instant::now(),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let (hub, handle) = Hub::new(&self.config, Arc::clone(&self.metrics))?;
        tokio::spawn(hub.run(self.shutdown_tx.subscribe()));

        let app = self.router(handle);
        info!("sd-signaling listening on {}", listener.local_addr()?);

        let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(Self::shutdown_signal(
                self.shutdown_tx.subscribe(),
                Arc::clone(&self.shutdown_tx),
            ))
            .into_future();
        tokio::pin!(server);

        let mut draining = self.shutdown_tx.subscribe();
        let drain_limit = self.config.shutdown_timeout();
        tokio::select! {
            result = &mut server => result?,
            _ = async {
                let _ = draining.wait_for(|stopping| *stopping).await;
                tokio::time::sleep(drain_limit).await;
            } => {
                warn!(timeout_secs = drain_limit.as_secs(), "Connections did not drain in time, closing");
            }
        }

        info!("sd-signaling stopped");
        Ok(())
    }

    pub fn router(&self, hub: HubHandle) -> Router {
        let state = AppState {
            hub,
            metrics: Arc::clone(&self.metrics),
            config: Arc::clone(&self.config),
            started_at: self.started_at,
            shutdown: self.shutdown_tx.subscribe(),
        };

        Router::new()
            .route("/ws", get(crate::ws::ws_handler))
            .route("/health", get(crate::api::get_health))
            .route("/metrics", get(crate::api::get_metrics))
            .layer(self.cors_layer())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    fn cors_layer(&self) -> CorsLayer {
        if self.config.cors_origins.is_empty() {
            return CorsLayer::permissive();
        }

        let origins: Vec<HeaderValue> = self
            .config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET])
            .allow_headers(Any)
    }

    async fn shutdown_signal(mut shutdown: watch::Receiver<bool>, notify: Arc<watch::Sender<bool>>) {
        #[cfg(unix)]
        let mut sigterm = {
            use tokio::signal::unix::{signal, SignalKind};
            signal(SignalKind::terminate()).ok()
        };

        tokio::select! {
            _ = async {
                #[cfg(unix)]
                {
                    if let Some(ref mut sigterm) = sigterm {
                        sigterm.recv().await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<()>().await;
                }
            } => {
                info!("Received SIGTERM, starting graceful shutdown");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, starting graceful shutdown");
            }
            _ = shutdown.wait_for(|stopping| *stopping) => {
                info!("Shutdown requested");
            }
        }

        // Tell sockets and the hub to wind down
        notify.send_replace(true);
    }

    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}
