use sd_signaling::config::ServerConfig;
use sd_signaling::SignalingServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = if let Ok(path) = std::env::var("SD_CONFIG_PATH") {
        ServerConfig::from_toml(path)?
    } else {
        ServerConfig::from_env()?
    };

    let server = SignalingServer::new(config)?;
    server.start().await?;

    Ok(())
}
