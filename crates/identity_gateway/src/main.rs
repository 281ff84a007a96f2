// Identity Gateway Server
//
// GitHub OAuth front door and trust-header proxy for the private MCP backend.
// Configuration comes from the environment; host and port from arguments.

use identity_gateway::{start_server, GatewayConfig};
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let host = args.get(1).map(|s| s.as_str()).unwrap_or("127.0.0.1");
    let port = args.get(2)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(8787);

    let config = GatewayConfig::from_env(host, port)?;
    tracing::info!("[OK] GitHub OAuth app configured: {}", config.upstream.client_id);
    tracing::info!("[OK] Public URL: {}", config.public_url);

    start_server(config, host, port).await?;

    Ok(())
}
