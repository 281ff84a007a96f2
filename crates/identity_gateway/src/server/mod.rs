//! Identity Gateway HTTP Server
//!
//! Routes the OAuth authorization surface and the authenticated proxy
//! paths. All handlers share one [`AppState`].

pub mod oauth_handlers;
pub mod proxy;

use axum::{
    middleware,
    routing::{any, get, post},
    Router as AxumRouter,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::approval::ApprovalCookies;
use crate::auth::{GitHubUserClient, UpstreamClient, UserInfoClient};
use crate::config::GatewayConfig;
use crate::error::panic_response;
use crate::provider::{InMemoryProvider, OAuthProvider};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    /// Gateway-side OAuth provider (client registry, codes, bearer tokens)
    pub provider: Arc<dyn OAuthProvider>,
    pub upstream: UpstreamClient,
    pub users: Arc<dyn UserInfoClient>,
    /// `None` when no cookie secret is configured
    pub approvals: Option<ApprovalCookies>,
    /// Backend client; never follows redirects
    pub backend: reqwest::Client,
}

impl AppState {
    /// State with the in-memory provider and the GitHub user client
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let provider = Arc::new(InMemoryProvider::new(config.clients.clone(), config.access_token_ttl));
        let users = Arc::new(GitHubUserClient::new(
            config.upstream.api_url.clone(),
            config.upstream.timeout,
        )?);
        Self::with_collaborators(config, provider, users)
    }

    pub fn with_collaborators(
        config: GatewayConfig,
        provider: Arc<dyn OAuthProvider>,
        users: Arc<dyn UserInfoClient>,
    ) -> anyhow::Result<Self> {
        let upstream = UpstreamClient::new(config.upstream.clone())?;

        let approvals = match config.cookie_secret.as_deref() {
            Some(secret) => Some(
                ApprovalCookies::new(secret)
                    .map_err(|e| anyhow::anyhow!("Invalid COOKIE_ENCRYPTION_KEY: {}", e))?,
            ),
            None => None,
        };

        let backend = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            provider,
            upstream,
            users,
            approvals,
            backend,
        })
    }
}

/// Build the gateway router
///
/// - GET  /authorize - Start authorization (consent page or GitHub redirect)
/// - POST /authorize - Consent submission
/// - GET  /callback - GitHub callback
/// - POST /token - Exchange a gateway authorization code for a bearer token
/// - GET  /.well-known/oauth-authorization-server - Server metadata
/// - ANY  <proxy paths> - Forwarded to the backend with trust headers
pub fn build_router(state: Arc<AppState>) -> AxumRouter {
    let token_api: AxumRouter<Arc<AppState>> = AxumRouter::new()
        .route("/token", post(oauth_handlers::token))
        .route(
            "/.well-known/oauth-authorization-server",
            get(oauth_handlers::authorization_server_metadata),
        )
        .layer(CorsLayer::permissive());

    let mut proxied: AxumRouter<Arc<AppState>> = AxumRouter::new();
    for prefix in &state.config.proxy_paths {
        proxied = proxied
            .route(prefix, any(proxy::proxy_to_backend))
            .route(&format!("{}/*rest", prefix), any(proxy::proxy_to_backend));
    }
    let proxied =
        proxied.route_layer(middleware::from_fn_with_state(state.clone(), proxy::attach_principal));

    AxumRouter::new()
        .route(
            "/authorize",
            get(oauth_handlers::authorize).post(oauth_handlers::approve),
        )
        .route("/callback", get(oauth_handlers::callback))
        .merge(token_api)
        .merge(proxied)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the Identity Gateway HTTP server
///
/// # Errors
/// Returns error if client construction or binding fails
pub async fn start_server(config: GatewayConfig, host: &str, port: u16) -> anyhow::Result<()> {
    if config.service_token.is_none() {
        warn!("[WARN] SERVICE_TOKEN_ID/SERVICE_TOKEN_SECRET not set - backend authentication will fail");
    }
    if config.cookie_secret.is_none() {
        warn!("[WARN] COOKIE_ENCRYPTION_KEY not set - consent approvals will be rejected");
    }
    if config.clients.is_empty() {
        warn!("[WARN] No OAuth clients registered (OAUTH_CLIENTS)");
    }

    let state = Arc::new(AppState::new(config)?);
    info!("[OK] {} OAuth clients registered", state.config.clients.len());
    info!("[OK] Backend: {}", state.config.backend_url);
    info!("[OK] Callback URL: {}", state.config.callback_url());

    let app = build_router(state.clone());

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;

    info!("[INFO] Identity Gateway listening on {}", addr);
    info!("[INFO] Available endpoints:");
    info!("  GET    /authorize          - Start authorization");
    info!("  POST   /authorize          - Submit consent");
    info!("  GET    /callback           - GitHub OAuth callback");
    info!("  POST   /token              - Exchange code for bearer token");
    for prefix in &state.config.proxy_paths {
        info!("  ANY    {:<20}- Proxied to backend", prefix);
    }

    axum::serve(listener, app).await?;

    Ok(())
}
