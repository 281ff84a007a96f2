//! Gateway configuration
//!
//! Built once at process start and shared by reference with every handler.
//! Secrets live here and nowhere else; `Debug` output redacts them.

use std::fmt;
use std::time::Duration;

use crate::provider::ClientRecord;

pub const DEFAULT_BACKEND_URL: &str = "https://docker-mcp-internal.rainforest.tools";
pub const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
pub const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// Scope requested from GitHub; only the profile is needed
pub const UPSTREAM_SCOPE: &str = "read:user";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Upstream identity provider (GitHub OAuth app) settings
#[derive(Clone)]
pub struct UpstreamConfig {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub api_url: String,
    pub scope: String,
    pub timeout: Duration,
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("api_url", &self.api_url)
            .field("scope", &self.scope)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Service-to-service credentials presented to the backend's access layer
#[derive(Clone)]
pub struct ServiceToken {
    pub id: String,
    pub secret: String,
}

impl fmt::Debug for ServiceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceToken")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Static metadata shown on the consent page
#[derive(Debug, Clone)]
pub struct ServerMetadata {
    pub name: String,
    pub description: String,
    pub logo: Option<String>,
}

impl Default for ServerMetadata {
    fn default() -> Self {
        Self {
            name: "Docker MCP Gateway".to_string(),
            description: "Docker MCP Gateway with GitHub OAuth authentication. Provides secure access to Docker containers, images, networks, and volumes via MCP tools.".to_string(),
            logo: Some("https://avatars.githubusercontent.com/u/5429470?s=200&v=4".to_string()),
        }
    }
}

#[derive(Clone)]
pub struct GatewayConfig {
    /// Externally visible origin of this gateway, without trailing slash
    pub public_url: String,
    pub upstream: UpstreamConfig,
    /// HMAC key for the approval cookie; POST /authorize refuses to run without it
    pub cookie_secret: Option<String>,
    pub service_token: Option<ServiceToken>,
    /// Private backend origin, without trailing slash
    pub backend_url: String,
    pub backend_timeout: Duration,
    pub max_proxy_body_bytes: usize,
    pub proxy_paths: Vec<String>,
    pub access_token_ttl: Duration,
    pub server: ServerMetadata,
    pub clients: Vec<ClientRecord>,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("public_url", &self.public_url)
            .field("upstream", &self.upstream)
            .field("cookie_secret", &self.cookie_secret.as_ref().map(|_| "<redacted>"))
            .field("service_token", &self.service_token)
            .field("backend_url", &self.backend_url)
            .field("backend_timeout", &self.backend_timeout)
            .field("max_proxy_body_bytes", &self.max_proxy_body_bytes)
            .field("proxy_paths", &self.proxy_paths)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("server", &self.server)
            .field("clients", &self.clients.len())
            .finish()
    }
}

impl GatewayConfig {
    /// Load configuration from process environment variables
    ///
    /// Requires `GITHUB_CLIENT_ID` and `GITHUB_CLIENT_SECRET`. Everything else
    /// has a default. See the crate README table for the full list.
    pub fn from_env(host: &str, port: u16) -> Result<Self, ConfigError> {
        Self::from_lookup(host, port, |name| std::env::var(name).ok())
    }

    /// Same as [`GatewayConfig::from_env`] but reading variables through `lookup`
    pub fn from_lookup<F>(host: &str, port: u16, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let client_id = var("GITHUB_CLIENT_ID").ok_or(ConfigError::Missing("GITHUB_CLIENT_ID"))?;
        let client_secret =
            var("GITHUB_CLIENT_SECRET").ok_or(ConfigError::Missing("GITHUB_CLIENT_SECRET"))?;

        let upstream = UpstreamConfig {
            client_id,
            client_secret,
            authorize_url: var("GITHUB_AUTHORIZE_URL").unwrap_or_else(|| GITHUB_AUTHORIZE_URL.to_string()),
            token_url: var("GITHUB_TOKEN_URL").unwrap_or_else(|| GITHUB_TOKEN_URL.to_string()),
            api_url: trim_origin(var("GITHUB_API_URL").unwrap_or_else(|| GITHUB_API_URL.to_string())),
            scope: UPSTREAM_SCOPE.to_string(),
            timeout: Duration::from_secs(parse_number(&var, "UPSTREAM_TIMEOUT_SECS", 10)?),
        };

        let service_token = match (var("SERVICE_TOKEN_ID"), var("SERVICE_TOKEN_SECRET")) {
            (Some(id), Some(secret)) => Some(ServiceToken { id, secret }),
            _ => None,
        };

        let backend_url = trim_origin(var("BACKEND_URL").unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()));
        url::Url::parse(&backend_url).map_err(|e| ConfigError::Invalid {
            name: "BACKEND_URL",
            reason: e.to_string(),
        })?;

        let public_url = trim_origin(
            var("GATEWAY_PUBLIC_URL").unwrap_or_else(|| format!("http://{}:{}", host, port)),
        );
        url::Url::parse(&public_url).map_err(|e| ConfigError::Invalid {
            name: "GATEWAY_PUBLIC_URL",
            reason: e.to_string(),
        })?;

        let clients = match var("OAUTH_CLIENTS") {
            Some(raw) => serde_json::from_str::<Vec<ClientRecord>>(&raw).map_err(|e| {
                ConfigError::Invalid {
                    name: "OAUTH_CLIENTS",
                    reason: e.to_string(),
                }
            })?,
            None => Vec::new(),
        };

        let max_body = parse_number(&var, "MAX_PROXY_BODY_BYTES", 10 * 1024 * 1024)?;

        Ok(Self {
            public_url,
            upstream,
            cookie_secret: var("COOKIE_ENCRYPTION_KEY"),
            service_token,
            backend_url,
            backend_timeout: Duration::from_secs(parse_number(&var, "BACKEND_TIMEOUT_SECS", 30)?),
            max_proxy_body_bytes: usize::try_from(max_body).map_err(|e| ConfigError::Invalid {
                name: "MAX_PROXY_BODY_BYTES",
                reason: e.to_string(),
            })?,
            proxy_paths: vec!["/sse".to_string(), "/mcp".to_string()],
            access_token_ttl: Duration::from_secs(parse_number(&var, "ACCESS_TOKEN_TTL_SECS", 3600)?),
            server: ServerMetadata::default(),
            clients,
        })
    }

    /// Redirect URI registered with GitHub for this gateway
    pub fn callback_url(&self) -> String {
        format!("{}/callback", self.public_url)
    }
}

fn trim_origin(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn parse_number<F>(var: &F, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
