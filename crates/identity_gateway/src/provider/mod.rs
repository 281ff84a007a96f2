//! Gateway-side OAuth provider
//!
//! Parses third-party authorization requests, knows the registered clients,
//! and mints the gateway's own codes and bearer tokens once GitHub has
//! vouched for the user. Handlers only see the [`OAuthProvider`] trait.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auth::{AuthRequest, Principal};

pub use memory::InMemoryProvider;

/// A registered OAuth client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub client_id: String,
    #[serde(default, skip_serializing)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub client_uri: Option<String>,
    #[serde(default)]
    pub logo_uri: Option<String>,
    #[serde(default)]
    pub policy_uri: Option<String>,
    #[serde(default)]
    pub tos_uri: Option<String>,
    #[serde(default)]
    pub contacts: Vec<String>,
}

impl ClientRecord {
    pub fn display_name(&self) -> &str {
        self.client_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.client_id)
    }
}

/// Input to [`OAuthProvider::complete_authorization`]
#[derive(Debug, Clone)]
pub struct CompleteAuthorization {
    pub request: AuthRequest,
    pub user_id: String,
    pub scope: Vec<String>,
    pub metadata: serde_json::Value,
    pub props: Principal,
}

#[derive(Debug, Clone)]
pub struct CompletedAuthorization {
    /// Where to send the browser: the client's redirect URI with a fresh code
    pub redirect_to: String,
}

/// `POST /token` form body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code_verifier: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub scope: String,
}

/// Closed set of provider failures; handlers map each variant to a status
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid redirect URI: {0}")]
    InvalidRedirectUri(String),

    #[error("Invalid client: {0}")]
    InvalidClient(String),

    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    #[error("Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    #[error("Provider error: {0}")]
    Internal(String),
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Parse the query string of `GET /authorize`
    ///
    /// An absent `client_id` is not an error here; callers check it.
    async fn parse_auth_request(&self, query: &str) -> Result<AuthRequest, ProviderError>;

    async fn lookup_client(&self, client_id: &str) -> Result<Option<ClientRecord>, ProviderError>;

    /// Issue an authorization code for `completion.request`'s client
    async fn complete_authorization(
        &self,
        completion: CompleteAuthorization,
    ) -> Result<CompletedAuthorization, ProviderError>;

    async fn exchange_authorization_code(&self, request: TokenRequest) -> Result<TokenResponse, ProviderError>;

    /// Principal behind a gateway bearer token, if it is valid
    async fn resolve_token(&self, bearer: &str) -> Option<Principal>;
}
