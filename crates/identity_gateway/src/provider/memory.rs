use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

use super::{
    ClientRecord, CompleteAuthorization, CompletedAuthorization, OAuthProvider, ProviderError,
    TokenRequest, TokenResponse,
};
use crate::auth::{AuthRequest, Principal};

/// Lifetime of an issued authorization code
const CODE_TTL_SECS: i64 = 600;

#[derive(Debug, Clone)]
struct PendingGrant {
    client_id: String,
    redirect_uri: String,
    scope: Vec<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    principal: Principal,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct IssuedToken {
    principal: Principal,
    expires_at: DateTime<Utc>,
}

/// Provider with statically registered clients and process-local grants
///
/// Codes are single-use; tokens are opaque random strings with a fixed TTL.
/// Nothing survives a restart.
pub struct InMemoryProvider {
    clients: HashMap<String, ClientRecord>,
    grants: DashMap<String, PendingGrant>,
    tokens: DashMap<String, IssuedToken>,
    token_ttl: Duration,
}

impl InMemoryProvider {
    pub fn new(clients: Vec<ClientRecord>, token_ttl: Duration) -> Self {
        Self {
            clients: clients
                .into_iter()
                .map(|client| (client.client_id.clone(), client))
                .collect(),
            grants: DashMap::new(),
            tokens: DashMap::new(),
            token_ttl,
        }
    }

    fn client(&self, client_id: &str) -> Result<&ClientRecord, ProviderError> {
        self.clients
            .get(client_id)
            .ok_or_else(|| ProviderError::InvalidClient(format!("Client '{}' is not registered", client_id)))
    }

    fn purge_expired(&self) {
        let now = Utc::now();
        self.grants.retain(|_, grant| grant.expires_at > now);
        self.tokens.retain(|_, token| token.expires_at > now);
    }
}

/// 32 random bytes, base64url
fn random_token() -> String {
    let mut rng = rand::thread_rng();
    let random_bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&random_bytes)
}

fn verify_pkce(challenge: &str, method: Option<&str>, verifier: &str) -> bool {
    match method.unwrap_or("plain") {
        "S256" => {
            let mut hasher = Sha256::new();
            hasher.update(verifier.as_bytes());
            URL_SAFE_NO_PAD.encode(hasher.finalize()) == challenge
        }
        "plain" => verifier == challenge,
        _ => false,
    }
}

#[async_trait]
impl OAuthProvider for InMemoryProvider {
    async fn parse_auth_request(&self, query: &str) -> Result<AuthRequest, ProviderError> {
        let params: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        let param = |name: &str| params.get(name).map(|v| v.trim().to_string()).unwrap_or_default();

        let mut request = AuthRequest {
            response_type: param("response_type"),
            client_id: param("client_id"),
            redirect_uri: param("redirect_uri"),
            scope: param("scope").split_whitespace().map(str::to_string).collect(),
            state: params.get("state").cloned().unwrap_or_default(),
            code_challenge: Some(param("code_challenge")).filter(|c| !c.is_empty()),
            code_challenge_method: Some(param("code_challenge_method")).filter(|m| !m.is_empty()),
        };

        if request.client_id.is_empty() {
            return Ok(request);
        }

        if request.response_type.is_empty() {
            request.response_type = "code".to_string();
        } else if request.response_type != "code" {
            return Err(ProviderError::InvalidRequest(format!(
                "Unsupported response_type '{}'",
                request.response_type
            )));
        }

        let client = self.client(&request.client_id)?;

        if request.redirect_uri.is_empty() {
            match client.redirect_uris.as_slice() {
                [only] => request.redirect_uri = only.clone(),
                _ => return Err(ProviderError::InvalidRequest("redirect_uri is required".to_string())),
            }
        } else if !client.redirect_uris.iter().any(|uri| uri == &request.redirect_uri) {
            return Err(ProviderError::InvalidRedirectUri(format!(
                "'{}' is not registered for client '{}'",
                request.redirect_uri, request.client_id
            )));
        }

        if request.code_challenge.is_some() {
            let method = request
                .code_challenge_method
                .get_or_insert_with(|| "plain".to_string())
                .as_str();
            if method != "S256" && method != "plain" {
                return Err(ProviderError::InvalidRequest(format!(
                    "Unsupported code_challenge_method '{}'",
                    method
                )));
            }
        }

        Ok(request)
    }

    async fn lookup_client(&self, client_id: &str) -> Result<Option<ClientRecord>, ProviderError> {
        Ok(self.clients.get(client_id).cloned())
    }

    async fn complete_authorization(
        &self,
        completion: CompleteAuthorization,
    ) -> Result<CompletedAuthorization, ProviderError> {
        self.purge_expired();

        let request = completion.request;
        let client = self.client(&request.client_id)?;
        if !client.redirect_uris.iter().any(|uri| uri == &request.redirect_uri) {
            return Err(ProviderError::InvalidRedirectUri(request.redirect_uri));
        }

        let mut redirect_to = url::Url::parse(&request.redirect_uri)
            .map_err(|e| ProviderError::InvalidRedirectUri(format!("{}: {}", request.redirect_uri, e)))?;

        let code = random_token();
        {
            let mut pairs = redirect_to.query_pairs_mut();
            pairs.append_pair("code", &code);
            if !request.state.is_empty() {
                pairs.append_pair("state", &request.state);
            }
        }

        self.grants.insert(
            code,
            PendingGrant {
                client_id: request.client_id,
                redirect_uri: request.redirect_uri,
                scope: completion.scope,
                code_challenge: request.code_challenge,
                code_challenge_method: request.code_challenge_method,
                principal: completion.props,
                expires_at: Utc::now() + chrono::Duration::seconds(CODE_TTL_SECS),
            },
        );

        tracing::info!(user = %completion.user_id, "Issued authorization code");

        Ok(CompletedAuthorization {
            redirect_to: redirect_to.to_string(),
        })
    }

    async fn exchange_authorization_code(&self, request: TokenRequest) -> Result<TokenResponse, ProviderError> {
        if request.grant_type != "authorization_code" {
            return Err(ProviderError::UnsupportedGrantType(request.grant_type));
        }
        self.purge_expired();

        let code = request
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ProviderError::InvalidRequest("code is required".to_string()))?;

        // Removing first makes the code single-use even when validation fails
        let (_, grant) = self
            .grants
            .remove(&code)
            .ok_or_else(|| ProviderError::InvalidGrant("Unknown, expired or already used code".to_string()))?;

        let client = self.client(&grant.client_id)?;

        if let Some(client_id) = request.client_id.as_deref() {
            if client_id != grant.client_id {
                return Err(ProviderError::InvalidGrant("Code was issued to another client".to_string()));
            }
        }

        if let Some(expected) = client.client_secret.as_deref() {
            if request.client_secret.as_deref() != Some(expected) {
                return Err(ProviderError::InvalidClient("Client authentication failed".to_string()));
            }
        }

        if let Some(redirect_uri) = request.redirect_uri.as_deref() {
            if redirect_uri != grant.redirect_uri {
                return Err(ProviderError::InvalidGrant("redirect_uri does not match".to_string()));
            }
        }

        if let Some(challenge) = grant.code_challenge.as_deref() {
            let verifier = request
                .code_verifier
                .as_deref()
                .ok_or_else(|| ProviderError::InvalidGrant("code_verifier is required".to_string()))?;
            if !verify_pkce(challenge, grant.code_challenge_method.as_deref(), verifier) {
                return Err(ProviderError::InvalidGrant("PKCE verification failed".to_string()));
            }
        }

        let access_token = random_token();
        let ttl = chrono::Duration::from_std(self.token_ttl)
            .map_err(|e| ProviderError::Internal(e.to_string()))?;
        self.tokens.insert(
            access_token.clone(),
            IssuedToken {
                principal: grant.principal,
                expires_at: Utc::now() + ttl,
            },
        );

        Ok(TokenResponse {
            access_token,
            token_type: "bearer".to_string(),
            expires_in: self.token_ttl.as_secs(),
            scope: grant.scope.join(" "),
        })
    }

    async fn resolve_token(&self, bearer: &str) -> Option<Principal> {
        let expired = match self.tokens.get(bearer) {
            Some(token) if token.expires_at > Utc::now() => return Some(token.principal.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.tokens.remove(bearer);
        }
        None
    }
}
