//! OAuth Authorization Handlers
//!
//! `GET /authorize` -> consent or GitHub redirect, `POST /authorize` ->
//! GitHub redirect plus approval cookie, `GET /callback` -> code exchange,
//! profile lookup and hand-off to the provider, `POST /token` -> gateway
//! bearer token.

use axum::{
    body::Bytes,
    extract::{
        rejection::{FormRejection, QueryRejection},
        Query, RawQuery, State,
    },
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::approval::{render_approval_dialog, ApprovalError, ConsentState};
use crate::auth::{decode_state, encode_state, AuthRequest, ExchangeError, Principal};
use crate::error::{ErrorCode, OAuthError};
use crate::provider::{CompleteAuthorization, ProviderError, TokenRequest};

use super::AppState;

/// Start authorization: skip consent for remembered clients, otherwise render it
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Response, OAuthError> {
    let request = state
        .provider
        .parse_auth_request(query.as_deref().unwrap_or(""))
        .await
        .map_err(auth_request_error)?;

    if !request.has_client_id() {
        return Err(OAuthError::invalid_request("Missing client_id"));
    }

    let client = match state.provider.lookup_client(&request.client_id).await {
        Ok(Some(client)) => client,
        Ok(None) => return Err(unknown_client(&request.client_id)),
        Err(e) => {
            warn!("Client lookup failed for '{}': {}", request.client_id, e);
            return Err(unknown_client(&request.client_id).with_details(e.to_string()));
        }
    };

    let approved = state
        .approvals
        .as_ref()
        .map(|approvals| approvals.is_approved(&headers, &request.client_id))
        .unwrap_or(false);
    if approved {
        info!("Client '{}' previously approved, skipping consent", request.client_id);
        return redirect_to_github(&state, &request, HeaderMap::new());
    }

    let consent = ConsentState {
        oauth_req_info: Some(request),
    };
    Ok(render_approval_dialog(&client, &state.config.server, &consent).into_response())
}

/// Consent submitted: remember the approval and continue to GitHub
pub async fn approve(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, OAuthError> {
    let approvals = state.approvals.as_ref().ok_or_else(|| {
        OAuthError::server_error("Approval cookie secret is not configured")
            .with_hint("Administrator: set COOKIE_ENCRYPTION_KEY for this gateway")
    })?;

    let approved = approvals
        .parse_redirect_approval(&method, &headers, &body)
        .map_err(approval_error)?;

    let request = approved
        .state
        .oauth_req_info
        .filter(AuthRequest::has_client_id)
        .ok_or_else(|| OAuthError::invalid_request("Approval state is missing client_id"))?;

    redirect_to_github(&state, &request, approved.headers)
}

/// Query parameters GitHub appends to the callback
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// GitHub callback: exchange the code, identify the user, mint the gateway grant
pub async fn callback(
    State(state): State<Arc<AppState>>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
) -> Result<Response, OAuthError> {
    let Query(params) = query.map_err(|e| {
        OAuthError::invalid_request("Malformed callback query").with_details(e.body_text())
    })?;

    let encoded = params
        .state
        .filter(|s| !s.is_empty())
        .ok_or_else(|| OAuthError::invalid_request("Missing state parameter"))?;

    let request = decode_state(&encoded).map_err(|e| {
        OAuthError::invalid_request("Unable to decode state").with_details(e.to_string())
    })?;

    if !request.has_client_id() {
        return Err(OAuthError::invalid_request("State is missing client_id"));
    }

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        let mut err = OAuthError::invalid_request("Missing authorization code");
        if let Some(upstream_error) = params.error {
            err = err.with_details(match params.error_description {
                Some(description) => format!("{}: {}", upstream_error, description),
                None => upstream_error,
            });
        }
        return Err(err);
    };

    let redirect_uri = state.config.callback_url();
    let access_token = match state.upstream.exchange_code(&code, &redirect_uri).await {
        Ok(token) => token,
        Err(e) => return Err(exchange_error(e)),
    };
    if access_token.is_empty() {
        error!("Token exchange succeeded without an access token");
        return Err(OAuthError::access_denied("Identity provider returned no access token"));
    }

    let profile = state.users.fetch_profile(&access_token).await.map_err(|e| {
        OAuthError::bad_gateway("Failed to fetch user profile from identity provider")
            .with_details(e.to_string())
    })?;

    let principal = Principal::from_profile(profile, access_token)
        .map_err(|e| OAuthError::access_denied(e.to_string()))?;

    info!(login = %principal.login, client_id = %request.client_id, "GitHub login complete");

    let completed = state
        .provider
        .complete_authorization(CompleteAuthorization {
            metadata: serde_json::json!({ "label": principal.name }),
            user_id: principal.login.clone(),
            scope: request.scope.clone(),
            request,
            props: principal,
        })
        .await
        .map_err(|e| {
            OAuthError::server_error("Failed to complete authorization").with_details(e.to_string())
        })?;

    found(&completed.redirect_to, HeaderMap::new())
}

/// `POST /token`: authorization_code grant for the gateway's own tokens
pub async fn token(
    State(state): State<Arc<AppState>>,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Result<Response, OAuthError> {
    let Form(request) = form.map_err(|e| {
        OAuthError::invalid_request("Malformed token request").with_details(e.body_text())
    })?;

    let response = state
        .provider
        .exchange_authorization_code(request)
        .await
        .map_err(token_error)?;

    Ok((
        [(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        Json(response),
    )
        .into_response())
}

/// RFC 8414 authorization server metadata
pub async fn authorization_server_metadata(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let issuer = &state.config.public_url;
    Json(serde_json::json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{}/authorize", issuer),
        "token_endpoint": format!("{}/token", issuer),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code"],
        "code_challenge_methods_supported": ["S256", "plain"],
        "token_endpoint_auth_methods_supported": ["client_secret_post", "none"],
    }))
}

/// 302 to GitHub's authorize endpoint carrying the encoded request as `state`
fn redirect_to_github(
    state: &AppState,
    request: &AuthRequest,
    headers: HeaderMap,
) -> Result<Response, OAuthError> {
    let location = state
        .upstream
        .authorize_url(&state.config.callback_url(), &encode_state(request))
        .map_err(|e| {
            OAuthError::server_error("Invalid identity provider authorize URL").with_details(e.to_string())
        })?;

    found(&location, headers)
}

fn found(location: &str, mut headers: HeaderMap) -> Result<Response, OAuthError> {
    let value = HeaderValue::from_str(location).map_err(|e| {
        OAuthError::server_error("Invalid redirect location").with_details(e.to_string())
    })?;
    headers.insert(header::LOCATION, value);
    Ok((StatusCode::FOUND, headers).into_response())
}

fn unknown_client(client_id: &str) -> OAuthError {
    OAuthError::invalid_client(format!("Client '{}' not found", client_id))
        .with_hint("Register the client with this gateway before authorizing")
}

fn auth_request_error(err: ProviderError) -> OAuthError {
    match err {
        ProviderError::InvalidRedirectUri(details) => OAuthError::invalid_request("Invalid redirect URI")
            .with_hint("Check that the redirect URI matches one registered for this client")
            .with_details(details),
        ProviderError::InvalidClient(details) => OAuthError::invalid_client("Invalid client")
            .with_hint("Register the client with this gateway before authorizing")
            .with_details(details),
        other => OAuthError::invalid_request("Invalid authorization request").with_details(other.to_string()),
    }
}

fn approval_error(err: ApprovalError) -> OAuthError {
    match err {
        ApprovalError::MethodNotAllowed(_) => {
            OAuthError::invalid_request(err.to_string()).with_status(StatusCode::METHOD_NOT_ALLOWED)
        }
        ApprovalError::MissingState | ApprovalError::InvalidState(_) => {
            OAuthError::invalid_request("Invalid approval form").with_details(err.to_string())
        }
        ApprovalError::Malformed(_) => {
            OAuthError::server_error("Failed to process approval").with_details(err.to_string())
        }
    }
}

fn exchange_error(err: ExchangeError) -> OAuthError {
    match &err {
        ExchangeError::Status { status, body } => {
            error!("Token exchange failed: {} - {}", status, body);
        }
        ExchangeError::Rejected { error, description, .. } => {
            warn!("Token exchange rejected: {} ({})", error, description.as_deref().unwrap_or(""));
        }
        other => error!("Token exchange failed: {}", other),
    }

    let mut oauth_error = OAuthError::access_denied("Failed to exchange authorization code");
    if let Some(status) = err.upstream_status() {
        oauth_error = oauth_error.with_details(format!("upstream status {}", status.as_u16()));
    }
    oauth_error
}

fn token_error(err: ProviderError) -> OAuthError {
    let details = err.to_string();
    let (status, code, description) = match err {
        ProviderError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest, "Invalid token request"),
        ProviderError::InvalidGrant(_) | ProviderError::InvalidRedirectUri(_) => {
            (StatusCode::BAD_REQUEST, ErrorCode::InvalidGrant, "Invalid authorization grant")
        }
        ProviderError::UnsupportedGrantType(_) => (
            StatusCode::BAD_REQUEST,
            ErrorCode::UnsupportedGrantType,
            "Only authorization_code is supported",
        ),
        ProviderError::InvalidClient(_) => (StatusCode::UNAUTHORIZED, ErrorCode::InvalidClient, "Client authentication failed"),
        ProviderError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::ServerError, "Token issuance failed"),
    };
    OAuthError::new(status, code, description).with_details(details)
}
