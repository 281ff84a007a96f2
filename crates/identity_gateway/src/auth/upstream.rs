use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::config::UpstreamConfig;

/// Parameters for the identity provider's authorize redirect
#[derive(Debug, Clone)]
pub struct AuthorizeUrlParams<'a> {
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scope: &'a str,
    pub state: &'a str,
    pub authorize_endpoint: &'a str,
}

/// Build the upstream authorize URL
///
/// Pure string construction. `state` is passed through untouched.
pub fn build_authorize_url(params: &AuthorizeUrlParams<'_>) -> Result<String, url::ParseError> {
    let mut url = url::Url::parse(params.authorize_endpoint)?;

    url.query_pairs_mut()
        .append_pair("client_id", params.client_id)
        .append_pair("redirect_uri", params.redirect_uri)
        .append_pair("scope", params.scope)
        .append_pair("state", params.state)
        .append_pair("response_type", "code");

    Ok(url.to_string())
}

/// Failure to turn an authorization code into an access token
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("Token request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Token endpoint returned {status}")]
    Status { status: StatusCode, body: String },

    #[error("Token endpoint rejected the code: {error}")]
    Rejected {
        status: StatusCode,
        error: String,
        description: Option<String>,
    },

    #[error("Malformed token response: {0}")]
    Malformed(String),
}

impl ExchangeError {
    /// HTTP status reported by the identity provider, when one was received
    pub fn upstream_status(&self) -> Option<StatusCode> {
        match self {
            ExchangeError::Transport(e) => e.status(),
            ExchangeError::Status { status, .. } | ExchangeError::Rejected { status, .. } => Some(*status),
            ExchangeError::Malformed(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client for the identity provider's token endpoint
#[derive(Clone)]
pub struct UpstreamClient {
    config: UpstreamConfig,
    http_client: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self { config, http_client })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Authorize URL for this gateway's OAuth app
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String, url::ParseError> {
        build_authorize_url(&AuthorizeUrlParams {
            client_id: &self.config.client_id,
            redirect_uri,
            scope: &self.config.scope,
            state,
            authorize_endpoint: &self.config.authorize_url,
        })
    }

    /// Exchange an authorization code for an access token
    ///
    /// Exactly one POST, never retried: codes are single-use. A 2xx response
    /// without `access_token` yields `Ok("")`; callers must reject it.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<String, ExchangeError> {
        let form_params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];

        let response = self
            .http_client
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&form_params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Status { status, body });
        }

        let body = response.text().await?;
        let token_response: TokenResponse =
            serde_json::from_str(&body).map_err(|e| ExchangeError::Malformed(e.to_string()))?;

        // GitHub reports bad codes as 200 with an `error` field
        if let Some(error) = token_response.error {
            return Err(ExchangeError::Rejected {
                status,
                error,
                description: token_response.error_description,
            });
        }

        Ok(token_response.access_token.unwrap_or_default())
    }
}
