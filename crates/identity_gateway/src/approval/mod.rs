//! "Remember this approval" cookie and the consent form round-trip
//!
//! The cookie holds the list of client ids this browser has approved,
//! signed with HMAC-SHA256: `<b64url signature>.<b64url JSON list>`.

pub mod dialog;

use axum::http::{header, HeaderMap, HeaderValue, Method};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::auth::state::{decode_json, encode_json};
use crate::auth::AuthRequest;

pub use dialog::render_approval_dialog;

type HmacSha256 = Hmac<Sha256>;

pub const COOKIE_NAME: &str = "mcp-approved-clients";
const ONE_YEAR_SECS: u64 = 365 * 24 * 60 * 60;

/// Data carried through the consent form's hidden `state` field
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentState {
    #[serde(default)]
    pub oauth_req_info: Option<AuthRequest>,
}

impl ConsentState {
    pub fn encode(&self) -> String {
        encode_json(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("Approval must be submitted with POST, got {0}")]
    MethodNotAllowed(Method),

    #[error("Missing state in approval form")]
    MissingState,

    #[error("Invalid state in approval form: {0}")]
    InvalidState(String),

    #[error("Could not parse approval form: {0}")]
    Malformed(String),
}

/// Result of a successful consent submission
#[derive(Debug)]
pub struct ApprovedRedirect {
    pub state: ConsentState,
    /// `Set-Cookie` to attach to the outgoing redirect
    pub headers: HeaderMap,
}

#[derive(Clone)]
pub struct ApprovalCookies {
    mac: HmacSha256,
}

impl ApprovalCookies {
    pub fn new(secret: &str) -> Result<Self, hmac::digest::InvalidLength> {
        Ok(Self {
            mac: HmacSha256::new_from_slice(secret.as_bytes())?,
        })
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// Client ids from a valid cookie; tampered or missing cookies yield none
    pub fn approved_clients(&self, headers: &HeaderMap) -> Vec<String> {
        let Some(value) = find_cookie(headers, COOKIE_NAME) else {
            return Vec::new();
        };
        let Some((signature, payload)) = value.split_once('.') else {
            tracing::warn!("Approval cookie has no signature");
            return Vec::new();
        };
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature) else {
            return Vec::new();
        };

        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        if mac.verify_slice(&signature).is_err() {
            tracing::warn!("Approval cookie signature mismatch");
            return Vec::new();
        }

        decode_json::<Vec<String>>(payload).unwrap_or_default()
    }

    pub fn is_approved(&self, headers: &HeaderMap, client_id: &str) -> bool {
        self.approved_clients(headers).iter().any(|id| id == client_id)
    }

    /// `Set-Cookie` value adding `client_id` to the already-approved list
    pub fn approval_cookie(&self, headers: &HeaderMap, client_id: &str) -> Option<HeaderValue> {
        let mut approved = self.approved_clients(headers);
        if !approved.iter().any(|id| id == client_id) {
            approved.push(client_id.to_string());
        }

        let payload = encode_json(&approved);
        let cookie = format!(
            "{}={}.{}; Max-Age={}; Path=/; HttpOnly; Secure; SameSite=Lax",
            COOKIE_NAME,
            self.sign(&payload),
            payload,
            ONE_YEAR_SECS
        );
        HeaderValue::from_str(&cookie).ok()
    }

    /// Validate a submitted consent form and produce the cookie to remember it
    pub fn parse_redirect_approval(
        &self,
        method: &Method,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<ApprovedRedirect, ApprovalError> {
        if method != Method::POST {
            return Err(ApprovalError::MethodNotAllowed(method.clone()));
        }

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !content_type.starts_with("application/x-www-form-urlencoded") {
            return Err(ApprovalError::Malformed(format!(
                "unsupported content type '{}'",
                content_type
            )));
        }

        let encoded = url::form_urlencoded::parse(body)
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
            .ok_or(ApprovalError::MissingState)?;

        let state: ConsentState =
            decode_json(&encoded).map_err(|e| ApprovalError::InvalidState(e.to_string()))?;

        let mut response_headers = HeaderMap::new();
        if let Some(request) = state.oauth_req_info.as_ref().filter(|r| r.has_client_id()) {
            if let Some(cookie) = self.approval_cookie(headers, &request.client_id) {
                response_headers.insert(header::SET_COOKIE, cookie);
            }
        }

        Ok(ApprovedRedirect {
            state,
            headers: response_headers,
        })
    }
}

fn find_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}
