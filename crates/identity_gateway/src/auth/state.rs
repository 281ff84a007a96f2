//! In-flight authorization request and its `state` round-trip encoding
//!
//! The gateway keeps no server-side session across the GitHub redirect, so
//! the parsed request travels as URL-safe base64 JSON in the `state`
//! parameter. The encoding is not encrypted or signed: it carries no
//! secrets, and every field read back from it is re-validated by the caller.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Third-party client's authorization request, as parsed by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    #[serde(default)]
    pub response_type: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: Vec<String>,
    /// The client's own `state`, echoed back on completion
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
}

impl AuthRequest {
    pub fn has_client_id(&self) -> bool {
        !self.client_id.trim().is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Malformed state: {0}")]
    Malformed(String),
}

pub fn encode_state(request: &AuthRequest) -> String {
    encode_json(request)
}

pub fn decode_state(encoded: &str) -> Result<AuthRequest, StateError> {
    decode_json(encoded)
}

/// Base64url (unpadded) over the JSON form of `value`
pub(crate) fn encode_json<T: Serialize>(value: &T) -> String {
    // Serializing plain structs of strings cannot fail
    let json = serde_json::to_vec(value).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

pub(crate) fn decode_json<T: DeserializeOwned>(encoded: &str) -> Result<T, StateError> {
    // Tolerate padding and the standard alphabet some clients re-encode to
    let normalized: String = encoded
        .trim()
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    let bytes = URL_SAFE_NO_PAD
        .decode(normalized.as_bytes())
        .map_err(|e| StateError::Malformed(format!("invalid base64: {}", e)))?;

    serde_json::from_slice(&bytes).map_err(|e| StateError::Malformed(format!("invalid JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;

    fn sample() -> AuthRequest {
        AuthRequest {
            response_type: "code".to_string(),
            client_id: "abc".to_string(),
            redirect_uri: "https://app.test/cb".to_string(),
            scope: vec!["mcp".to_string(), "read".to_string()],
            state: "client-state-123".to_string(),
            code_challenge: Some("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".to_string()),
            code_challenge_method: Some("S256".to_string()),
        }
    }

    #[test]
    fn test_round_trip() {
        let request = sample();
        let encoded = encode_state(&request);
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(decode_state(&encoded).unwrap(), request);
    }

    #[test]
    fn test_encoded_form_is_camel_case_json() {
        let encoded = encode_state(&sample());
        let json: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(encoded).unwrap()).unwrap();
        assert_eq!(json["clientId"], "abc");
        assert_eq!(json["redirectUri"], "https://app.test/cb");
    }

    #[test]
    fn test_truncated_state_fails() {
        let encoded = encode_state(&sample());
        for cut in [1, 2, 3, 5, encoded.len() / 2] {
            let truncated = &encoded[..encoded.len() - cut];
            assert!(
                matches!(decode_state(truncated), Err(StateError::Malformed(_))),
                "truncation by {} decoded",
                cut
            );
        }
    }

    #[test]
    fn test_garbage_fails() {
        assert!(decode_state("!!not-base64!!").is_err());
        assert!(decode_state("").is_err());
        // Valid base64, wrong structure
        assert!(decode_state(&URL_SAFE_NO_PAD.encode("[1,2,3]")).is_err());
    }

    #[test]
    fn test_accepts_padded_standard_alphabet() {
        let json = serde_json::to_vec(&sample()).unwrap();
        let padded = STANDARD.encode(json);
        assert_eq!(decode_state(&padded).unwrap(), sample());
    }

    #[test]
    fn test_missing_client_id_decodes_but_is_flagged() {
        let encoded = URL_SAFE_NO_PAD.encode(r#"{"redirectUri":"https://app.test/cb"}"#);
        let request = decode_state(&encoded).unwrap();
        assert!(!request.has_client_id());
    }
}
