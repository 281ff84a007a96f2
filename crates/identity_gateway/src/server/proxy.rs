//! Trust-header reverse proxy
//!
//! Forwards authenticated requests to the private backend with the user's
//! identity in `X-Forwarded-*` / `X-GitHub-*` headers. Backend redirects are
//! never followed: one here means the service token was not accepted.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use bytes::Bytes;
use http_body_util::LengthLimitError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::auth::Principal;
use crate::config::{GatewayConfig, ServiceToken};

use super::AppState;

pub const X_FORWARDED_USER: HeaderName = HeaderName::from_static("x-forwarded-user");
pub const X_FORWARDED_LOGIN: HeaderName = HeaderName::from_static("x-forwarded-login");
pub const X_GITHUB_USER: HeaderName = HeaderName::from_static("x-github-user");
pub const X_GITHUB_TOKEN: HeaderName = HeaderName::from_static("x-github-token");
pub const SERVICE_TOKEN_ID: HeaderName = HeaderName::from_static("cf-access-client-id");
pub const SERVICE_TOKEN_SECRET: HeaderName = HeaderName::from_static("cf-access-client-secret");

/// Connection-scoped headers that must not cross the proxy
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Unauthorized - No user context")]
    Unauthorized,

    #[error("Request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("Failed to read request body: {0}")]
    ReadBody(String),

    #[error("Proxy error: invalid header value for {0}")]
    InvalidHeader(HeaderName),

    #[error("Service token authentication failed. Got redirect to: {location}")]
    UnexpectedRedirect { status: StatusCode, location: String },

    #[error("Proxy error: backend did not respond within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Proxy error: {0}")]
    Upstream(#[from] reqwest::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProxyError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::ReadBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::InvalidHeader(_)
            | ProxyError::UnexpectedRedirect { .. }
            | ProxyError::Timeout(_)
            | ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (
            status,
            [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
            self.to_string(),
        )
            .into_response();

        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// One inbound API call, bound to the user it was authenticated as
#[derive(Debug)]
pub struct ProxyContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Fully buffered; `None` for GET and HEAD
    pub body: Option<Bytes>,
    pub principal: Principal,
}

impl ProxyContext {
    pub async fn from_request(
        request: Request,
        principal: Principal,
        max_body_bytes: usize,
    ) -> Result<Self, ProxyError> {
        let (parts, body) = request.into_parts();

        let body = if parts.method == Method::GET || parts.method == Method::HEAD {
            None
        } else {
            let declared = parts
                .headers
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok());
            if declared.is_some_and(|len| len > max_body_bytes) {
                return Err(ProxyError::BodyTooLarge(max_body_bytes));
            }

            let bytes = to_bytes(body, max_body_bytes).await.map_err(|e| {
                if exceeds_length_limit(&e) {
                    ProxyError::BodyTooLarge(max_body_bytes)
                } else {
                    ProxyError::ReadBody(e.to_string())
                }
            })?;
            Some(bytes)
        };

        Ok(Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            principal,
        })
    }

    /// Inbound path and query re-rooted onto `backend_origin`, verbatim
    pub fn backend_url(&self, backend_origin: &str) -> String {
        let path_and_query = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("{}{}", backend_origin.trim_end_matches('/'), path_and_query)
    }

    /// Inbound headers minus `Authorization`, plus identity and service headers
    pub fn forwarded_headers(&self, service_token: Option<&ServiceToken>) -> Result<HeaderMap, ProxyError> {
        let mut headers = HeaderMap::with_capacity(self.headers.len() + 6);
        for (name, value) in &self.headers {
            if is_hop_by_hop(name) || name == header::HOST || name == header::CONTENT_LENGTH {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        headers.remove(header::AUTHORIZATION);

        let principal = &self.principal;
        set_header(&mut headers, X_FORWARDED_USER, &principal.email)?;
        set_header(&mut headers, X_FORWARDED_LOGIN, &principal.login)?;
        set_header(&mut headers, X_GITHUB_USER, &principal.login)?;
        set_header(&mut headers, X_GITHUB_TOKEN, &principal.access_token)?;

        match service_token {
            Some(token) => {
                set_header(&mut headers, SERVICE_TOKEN_ID, &token.id)?;
                set_header(&mut headers, SERVICE_TOKEN_SECRET, &token.secret)?;
            }
            None => {
                warn!("[WARN] Service token credentials missing - backend authentication will fail");
            }
        }

        Ok(headers)
    }
}

/// Chunked bodies carry no `Content-Length`; the limit trips while reading
fn exceeds_length_limit(err: &axum::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) -> Result<(), ProxyError> {
    let value = HeaderValue::from_str(value).map_err(|_| ProxyError::InvalidHeader(name.clone()))?;
    headers.insert(name, value);
    Ok(())
}

/// Send `ctx` to the backend and relay its response
///
/// Redirects become a 502; the body of every other response is streamed
/// back untouched.
pub async fn forward(
    client: &reqwest::Client,
    config: &GatewayConfig,
    ctx: ProxyContext,
) -> Result<Response, ProxyError> {
    let url = ctx.backend_url(&config.backend_url);
    let headers = ctx.forwarded_headers(config.service_token.as_ref())?;

    debug!(method = %ctx.method, url = %url, login = %ctx.principal.login, "Proxying request");

    let mut request = client.request(ctx.method, &url).headers(headers);
    if let Some(body) = ctx.body {
        request = request.body(body);
    }

    let response = tokio::time::timeout(config.backend_timeout, request.send())
        .await
        .map_err(|_| {
            error!("Backend did not respond within {:?}: {}", config.backend_timeout, url);
            ProxyError::Timeout(config.backend_timeout)
        })?
        .map_err(|e| {
            error!("Error proxying request to {}: {}", url, e);
            ProxyError::Upstream(e)
        })?;

    let status = response.status();
    if status.is_redirection() {
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("<none>")
            .to_string();
        error!("Unexpected redirect from backend ({}) to: {}", status, location);
        error!("This means service token authentication failed!");
        return Err(ProxyError::UnexpectedRedirect { status, location });
    }

    let mut headers = HeaderMap::with_capacity(response.headers().len());
    for (name, value) in response.headers() {
        if !is_hop_by_hop(name) && name != header::CONTENT_LENGTH {
            headers.append(name.clone(), value.clone());
        }
    }

    let mut relayed = Response::new(Body::from_stream(response.bytes_stream()));
    *relayed.status_mut() = status;
    *relayed.headers_mut() = headers;
    Ok(relayed)
}

/// Credentials of an `Authorization: Bearer` header; the scheme is case-insensitive
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

/// Resolve `Authorization: Bearer` into a [`Principal`] request extension
///
/// Requests without a valid token pass through unmarked; the proxy handler
/// rejects them.
pub async fn attach_principal(State(state): State<Arc<AppState>>, mut request: Request, next: Next) -> Response {
    if let Some(token) = bearer_token(request.headers()) {
        match state.provider.resolve_token(&token).await {
            Some(principal) => {
                request.extensions_mut().insert(principal);
            }
            None => debug!("Bearer token not recognized"),
        }
    }

    next.run(request).await
}

/// Proxy handler for every configured API path
pub async fn proxy_to_backend(
    State(state): State<Arc<AppState>>,
    principal: Option<Extension<Principal>>,
    request: Request,
) -> Result<Response, ProxyError> {
    let Some(Extension(principal)) = principal else {
        return Err(ProxyError::Unauthorized);
    };

    let ctx = ProxyContext::from_request(request, principal, state.config.max_proxy_body_bytes).await?;
    forward(&state.backend, &state.config, ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn alice() -> Principal {
        Principal {
            login: "alice".to_string(),
            name: "Alice".to_string(),
            email: "a@x.com".to_string(),
            access_token: "tok1".to_string(),
        }
    }

    fn context(method: Method, uri: &str, headers: HeaderMap, body: Option<&'static str>) -> ProxyContext {
        ProxyContext {
            method,
            uri: uri.parse().unwrap(),
            headers,
            body: body.map(|b| Bytes::from_static(b.as_bytes())),
            principal: alice(),
        }
    }

    fn test_config(backend_url: String, service_token: Option<ServiceToken>) -> GatewayConfig {
        let mut config = GatewayConfig::from_lookup("127.0.0.1", 8787, |name| match name {
            "GITHUB_CLIENT_ID" => Some("id".to_string()),
            "GITHUB_CLIENT_SECRET" => Some("secret".to_string()),
            _ => None,
        })
        .unwrap();
        config.backend_url = backend_url;
        config.service_token = service_token;
        config
    }

    fn no_redirect_client() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    #[test]
    fn test_backend_url_keeps_path_and_query() {
        let ctx = context(Method::GET, "https://gw.test/mcp/tools?cursor=a%2Fb&x=1", HeaderMap::new(), None);
        assert_eq!(
            ctx.backend_url("https://backend.internal/"),
            "https://backend.internal/mcp/tools?cursor=a%2Fb&x=1"
        );

        let ctx = context(Method::GET, "/sse", HeaderMap::new(), None);
        assert_eq!(ctx.backend_url("https://backend.internal"), "https://backend.internal/sse");
    }

    #[test]
    fn test_forwarded_headers() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer gateway-token"));
        inbound.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        inbound.insert(header::HOST, HeaderValue::from_static("gw.test"));
        inbound.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        // Client-supplied identity must be overwritten
        inbound.insert(X_GITHUB_USER, HeaderValue::from_static("mallory"));

        let ctx = context(Method::GET, "/mcp", inbound, None);
        let token = ServiceToken {
            id: "svc-id".to_string(),
            secret: "svc-secret".to_string(),
        };
        let headers = ctx.forwarded_headers(Some(&token)).unwrap();

        assert!(headers.get(header::AUTHORIZATION).is_none());
        assert!(headers.get(header::HOST).is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert_eq!(headers[header::ACCEPT], "text/event-stream");
        assert_eq!(headers[X_FORWARDED_USER], "a@x.com");
        assert_eq!(headers[X_FORWARDED_LOGIN], "alice");
        assert_eq!(headers.get_all(X_GITHUB_USER).iter().count(), 1);
        assert_eq!(headers[X_GITHUB_USER], "alice");
        assert_eq!(headers[X_GITHUB_TOKEN], "tok1");
        assert_eq!(headers[SERVICE_TOKEN_ID], "svc-id");
        assert_eq!(headers[SERVICE_TOKEN_SECRET], "svc-secret");
    }

    #[test]
    fn test_missing_service_token_is_not_fatal() {
        let ctx = context(Method::GET, "/mcp", HeaderMap::new(), None);
        let headers = ctx.forwarded_headers(None).unwrap();
        assert!(headers.get(SERVICE_TOKEN_ID).is_none());
        assert_eq!(headers[X_GITHUB_USER], "alice");
    }

    #[tokio::test]
    async fn test_forward_relays_response() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/mcp/tools")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .match_header("x-github-user", "alice")
            .match_header("x-github-token", "tok1")
            .match_header("authorization", Matcher::Missing)
            .match_body(r#"{"jsonrpc":"2.0","method":"tools/list","id":1}"#)
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_header("mcp-session-id", "s-1")
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let mut inbound = HeaderMap::new();
        inbound.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer gateway-token"));
        let ctx = context(
            Method::POST,
            "/mcp/tools?page=2",
            inbound,
            Some(r#"{"jsonrpc":"2.0","method":"tools/list","id":1}"#),
        );

        let config = test_config(server.url(), None);
        let response = forward(&no_redirect_client(), &config, ctx).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["mcp-session-id"], "s-1");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], br#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn test_forward_rejects_redirect() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/sse")
            .with_status(302)
            .with_header("location", "https://login.example.com/cdn-cgi/access/login")
            .create_async()
            .await;

        let config = test_config(server.url(), None);
        let ctx = context(Method::GET, "/sse", HeaderMap::new(), None);
        let err = forward(&no_redirect_client(), &config, ctx).await.unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        let response = err.into_response();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("https://login.example.com/cdn-cgi/access/login"));
    }

    #[tokio::test]
    async fn test_forward_network_error_is_bad_gateway() {
        // Nothing listens on port 1
        let config = test_config("http://127.0.0.1:1".to_string(), None);
        let ctx = context(Method::GET, "/mcp", HeaderMap::new(), None);
        let err = forward(&no_redirect_client(), &config, ctx).await.unwrap_err();

        assert!(matches!(err, ProxyError::Upstream(_)));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/mcp")
            .header(header::CONTENT_LENGTH, "2048")
            .body(Body::from(vec![0u8; 2048]))
            .unwrap();

        let err = ProxyContext::from_request(request, alice(), 1024).await.unwrap_err();
        assert!(matches!(err, ProxyError::BodyTooLarge(1024)));
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_get_body_is_not_buffered() {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/sse")
            .body(Body::empty())
            .unwrap();
        let ctx = ProxyContext::from_request(request, alice(), 1024).await.unwrap();
        assert!(ctx.body.is_none());
    }

    #[tokio::test]
    async fn test_streamed_oversized_body_rejected() {
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::from(vec![0u8; 1000])), Ok(Bytes::from(vec![0u8; 500]))];
        let request = Request::builder()
            .method(Method::POST)
            .uri("/mcp")
            .body(Body::from_stream(tokio_stream::iter(chunks)))
            .unwrap();
        assert!(request.headers().get(header::CONTENT_LENGTH).is_none());

        let err = ProxyContext::from_request(request, alice(), 1024).await.unwrap_err();
        assert!(matches!(err, ProxyError::BodyTooLarge(1024)));
        assert_eq!(err.into_response().status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_bearer_scheme_is_case_insensitive() {
        let with_auth = |value: &'static str| {
            let mut headers = HeaderMap::new();
            headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
            headers
        };

        assert_eq!(bearer_token(&with_auth("Bearer abc")).as_deref(), Some("abc"));
        assert_eq!(bearer_token(&with_auth("bearer abc")).as_deref(), Some("abc"));
        assert_eq!(bearer_token(&with_auth("BEARER abc")).as_deref(), Some("abc"));
        assert_eq!(bearer_token(&with_auth("Basic YWxpY2U6cHc=")), None);
        assert_eq!(bearer_token(&with_auth("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_unauthorized_response() {
        let response = ProxyError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }
}
