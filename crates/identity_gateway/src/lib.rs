//! Identity Gateway Service
//!
//! Edge gateway in front of a private MCP backend. Users sign in with GitHub,
//! API clients receive gateway bearer tokens, and authenticated calls are
//! forwarded to the backend carrying the user's identity in trusted headers.
//!
//! # Features
//! - OAuth authorization-code flow with PKCE for API clients
//! - GitHub login with a stateless, round-tripped `state` parameter
//! - Signed "remember this approval" cookie to skip repeat consent
//! - Trust-header reverse proxy with service-token authentication

pub mod approval;
pub mod auth;
pub mod config;
pub mod error;
pub mod provider;
pub mod server;

pub use auth::{AuthRequest, Principal, UserProfile};
pub use config::{ConfigError, GatewayConfig};
pub use error::OAuthError;
pub use provider::{InMemoryProvider, OAuthProvider};
pub use server::{build_router, start_server, AppState};
