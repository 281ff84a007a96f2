//! Upstream identity: GitHub code exchange, profile lookup, and the
//! request state carried across the GitHub redirect.

pub mod github;
pub mod principal;
pub mod state;
pub mod upstream;

pub use github::{GitHubUserClient, UserInfoClient, UserInfoError};
pub use principal::{Principal, PrincipalError, UserProfile};
pub use state::{decode_state, encode_state, AuthRequest, StateError};
pub use upstream::{build_authorize_url, AuthorizeUrlParams, ExchangeError, UpstreamClient};
