use serde::{Deserialize, Serialize};
use std::fmt;

/// Authenticated end user, carried as token props and injected into proxied requests
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub login: String,
    pub name: String,
    pub email: String,
    /// GitHub access token for this user
    pub access_token: String,
}

// Keep the upstream token out of logs
impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("login", &self.login)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Profile fields returned by the identity provider's user endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PrincipalError {
    #[error("Identity provider profile has no login")]
    MissingLogin,
}

impl Principal {
    /// Build a principal from a fetched profile
    ///
    /// `name` falls back to `login`, `email` to the empty string. A missing or
    /// blank `login` is fatal.
    pub fn from_profile(profile: UserProfile, access_token: String) -> Result<Self, PrincipalError> {
        let login = profile
            .login
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .ok_or(PrincipalError::MissingLogin)?;

        let name = profile
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| login.clone());

        Ok(Self {
            name,
            email: profile.email.unwrap_or_default(),
            login,
            access_token,
        })
    }
}
