use async_trait::async_trait;
use std::time::Duration;

use super::principal::UserProfile;

#[derive(Debug, thiserror::Error)]
pub enum UserInfoError {
    #[error("User request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("User endpoint returned {status}")]
    Status { status: reqwest::StatusCode },
}

/// Fetches the profile of the user an access token belongs to
#[async_trait]
pub trait UserInfoClient: Send + Sync {
    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, UserInfoError>;
}

/// GitHub REST `GET /user`
pub struct GitHubUserClient {
    api_url: String,
    http_client: reqwest::Client,
}

impl GitHubUserClient {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            // GitHub rejects API requests without a User-Agent
            .user_agent(concat!("identity-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }
}

#[async_trait]
impl UserInfoClient for GitHubUserClient {
    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, UserInfoError> {
        let response = self
            .http_client
            .get(format!("{}/user", self.api_url))
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("GitHub user lookup failed: {} - {}", status, body);
            return Err(UserInfoError::Status { status });
        }

        Ok(response.json::<UserProfile>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn test_fetch_profile() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/user")
            .match_header("authorization", "Bearer tok1")
            .match_header("user-agent", mockito::Matcher::Regex("^identity-gateway/".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"login":"alice","id":1,"name":null,"email":"a@x.com"}"#)
            .create_async()
            .await;

        let client = GitHubUserClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let profile = client.fetch_profile("tok1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(profile.login.as_deref(), Some("alice"));
        assert_eq!(profile.name, None);
        assert_eq!(profile.email.as_deref(), Some("a@x.com"));
    }

    #[tokio::test]
    async fn test_fetch_profile_unauthorized() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/user")
            .with_status(401)
            .with_body(r#"{"message":"Bad credentials"}"#)
            .create_async()
            .await;

        let client = GitHubUserClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let err = client.fetch_profile("revoked").await.unwrap_err();
        assert!(matches!(
            err,
            UserInfoError::Status { status } if status == reqwest::StatusCode::UNAUTHORIZED
        ));
    }
}
