//! Credentials and the `Authorization` header attached to every upgrade request.
//!
//! IAM API keys are exchanged for short-lived bearer tokens. The token is
//! cached behind an async lock and shared by every session a factory
//! dispatches, so a batch performs a single exchange.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::form_urlencoded;

use super::error::{StreamError, StreamResult};

// =============================================================================
// Constants
// =============================================================================

/// IBM Cloud IAM token endpoint.
pub const IBM_IAM_URL: &str = "https://iam.cloud.ibm.com/identity/token";

/// Grant type for API key exchange.
const IAM_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";

/// Tokens are refreshed this long before the server-reported expiry.
const TOKEN_SAFETY_MARGIN_SECS: u64 = 300;

/// Minimum lifetime granted to a freshly fetched token.
const TOKEN_MIN_LIFETIME_SECS: u64 = 60;

fn default_iam_url() -> String {
    IBM_IAM_URL.to_string()
}

// =============================================================================
// Credentials
// =============================================================================

/// Authentication scheme used for the websocket upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// IBM Cloud API key exchanged for an IAM bearer token.
    Iam {
        api_key: String,
        #[serde(default = "default_iam_url")]
        iam_url: String,
    },
    /// Pre-issued bearer token.
    Bearer { token: String },
    /// HTTP basic credentials (Cloud Pak deployments).
    Basic { username: String, password: String },
    /// No `Authorization` header.
    #[default]
    None,
}

impl AuthConfig {
    /// IAM credentials against the public IAM endpoint.
    pub fn iam(api_key: impl Into<String>) -> Self {
        Self::Iam {
            api_key: api_key.into(),
            iam_url: default_iam_url(),
        }
    }

    /// Short name used in logs.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Iam { .. } => "iam",
            Self::Bearer { .. } => "bearer",
            Self::Basic { .. } => "basic",
            Self::None => "none",
        }
    }

    pub fn validate(&self) -> StreamResult<()> {
        let empty = |field: &str| {
            StreamError::ConfigurationError(format!("{} authentication requires a non-empty {field}", self.scheme()))
        };
        match self {
            Self::Iam { api_key, iam_url } => {
                if api_key.trim().is_empty() {
                    return Err(empty("api_key"));
                }
                url::Url::parse(iam_url).map_err(|e| {
                    StreamError::ConfigurationError(format!("Invalid IAM URL '{iam_url}': {e}"))
                })?;
            }
            Self::Bearer { token } if token.trim().is_empty() => return Err(empty("token")),
            Self::Basic { username, .. } if username.is_empty() => return Err(empty("username")),
            _ => {}
        }
        Ok(())
    }
}

// =============================================================================
// IAM Token Management
// =============================================================================

/// IAM access token with expiration tracking.
#[derive(Debug, Clone)]
struct IamToken {
    access_token: String,
    expires_at: Instant,
}

impl IamToken {
    /// Check if the token is expired or about to expire (within 60 seconds).
    fn is_expired(&self) -> bool {
        self.expires_at <= Instant::now() + Duration::from_secs(60)
    }
}

/// IAM token response from IBM Cloud.
#[derive(Debug, Deserialize)]
struct IamTokenResponse {
    access_token: String,
    /// Token lifetime in seconds.
    expires_in: u64,
}

/// Resolves credentials into an `Authorization` header value.
///
/// Cloning is cheap; clones share the cached IAM token.
#[derive(Debug, Clone)]
pub struct Authenticator {
    config: AuthConfig,
    http: reqwest::Client,
    token: Arc<RwLock<Option<IamToken>>>,
}

impl Authenticator {
    pub fn new(config: AuthConfig) -> StreamResult<Self> {
        config.validate()?;

        // Explicit timeouts so a stalled IAM endpoint cannot hang a session
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| {
                StreamError::ConfigurationError(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            config,
            http,
            token: Arc::new(RwLock::new(None)),
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Header value for the upgrade request, or `None` when unauthenticated.
    pub async fn authorization(&self) -> StreamResult<Option<String>> {
        match &self.config {
            AuthConfig::Iam { api_key, iam_url } => {
                let token = self.iam_access_token(api_key, iam_url).await?;
                Ok(Some(format!("Bearer {token}")))
            }
            AuthConfig::Bearer { token } => Ok(Some(format!("Bearer {token}"))),
            AuthConfig::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                Ok(Some(format!("Basic {encoded}")))
            }
            AuthConfig::None => Ok(None),
        }
    }

    /// Get the current IAM token, refreshing if necessary.
    async fn iam_access_token(&self, api_key: &str, iam_url: &str) -> StreamResult<String> {
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref()
                && !token.is_expired()
            {
                return Ok(token.access_token.clone());
            }
        }

        let mut guard = self.token.write().await;
        // Another session may have refreshed while we waited for the write lock
        if let Some(token) = guard.as_ref()
            && !token.is_expired()
        {
            return Ok(token.access_token.clone());
        }

        let fresh = self.fetch_iam_token(api_key, iam_url).await?;
        let access_token = fresh.access_token.clone();
        *guard = Some(fresh);
        Ok(access_token)
    }

    async fn fetch_iam_token(&self, api_key: &str, iam_url: &str) -> StreamResult<IamToken> {
        debug!(iam_url = %iam_url, "Requesting IAM access token");

        let encoded_api_key: String = form_urlencoded::byte_serialize(api_key.as_bytes()).collect();

        let response = self
            .http
            .post(iam_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json")
            .body(format!("grant_type={IAM_GRANT_TYPE}&apikey={encoded_api_key}"))
            .send()
            .await
            .map_err(|e| {
                StreamError::AuthenticationFailed(format!("Failed to request IAM token: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(StreamError::AuthenticationFailed(format!(
                "IAM token request failed ({status}): {body}"
            )));
        }

        let token_response: IamTokenResponse = response.json().await.map_err(|e| {
            StreamError::AuthenticationFailed(format!("Failed to parse IAM token: {e}"))
        })?;

        let lifetime = token_response
            .expires_in
            .saturating_sub(TOKEN_SAFETY_MARGIN_SECS)
            .max(TOKEN_MIN_LIFETIME_SECS);
        info!(expires_in = token_response.expires_in, "IAM access token acquired");

        Ok(IamToken {
            access_token: token_response.access_token,
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_bearer_header() {
        let auth = Authenticator::new(AuthConfig::Bearer {
            token: "abc123".into(),
        })
        .unwrap();
        assert_eq!(
            auth.authorization().await.unwrap().as_deref(),
            Some("Bearer abc123")
        );
    }

    #[tokio::test]
    async fn test_basic_header_is_base64() {
        let auth = Authenticator::new(AuthConfig::Basic {
            username: "apikey".into(),
            password: "secret".into(),
        })
        .unwrap();
        // base64("apikey:secret")
        assert_eq!(
            auth.authorization().await.unwrap().as_deref(),
            Some("Basic YXBpa2V5OnNlY3JldA==")
        );
    }

    #[tokio::test]
    async fn test_no_auth_has_no_header() {
        let auth = Authenticator::new(AuthConfig::None).unwrap();
        assert_eq!(auth.authorization().await.unwrap(), None);
    }

    #[test]
    fn test_empty_credentials_rejected() {
        assert!(Authenticator::new(AuthConfig::iam("  ")).is_err());
        assert!(
            Authenticator::new(AuthConfig::Bearer {
                token: String::new()
            })
            .is_err()
        );
        let err = AuthConfig::Iam {
            api_key: "key".into(),
            iam_url: "not a url".into(),
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, StreamError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn test_iam_token_is_fetched_once_and_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/identity/token"))
            .and(header("Content-Type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("apikey=my-key"))
            .and(body_string_contains("grant_type=urn:ibm:params:oauth:grant-type:apikey"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "iam-token",
                "refresh_token": "unused",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let auth = Authenticator::new(AuthConfig::Iam {
            api_key: "my-key".into(),
            iam_url: format!("{}/identity/token", server.uri()),
        })
        .unwrap();

        let shared = auth.clone();
        assert_eq!(
            auth.authorization().await.unwrap().as_deref(),
            Some("Bearer iam-token")
        );
        assert_eq!(
            shared.authorization().await.unwrap().as_deref(),
            Some("Bearer iam-token")
        );
    }

    #[tokio::test]
    async fn test_iam_rejection_is_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/identity/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid apikey"))
            .mount(&server)
            .await;

        let auth = Authenticator::new(AuthConfig::Iam {
            api_key: "bad".into(),
            iam_url: format!("{}/identity/token", server.uri()),
        })
        .unwrap();

        let err = auth.authorization().await.unwrap_err();
        match err {
            StreamError::AuthenticationFailed(msg) => assert!(msg.contains("invalid apikey")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
