use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::{
    AuthUrl, ClientId, ClientSecret, HttpRequest, HttpResponse, RequestTokenError,
    ResourceOwnerPassword, ResourceOwnerUsername, TokenResponse, TokenUrl,
};
use reqwest::Client;
use sentiment_core::{CoreError, RedditApiError, RedditSettings};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const REDDIT_AUTHORIZE_URL: &str = "https://www.reddit.com/api/v1/authorize";

/// Refresh this long before Reddit would reject the token.
pub const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Reddit omits `expires_in` only in error cases; an hour is what it issues.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditToken {
    pub access_token: String,
    pub expires_at: SystemTime,
    pub scope: Vec<String>,
}

impl RedditToken {
    pub fn needs_refresh(&self) -> bool {
        SystemTime::now() + TOKEN_REFRESH_MARGIN >= self.expires_at
    }

    fn from_response(response: &BasicTokenResponse) -> Self {
        let lifetime = response.expires_in().unwrap_or(DEFAULT_TOKEN_LIFETIME);
        Self {
            access_token: response.access_token().secret().clone(),
            expires_at: SystemTime::now() + lifetime,
            scope: response
                .scopes()
                .map(|scopes| scopes.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantKind {
    /// Script app acting as a user account.
    Password,
    /// Application-only access.
    ClientCredentials,
}

/// Application-only or script-app OAuth for the Reddit API, with token caching.
#[derive(Debug)]
pub struct RedditAuthenticator {
    oauth: BasicClient,
    http: Client,
    username: Option<String>,
    password: Option<String>,
    token: Mutex<Option<RedditToken>>,
}

impl RedditAuthenticator {
    pub fn new(settings: &RedditSettings, http: Client) -> Result<Self, CoreError> {
        let token_url = TokenUrl::new(settings.token_url.clone()).map_err(|e| {
            CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                reason: format!("Invalid token URL: {}", e),
            })
        })?;
        let auth_url = AuthUrl::new(REDDIT_AUTHORIZE_URL.to_string()).map_err(|e| {
            CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                reason: format!("Invalid authorize URL: {}", e),
            })
        })?;

        let oauth = BasicClient::new(
            ClientId::new(settings.client_id.clone()),
            Some(ClientSecret::new(settings.client_secret.clone())),
            auth_url,
            Some(token_url),
        );

        Ok(Self {
            oauth,
            http,
            username: settings.username.clone(),
            password: settings.password.clone(),
            token: Mutex::new(None),
        })
    }

    pub fn grant_kind(&self) -> GrantKind {
        match (&self.username, &self.password) {
            (Some(_), Some(_)) => GrantKind::Password,
            _ => GrantKind::ClientCredentials,
        }
    }

    /// A valid bearer token, fetching a new one if the cached token is missing
    /// or about to expire.
    pub async fn access_token(&self) -> Result<String, CoreError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.needs_refresh() {
                return Ok(token.access_token.clone());
            }
            debug!("Reddit access token expiring, refreshing");
        }

        let token = self.request_token().await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// Drop the cached token so the next request re-authenticates.
    pub async fn invalidate(&self) {
        if self.token.lock().await.take().is_some() {
            warn!("Reddit rejected the access token, it will be re-issued");
        }
    }

    pub async fn cached_token(&self) -> Option<RedditToken> {
        self.token.lock().await.clone()
    }

    async fn request_token(&self) -> Result<RedditToken, CoreError> {
        let http = self.http.clone();
        let send = move |request: HttpRequest| send_token_request(http, request);

        let response = match (&self.username, &self.password) {
            (Some(username), Some(password)) => {
                let username = ResourceOwnerUsername::new(username.clone());
                let password = ResourceOwnerPassword::new(password.clone());
                self.oauth
                    .exchange_password(&username, &password)
                    .request_async(send)
                    .await
            }
            _ => {
                self.oauth
                    .exchange_client_credentials()
                    .request_async(send)
                    .await
            }
        }
        .map_err(map_token_error)?;

        let token = RedditToken::from_response(&response);
        info!(
            grant = ?self.grant_kind(),
            scopes = token.scope.len(),
            "Obtained Reddit access token"
        );
        Ok(token)
    }
}

/// Send an oauth2 token request through our reqwest client so Reddit sees the
/// configured User-Agent.
async fn send_token_request(
    http: Client,
    request: HttpRequest,
) -> Result<HttpResponse, reqwest::Error> {
    let mut builder = http
        .request(request.method, request.url.as_str())
        .body(request.body);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }

    let response = builder.send().await?;
    let status_code = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();

    Ok(HttpResponse {
        status_code,
        headers,
        body,
    })
}

fn map_token_error(error: RequestTokenError<reqwest::Error, BasicErrorResponse>) -> CoreError {
    match error {
        RequestTokenError::ServerResponse(response) => {
            CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                reason: response.to_string(),
            })
        }
        RequestTokenError::Request(e) if e.is_timeout() => {
            CoreError::RedditApi(RedditApiError::RequestTimeout)
        }
        RequestTokenError::Request(e) => CoreError::Network(e),
        RequestTokenError::Parse(e, body) => {
            CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                reason: format!(
                    "Unexpected token response ({}): {}",
                    e,
                    String::from_utf8_lossy(&body)
                ),
            })
        }
        RequestTokenError::Other(reason) => {
            CoreError::RedditApi(RedditApiError::AuthenticationFailed { reason })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(username: Option<&str>, password: Option<&str>) -> RedditSettings {
        RedditSettings {
            client_id: "test_client_id".to_string(),
            client_secret: "test_client_secret".to_string(),
            user_agent: "reddit-sentiment/0.1 by test_user".to_string(),
            username: username.map(str::to_string),
            password: password.map(str::to_string),
            api_base_url: "https://oauth.reddit.com".to_string(),
            token_url: "https://www.reddit.com/api/v1/access_token".to_string(),
            request_timeout_secs: 30,
        }
    }

    #[test]
    fn test_grant_kind_selection() {
        let app_only = RedditAuthenticator::new(&settings(None, None), Client::new()).unwrap();
        assert_eq!(app_only.grant_kind(), GrantKind::ClientCredentials);

        let script =
            RedditAuthenticator::new(&settings(Some("bot"), Some("hunter2")), Client::new())
                .unwrap();
        assert_eq!(script.grant_kind(), GrantKind::Password);
    }

    #[test]
    fn test_invalid_token_url_rejected() {
        let mut config = settings(None, None);
        config.token_url = "not a url".to_string();
        let result = RedditAuthenticator::new(&config, Client::new());
        assert!(matches!(
            result,
            Err(CoreError::RedditApi(RedditApiError::AuthenticationFailed { .. }))
        ));
    }

    #[test]
    fn test_token_expiry() {
        let now = SystemTime::now();

        let valid_token = RedditToken {
            access_token: "valid_token".to_string(),
            expires_at: now + Duration::from_secs(3600),
            scope: vec!["read".to_string()],
        };
        assert!(!valid_token.needs_refresh());

        let expiring_token = RedditToken {
            expires_at: now + Duration::from_secs(30),
            ..valid_token.clone()
        };
        assert!(expiring_token.needs_refresh());

        let expired_token = RedditToken {
            expires_at: now - Duration::from_secs(3600),
            ..valid_token
        };
        assert!(expired_token.needs_refresh());
    }

    #[test]
    fn test_token_serialization() {
        let token = RedditToken {
            access_token: "test_access_token".to_string(),
            expires_at: SystemTime::UNIX_EPOCH + Duration::from_secs(1640995200),
            scope: vec!["read".to_string()],
        };

        let serialized = serde_json::to_string(&token).unwrap();
        let deserialized: RedditToken = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.access_token, token.access_token);
        assert_eq!(deserialized.expires_at, token.expires_at);
        assert_eq!(deserialized.scope, token.scope);
    }

    #[test]
    fn test_token_error_mapping() {
        let error: RequestTokenError<reqwest::Error, BasicErrorResponse> =
            RequestTokenError::Other("empty response".to_string());
        assert!(matches!(
            map_token_error(error),
            CoreError::RedditApi(RedditApiError::AuthenticationFailed { ref reason }) if reason == "empty response"
        ));
    }
}
