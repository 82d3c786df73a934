//! OAuth2 authorization-code and refresh-token grants
//!
//! The relay uses the "installed application" flow: the user opens the
//! consent URL in a browser, pastes the verification code back, and the
//! code is exchanged for a long-lived refresh token. Every later access
//! token comes from the refresh grant.

use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use oauth2::{
    basic::{BasicClient, BasicErrorResponse, BasicErrorResponseType},
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, RedirectUrl, RefreshToken,
    RequestTokenError, TokenResponse, TokenUrl,
};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// OAuth2 provider configuration
#[derive(Debug, Clone)]
pub struct OAuth2Config {
    /// OAuth2 client ID
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
    /// Authorization endpoint URL
    pub auth_url: String,
    /// Token endpoint URL
    pub token_url: String,
    /// Out-of-band redirect URI registered for the client
    pub redirect_uri: String,
}

/// Short-lived access token returned by a refresh grant
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// Bearer token value
    pub secret: String,
    /// Lifetime counted from the moment the endpoint answered
    pub expires_in: Duration,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"[redacted]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Token pair returned by the authorization-code grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    /// Access token for immediate use
    pub access_token: AccessToken,
    /// Refresh token for obtaining new access tokens
    pub refresh_token: String,
}

/// Anything that can turn a refresh token into an access token
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Exchange `refresh_token` for a fresh access token
    async fn refresh_access_token(&self, refresh_token: &str) -> AuthResult<AccessToken>;
}

/// Client for the provider's authorization and token endpoints
pub struct OAuth2Client {
    config: OAuth2Config,
    client: BasicClient,
}

impl OAuth2Client {
    /// Create a new OAuth2 client
    pub fn new(config: OAuth2Config) -> AuthResult<Self> {
        let auth_url = AuthUrl::new(config.auth_url.clone())
            .map_err(|e| AuthError::InvalidConfig(format!("Invalid auth URL: {}", e)))?;
        let token_url = TokenUrl::new(config.token_url.clone())
            .map_err(|e| AuthError::InvalidConfig(format!("Invalid token URL: {}", e)))?;
        let redirect_url = RedirectUrl::new(config.redirect_uri.clone())
            .map_err(|e| AuthError::InvalidConfig(format!("Invalid redirect URL: {}", e)))?;

        // Credentials travel in the form body, not in a Basic auth header
        let client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            auth_url,
            Some(token_url),
        )
        .set_auth_type(AuthType::RequestBody)
        .set_redirect_uri(redirect_url);

        Ok(Self { config, client })
    }

    /// Get the client configuration
    pub fn config(&self) -> &OAuth2Config {
        &self.config
    }

    /// Build the consent URL the user has to visit
    ///
    /// Parameters are sorted by key and escaped with the OAuth-safe set, so
    /// the same inputs always produce the same URL.
    pub fn authorization_url(&self, scope: &str) -> AuthResult<Url> {
        let mut url = Url::parse(&self.config.auth_url)
            .map_err(|e| AuthError::InvalidConfig(format!("Invalid auth URL: {}", e)))?;

        let query = format_url_params(&[
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("scope", scope),
            ("response_type", "code"),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ]);
        url.set_query(Some(&query));

        Ok(url)
    }

    /// Exchange a verification code for an access and refresh token
    pub async fn exchange_code(&self, code: &str) -> AuthResult<TokenPair> {
        info!("Exchanging authorization code for tokens");

        let token_response = self
            .client
            .exchange_code(AuthorizationCode::new(code.trim().to_string()))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(map_token_error)?;

        let refresh_token = token_response
            .refresh_token()
            .map(|t| t.secret().clone())
            .ok_or(AuthError::IncompleteGrant("refresh_token"))?;

        Ok(TokenPair {
            access_token: AccessToken {
                secret: token_response.access_token().secret().clone(),
                expires_in: token_response.expires_in().unwrap_or_default(),
            },
            refresh_token,
        })
    }

    /// Refresh an access token using a refresh token
    pub async fn refresh_token(&self, refresh_token: &str) -> AuthResult<AccessToken> {
        let token_response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(map_token_error)?;

        let expires_in = token_response.expires_in().unwrap_or_default();
        debug!("Access token refreshed, valid for {}s", expires_in.as_secs());

        Ok(AccessToken {
            secret: token_response.access_token().secret().clone(),
            expires_in,
        })
    }
}

#[async_trait]
impl TokenSource for OAuth2Client {
    async fn refresh_access_token(&self, refresh_token: &str) -> AuthResult<AccessToken> {
        self.refresh_token(refresh_token).await
    }
}

/// Escape a value for a query string; only letters, digits and `~-._`
/// are left as-is (OAuth 1.0 section 5.1).
pub fn url_escape(text: &str) -> String {
    urlencoding::encode(text).into_owned()
}

/// Format parameters as a query string, ordered by key
pub fn format_url_params(params: &[(&str, &str)]) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    sorted
        .iter()
        .map(|(key, value)| format!("{}={}", key, url_escape(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn map_token_error<RE>(err: RequestTokenError<RE, BasicErrorResponse>) -> AuthError
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => {
            let detail = response
                .error_description()
                .cloned()
                .unwrap_or_else(|| response.error().to_string());
            match response.error() {
                BasicErrorResponseType::InvalidGrant => AuthError::TokenRevoked(detail),
                _ => AuthError::Rejected(detail),
            }
        }
        RequestTokenError::Request(e) => AuthError::NetworkError(e.to_string()),
        RequestTokenError::Parse(e, _) => AuthError::MalformedResponse(e.to_string()),
        RequestTokenError::Other(message) => AuthError::Rejected(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve one canned HTTP response and hand back the raw request
    async fn token_endpoint(status: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/token", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (url, handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())?
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    fn client_for(token_url: &str) -> OAuth2Client {
        OAuth2Client::new(OAuth2Config {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            auth_url: "https://accounts.example/o/oauth2/auth".to_string(),
            token_url: token_url.to_string(),
            redirect_uri: "https://oauth2.dance/".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_authorization_url_is_sorted_and_escaped() {
        let mut config = client_for("https://accounts.example/o/oauth2/token")
            .config()
            .clone();
        config.client_id = "abc".to_string();
        let client = OAuth2Client::new(config).unwrap();

        let first = client.authorization_url("https://mail.example/").unwrap();
        let second = client.authorization_url("https://mail.example/").unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first.query(),
            Some(
                "access_type=offline&client_id=abc&prompt=consent\
                 &redirect_uri=https%3A%2F%2Foauth2.dance%2F&response_type=code\
                 &scope=https%3A%2F%2Fmail.example%2F"
            )
        );
        assert!(first
            .as_str()
            .starts_with("https://accounts.example/o/oauth2/auth?"));
    }

    #[test]
    fn test_url_escape_keeps_oauth_safe_set() {
        assert_eq!(url_escape("aZ09~-._"), "aZ09~-._");
        assert_eq!(url_escape("a b/c+d"), "a%20b%2Fc%2Bd");
    }

    #[tokio::test]
    async fn test_refresh_returns_access_token() {
        let (url, request) = token_endpoint(
            "200 OK",
            r#"{"access_token":"ya29.fresh","expires_in":3599,"token_type":"Bearer"}"#,
        )
        .await;

        let token = client_for(&url).refresh_token("1//refresh").await.unwrap();
        assert_eq!(token.secret, "ya29.fresh");
        assert_eq!(token.expires_in, Duration::from_secs(3599));

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /token"));
        assert!(request.contains("grant_type=refresh_token"));
        assert!(request.contains("refresh_token=1%2F%2Frefresh"));
        assert!(request.contains("client_secret=client-secret"));
    }

    #[tokio::test]
    async fn test_refresh_error_status_is_auth_error() {
        let (url, _request) = token_endpoint(
            "401 Unauthorized",
            r#"{"error":"invalid_client","error_description":"The OAuth client was not found."}"#,
        )
        .await;

        let err = client_for(&url).refresh_token("1//refresh").await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected(ref d) if d.contains("not found")));
    }

    #[tokio::test]
    async fn test_refresh_revoked_token() {
        let (url, _request) = token_endpoint(
            "400 Bad Request",
            r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
        )
        .await;

        let err = client_for(&url).refresh_token("1//stale").await.unwrap_err();
        assert!(matches!(err, AuthError::TokenRevoked(_)));
    }

    #[tokio::test]
    async fn test_refresh_malformed_body() {
        let (url, _request) = token_endpoint("200 OK", "{not json").await;

        let err = client_for(&url).refresh_token("1//refresh").await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_exchange_code_requires_refresh_token() {
        let (url, request) = token_endpoint(
            "200 OK",
            r#"{"access_token":"ya29.first","expires_in":3599,"token_type":"Bearer"}"#,
        )
        .await;

        let err = client_for(&url).exchange_code("4/code").await.unwrap_err();
        assert!(matches!(err, AuthError::IncompleteGrant("refresh_token")));

        let request = request.await.unwrap();
        assert!(request.contains("grant_type=authorization_code"));
        assert!(request.contains("redirect_uri=https%3A%2F%2Foauth2.dance%2F"));
    }

    #[tokio::test]
    async fn test_exchange_code_returns_pair() {
        let (url, _request) = token_endpoint(
            "200 OK",
            r#"{"access_token":"ya29.first","expires_in":3599,"refresh_token":"1//keep","token_type":"Bearer"}"#,
        )
        .await;

        let pair = client_for(&url).exchange_code("4/code\n").await.unwrap();
        assert_eq!(pair.refresh_token, "1//keep");
        assert_eq!(pair.access_token.secret, "ya29.first");
    }
}
