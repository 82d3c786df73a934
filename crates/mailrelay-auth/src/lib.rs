//! Authentication module for mailrelay
//!
//! Provides the OAuth2 side of the relay:
//! 1. Consent URL and authorization-code exchange (used once, when configuring)
//! 2. Refresh-token grant and the access-token policy used per delivery
//! 3. SASL XOAUTH2 encoding of the resulting bearer token

mod credentials;
mod error;
mod oauth2;
mod token;
mod xoauth2;

pub use credentials::CredentialRecord;
pub use error::{AuthError, AuthResult, EncodingError};
pub use self::oauth2::{
    format_url_params, url_escape, AccessToken, OAuth2Client, OAuth2Config, TokenPair,
    TokenSource,
};
pub use token::{TokenAccessor, TokenPolicy};
pub use xoauth2::{encode as encode_xoauth2, XOAuth2Token};

/// Gmail OAuth2 configuration
pub mod gmail {
    use super::OAuth2Config;

    /// Gmail OAuth2 scope for full mail access
    pub const MAIL_SCOPE: &str = "https://mail.google.com/";

    /// Google Accounts endpoints
    pub const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
    pub const TOKEN_URL: &str = "https://accounts.google.com/o/oauth2/token";

    /// Out-of-band redirect target; the user copies the code from this page
    pub const REDIRECT_URI: &str = "https://oauth2.dance/";

    /// Gmail SMTP submission server
    pub const SMTP_HOST: &str = "smtp.gmail.com";
    pub const SMTP_PORT: u16 = 587;

    /// Create Gmail OAuth2 configuration
    ///
    /// Note: You must register your own OAuth2 client at
    /// https://console.cloud.google.com/ to obtain these values
    pub fn oauth2_config(client_id: &str, client_secret: &str) -> OAuth2Config {
        OAuth2Config {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            auth_url: AUTH_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            redirect_uri: REDIRECT_URI.to_string(),
        }
    }
}
