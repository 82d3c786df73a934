//! XOAUTH2 SASL mechanism for SMTP
//!
//! Implements the XOAUTH2 authentication mechanism as specified at:
//! https://developers.google.com/workspace/gmail/imap/xoauth2-protocol

use crate::EncodingError;
use base64::prelude::*;

/// XOAUTH2 token for SMTP authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XOAuth2Token {
    /// Mailbox identity the token was issued for
    identity: String,
    /// OAuth2 access token
    access_token: String,
}

impl XOAuth2Token {
    /// Create a new XOAUTH2 token
    ///
    /// Fails if either field is empty or carries `\x01`, CR or LF, all of
    /// which would corrupt the `user=...\x01auth=...\x01\x01` framing.
    pub fn new(identity: &str, access_token: &str) -> Result<Self, EncodingError> {
        check_field("identity", identity)?;
        check_field("access token", access_token)?;

        Ok(Self {
            identity: identity.to_string(),
            access_token: access_token.to_string(),
        })
    }

    /// Get the mailbox identity
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Get the access token
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Generate the XOAUTH2 authentication string
    ///
    /// Format: "user={identity}\x01auth=Bearer {token}\x01\x01"
    pub fn auth_string(&self) -> String {
        format!(
            "user={}\x01auth=Bearer {}\x01\x01",
            self.identity, self.access_token
        )
    }

    /// Generate the base64-encoded XOAUTH2 authentication string
    ///
    /// This is the argument of `AUTH XOAUTH2`
    pub fn auth_string_base64(&self) -> String {
        BASE64_STANDARD.encode(self.auth_string())
    }
}

/// Encode an identity and access token into an `AUTH XOAUTH2` argument
pub fn encode(identity: &str, access_token: &str) -> Result<String, EncodingError> {
    Ok(XOAuth2Token::new(identity, access_token)?.auth_string_base64())
}

fn check_field(name: &'static str, value: &str) -> Result<(), EncodingError> {
    if value.is_empty() {
        return Err(EncodingError::Empty(name));
    }
    if value.chars().any(|c| matches!(c, '\x01' | '\r' | '\n')) {
        return Err(EncodingError::ControlCharacter(name));
    }
    Ok(())
}
