//! Long-lived credentials the relay runs with

use serde::{Deserialize, Serialize};

/// Stored OAuth2 credentials for the relayed mailbox
///
/// Loaded once at startup and never mutated; a refresh grant does not
/// rotate the stored refresh token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Mailbox the tokens were issued for
    #[serde(rename = "user")]
    pub mailbox_identity: String,
    /// OAuth2 client ID
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
    /// Refresh token from the authorization-code grant
    pub refresh_token: String,
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("mailbox_identity", &self.mailbox_identity)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .finish()
    }
}
