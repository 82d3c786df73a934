//! Error types for the auth module

use thiserror::Error;

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors that can occur while talking to the token endpoint
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token endpoint answered with an error response
    #[error("Token endpoint rejected the request: {0}")]
    Rejected(String),

    /// Refresh token was revoked or has expired
    #[error("Refresh token was revoked: {0}")]
    TokenRevoked(String),

    /// Token endpoint granted tokens but left out a required one
    #[error("Incomplete token grant: missing {0}")]
    IncompleteGrant(&'static str),

    /// Response body could not be parsed
    #[error("Malformed token response: {0}")]
    MalformedResponse(String),

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised while building an XOAUTH2 initial response
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingError {
    /// A required field was empty
    #[error("XOAUTH2 {0} must not be empty")]
    Empty(&'static str),

    /// A field contains a byte that would break the SASL framing
    #[error("XOAUTH2 {0} contains a control character")]
    ControlCharacter(&'static str),
}
