//! Error types for SMTP operations

use std::fmt;
use thiserror::Error;

/// Result type for SMTP operations
pub type SmtpResult<T> = Result<T, SmtpError>;

/// Step of an outbound submission that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStage {
    /// TCP connect, greeting or first EHLO
    Connect,
    /// STARTTLS negotiation
    Tls,
    /// AUTH XOAUTH2
    Authenticate,
    /// MAIL FROM / RCPT TO / DATA
    Transaction,
}

impl fmt::Display for DeliveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeliveryStage::Connect => "connect",
            DeliveryStage::Tls => "tls",
            DeliveryStage::Authenticate => "authenticate",
            DeliveryStage::Transaction => "transaction",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during SMTP operations
#[derive(Debug, Error)]
pub enum SmtpError {
    /// Connection failed
    #[error("Failed to connect to SMTP server: {0}")]
    ConnectionFailed(String),

    /// TLS error
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Authentication failed
    #[error("SMTP authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Failed to send message
    #[error("Failed to send message: {0}")]
    SendFailed(String),

    /// Invalid email address
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Message building error
    #[error("Failed to build message: {0}")]
    MessageBuildError(String),

    /// Inbound session IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SmtpError {
    /// The submission step this error belongs to, if it came from the wire
    pub fn stage(&self) -> Option<DeliveryStage> {
        match self {
            SmtpError::ConnectionFailed(_) => Some(DeliveryStage::Connect),
            SmtpError::TlsError(_) => Some(DeliveryStage::Tls),
            SmtpError::AuthenticationFailed(_) => Some(DeliveryStage::Authenticate),
            SmtpError::SendFailed(_) => Some(DeliveryStage::Transaction),
            _ => None,
        }
    }
}
