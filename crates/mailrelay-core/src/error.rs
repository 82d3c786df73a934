//! Error types for the core module

use mailrelay_auth::{AuthError, EncodingError};
use mailrelay_smtp::{DeliveryStage, SmtpError};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// Run mode was started before configuring
    #[error("No configuration file at {}", .0.display())]
    ConfigMissing(PathBuf),

    /// Configuration file exists but cannot be used
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Inbound data lacks something the splitter needs
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Token endpoint error
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// XOAUTH2 blob could not be built
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Outbound submission error
    #[error("Delivery error: {0}")]
    Delivery(#[from] SmtpError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CoreError {
    /// Submission step that failed, for delivery errors
    pub fn delivery_stage(&self) -> Option<DeliveryStage> {
        match self {
            CoreError::Delivery(e) => e.stage(),
            _ => None,
        }
    }
}
