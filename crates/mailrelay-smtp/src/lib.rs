//! SMTP implementation for mailrelay
//!
//! Provides the outbound submission client with XOAUTH2 support and the
//! inbound SMTP session used by the loopback listener.

mod client;
mod error;
pub mod server;

pub use client::{build_lettre_message, OutgoingMessage, SmtpClient};
pub use error::{DeliveryStage, SmtpError, SmtpResult};
