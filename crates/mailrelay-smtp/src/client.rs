//! SMTP submission client
//!
//! Drives a single submission step by step (connect, STARTTLS, AUTH
//! XOAUTH2, mail transaction) so that a failure can be attributed to the
//! step that caused it.

use crate::{SmtpError, SmtpResult};
use lettre::{
    address::Envelope,
    message::{header::ContentType, Mailbox},
    transport::smtp::{
        client::{AsyncSmtpConnection, TlsParameters},
        extension::ClientId,
    },
    Address, Message,
};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Email message to submit
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Envelope sender; must be the authenticated mailbox
    pub sender: String,
    /// From header
    pub from: String,
    /// Single recipient, used for both the To header and the envelope
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain text body
    pub body: Vec<u8>,
}

impl OutgoingMessage {
    /// Create a new message
    pub fn new(sender: impl Into<String>, to: impl Into<String>, subject: impl Into<String>) -> Self {
        let sender = sender.into();
        Self {
            from: sender.clone(),
            sender,
            to: to.into(),
            subject: subject.into(),
            body: Vec::new(),
        }
    }

    /// Set the From header, if it differs from the envelope sender
    pub fn from_header(mut self, address: impl Into<String>) -> Self {
        self.from = address.into();
        self
    }

    /// Set the plain text body
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// SMTP client for the provider's submission endpoint
#[derive(Debug, Clone)]
pub struct SmtpClient {
    host: String,
    port: u16,
    timeout: Option<Duration>,
}

impl SmtpClient {
    /// Create a new SMTP client
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: None,
        }
    }

    /// Create a Gmail SMTP client
    pub fn gmail() -> Self {
        Self::new("smtp.gmail.com", 587)
    }

    /// Bound the connect step; later steps use the transport defaults
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Submission host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Submission port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Send a message using XOAUTH2 authentication
    ///
    /// `hello_name` is announced in EHLO and `auth_blob` is the base64
    /// XOAUTH2 initial response.
    pub async fn send_xoauth2(
        &self,
        hello_name: &str,
        auth_blob: &str,
        message: &OutgoingMessage,
    ) -> SmtpResult<()> {
        let email = build_lettre_message(message)?;
        let envelope = build_envelope(message)?;
        let hello = ClientId::Domain(hello_name.to_string());

        debug!("Connecting to {}:{}", self.host, self.port);
        let mut conn = AsyncSmtpConnection::connect_tokio1(
            (self.host.as_str(), self.port),
            self.timeout,
            &hello,
            None,
            None,
        )
        .await
        .map_err(|e| SmtpError::ConnectionFailed(e.to_string()))?;

        let result = self
            .submit(&mut conn, &hello, auth_blob, &envelope, &email.formatted())
            .await;

        match result {
            Ok(()) => {
                if let Err(e) = conn.quit().await {
                    warn!("QUIT after successful send failed: {}", e);
                }
                info!("Email to {} sent successfully", message.to);
                Ok(())
            }
            Err(e) => {
                conn.abort().await;
                Err(e)
            }
        }
    }

    async fn submit(
        &self,
        conn: &mut AsyncSmtpConnection,
        hello: &ClientId,
        auth_blob: &str,
        envelope: &Envelope,
        email: &[u8],
    ) -> SmtpResult<()> {
        let tls = TlsParameters::new(self.host.clone())
            .map_err(|e| SmtpError::TlsError(e.to_string()))?;
        conn.starttls(tls, hello)
            .await
            .map_err(|e| SmtpError::TlsError(e.to_string()))?;

        let response = conn
            .command(format!("AUTH XOAUTH2 {}\r\n", auth_blob))
            .await
            .map_err(|e| SmtpError::AuthenticationFailed(e.to_string()))?;

        // A 334 here carries an error document; the server expects an empty
        // line before it sends the final 5xx.
        if response.has_code(334) {
            let detail = response.message().collect::<Vec<_>>().join(" ");
            let _ = conn.command("\r\n").await;
            return Err(SmtpError::AuthenticationFailed(detail));
        }

        conn.send(envelope, email)
            .await
            .map_err(|e| SmtpError::SendFailed(e.to_string()))?;

        Ok(())
    }
}

/// Build a lettre Message from OutgoingMessage
pub fn build_lettre_message(msg: &OutgoingMessage) -> SmtpResult<Message> {
    let sender: Address = parse_address(&msg.sender)?;

    // A local submitter may use a bare name such as "root"; fall back to the
    // authenticated mailbox rather than dropping the delivery.
    let from = match msg.from.parse::<Address>() {
        Ok(address) => address,
        Err(e) => {
            warn!("Unusable From address {:?} ({}), using {}", msg.from, e, sender);
            sender.clone()
        }
    };

    Message::builder()
        .from(Mailbox::new(None, from))
        .to(Mailbox::new(None, parse_address(&msg.to)?))
        .subject(&msg.subject)
        .header(ContentType::TEXT_PLAIN)
        .body(msg.body.clone())
        .map_err(|e| SmtpError::MessageBuildError(e.to_string()))
}

fn build_envelope(msg: &OutgoingMessage) -> SmtpResult<Envelope> {
    Envelope::new(Some(parse_address(&msg.sender)?), vec![parse_address(&msg.to)?])
        .map_err(|e| SmtpError::MessageBuildError(e.to_string()))
}

fn parse_address(address: &str) -> SmtpResult<Address> {
    address
        .parse()
        .map_err(|e| SmtpError::InvalidAddress(format!("{}: {}", address, e)))
}
