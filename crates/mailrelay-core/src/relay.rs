//! Outbound leg: one sub-message to one recipient through the provider

use crate::CoreResult;
use async_trait::async_trait;
use mailrelay_auth::{
    encode_xoauth2, gmail, CredentialRecord, OAuth2Client, TokenAccessor, TokenPolicy,
    TokenSource,
};
use mailrelay_smtp::{OutgoingMessage, SmtpClient};
use tracing::{debug, info};

/// A single outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundDelivery {
    /// Inbound reverse path; may be empty
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: Vec<u8>,
}

/// Something that can submit an [`OutboundDelivery`]
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, delivery: &OutboundDelivery) -> CoreResult<()>;
}

/// Submits deliveries to the provider as the configured mailbox
///
/// Every delivery obtains an access token under the configured
/// [`TokenPolicy`], authenticates with XOAUTH2 and sends the message. The
/// mailbox identity is both the SASL user and the envelope sender.
pub struct OutboundRelay<S = OAuth2Client> {
    credentials: CredentialRecord,
    tokens: TokenAccessor<S>,
    smtp: SmtpClient,
}

impl OutboundRelay<OAuth2Client> {
    /// Relay through Gmail's submission server
    pub fn gmail(credentials: CredentialRecord, policy: TokenPolicy) -> CoreResult<Self> {
        let oauth = OAuth2Client::new(gmail::oauth2_config(
            &credentials.client_id,
            &credentials.client_secret,
        ))?;

        Ok(Self::new(
            credentials,
            TokenAccessor::new(oauth, policy),
            SmtpClient::gmail(),
        ))
    }
}

impl<S: TokenSource> OutboundRelay<S> {
    pub fn new(credentials: CredentialRecord, tokens: TokenAccessor<S>, smtp: SmtpClient) -> Self {
        Self {
            credentials,
            tokens,
            smtp,
        }
    }

    pub fn mailbox_identity(&self) -> &str {
        &self.credentials.mailbox_identity
    }
}

#[async_trait]
impl<S: TokenSource> Deliver for OutboundRelay<S> {
    async fn deliver(&self, delivery: &OutboundDelivery) -> CoreResult<()> {
        let identity = self.mailbox_identity();

        let token = self.tokens.current_access_token(&self.credentials).await?;
        debug!("Got access token for {}", identity);

        let auth_blob = encode_xoauth2(identity, &token.secret)?;

        let from = if delivery.from.is_empty() {
            identity
        } else {
            delivery.from.as_str()
        };
        let message = OutgoingMessage::new(identity, &delivery.to, &delivery.subject)
            .from_header(from)
            .body(delivery.body.clone());

        self.smtp
            .send_xoauth2(&self.credentials.client_id, &auth_blob, &message)
            .await?;

        info!(
            "Relayed {:?} to {} via {}:{}",
            delivery.subject,
            delivery.to,
            self.smtp.host(),
            self.smtp.port()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoreError;
    use mailrelay_auth::{AccessToken, AuthError, AuthResult};
    use mailrelay_smtp::DeliveryStage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedSource {
        result: Result<&'static str, &'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenSource for FixedSource {
        async fn refresh_access_token(&self, _refresh_token: &str) -> AuthResult<AccessToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.result {
                Ok(secret) => Ok(AccessToken {
                    secret: secret.to_string(),
                    expires_in: Duration::from_secs(3600),
                }),
                Err(message) => Err(AuthError::TokenRevoked(message.to_string())),
            }
        }
    }

    fn credentials() -> CredentialRecord {
        CredentialRecord {
            mailbox_identity: "alerts@example.com".to_string(),
            client_id: "id.apps.example".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "1//refresh".to_string(),
        }
    }

    fn delivery() -> OutboundDelivery {
        OutboundDelivery {
            from: String::new(),
            to: "oncall@example.org".to_string(),
            subject: "Alert".to_string(),
            body: b"disk full on db1".to_vec(),
        }
    }

    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_token_failure_stops_before_smtp() {
        let source = FixedSource {
            result: Err("invalid_grant"),
            calls: AtomicUsize::new(0),
        };
        let relay = OutboundRelay::new(
            credentials(),
            TokenAccessor::new(source, TokenPolicy::AlwaysRefresh),
            SmtpClient::new("127.0.0.1", closed_port().await),
        );

        let err = relay.deliver(&delivery()).await.unwrap_err();
        assert!(matches!(err, CoreError::Auth(AuthError::TokenRevoked(_))));
        assert_eq!(err.delivery_stage(), None);
    }

    #[tokio::test]
    async fn test_connect_failure_reports_stage() {
        let source = FixedSource {
            result: Ok("ya29.token"),
            calls: AtomicUsize::new(0),
        };
        let relay = OutboundRelay::new(
            credentials(),
            TokenAccessor::new(source, TokenPolicy::AlwaysRefresh),
            SmtpClient::new("127.0.0.1", closed_port().await)
                .timeout(Some(Duration::from_secs(5))),
        );

        let err = relay.deliver(&delivery()).await.unwrap_err();
        assert_eq!(err.delivery_stage(), Some(DeliveryStage::Connect));
    }

    #[tokio::test]
    async fn test_token_fetched_per_delivery() {
        let source = FixedSource {
            result: Ok("ya29.token"),
            calls: AtomicUsize::new(0),
        };
        let relay = OutboundRelay::new(
            credentials(),
            TokenAccessor::new(source, TokenPolicy::AlwaysRefresh),
            SmtpClient::new("127.0.0.1", closed_port().await),
        );

        let _ = relay.deliver(&delivery()).await;
        let _ = relay.deliver(&delivery()).await;
        assert_eq!(relay.tokens.source().calls.load(Ordering::SeqCst), 2);
    }
}
