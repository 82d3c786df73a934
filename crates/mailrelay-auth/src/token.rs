//! Access-token retrieval for the outbound leg
//!
//! The default policy asks the token endpoint for a new access token on
//! every delivery. With [`TokenPolicy::Cache`] a token is reused until it is
//! about to expire.

use crate::{AccessToken, AuthResult, CredentialRecord, TokenSource};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// When to go back to the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenPolicy {
    /// Refresh on every call
    #[default]
    AlwaysRefresh,
    /// Reuse a token while more than `skew` of its lifetime remains
    Cache { skew: Duration },
}

#[derive(Debug, Clone)]
struct CachedToken {
    secret: String,
    expires_at: Instant,
}

/// Hands out access tokens for a credential record
pub struct TokenAccessor<S> {
    source: S,
    policy: TokenPolicy,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl<S: TokenSource> TokenAccessor<S> {
    /// Create a new accessor backed by `source`
    pub fn new(source: S, policy: TokenPolicy) -> Self {
        Self {
            source,
            policy,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Get the configured policy
    pub fn policy(&self) -> TokenPolicy {
        self.policy
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Return an access token valid for at least `expires_in` from now
    pub async fn current_access_token(&self, record: &CredentialRecord) -> AuthResult<AccessToken> {
        let skew = match self.policy {
            TokenPolicy::AlwaysRefresh => {
                return self.source.refresh_access_token(&record.refresh_token).await;
            }
            TokenPolicy::Cache { skew } => skew,
        };

        let mut cache = self.cache.lock().await;
        let now = Instant::now();

        if let Some(cached) = cache.get(&record.mailbox_identity) {
            if now + skew < cached.expires_at {
                debug!("Reusing cached access token for {}", record.mailbox_identity);
                return Ok(AccessToken {
                    secret: cached.secret.clone(),
                    expires_in: cached.expires_at - now,
                });
            }
        }

        let token = self
            .source
            .refresh_access_token(&record.refresh_token)
            .await?;

        cache.insert(
            record.mailbox_identity.clone(),
            CachedToken {
                secret: token.secret.clone(),
                expires_at: now + token.expires_in,
            },
        );

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuthError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        lifetime: Duration,
    }

    impl CountingSource {
        fn new(lifetime: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                lifetime,
            }
        }
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn refresh_access_token(&self, refresh_token: &str) -> AuthResult<AccessToken> {
            if refresh_token == "revoked" {
                return Err(AuthError::TokenRevoked("revoked".to_string()));
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AccessToken {
                secret: format!("token-{}", n),
                expires_in: self.lifetime,
            })
        }
    }

    fn record(refresh_token: &str) -> CredentialRecord {
        CredentialRecord {
            mailbox_identity: "alerts@example.com".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: refresh_token.to_string(),
        }
    }

    #[tokio::test]
    async fn test_always_refresh_hits_source_every_call() {
        let accessor = TokenAccessor::new(
            CountingSource::new(Duration::from_secs(3600)),
            TokenPolicy::AlwaysRefresh,
        );

        let first = accessor.current_access_token(&record("1//r")).await.unwrap();
        let second = accessor.current_access_token(&record("1//r")).await.unwrap();

        assert_eq!(first.secret, "token-1");
        assert_eq!(second.secret, "token-2");
        assert_eq!(accessor.source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_reuses_until_skew() {
        let accessor = TokenAccessor::new(
            CountingSource::new(Duration::from_secs(3600)),
            TokenPolicy::Cache {
                skew: Duration::from_secs(300),
            },
        );

        let first = accessor.current_access_token(&record("1//r")).await.unwrap();
        tokio::time::advance(Duration::from_secs(1000)).await;
        let second = accessor.current_access_token(&record("1//r")).await.unwrap();

        assert_eq!(first.secret, "token-1");
        assert_eq!(second.secret, "token-1");
        assert_eq!(second.expires_in, Duration::from_secs(2600));

        // Inside the skew window the token is treated as expired
        tokio::time::advance(Duration::from_secs(2400)).await;
        let third = accessor.current_access_token(&record("1//r")).await.unwrap();
        assert_eq!(third.secret, "token-2");
        assert_eq!(accessor.source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let accessor = TokenAccessor::new(
            CountingSource::new(Duration::from_secs(3600)),
            TokenPolicy::Cache {
                skew: Duration::from_secs(60),
            },
        );

        let err = accessor
            .current_access_token(&record("revoked"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenRevoked(_)));

        let token = accessor.current_access_token(&record("1//r")).await.unwrap();
        assert_eq!(token.secret, "token-1");
    }
}
