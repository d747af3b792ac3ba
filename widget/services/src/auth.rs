//! Credential exchange with in-memory caching.
//!
//! A session id is traded for a short-lived bearer token. Issued tokens
//! nominally last 60 minutes; the cache keeps them for 55, leaving a
//! 5-minute safety margin so a token is never presented near expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use livechat_core::ChatError;

/// Token as issued by the exchange endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    pub token: String,
    /// Nominal validity in seconds.
    pub expires_in: u64,
}

/// A cached bearer credential.
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub token: String,
    pub expires_at: Instant,
}

/// Exchange endpoint seam.
#[async_trait]
pub trait CredentialExchanger: Send + Sync {
    async fn exchange(&self, session_id: &str) -> Result<IssuedToken, ChatError>;
}

/// `POST {base_url}/custom-token {session_id}` → `{token, expires_in}`.
pub struct HttpCredentialExchanger {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCredentialExchanger {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Serialize)]
struct ExchangeRequest<'a> {
    session_id: &'a str,
}

#[async_trait]
impl CredentialExchanger for HttpCredentialExchanger {
    async fn exchange(&self, session_id: &str) -> Result<IssuedToken, ChatError> {
        let url = format!("{}/custom-token", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&ExchangeRequest { session_id })
            .send()
            .await
            .map_err(|err| ChatError::Auth(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ChatError::Auth(format!(
                "exchange returned status {}",
                response.status()
            )));
        }

        response
            .json::<IssuedToken>()
            .await
            .map_err(|err| ChatError::Auth(err.to_string()))
    }
}

/// Exchanges session ids for bearer tokens, caching per session id.
///
/// A cached token is reused while its (margin-adjusted) expiry is in the
/// future; a miss or expiry triggers exactly one exchange call. Exchange
/// failure is fatal to the current operation — callers must not retry in
/// a tight loop.
pub struct AuthTokenProvider {
    exchanger: Arc<dyn CredentialExchanger>,
    validity: Duration,
    cache: Mutex<HashMap<String, AuthToken>>,
}

impl AuthTokenProvider {
    pub fn new(exchanger: Arc<dyn CredentialExchanger>, validity: Duration) -> Self {
        Self {
            exchanger,
            validity,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_token(&self, session_id: &str) -> Result<AuthToken, ChatError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(session_id) {
            if cached.expires_at > Instant::now() {
                debug!(session_id, "Auth token cache hit");
                return Ok(cached.clone());
            }
        }

        let issued = self.exchanger.exchange(session_id).await?;
        // Cache validity is capped by our fixed window regardless of what
        // the endpoint reports, keeping the safety margin.
        let lifetime = self.validity.min(Duration::from_secs(issued.expires_in));
        let token = AuthToken {
            token: issued.token,
            expires_at: Instant::now() + lifetime,
        };
        cache.insert(session_id.to_string(), token.clone());
        debug!(session_id, "Auth token refreshed");
        Ok(token)
    }

    /// Drop any cached token for a session (used when the session rotates).
    pub async fn invalidate(&self, session_id: &str) {
        self.cache.lock().await.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExchanger {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingExchanger {
        fn new(fail: bool) -> Self {
            Self { calls: AtomicUsize::new(0), fail }
        }
    }

    #[async_trait]
    impl CredentialExchanger for CountingExchanger {
        async fn exchange(&self, _session_id: &str) -> Result<IssuedToken, ChatError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(ChatError::Auth("status 500".into()));
            }
            Ok(IssuedToken {
                token: format!("token-{n}"),
                expires_in: 3600,
            })
        }
    }

    #[tokio::test]
    async fn test_cache_hit_avoids_network() {
        let exchanger = Arc::new(CountingExchanger::new(false));
        let provider = AuthTokenProvider::new(exchanger.clone(), Duration::from_secs(55 * 60));

        let first = provider.get_token("s1").await.unwrap();
        let second = provider.get_token("s1").await.unwrap();
        assert_eq!(first.token, second.token);
        assert_eq!(exchanger.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_keyed_by_session() {
        let exchanger = Arc::new(CountingExchanger::new(false));
        let provider = AuthTokenProvider::new(exchanger.clone(), Duration::from_secs(55 * 60));

        provider.get_token("s1").await.unwrap();
        provider.get_token("s2").await.unwrap();
        assert_eq!(exchanger.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_refetched() {
        let exchanger = Arc::new(CountingExchanger::new(false));
        let provider = AuthTokenProvider::new(exchanger.clone(), Duration::from_secs(55 * 60));

        let first = provider.get_token("s1").await.unwrap();
        tokio::time::advance(Duration::from_secs(55 * 60 + 1)).await;
        let second = provider.get_token("s1").await.unwrap();
        assert_ne!(first.token, second.token);
        assert_eq!(exchanger.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_validity_capped_by_issued_lifetime() {
        struct ShortLived;
        #[async_trait]
        impl CredentialExchanger for ShortLived {
            async fn exchange(&self, _session_id: &str) -> Result<IssuedToken, ChatError> {
                Ok(IssuedToken { token: "t".into(), expires_in: 60 })
            }
        }
        let provider = AuthTokenProvider::new(Arc::new(ShortLived), Duration::from_secs(55 * 60));
        let token = provider.get_token("s1").await.unwrap();
        assert!(token.expires_at <= Instant::now() + Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_exchange_failure_is_auth_error() {
        let provider = AuthTokenProvider::new(
            Arc::new(CountingExchanger::new(true)),
            Duration::from_secs(55 * 60),
        );
        let err = provider.get_token("s1").await.unwrap_err();
        assert!(matches!(err, ChatError::Auth(_)));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let exchanger = Arc::new(CountingExchanger::new(false));
        let provider = AuthTokenProvider::new(exchanger.clone(), Duration::from_secs(55 * 60));

        provider.get_token("s1").await.unwrap();
        provider.invalidate("s1").await;
        provider.get_token("s1").await.unwrap();
        assert_eq!(exchanger.calls.load(Ordering::SeqCst), 2);
    }
}
