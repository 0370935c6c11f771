//! The cached token provider.
//!
//! Cache discipline: the check-and-acquire sequence is serialized by a
//! `std::sync::Mutex`, but the lock is never held across the credential
//! source call. The first cold-cache caller installs an in-flight marker
//! and acquires; later callers park on the marker's `Notify` and re-check
//! the cache once the leader posts its result.

use crate::error::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Refresh this long before the token actually expires.
const EXPIRY_SAFETY_MARGIN_SECS: i64 = 5 * 60;

/// A bearer token with its expiry instant.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Stale once `now + safety margin` reaches the expiry instant.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(EXPIRY_SAFETY_MARGIN_SECS) >= self.expires_at
    }
}

/// Introspection snapshot for diagnostics tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub expires_in_secs: i64,
    pub is_cached: bool,
}

/// Source of fresh tokens; normally [`crate::AzureCliSource`], a recording
/// mock in tests.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn acquire(&self) -> Result<AccessToken, AuthError>;
}

/// Retry settings for transient acquisition failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

struct CacheState {
    cached: Option<AccessToken>,
    inflight: Option<Arc<Notify>>,
}

/// Concurrency-safe cache over a [`CredentialSource`].
pub struct TokenProvider {
    source: Arc<dyn CredentialSource>,
    retry: RetryPolicy,
    state: Mutex<CacheState>,
}

impl TokenProvider {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self::with_retry(source, RetryPolicy::default())
    }

    pub fn with_retry(source: Arc<dyn CredentialSource>, retry: RetryPolicy) -> Self {
        Self {
            source,
            retry,
            state: Mutex::new(CacheState {
                cached: None,
                inflight: None,
            }),
        }
    }

    /// Return a non-stale token, acquiring (single-flight) when needed.
    pub async fn get_token(&self) -> Result<String, AuthError> {
        loop {
            enum Role {
                Leader(Arc<Notify>),
                Follower(Arc<Notify>),
            }

            let role = {
                let mut state = self.state.lock().expect("token cache lock poisoned");
                if let Some(entry) = &state.cached {
                    if !entry.is_stale(Utc::now()) {
                        return Ok(entry.token.clone());
                    }
                }
                match &state.inflight {
                    Some(notify) => Role::Follower(Arc::clone(notify)),
                    None => {
                        let notify = Arc::new(Notify::new());
                        state.inflight = Some(Arc::clone(&notify));
                        Role::Leader(notify)
                    }
                }
            };

            match role {
                Role::Leader(notify) => {
                    let result = self.acquire_with_retry().await;
                    let mut state = self.state.lock().expect("token cache lock poisoned");
                    state.inflight = None;
                    notify.notify_waiters();
                    return match result {
                        Ok(entry) => {
                            debug!(expires_at = %entry.expires_at, "Access token acquired");
                            let token = entry.token.clone();
                            state.cached = Some(entry);
                            Ok(token)
                        }
                        Err(err) => Err(err),
                    };
                }
                Role::Follower(notify) => {
                    let notified = notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    // The leader may have posted between our unlock and the
                    // enable; re-check before parking.
                    let still_inflight = {
                        let state = self.state.lock().expect("token cache lock poisoned");
                        state.inflight.is_some()
                    };
                    if still_inflight {
                        notified.await;
                    }
                    // Loop: observe the post-write cache, or become the new
                    // leader if the acquisition failed.
                }
            }
        }
    }

    /// Drop the cached entry; the next `get_token` acquires anew.
    pub fn clear_cache(&self) {
        let mut state = self.state.lock().expect("token cache lock poisoned");
        state.cached = None;
    }

    /// Introspection only; never triggers acquisition.
    pub fn token_info(&self) -> Option<TokenInfo> {
        let state = self.state.lock().expect("token cache lock poisoned");
        state.cached.as_ref().map(|entry| TokenInfo {
            expires_in_secs: (entry.expires_at - Utc::now()).num_seconds(),
            is_cached: true,
        })
    }

    async fn acquire_with_retry(&self) -> Result<AccessToken, AuthError> {
        let mut delay = self.retry.base_delay;
        let mut attempt = 1u32;
        loop {
            match self.source.acquire().await {
                Ok(entry) => return Ok(entry),
                Err(err) => {
                    if !err.is_retryable() || attempt >= self.retry.max_attempts {
                        return Err(err);
                    }
                    warn!(
                        attempt,
                        kind = err.kind.code(),
                        "Token acquisition failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.retry.max_delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        fail_first: usize,
        failure: AuthErrorKind,
        delay: Duration,
    }

    impl CountingSource {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first: 0,
                failure: AuthErrorKind::NetworkTimeout,
                delay: Duration::ZERO,
            }
        }

        fn failing(fail_first: usize, failure: AuthErrorKind) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first,
                failure,
                delay: Duration::ZERO,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::ok()
            }
        }

        fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialSource for CountingSource {
        async fn acquire(&self) -> Result<AccessToken, AuthError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if call < self.fail_first {
                return Err(AuthError::new(self.failure, "synthetic failure"));
            }
            Ok(AccessToken {
                token: format!("token-{call}"),
                expires_at: Utc::now() + ChronoDuration::hours(1),
            })
        }
    }

    fn provider(source: Arc<CountingSource>) -> TokenProvider {
        TokenProvider::with_retry(
            source,
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
        )
    }

    #[tokio::test]
    async fn cached_token_skips_the_source() {
        let source = Arc::new(CountingSource::ok());
        let provider = provider(Arc::clone(&source));

        let first = provider.get_token().await.unwrap();
        for _ in 0..5 {
            assert_eq!(provider.get_token().await.unwrap(), first);
        }
        assert_eq!(source.count(), 1);
    }

    #[tokio::test]
    async fn concurrent_cold_callers_coalesce() {
        let source = Arc::new(CountingSource::slow(Duration::from_millis(50)));
        let provider = Arc::new(provider(Arc::clone(&source)));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let provider = Arc::clone(&provider);
            handles.push(tokio::spawn(async move { provider.get_token().await }));
        }

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(source.count(), 1, "credential source invoked exactly once");
        assert!(tokens.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[tokio::test]
    async fn transient_failures_retry_to_success() {
        let source = Arc::new(CountingSource::failing(2, AuthErrorKind::NetworkTimeout));
        let provider = provider(Arc::clone(&source));

        let token = provider.get_token().await.unwrap();
        assert_eq!(token, "token-2");
        assert_eq!(source.count(), 3);
    }

    #[tokio::test]
    async fn retries_exhaust_after_three_attempts() {
        let source = Arc::new(CountingSource::failing(10, AuthErrorKind::RateLimited));
        let provider = provider(Arc::clone(&source));

        let err = provider.get_token().await.unwrap_err();
        assert_eq!(err.kind, AuthErrorKind::RateLimited);
        assert_eq!(source.count(), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let source = Arc::new(CountingSource::failing(10, AuthErrorKind::NotLoggedIn));
        let provider = provider(Arc::clone(&source));

        let err = provider.get_token().await.unwrap_err();
        assert_eq!(err.kind, AuthErrorKind::NotLoggedIn);
        assert_eq!(source.count(), 1);
    }

    #[tokio::test]
    async fn clear_cache_forces_reacquisition() {
        let source = Arc::new(CountingSource::ok());
        let provider = provider(Arc::clone(&source));

        provider.get_token().await.unwrap();
        assert!(provider.token_info().unwrap().is_cached);

        provider.clear_cache();
        assert!(provider.token_info().is_none());

        provider.get_token().await.unwrap();
        assert_eq!(source.count(), 2);
    }

    #[test]
    fn staleness_uses_safety_margin() {
        let entry = AccessToken {
            token: "t".to_string(),
            expires_at: Utc::now() + ChronoDuration::minutes(4),
        };
        assert!(entry.is_stale(Utc::now()), "inside the 5 minute margin");

        let fresh = AccessToken {
            token: "t".to_string(),
            expires_at: Utc::now() + ChronoDuration::minutes(10),
        };
        assert!(!fresh.is_stale(Utc::now()));
    }
}
