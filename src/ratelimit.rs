//! Distributed Rate Limiting
//!
//! Fixed-window counting against the shared counter store, keyed by tenant
//! slug and client IP so one tenant's burst cannot exhaust another's
//! budget. Availability beats strictness here: any store failure admits
//! the request with default headers and a warning. The `internal` tier
//! bypasses counting entirely.

use std::net::IpAddr;
use std::sync::Arc;

use crate::config::RateLimitSettings;
use crate::error::GateError;
use crate::plan::PlanConfig;
use crate::store::CounterStore;

/// Rate-limit state for the response headers.
#[derive(Debug, Clone)]
pub struct RateHeaders {
    /// Window ceiling in effect.
    pub limit: u64,
    /// Requests left in the current window.
    pub remaining: u64,
    /// Seconds until the window resets.
    pub reset_secs: u64,
    /// Only set on denials.
    pub retry_after: Option<u64>,
}

impl RateHeaders {
    fn open(limit: u64, window_secs: u64) -> Self {
        Self {
            limit,
            remaining: limit,
            reset_secs: window_secs,
            retry_after: None,
        }
    }

    /// Header name/value pairs for the embedding server to attach.
    pub fn to_header_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_secs.to_string()),
        ];
        if let Some(secs) = self.retry_after {
            pairs.push(("Retry-After", secs.to_string()));
        }
        pairs
    }
}

/// Fixed-window limiter over the shared counter store.
pub struct FixedWindowLimiter {
    store: Arc<dyn CounterStore>,
    settings: RateLimitSettings,
}

impl FixedWindowLimiter {
    /// New limiter with the given window settings.
    pub fn new(store: Arc<dyn CounterStore>, settings: RateLimitSettings) -> Self {
        Self { store, settings }
    }

    /// Admit or deny one tenant-scoped request. The plan's rate ceiling,
    /// when set, overrides the configured default; the internal tier is
    /// never counted.
    pub async fn admit(
        &self,
        tenant_slug: &str,
        plan: Option<&PlanConfig>,
        client_ip: IpAddr,
    ) -> Result<RateHeaders, GateError> {
        let limit = plan
            .and_then(|p| p.api_rate_limit)
            .unwrap_or(self.settings.max_requests);
        if plan.map(PlanConfig::is_internal).unwrap_or(false) {
            return Ok(RateHeaders::open(limit, self.settings.window_secs));
        }
        let key = format!("{}:{}:{}", self.settings.prefix, tenant_slug, client_ip);
        self.admit_key(&key, limit).await
    }

    /// Admit or deny one anonymous request, keyed by IP alone. Used on
    /// public endpoints where no tenant has been resolved yet.
    pub async fn admit_anonymous(&self, client_ip: IpAddr) -> Result<RateHeaders, GateError> {
        let key = format!("{}:{}", self.settings.prefix, client_ip);
        self.admit_key(&key, self.settings.max_requests).await
    }

    async fn admit_key(&self, key: &str, limit: u64) -> Result<RateHeaders, GateError> {
        let window = self.settings.window_secs;

        let count = match self.store.incr(key).await {
            Ok(n) => n,
            Err(e) => {
                // The store being down must not take the API down with it.
                tracing::warn!(key, error = %e, "rate limit store unavailable, admitting");
                return Ok(RateHeaders::open(limit, window));
            }
        };

        if count == 1 {
            if let Err(e) = self.store.expire(key, window).await {
                tracing::warn!(key, error = %e, "failed to arm rate limit window expiry");
            }
        }

        let reset_secs = match self.store.ttl(key).await {
            Ok(ttl) if ttl > 0 => ttl as u64,
            _ => window,
        };
        let remaining = limit.saturating_sub(count);

        if count > limit {
            return Err(GateError::RateLimited {
                limit,
                remaining: 0,
                reset_secs,
                retry_after_secs: reset_secs,
            });
        }

        Ok(RateHeaders {
            limit,
            remaining,
            reset_secs,
            retry_after: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanCatalog;
    use crate::store::{MemoryCounterStore, StoreError};

    fn ip() -> IpAddr {
        "10.0.0.7".parse().unwrap()
    }

    fn limiter(max: u64) -> FixedWindowLimiter {
        FixedWindowLimiter::new(
            Arc::new(MemoryCounterStore::new()),
            RateLimitSettings {
                window_secs: 60,
                max_requests: max,
                prefix: "rl:test".into(),
            },
        )
    }

    /// Store stub whose every operation fails, for the outage path.
    struct DownStore;

    #[async_trait::async_trait]
    impl CounterStore for DownStore {
        async fn incr(&self, _key: &str) -> Result<u64, StoreError> {
            Err(StoreError::Unreachable("down".into()))
        }
        async fn expire(&self, _key: &str, _ttl_secs: u64) -> Result<(), StoreError> {
            Err(StoreError::Unreachable("down".into()))
        }
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unreachable("down".into()))
        }
        async fn ttl(&self, _key: &str) -> Result<i64, StoreError> {
            Err(StoreError::Unreachable("down".into()))
        }
        async fn ping(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_denies_past_the_window_ceiling() {
        let limiter = limiter(3);
        for expected_remaining in [2, 1, 0] {
            let headers = limiter.admit("acme", None, ip()).await.unwrap();
            assert_eq!(headers.limit, 3);
            assert_eq!(headers.remaining, expected_remaining);
        }

        let err = limiter.admit("acme", None, ip()).await.unwrap_err();
        let GateError::RateLimited {
            limit,
            remaining,
            retry_after_secs,
            ..
        } = err
        else {
            panic!("expected RateLimited");
        };
        assert_eq!(limit, 3);
        assert_eq!(remaining, 0);
        assert!(retry_after_secs <= 60);
    }

    #[tokio::test]
    async fn test_buckets_are_per_tenant_and_ip() {
        let limiter = limiter(1);
        limiter.admit("acme", None, ip()).await.unwrap();
        // Same IP under another tenant has its own budget.
        limiter.admit("globex", None, ip()).await.unwrap();
        // Another IP under the first tenant too.
        limiter
            .admit("acme", None, "10.0.0.8".parse().unwrap())
            .await
            .unwrap();
        assert!(limiter.admit("acme", None, ip()).await.is_err());
    }

    #[tokio::test]
    async fn test_plan_ceiling_overrides_default() {
        let catalog = PlanCatalog::builtin();
        let free = catalog.get("free");
        let limiter = limiter(300);
        let headers = limiter.admit("acme", Some(free.as_ref()), ip()).await.unwrap();
        assert_eq!(headers.limit, 60);
    }

    #[tokio::test]
    async fn test_internal_tier_is_never_counted() {
        let catalog = PlanCatalog::builtin();
        let internal = catalog.get("internal");
        let limiter = limiter(1);
        for _ in 0..10 {
            let headers = limiter
                .admit("ops", Some(internal.as_ref()), ip())
                .await
                .unwrap();
            assert_eq!(headers.remaining, headers.limit);
        }
    }

    #[tokio::test]
    async fn test_store_outage_admits_with_default_headers() {
        let limiter = FixedWindowLimiter::new(
            Arc::new(DownStore),
            RateLimitSettings {
                window_secs: 900,
                max_requests: 5,
                prefix: "rl:public".into(),
            },
        );
        let headers = limiter.admit_anonymous(ip()).await.unwrap();
        assert_eq!(headers.limit, 5);
        assert_eq!(headers.remaining, 5);
        assert_eq!(headers.reset_secs, 900);
        assert!(headers.retry_after.is_none());
    }

    #[test]
    fn test_header_pairs_include_retry_after_on_denial() {
        let denied = RateHeaders {
            limit: 5,
            remaining: 0,
            reset_secs: 42,
            retry_after: Some(42),
        };
        let pairs = denied.to_header_pairs();
        assert!(pairs.contains(&("Retry-After", "42".to_string())));

        let allowed = RateHeaders::open(5, 900);
        assert!(allowed.to_header_pairs().iter().all(|(k, _)| *k != "Retry-After"));
    }
}
