//! Gate Configuration
//!
//! Environment-driven settings for both limiter instances, the counter
//! store connection, and token verification. Every knob has a documented
//! default so a bare process comes up in a sane development posture.

use std::time::Duration;

/// Settings for one fixed-window limiter instance.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    /// Window length in seconds.
    pub window_secs: u64,
    /// Request ceiling within one window.
    pub max_requests: u64,
    /// Counter key prefix, distinguishing limiter instances.
    pub prefix: String,
}

impl RateLimitSettings {
    /// Defaults for the authenticated, tenant-scoped limiter:
    /// 300 requests per 60-second window.
    pub fn tenant_default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 300,
            prefix: "rl:tenant".into(),
        }
    }

    /// Defaults for the stricter public limiter guarding unauthenticated
    /// endpoints such as signup and login: 5 requests per 15 minutes.
    pub fn public_default() -> Self {
        Self {
            window_secs: 900,
            max_requests: 5,
            prefix: "rl:public".into(),
        }
    }
}

/// Counter store connection settings.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Host:port of the counter store.
    pub addr: String,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Per-command socket timeout. A command that exceeds this is treated
    /// as a store failure for fail-open purposes.
    pub command_timeout: Duration,
    /// Base delay for exponential-backoff reconnection.
    pub retry_base_delay: Duration,
    /// Ceiling on the backoff delay.
    pub retry_max_delay: Duration,
    /// Connect attempts before the client goes terminal and stops retrying.
    pub max_retries: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".into(),
            connect_timeout: Duration::from_secs(2),
            command_timeout: Duration::from_secs(1),
            retry_base_delay: Duration::from_millis(200),
            retry_max_delay: Duration::from_secs(5),
            max_retries: 6,
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// HMAC secret for access-token verification.
    pub jwt_secret: String,
    /// Base URL embedded in plan-denial payloads.
    pub upgrade_url: String,
    /// Tenant-scoped limiter settings.
    pub tenant_limit: RateLimitSettings,
    /// Public limiter settings.
    pub public_limit: RateLimitSettings,
    /// Counter store settings.
    pub store: StoreSettings,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "claimgate-dev-secret-change-in-production".into(),
            upgrade_url: "https://app.claimgate.io/billing/upgrade".into(),
            tenant_limit: RateLimitSettings::tenant_default(),
            public_limit: RateLimitSettings::public_default(),
            store: StoreSettings::default(),
        }
    }
}

impl GateConfig {
    /// Load configuration from `CLAIMGATE_*` environment variables,
    /// falling back to defaults for anything unset:
    ///
    /// - `CLAIMGATE_JWT_SECRET`
    /// - `CLAIMGATE_UPGRADE_URL`
    /// - `CLAIMGATE_TENANT_WINDOW_SECS` / `CLAIMGATE_TENANT_MAX_REQUESTS`
    /// - `CLAIMGATE_PUBLIC_WINDOW_SECS` / `CLAIMGATE_PUBLIC_MAX_REQUESTS`
    /// - `CLAIMGATE_STORE_ADDR`
    /// - `CLAIMGATE_STORE_CONNECT_TIMEOUT_MS` / `CLAIMGATE_STORE_COMMAND_TIMEOUT_MS`
    /// - `CLAIMGATE_STORE_RETRY_BASE_MS` / `CLAIMGATE_STORE_RETRY_MAX_MS`
    /// - `CLAIMGATE_STORE_MAX_RETRIES`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_str("CLAIMGATE_JWT_SECRET") {
            cfg.jwt_secret = v;
        }
        if let Some(v) = env_str("CLAIMGATE_UPGRADE_URL") {
            cfg.upgrade_url = v;
        }
        if let Some(v) = env_u64("CLAIMGATE_TENANT_WINDOW_SECS") {
            cfg.tenant_limit.window_secs = v;
        }
        if let Some(v) = env_u64("CLAIMGATE_TENANT_MAX_REQUESTS") {
            cfg.tenant_limit.max_requests = v;
        }
        if let Some(v) = env_u64("CLAIMGATE_PUBLIC_WINDOW_SECS") {
            cfg.public_limit.window_secs = v;
        }
        if let Some(v) = env_u64("CLAIMGATE_PUBLIC_MAX_REQUESTS") {
            cfg.public_limit.max_requests = v;
        }
        if let Some(v) = env_str("CLAIMGATE_STORE_ADDR") {
            cfg.store.addr = v;
        }
        if let Some(v) = env_u64("CLAIMGATE_STORE_CONNECT_TIMEOUT_MS") {
            cfg.store.connect_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("CLAIMGATE_STORE_COMMAND_TIMEOUT_MS") {
            cfg.store.command_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("CLAIMGATE_STORE_RETRY_BASE_MS") {
            cfg.store.retry_base_delay = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("CLAIMGATE_STORE_RETRY_MAX_MS") {
            cfg.store.retry_max_delay = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("CLAIMGATE_STORE_MAX_RETRIES") {
            cfg.store.max_retries = v as u32;
        }

        cfg
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = GateConfig::default();
        assert_eq!(cfg.public_limit.max_requests, 5);
        assert_eq!(cfg.public_limit.window_secs, 900);
        assert!(cfg.tenant_limit.max_requests > cfg.public_limit.max_requests);
        assert_ne!(cfg.tenant_limit.prefix, cfg.public_limit.prefix);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("CLAIMGATE_TENANT_MAX_REQUESTS", "42");
        std::env::set_var("CLAIMGATE_STORE_MAX_RETRIES", "3");
        let cfg = GateConfig::from_env();
        assert_eq!(cfg.tenant_limit.max_requests, 42);
        assert_eq!(cfg.store.max_retries, 3);
        std::env::remove_var("CLAIMGATE_TENANT_MAX_REQUESTS");
        std::env::remove_var("CLAIMGATE_STORE_MAX_RETRIES");
    }
}
