//! Gate Error Taxonomy
//!
//! Every gate stage either passes control forward or terminates the chain
//! with exactly one of these errors, mapped to a fixed HTTP status and a
//! structured denial payload.
//!
//! The rate limiter and the quota gate fail open on infrastructure trouble;
//! authentication, membership, and the feature gate fail closed. See
//! [`crate::gates::FailurePolicy`].

use serde_json::{json, Value};

/// Terminal outcome of a gate stage.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// No tenant signal resolved to a non-empty slug.
    #[error("no tenant identified on request")]
    MissingTenant,

    /// The resolved slug does not match a known tenant.
    #[error("unknown tenant: {slug}")]
    TenantNotFound {
        /// The slug that failed to resolve.
        slug: String,
    },

    /// Tenant exists but is suspended; writes and reads are refused.
    #[error("tenant is suspended: {slug}")]
    TenantSuspended {
        /// The suspended tenant's slug.
        slug: String,
    },

    /// Neither a bearer token nor an API key was presented.
    #[error("no credential presented")]
    MissingCredential,

    /// A credential was presented but could not be verified.
    #[error("credential rejected: {reason}")]
    InvalidCredential {
        /// Why verification failed (safe to return to the caller).
        reason: String,
    },

    /// An API key's tenant differs from the route's tenant.
    #[error("api key is scoped to a different tenant")]
    TenantMismatch,

    /// The authenticated user has no membership in the resolved tenant.
    #[error("user is not a member of this tenant")]
    NotAMember,

    /// Membership exists but the role is below what the route requires.
    #[error("role {have} does not satisfy required role {need}")]
    InsufficientRole {
        /// Role the route requires.
        need: String,
        /// Role the caller holds.
        have: String,
    },

    /// An API key lacks the scopes the action requires.
    #[error("missing scopes: {missing_scopes:?}")]
    MissingScopes {
        /// Scopes the key would need for this action.
        missing_scopes: Vec<String>,
    },

    /// Fixed-window ceiling exceeded for this (tenant, ip) key.
    #[error("rate limit exceeded")]
    RateLimited {
        /// Window ceiling.
        limit: u64,
        /// Requests left in the window (always 0 here).
        remaining: u64,
        /// Seconds until the window expires.
        reset_secs: u64,
        /// Seconds the caller should wait before retrying.
        retry_after_secs: u64,
    },

    /// The tenant's plan does not include the requested capability.
    #[error("feature {feature} is not available on plan {plan}")]
    FeatureNotInPlan {
        /// The capability key that was denied.
        feature: String,
        /// The tenant's current plan name.
        plan: String,
        /// Where to upgrade. Advisory metadata, not a retry hint.
        upgrade_url: String,
    },

    /// A secondary business condition attached to a feature gate failed.
    #[error("usage limit reached: {message}")]
    UsageLimitReached {
        /// Human-readable description of the exhausted limit.
        message: String,
    },

    /// Creating another resource of this kind would exceed the plan limit.
    #[error("quota exceeded for {resource}")]
    QuotaExceeded {
        /// Resource kind that hit its ceiling.
        resource: String,
        /// The tenant's current plan name.
        plan: String,
        /// Durable count at denial time.
        current_count: u64,
        /// The plan's ceiling.
        limit: u64,
        /// Where to upgrade.
        upgrade_url: String,
    },

    /// A fail-closed stage could not reach its backing infrastructure.
    #[error("infrastructure unavailable: {0}")]
    InfrastructureUnavailable(String),
}

impl GateError {
    /// Fixed HTTP status for this denial.
    pub fn status(&self) -> u16 {
        match self {
            Self::MissingTenant => 400,
            Self::TenantNotFound { .. } => 404,
            Self::TenantSuspended { .. } => 403,
            Self::MissingCredential | Self::InvalidCredential { .. } => 401,
            Self::TenantMismatch
            | Self::NotAMember
            | Self::InsufficientRole { .. }
            | Self::MissingScopes { .. }
            | Self::FeatureNotInPlan { .. }
            | Self::UsageLimitReached { .. }
            | Self::QuotaExceeded { .. } => 403,
            Self::RateLimited { .. } => 429,
            Self::InfrastructureUnavailable(_) => 500,
        }
    }

    /// Stable machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingTenant => "missing_tenant",
            Self::TenantNotFound { .. } => "tenant_not_found",
            Self::TenantSuspended { .. } => "tenant_suspended",
            Self::MissingCredential => "missing_credential",
            Self::InvalidCredential { .. } => "invalid_credential",
            Self::TenantMismatch => "tenant_mismatch",
            Self::NotAMember => "not_a_member",
            Self::InsufficientRole { .. } => "insufficient_role",
            Self::MissingScopes { .. } => "missing_scopes",
            Self::RateLimited { .. } => "rate_limited",
            Self::FeatureNotInPlan { .. } => "feature_not_in_plan",
            Self::UsageLimitReached { .. } => "usage_limit_reached",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::InfrastructureUnavailable(_) => "infrastructure_unavailable",
        }
    }

    /// Structured denial payload: a human-readable message plus the
    /// machine-readable fields relevant to whichever gate denied.
    pub fn denial_body(&self) -> Value {
        let mut body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        let extra = match self {
            Self::InsufficientRole { need, have } => json!({
                "required_role": need,
                "current_role": have,
            }),
            Self::MissingScopes { missing_scopes } => json!({
                "missing_scopes": missing_scopes,
            }),
            Self::RateLimited {
                limit,
                remaining,
                reset_secs,
                retry_after_secs,
            } => json!({
                "limit": limit,
                "remaining": remaining,
                "reset_seconds": reset_secs,
                "retry_after": retry_after_secs,
            }),
            Self::FeatureNotInPlan {
                feature,
                plan,
                upgrade_url,
            } => json!({
                "feature": feature,
                "plan": plan,
                "upgrade_url": upgrade_url,
            }),
            Self::QuotaExceeded {
                resource,
                plan,
                current_count,
                limit,
                upgrade_url,
            } => json!({
                "resource": resource,
                "plan": plan,
                "current_count": current_count,
                "limit": limit,
                "remaining_quota": 0,
                "upgrade_url": upgrade_url,
            }),
            _ => return body,
        };
        if let (Some(map), Some(more)) = (body.as_object_mut(), extra.as_object()) {
            for (k, v) in more {
                map.insert(k.clone(), v.clone());
            }
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GateError::MissingTenant.status(), 400);
        assert_eq!(
            GateError::TenantNotFound { slug: "acme".into() }.status(),
            404
        );
        assert_eq!(GateError::MissingCredential.status(), 401);
        assert_eq!(GateError::TenantMismatch.status(), 403);
        assert_eq!(
            GateError::RateLimited {
                limit: 5,
                remaining: 0,
                reset_secs: 10,
                retry_after_secs: 10
            }
            .status(),
            429
        );
        assert_eq!(
            GateError::InfrastructureUnavailable("plan lookup".into()).status(),
            500
        );
    }

    #[test]
    fn test_quota_denial_body_fields() {
        let err = GateError::QuotaExceeded {
            resource: "claims".into(),
            plan: "free".into(),
            current_count: 5,
            limit: 5,
            upgrade_url: "https://billing.example.com/upgrade".into(),
        };
        let body = err.denial_body();
        assert_eq!(body["error"], "quota_exceeded");
        assert_eq!(body["current_count"], 5);
        assert_eq!(body["limit"], 5);
        assert_eq!(body["remaining_quota"], 0);
        assert!(body["message"].as_str().unwrap().contains("claims"));
    }

    #[test]
    fn test_rate_limited_body_has_retry_after() {
        let err = GateError::RateLimited {
            limit: 5,
            remaining: 0,
            reset_secs: 900,
            retry_after_secs: 900,
        };
        let body = err.denial_body();
        assert_eq!(body["retry_after"], 900);
        assert_eq!(body["reset_seconds"], 900);
    }
}
