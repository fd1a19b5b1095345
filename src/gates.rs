//! Plan Gates
//!
//! The last two stages of the chain, both driven by the tenant's resolved
//! plan. The feature gate answers "does the plan include this capability"
//! and fails closed: granting a paid capability by accident is worse than
//! a spurious 500. The quota gate answers "may one more of this resource
//! be created" and fails open: blocking legitimate creation over an
//! unreadable count is worse than briefly overshooting a ceiling.
//!
//! The `internal` tier and global super-operators bypass both gates.

use std::sync::Arc;

use crate::auth::CallerIdentity;
use crate::directory::{Directory, ResourceKind};
use crate::error::GateError;
use crate::plan::{PlanConfig, PlanResolver};
use crate::tenant::TenantContext;

/// What a gate does when its backing infrastructure is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Admit the request and log; protection gates (rate limit, quota).
    Open,
    /// Deny with a 500; access-control gates (auth, membership, feature).
    Closed,
}

impl FailurePolicy {
    /// Apply this policy to a failed infrastructure call. `Closed` turns
    /// the failure into a denial; `Open` logs it and returns `Ok(())` so
    /// the caller skips its check.
    pub fn handle(self, stage: &str, err: &dyn std::fmt::Display) -> Result<(), GateError> {
        match self {
            Self::Closed => Err(GateError::InfrastructureUnavailable(format!(
                "{stage}: {err}"
            ))),
            Self::Open => {
                tracing::warn!(stage, error = %err, "infrastructure failure, skipping check");
                Ok(())
            }
        }
    }
}

/// Outcome of a passed quota check, for response metadata.
#[derive(Debug, Clone)]
pub struct QuotaCheck {
    /// Resource kind that was checked.
    pub resource: ResourceKind,
    /// Durable count at check time.
    pub current_count: u64,
    /// The plan's ceiling.
    pub limit: u64,
    /// Creations left before the ceiling.
    pub remaining: u64,
}

/// Denies capabilities the tenant's plan does not include.
pub struct FeatureGate {
    plans: Arc<PlanResolver>,
    upgrade_url: String,
}

impl FeatureGate {
    /// New gate; denials carry `upgrade_url`.
    pub fn new(plans: Arc<PlanResolver>, upgrade_url: &str) -> Self {
        Self {
            plans,
            upgrade_url: upgrade_url.to_string(),
        }
    }

    /// This gate authorizes; it fails closed.
    pub fn failure_policy() -> FailurePolicy {
        FailurePolicy::Closed
    }

    /// Require `feature` to be enabled on the tenant's plan.
    pub async fn require(
        &self,
        tenant: &TenantContext,
        caller: &CallerIdentity,
        feature: &str,
    ) -> Result<(), GateError> {
        self.require_with(tenant, caller, feature, |_| true, "")
            .await
    }

    /// Require `feature`, plus an extra business condition evaluated
    /// against the plan (e.g. a monthly send budget). A failed condition
    /// denies with `message`.
    pub async fn require_with<F>(
        &self,
        tenant: &TenantContext,
        caller: &CallerIdentity,
        feature: &str,
        condition: F,
        message: &str,
    ) -> Result<(), GateError>
    where
        F: FnOnce(&PlanConfig) -> bool,
    {
        if caller.is_operator() {
            return Ok(());
        }
        let plan = match self.plans.resolve(tenant).await {
            Ok(plan) => plan,
            Err(e) => {
                Self::failure_policy().handle("plan lookup", &e)?;
                return Ok(());
            }
        };
        if plan.is_internal() {
            return Ok(());
        }
        if !plan.has_feature(feature) {
            return Err(GateError::FeatureNotInPlan {
                feature: feature.to_string(),
                plan: plan.name.clone(),
                upgrade_url: self.upgrade_url.clone(),
            });
        }
        if !condition(&plan) {
            return Err(GateError::UsageLimitReached {
                message: message.to_string(),
            });
        }
        Ok(())
    }
}

/// Denies resource creation past the plan's ceiling, counting from the
/// durable datastore so the check reflects what actually exists.
pub struct QuotaGate {
    plans: Arc<PlanResolver>,
    directory: Arc<dyn Directory>,
    upgrade_url: String,
}

impl QuotaGate {
    /// New gate over the given plan resolver and directory.
    pub fn new(plans: Arc<PlanResolver>, directory: Arc<dyn Directory>, upgrade_url: &str) -> Self {
        Self {
            plans,
            directory,
            upgrade_url: upgrade_url.to_string(),
        }
    }

    /// This gate protects; it fails open.
    pub fn failure_policy() -> FailurePolicy {
        FailurePolicy::Open
    }

    /// Check whether one more `kind` may be created. `Ok(None)` means the
    /// check did not apply (unlimited plan, bypass, or an unreadable
    /// count); `Ok(Some(_))` carries headroom for response metadata.
    pub async fn check(
        &self,
        tenant: &TenantContext,
        caller: &CallerIdentity,
        kind: ResourceKind,
    ) -> Result<Option<QuotaCheck>, GateError> {
        if caller.is_operator() {
            return Ok(None);
        }
        let plan = match self.plans.resolve(tenant).await {
            Ok(plan) => plan,
            Err(e) => {
                Self::failure_policy().handle("plan lookup", &e)?;
                return Ok(None);
            }
        };
        if plan.is_internal() {
            return Ok(None);
        }
        let Some(limit) = plan.limit(kind) else {
            return Ok(None);
        };

        let current_count = match self.directory.count_resource(kind, tenant.id).await {
            Ok(n) => n,
            Err(e) => {
                Self::failure_policy().handle("resource count", &e)?;
                return Ok(None);
            }
        };

        if current_count >= limit {
            return Err(GateError::QuotaExceeded {
                resource: kind.to_string(),
                plan: plan.name.clone(),
                current_count,
                limit,
                upgrade_url: self.upgrade_url.clone(),
            });
        }

        Ok(Some(QuotaCheck {
            resource: kind,
            current_count,
            limit,
            remaining: limit - current_count,
        }))
    }
}
