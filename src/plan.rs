//! Subscription Plans
//!
//! Static, read-only table keyed by plan name: per-resource creation
//! ceilings, boolean capability flags, and the per-plan API rate ceiling.
//! A `None` limit is the unlimited sentinel. The `internal` tier exists for
//! operational use and short-circuits every gate.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::directory::{Directory, DirectoryError, ResourceKind};
use crate::tenant::TenantContext;

/// Name of the default tier applied when a tenant has no subscription.
pub const FREE_PLAN: &str = "free";
/// Name of the unrestricted operational tier.
pub const INTERNAL_PLAN: &str = "internal";

/// One plan's static feature/limit table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Plan name as stored on subscriptions.
    pub name: String,
    /// Resource ceilings; `None` means unlimited.
    pub limits: HashMap<String, Option<u64>>,
    /// Capability flags.
    pub features: HashMap<String, bool>,
    /// Per-window request ceiling override for the tenant rate limiter.
    /// `None` falls back to the limiter's configured default.
    pub api_rate_limit: Option<u64>,
}

impl PlanConfig {
    /// Ceiling for a resource kind. Missing keys are treated as unlimited,
    /// same as the explicit `None` sentinel.
    pub fn limit(&self, kind: ResourceKind) -> Option<u64> {
        self.limits.get(kind.limit_key()).copied().flatten()
    }

    /// Whether a capability is enabled on this plan.
    pub fn has_feature(&self, key: &str) -> bool {
        self.features.get(key).copied().unwrap_or(false)
    }

    /// The operational tier bypasses rate limiting, feature gating, and
    /// quota gating entirely.
    pub fn is_internal(&self) -> bool {
        self.name == INTERNAL_PLAN
    }
}

/// Static catalog of all known plans.
pub struct PlanCatalog {
    plans: HashMap<String, Arc<PlanConfig>>,
    fallback: Arc<PlanConfig>,
}

impl PlanCatalog {
    /// The built-in catalog: free, pro, enterprise, internal.
    pub fn builtin() -> Self {
        let mut plans = HashMap::new();

        plans.insert(
            FREE_PLAN.to_string(),
            Arc::new(PlanConfig {
                name: FREE_PLAN.into(),
                limits: limits(&[
                    ("max_claims", Some(5)),
                    ("max_customers", Some(50)),
                    ("max_tutors", Some(10)),
                    ("max_users", Some(3)),
                ]),
                features: features(&[
                    ("email_notifications", true),
                    ("exports", false),
                    ("webhooks", false),
                    ("custom_branding", false),
                    ("api_access", false),
                ]),
                api_rate_limit: Some(60),
            }),
        );

        plans.insert(
            "pro".to_string(),
            Arc::new(PlanConfig {
                name: "pro".into(),
                limits: limits(&[
                    ("max_claims", Some(500)),
                    ("max_customers", Some(5_000)),
                    ("max_tutors", Some(200)),
                    ("max_users", Some(25)),
                ]),
                features: features(&[
                    ("email_notifications", true),
                    ("exports", true),
                    ("webhooks", true),
                    ("custom_branding", false),
                    ("api_access", true),
                ]),
                api_rate_limit: Some(600),
            }),
        );

        plans.insert(
            "enterprise".to_string(),
            Arc::new(PlanConfig {
                name: "enterprise".into(),
                limits: limits(&[
                    ("max_claims", None),
                    ("max_customers", None),
                    ("max_tutors", None),
                    ("max_users", Some(250)),
                ]),
                features: features(&[
                    ("email_notifications", true),
                    ("exports", true),
                    ("webhooks", true),
                    ("custom_branding", true),
                    ("api_access", true),
                ]),
                api_rate_limit: Some(6_000),
            }),
        );

        plans.insert(
            INTERNAL_PLAN.to_string(),
            Arc::new(PlanConfig {
                name: INTERNAL_PLAN.into(),
                limits: HashMap::new(),
                features: features(&[
                    ("email_notifications", true),
                    ("exports", true),
                    ("webhooks", true),
                    ("custom_branding", true),
                    ("api_access", true),
                ]),
                api_rate_limit: None,
            }),
        );

        Self::with_fallback(plans)
    }

    /// Catalog from caller-supplied plan data.
    pub fn from_plans(plans: Vec<PlanConfig>) -> Self {
        Self::with_fallback(
            plans
                .into_iter()
                .map(|p| (p.name.clone(), Arc::new(p)))
                .collect(),
        )
    }

    fn with_fallback(plans: HashMap<String, Arc<PlanConfig>>) -> Self {
        // Unknown plan names resolve to the free tier; a catalog supplied
        // without one gets a featureless stand-in.
        let fallback = plans.get(FREE_PLAN).cloned().unwrap_or_else(|| {
            Arc::new(PlanConfig {
                name: FREE_PLAN.into(),
                limits: HashMap::new(),
                features: HashMap::new(),
                api_rate_limit: None,
            })
        });
        Self { plans, fallback }
    }

    /// Look up a plan by name; unknown names fall back to the free tier.
    pub fn get(&self, name: &str) -> Arc<PlanConfig> {
        self.plans
            .get(name)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}

/// Resolves a tenant's current plan: one subscription read against the
/// directory, then a static catalog lookup. Absence of a subscription
/// defaults to the free tier.
pub struct PlanResolver {
    directory: Arc<dyn Directory>,
    catalog: Arc<PlanCatalog>,
}

impl PlanResolver {
    /// New resolver over the given directory and catalog.
    pub fn new(directory: Arc<dyn Directory>, catalog: Arc<PlanCatalog>) -> Self {
        Self { directory, catalog }
    }

    /// Load the tenant's current plan. Callers decide what a
    /// `DirectoryError` means: the feature gate fails closed on it, the
    /// quota gate fails open.
    pub async fn resolve(&self, tenant: &TenantContext) -> Result<Arc<PlanConfig>, DirectoryError> {
        let name = self
            .directory
            .subscription_for(tenant.id)
            .await?
            .map(|s| s.plan_name)
            .unwrap_or_else(|| FREE_PLAN.to_string());
        Ok(self.catalog.get(&name))
    }

    /// Static lookup by the plan name already carried on the context.
    pub fn cached(&self, tenant: &TenantContext) -> Arc<PlanConfig> {
        self.catalog.get(&tenant.plan_name)
    }
}

fn limits(entries: &[(&str, Option<u64>)]) -> HashMap<String, Option<u64>> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect()
}

fn features(entries: &[(&str, bool)]) -> HashMap<String, bool> {
    entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}
