//! Gate Pipeline
//!
//! The ordered admission chain an authenticated request walks before any
//! handler runs:
//!
//! ```text
//!   signals ──> tenant resolver ──> authenticator ──> membership
//!                                                        │
//!             handler <── quota <── feature <── rate limiter
//! ```
//!
//! Each stage either enriches the [`RequestScope`] or terminates with a
//! [`GateError`]. The embedding HTTP server supplies raw signals, calls
//! [`GatePipeline::admit`], and maps the result to a response; nothing in
//! here knows about any particular web framework.

use std::net::IpAddr;
use std::sync::Arc;

use crate::auth::{Authenticator, CallerIdentity, Credential};
use crate::config::GateConfig;
use crate::directory::{Directory, ResourceKind, TenantRole};
use crate::error::GateError;
use crate::gates::{FeatureGate, QuotaCheck, QuotaGate};
use crate::membership::MembershipValidator;
use crate::plan::{PlanCatalog, PlanResolver};
use crate::ratelimit::{FixedWindowLimiter, RateHeaders};
use crate::store::CounterStore;
use crate::tenant::{TenantContext, TenantResolver, TenantSignals};

/// Raw request facts the embedding server hands to the pipeline.
#[derive(Debug, Clone)]
pub struct RequestSignals {
    /// Tenant signals (path param, header, host).
    pub tenant: TenantSignals,
    /// Raw `Authorization` header value, if present.
    pub authorization: Option<String>,
    /// Raw `x-api-key` header value, if present.
    pub api_key: Option<String>,
    /// Client IP after proxy resolution.
    pub client_ip: IpAddr,
}

/// Everything the admission chain established, handed to the handler.
#[derive(Debug, Clone)]
pub struct RequestScope {
    /// The resolved tenant.
    pub tenant: TenantContext,
    /// The authenticated caller.
    pub caller: CallerIdentity,
    /// The caller's role within the tenant; `None` for API keys.
    pub role: Option<TenantRole>,
    /// Rate-limit state for the response headers.
    pub rate: RateHeaders,
    /// Headroom from the last quota check, when one applied.
    pub quota: Option<QuotaCheck>,
}

/// The assembled admission chain. Build one at startup and share it.
pub struct GatePipeline {
    tenants: TenantResolver,
    authenticator: Authenticator,
    membership: MembershipValidator,
    tenant_limiter: FixedWindowLimiter,
    public_limiter: FixedWindowLimiter,
    plans: Arc<PlanResolver>,
    feature_gate: FeatureGate,
    quota_gate: QuotaGate,
}

impl GatePipeline {
    /// Wire the full chain from configuration, a directory, and a counter
    /// store.
    pub fn new(
        config: &GateConfig,
        directory: Arc<dyn Directory>,
        counters: Arc<dyn CounterStore>,
    ) -> Self {
        Self::with_catalog(config, directory, counters, PlanCatalog::builtin())
    }

    /// Same as [`GatePipeline::new`] with a caller-supplied plan catalog.
    pub fn with_catalog(
        config: &GateConfig,
        directory: Arc<dyn Directory>,
        counters: Arc<dyn CounterStore>,
        catalog: PlanCatalog,
    ) -> Self {
        let plans = Arc::new(PlanResolver::new(Arc::clone(&directory), Arc::new(catalog)));
        Self {
            tenants: TenantResolver::new(Arc::clone(&directory)),
            authenticator: Authenticator::new(Arc::clone(&directory), &config.jwt_secret),
            membership: MembershipValidator::new(Arc::clone(&directory)),
            tenant_limiter: FixedWindowLimiter::new(
                Arc::clone(&counters),
                config.tenant_limit.clone(),
            ),
            public_limiter: FixedWindowLimiter::new(counters, config.public_limit.clone()),
            feature_gate: FeatureGate::new(Arc::clone(&plans), &config.upgrade_url),
            quota_gate: QuotaGate::new(Arc::clone(&plans), directory, &config.upgrade_url),
            plans,
        }
    }

    /// Run the admission chain for a tenant-scoped request. On success the
    /// returned scope carries everything a handler needs; the first failing
    /// stage short-circuits with its denial.
    pub async fn admit(&self, signals: &RequestSignals) -> Result<RequestScope, GateError> {
        let tenant = self.tenants.resolve(&signals.tenant).await?;
        if !tenant.active {
            return Err(GateError::TenantSuspended {
                slug: tenant.slug.clone(),
            });
        }

        let credential = Credential::extract(
            signals.authorization.as_deref(),
            signals.api_key.as_deref(),
        )?;
        let caller = self
            .authenticator
            .authenticate(credential, Some(&tenant))
            .await?;
        let role = self.membership.validate(&caller, &tenant).await?;

        let plan = self.plans.cached(&tenant);
        let rate = self
            .tenant_limiter
            .admit(&tenant.slug, Some(plan.as_ref()), signals.client_ip)
            .await?;

        tracing::debug!(
            tenant = %tenant.slug,
            plan = %plan.name,
            remaining = rate.remaining,
            "request admitted"
        );

        Ok(RequestScope {
            tenant,
            caller,
            role,
            rate,
            quota: None,
        })
    }

    /// Admission for unauthenticated endpoints (signup, login): no tenant,
    /// no credential, just the strict per-IP public limiter.
    pub async fn admit_public(&self, client_ip: IpAddr) -> Result<RateHeaders, GateError> {
        self.public_limiter.admit_anonymous(client_ip).await
    }

    /// Require a plan capability for the admitted request.
    pub async fn require_feature(
        &self,
        scope: &RequestScope,
        feature: &str,
    ) -> Result<(), GateError> {
        self.feature_gate
            .require(&scope.tenant, &scope.caller, feature)
            .await
    }

    /// Gate the creation of one more `kind`, recording headroom on the
    /// scope when the check applied.
    pub async fn limit_resource_creation(
        &self,
        scope: &mut RequestScope,
        kind: ResourceKind,
    ) -> Result<(), GateError> {
        scope.quota = self
            .quota_gate
            .check(&scope.tenant, &scope.caller, kind)
            .await?;
        Ok(())
    }
}
