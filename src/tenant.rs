//! Tenant Resolution
//!
//! Determines which tenant a request belongs to from an ordered set of
//! signals: path parameter, `x-tenant`/`x-tenant-slug` header, then the
//! hostname's subdomain label. Resolution happens once per request and the
//! resulting context is immutable.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::directory::{Directory, TenantId, TenantStatus};
use crate::error::GateError;
use crate::plan::FREE_PLAN;

/// Immutable per-request tenant context, read by every downstream stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantContext {
    /// Tenant primary key.
    pub id: TenantId,
    /// Tenant slug as resolved.
    pub slug: String,
    /// Whether the tenant is accepting traffic.
    pub active: bool,
    /// Current plan name (defaults to the free tier without a
    /// subscription).
    pub plan_name: String,
}

/// Raw tenant signals extracted from the request by the embedding server.
#[derive(Debug, Clone, Default)]
pub struct TenantSignals {
    /// `:slug` path parameter, highest priority.
    pub path_slug: Option<String>,
    /// `x-tenant` / `x-tenant-slug` header value.
    pub header_slug: Option<String>,
    /// Host header, from which a subdomain label may be inferred.
    pub host: Option<String>,
}

impl TenantSignals {
    /// Signals carrying only a path parameter.
    pub fn from_path(slug: &str) -> Self {
        Self {
            path_slug: Some(slug.to_string()),
            ..Default::default()
        }
    }

    /// Resolve the winning slug: path param > header > subdomain. Empty
    /// strings never win.
    pub fn slug(&self) -> Option<String> {
        non_empty(self.path_slug.as_deref())
            .or_else(|| non_empty(self.header_slug.as_deref()))
            .or_else(|| self.host.as_deref().and_then(subdomain_label))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Extract a tenant slug from a hostname. Requires at least three labels
/// (`acme.app.example.com`), takes the first label lower-cased, and never
/// treats `www` as a tenant.
fn subdomain_label(host: &str) -> Option<String> {
    let host = host.split(':').next()?;
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 3 {
        return None;
    }
    let first = labels[0].trim().to_ascii_lowercase();
    if first.is_empty() || first == "www" {
        return None;
    }
    Some(first)
}

/// Resolves tenant signals to a [`TenantContext`] via the directory.
pub struct TenantResolver {
    directory: Arc<dyn Directory>,
}

impl TenantResolver {
    /// New resolver over the given directory.
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Resolve the request's tenant. Read-only; fails closed on directory
    /// errors since everything downstream depends on a correct tenant.
    pub async fn resolve(&self, signals: &TenantSignals) -> Result<TenantContext, GateError> {
        let slug = signals.slug().ok_or(GateError::MissingTenant)?;

        let tenant = self
            .directory
            .tenant_by_slug(&slug)
            .await
            .map_err(|e| GateError::InfrastructureUnavailable(e.to_string()))?
            .ok_or_else(|| GateError::TenantNotFound { slug: slug.clone() })?;

        let plan_name = self
            .directory
            .subscription_for(tenant.id)
            .await
            .map_err(|e| GateError::InfrastructureUnavailable(e.to_string()))?
            .map(|s| s.plan_name)
            .unwrap_or_else(|| FREE_PLAN.to_string());

        Ok(TenantContext {
            id: tenant.id,
            slug: tenant.slug,
            active: tenant.status == TenantStatus::Active,
            plan_name,
        })
    }
}
