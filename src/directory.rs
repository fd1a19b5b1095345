//! Primary Datastore Capability
//!
//! Durable records the pipeline reads: tenants, subscriptions, memberships,
//! API keys, and durable per-tenant resource counts. The pipeline never
//! mutates these beyond the best-effort API-key `last_used_at` touch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant primary key.
pub type TenantId = Uuid;
/// User primary key.
pub type UserId = Uuid;

/// Lifecycle state of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    /// Accepting traffic.
    Active,
    /// Resolvable but refusing traffic.
    Suspended,
}

/// A tenant row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    /// Primary key.
    pub id: TenantId,
    /// URL-safe unique identifier used in routes and subdomains.
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Lifecycle state.
    pub status: TenantStatus,
}

/// A tenant's current subscription. Absence means the lowest/free tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Plan name, resolved against the static plan catalog.
    pub plan_name: String,
    /// Whether the subscription is currently in force.
    pub active: bool,
}

/// Role a user holds within one tenant. Ordered: owner > admin > staff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantRole {
    /// Day-to-day operator.
    Staff,
    /// Tenant administrator.
    Admin,
    /// Tenant owner.
    Owner,
}

impl std::fmt::Display for TenantRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Staff => write!(f, "staff"),
            Self::Admin => write!(f, "admin"),
            Self::Owner => write!(f, "owner"),
        }
    }
}

/// Membership binding a user to a tenant. Unique per (user, tenant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipRecord {
    /// The member.
    pub user_id: UserId,
    /// The tenant.
    pub tenant_id: TenantId,
    /// Role within this tenant.
    pub role: TenantRole,
}

/// Stored API key. Only the one-way hash is persisted; the plaintext key
/// exists nowhere after issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    /// Primary key.
    pub id: Uuid,
    /// Tenant the key is scoped to.
    pub tenant_id: TenantId,
    /// Hex SHA-256 of the plaintext key.
    pub key_hash: String,
    /// Granted permission scopes, e.g. `claims:write`.
    pub scopes: Vec<String>,
    /// Revoked keys stay on file but never authenticate.
    pub active: bool,
    /// Best-effort usage timestamp.
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Tenant-scoped resource kinds subject to plan quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Complaint/claim cases.
    Claims,
    /// Customer records.
    Customers,
    /// Tutor records.
    Tutors,
    /// Seats. Counted via memberships, since a user row may be shared
    /// across tenants.
    Users,
}

impl ResourceKind {
    /// Key under which the plan table stores this resource's ceiling.
    pub fn limit_key(&self) -> &'static str {
        match self {
            Self::Claims => "max_claims",
            Self::Customers => "max_customers",
            Self::Tutors => "max_tutors",
            Self::Users => "max_users",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Claims => write!(f, "claims"),
            Self::Customers => write!(f, "customers"),
            Self::Tutors => write!(f, "tutors"),
            Self::Users => write!(f, "users"),
        }
    }
}

/// Primary datastore failure.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The underlying query failed.
    #[error("datastore query failed: {0}")]
    Query(String),
}

/// Read access to the durable records the pipeline depends on.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Look up a tenant by its unique slug.
    async fn tenant_by_slug(&self, slug: &str) -> Result<Option<TenantRecord>, DirectoryError>;

    /// Look up a tenant by primary key.
    async fn tenant_by_id(&self, id: TenantId) -> Result<Option<TenantRecord>, DirectoryError>;

    /// The tenant's active subscription, if any.
    async fn subscription_for(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<SubscriptionRecord>, DirectoryError>;

    /// Membership for (user, tenant), if any.
    async fn membership(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
    ) -> Result<Option<MembershipRecord>, DirectoryError>;

    /// Look up an active-or-revoked API key by its stored hash.
    async fn api_key_by_hash(&self, hash: &str) -> Result<Option<ApiKeyRecord>, DirectoryError>;

    /// Refresh a key's `last_used_at`. Best effort; callers never fail a
    /// request over this.
    async fn touch_api_key(&self, key_id: Uuid) -> Result<(), DirectoryError>;

    /// Durable count of `kind` rows owned by the tenant.
    async fn count_resource(
        &self,
        kind: ResourceKind,
        tenant_id: TenantId,
    ) -> Result<u64, DirectoryError>;
}

/// In-memory directory in the shape of the production one. Backs tests and
/// single-node development deployments.
#[derive(Default)]
pub struct MemoryDirectory {
    tenants: DashMap<TenantId, TenantRecord>,
    subscriptions: DashMap<TenantId, SubscriptionRecord>,
    memberships: DashMap<(UserId, TenantId), MembershipRecord>,
    api_keys: DashMap<Uuid, ApiKeyRecord>,
    counts: DashMap<(TenantId, ResourceKind), u64>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tenant.
    pub fn put_tenant(&self, tenant: TenantRecord) {
        self.tenants.insert(tenant.id, tenant);
    }

    /// Insert or replace a tenant's subscription.
    pub fn put_subscription(&self, sub: SubscriptionRecord) {
        self.subscriptions.insert(sub.tenant_id, sub);
    }

    /// Insert or replace a membership.
    pub fn put_membership(&self, m: MembershipRecord) {
        self.memberships.insert((m.user_id, m.tenant_id), m);
    }

    /// Insert or replace an API key record.
    pub fn put_api_key(&self, key: ApiKeyRecord) {
        self.api_keys.insert(key.id, key);
    }

    /// Set the durable count for a (tenant, resource) pair. `Users` counts
    /// are derived from memberships and ignore this table.
    pub fn set_count(&self, tenant_id: TenantId, kind: ResourceKind, count: u64) {
        self.counts.insert((tenant_id, kind), count);
    }

    /// Read back an API key record (test observability).
    pub fn api_key(&self, key_id: Uuid) -> Option<ApiKeyRecord> {
        self.api_keys.get(&key_id).map(|k| k.clone())
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn tenant_by_slug(&self, slug: &str) -> Result<Option<TenantRecord>, DirectoryError> {
        Ok(self
            .tenants
            .iter()
            .find(|t| t.slug == slug)
            .map(|t| t.clone()))
    }

    async fn tenant_by_id(&self, id: TenantId) -> Result<Option<TenantRecord>, DirectoryError> {
        Ok(self.tenants.get(&id).map(|t| t.clone()))
    }

    async fn subscription_for(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<SubscriptionRecord>, DirectoryError> {
        Ok(self
            .subscriptions
            .get(&tenant_id)
            .filter(|s| s.active)
            .map(|s| s.clone()))
    }

    async fn membership(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
    ) -> Result<Option<MembershipRecord>, DirectoryError> {
        Ok(self
            .memberships
            .get(&(user_id, tenant_id))
            .map(|m| m.clone()))
    }

    async fn api_key_by_hash(&self, hash: &str) -> Result<Option<ApiKeyRecord>, DirectoryError> {
        Ok(self
            .api_keys
            .iter()
            .find(|k| k.key_hash == hash)
            .map(|k| k.clone()))
    }

    async fn touch_api_key(&self, key_id: Uuid) -> Result<(), DirectoryError> {
        if let Some(mut key) = self.api_keys.get_mut(&key_id) {
            key.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn count_resource(
        &self,
        kind: ResourceKind,
        tenant_id: TenantId,
    ) -> Result<u64, DirectoryError> {
        if kind == ResourceKind::Users {
            return Ok(self
                .memberships
                .iter()
                .filter(|m| m.tenant_id == tenant_id)
                .count() as u64);
        }
        Ok(self
            .counts
            .get(&(tenant_id, kind))
            .map(|c| *c)
            .unwrap_or(0))
    }
}

/// Convenience constructors for records, mirroring how the provisioning
/// service creates them.
impl TenantRecord {
    /// New active tenant with a fresh id.
    pub fn new(slug: &str, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            name: name.to_string(),
            status: TenantStatus::Active,
        }
    }
}

impl ApiKeyRecord {
    /// New active key from an already-computed hash and scope set.
    pub fn new(tenant_id: TenantId, key_hash: &str, scopes: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            key_hash: key_hash.to_string(),
            scopes,
            active: true,
            last_used_at: None,
        }
    }
}

/// Not part of the trait: role parsing used when claims carry roles as
/// strings.
impl std::str::FromStr for TenantRole {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staff" => Ok(Self::Staff),
            "admin" => Ok(Self::Admin),
            "owner" => Ok(Self::Owner),
            _ => Err(()),
        }
    }
}
