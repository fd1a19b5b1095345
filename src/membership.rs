//! Membership Validation
//!
//! Authentication proves who the caller is; membership proves they belong
//! to the tenant on the route. Users need a membership row for the
//! resolved tenant. API keys already carry their tenant binding (checked
//! at authentication), so they bypass this stage.

use std::sync::Arc;

use crate::auth::CallerIdentity;
use crate::directory::{Directory, TenantRole};
use crate::error::GateError;
use crate::tenant::TenantContext;

/// Checks that the authenticated caller belongs to the resolved tenant.
pub struct MembershipValidator {
    directory: Arc<dyn Directory>,
}

impl MembershipValidator {
    /// New validator over the given directory.
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Validate the caller against the tenant. Returns the caller's role
    /// within the tenant for users, `None` for API keys. Fails closed on
    /// directory errors: an unverifiable membership is not a membership.
    pub async fn validate(
        &self,
        caller: &CallerIdentity,
        tenant: &TenantContext,
    ) -> Result<Option<TenantRole>, GateError> {
        let user = match caller {
            CallerIdentity::User(u) => u,
            CallerIdentity::ApiKey(_) => return Ok(None),
        };
        let membership = self
            .directory
            .membership(user.user_id, tenant.id)
            .await
            .map_err(|e| GateError::InfrastructureUnavailable(e.to_string()))?;
        match membership {
            Some(m) => Ok(Some(m.role)),
            None => Err(GateError::NotAMember),
        }
    }
}

/// Require at least `need` within the tenant. Global super-operators pass
/// without a membership; API-key callers pass here and are constrained by
/// scopes instead.
pub fn require_tenant_role(
    caller: &CallerIdentity,
    role: Option<TenantRole>,
    need: TenantRole,
) -> Result<(), GateError> {
    if caller.is_operator() {
        return Ok(());
    }
    if matches!(caller, CallerIdentity::ApiKey(_)) {
        return Ok(());
    }
    match role {
        Some(have) if have >= need => Ok(()),
        have => Err(GateError::InsufficientRole {
            need: need.to_string(),
            have: have.map(|r| r.to_string()).unwrap_or_else(|| "none".into()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ApiKeyPrincipal, TokenType, UserPrincipal, OPERATOR_ROLE};
    use crate::directory::{MembershipRecord, MemoryDirectory, TenantRecord, TenantStatus};
    use uuid::Uuid;

    fn user(role: Option<&str>) -> CallerIdentity {
        CallerIdentity::User(UserPrincipal {
            user_id: Uuid::new_v4(),
            email: "u@example.com".into(),
            role: role.map(String::from),
            token_type: TokenType::Access,
        })
    }

    fn ctx(record: &TenantRecord) -> TenantContext {
        TenantContext {
            id: record.id,
            slug: record.slug.clone(),
            active: record.status == TenantStatus::Active,
            plan_name: "free".into(),
        }
    }

    #[tokio::test]
    async fn test_member_gets_role_back() {
        let dir = Arc::new(MemoryDirectory::new());
        let tenant = TenantRecord::new("acme", "Acme Corp");
        let tenant_ctx = ctx(&tenant);
        let caller = user(None);
        let CallerIdentity::User(ref principal) = caller else {
            unreachable!()
        };
        dir.put_membership(MembershipRecord {
            user_id: principal.user_id,
            tenant_id: tenant.id,
            role: TenantRole::Admin,
        });
        dir.put_tenant(tenant);

        let validator = MembershipValidator::new(dir);
        let role = validator.validate(&caller, &tenant_ctx).await.unwrap();
        assert_eq!(role, Some(TenantRole::Admin));
    }

    #[tokio::test]
    async fn test_non_member_is_rejected() {
        let dir = Arc::new(MemoryDirectory::new());
        let tenant = TenantRecord::new("acme", "Acme Corp");
        let tenant_ctx = ctx(&tenant);
        dir.put_tenant(tenant);

        let validator = MembershipValidator::new(dir);
        let err = validator.validate(&user(None), &tenant_ctx).await.unwrap_err();
        assert!(matches!(err, GateError::NotAMember));
        assert_eq!(err.status(), 403);
    }

    #[tokio::test]
    async fn test_api_key_bypasses_membership() {
        let dir = Arc::new(MemoryDirectory::new());
        let tenant = TenantRecord::new("acme", "Acme Corp");
        let tenant_ctx = ctx(&tenant);
        let caller = CallerIdentity::ApiKey(ApiKeyPrincipal {
            api_key_id: Uuid::new_v4(),
            tenant_id: tenant.id,
            scopes: Default::default(),
        });
        dir.put_tenant(tenant);

        let validator = MembershipValidator::new(dir);
        let role = validator.validate(&caller, &tenant_ctx).await.unwrap();
        assert_eq!(role, None);
    }

    #[test]
    fn test_role_requirements() {
        let caller = user(None);
        assert!(require_tenant_role(&caller, Some(TenantRole::Owner), TenantRole::Admin).is_ok());
        assert!(require_tenant_role(&caller, Some(TenantRole::Admin), TenantRole::Admin).is_ok());

        let err =
            require_tenant_role(&caller, Some(TenantRole::Staff), TenantRole::Admin).unwrap_err();
        let GateError::InsufficientRole { need, have } = &err else {
            panic!("expected InsufficientRole");
        };
        assert_eq!(need, "admin");
        assert_eq!(have, "staff");

        assert!(require_tenant_role(&caller, None, TenantRole::Staff).is_err());
    }

    #[test]
    fn test_operator_passes_any_role_check() {
        let operator = user(Some(OPERATOR_ROLE));
        assert!(require_tenant_role(&operator, None, TenantRole::Owner).is_ok());
    }
}
