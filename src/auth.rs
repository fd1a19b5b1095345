//! Identity Authentication
//!
//! Dual-mode: a signed short-lived access token (`Authorization: Bearer`)
//! or an opaque API key (`x-api-key` / `Authorization: ApiKey`). The mode
//! is decided once, from the headers, in [`Credential::extract`]; there is
//! no fallback from one mode to the other. Token verification fails
//! closed. API keys are looked up by one-way hash, never by plaintext
//! comparison.

use std::collections::HashSet;
use std::sync::Arc;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::directory::{Directory, TenantId, TenantStatus, UserId};
use crate::error::GateError;
use crate::tenant::TenantContext;

/// Role name marking a global super-operator; bypasses plan gates, never
/// authentication.
pub const OPERATOR_ROLE: &str = "operator";

/// Signed-token kind, embedded as a claim. Only access tokens pass API
/// authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Short-lived API credential.
    Access,
    /// Long-lived token-minting credential.
    Refresh,
}

/// Claims carried by a signed token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User primary key.
    pub sub: UserId,
    /// User email.
    pub email: String,
    /// Global role, if any (`operator` marks a super-operator).
    pub role: Option<String>,
    /// Access vs. refresh.
    pub token_type: TokenType,
    /// Expiry, seconds since epoch.
    pub exp: i64,
    /// Issued-at, seconds since epoch.
    pub iat: i64,
}

/// Identity established from a verified signed token.
#[derive(Debug, Clone)]
pub struct UserPrincipal {
    /// User primary key.
    pub user_id: UserId,
    /// User email.
    pub email: String,
    /// Global role, if any.
    pub role: Option<String>,
    /// Which token kind authenticated this request.
    pub token_type: TokenType,
}

impl UserPrincipal {
    /// Whether this user is a global super-operator.
    pub fn is_operator(&self) -> bool {
        self.role.as_deref() == Some(OPERATOR_ROLE)
    }
}

/// Identity established from a verified API key. Scopes substitute for
/// tenant roles.
#[derive(Debug, Clone)]
pub struct ApiKeyPrincipal {
    /// Key primary key.
    pub api_key_id: Uuid,
    /// Tenant the key is scoped to.
    pub tenant_id: TenantId,
    /// Granted scopes.
    pub scopes: HashSet<String>,
}

/// The caller's identity: exactly one variant per request.
#[derive(Debug, Clone)]
pub enum CallerIdentity {
    /// Verified signed token.
    User(UserPrincipal),
    /// Verified API key.
    ApiKey(ApiKeyPrincipal),
}

impl CallerIdentity {
    /// Whether the caller is a global super-operator.
    pub fn is_operator(&self) -> bool {
        match self {
            Self::User(u) => u.is_operator(),
            Self::ApiKey(_) => false,
        }
    }

    /// For API-key callers, require every listed scope; denial lists what
    /// is missing. User callers pass, tenant roles govern them instead.
    pub fn require_scopes(&self, required: &[&str]) -> Result<(), GateError> {
        let Self::ApiKey(key) = self else {
            return Ok(());
        };
        let missing: Vec<String> = required
            .iter()
            .filter(|s| !key.scopes.contains(**s))
            .map(|s| s.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(GateError::MissingScopes {
                missing_scopes: missing,
            })
        }
    }
}

/// A presented credential, mode already decided.
#[derive(Debug, Clone)]
pub enum Credential {
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// `x-api-key: <key>` or `Authorization: ApiKey <key>`.
    ApiKey(String),
}

impl Credential {
    /// Centralized header sniffing. The `x-api-key` header wins over the
    /// `Authorization` header; within `Authorization`, the scheme decides.
    pub fn extract(
        authorization: Option<&str>,
        api_key_header: Option<&str>,
    ) -> Result<Self, GateError> {
        if let Some(key) = api_key_header.map(str::trim).filter(|k| !k.is_empty()) {
            return Ok(Self::ApiKey(key.to_string()));
        }
        let Some(value) = authorization.map(str::trim).filter(|v| !v.is_empty()) else {
            return Err(GateError::MissingCredential);
        };
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Ok(Self::Bearer(token.trim().to_string()));
        }
        if let Some(key) = value.strip_prefix("ApiKey ") {
            return Ok(Self::ApiKey(key.trim().to_string()));
        }
        Err(GateError::InvalidCredential {
            reason: "unrecognized authorization scheme".into(),
        })
    }
}

/// Hex SHA-256 of a plaintext key; the raw key is never stored or
/// compared directly.
pub fn hash_api_key(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

/// Mint a signed token. Used by the auth service at login and by tests.
pub fn issue_token(
    secret: &str,
    claims: &AccessClaims,
) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verifies signed tokens. Fails closed: any signature, expiry, or
/// type-claim mismatch rejects the credential.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Verifier for HS256 tokens signed with `secret`.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify signature and expiry, and require an access-type token.
    pub fn verify(&self, token: &str) -> Result<AccessClaims, GateError> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation).map_err(
            |e| GateError::InvalidCredential {
                reason: e.to_string(),
            },
        )?;
        if data.claims.token_type != TokenType::Access {
            return Err(GateError::InvalidCredential {
                reason: "refresh tokens are not accepted here".into(),
            });
        }
        Ok(data.claims)
    }
}

/// Resolves a presented credential to a [`CallerIdentity`].
pub struct Authenticator {
    directory: Arc<dyn Directory>,
    verifier: TokenVerifier,
}

impl Authenticator {
    /// New authenticator over the given directory and token secret.
    pub fn new(directory: Arc<dyn Directory>, jwt_secret: &str) -> Self {
        Self {
            directory,
            verifier: TokenVerifier::new(jwt_secret),
        }
    }

    /// Authenticate the credential. For API keys, the key's tenant must
    /// equal `route_tenant` when both are present; a mismatch is an
    /// authorization failure, never a silent reassignment.
    pub async fn authenticate(
        &self,
        credential: Credential,
        route_tenant: Option<&TenantContext>,
    ) -> Result<CallerIdentity, GateError> {
        match credential {
            Credential::Bearer(token) => {
                let claims = self.verifier.verify(&token)?;
                Ok(CallerIdentity::User(UserPrincipal {
                    user_id: claims.sub,
                    email: claims.email,
                    role: claims.role,
                    token_type: claims.token_type,
                }))
            }
            Credential::ApiKey(key) => self.authenticate_api_key(&key, route_tenant).await,
        }
    }

    async fn authenticate_api_key(
        &self,
        key: &str,
        route_tenant: Option<&TenantContext>,
    ) -> Result<CallerIdentity, GateError> {
        let hash = hash_api_key(key);
        let record = self
            .directory
            .api_key_by_hash(&hash)
            .await
            .map_err(|e| GateError::InfrastructureUnavailable(e.to_string()))?
            .ok_or_else(|| GateError::InvalidCredential {
                reason: "unknown api key".into(),
            })?;
        if !record.active {
            return Err(GateError::InvalidCredential {
                reason: "api key revoked".into(),
            });
        }

        if let Some(tenant) = route_tenant {
            if tenant.id != record.tenant_id {
                return Err(GateError::TenantMismatch);
            }
            if !tenant.active {
                return Err(GateError::InvalidCredential {
                    reason: "api key tenant is not active".into(),
                });
            }
        } else {
            let tenant = self
                .directory
                .tenant_by_id(record.tenant_id)
                .await
                .map_err(|e| GateError::InfrastructureUnavailable(e.to_string()))?;
            match tenant {
                Some(t) if t.status == TenantStatus::Active => {}
                _ => {
                    return Err(GateError::InvalidCredential {
                        reason: "api key tenant is not active".into(),
                    })
                }
            }
        }

        // Best-effort usage bookkeeping; never fails the request.
        let directory = Arc::clone(&self.directory);
        let key_id = record.id;
        tokio::spawn(async move {
            if let Err(e) = directory.touch_api_key(key_id).await {
                tracing::debug!(error = %e, "api key last_used_at update failed");
            }
        });

        Ok(CallerIdentity::ApiKey(ApiKeyPrincipal {
            api_key_id: record.id,
            tenant_id: record.tenant_id,
            scopes: record.scopes.into_iter().collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{ApiKeyRecord, MemoryDirectory, TenantRecord};
    use chrono::Utc;

    const SECRET: &str = "test-secret";

    fn claims(token_type: TokenType, exp_offset: i64) -> AccessClaims {
        let now = Utc::now().timestamp();
        AccessClaims {
            sub: Uuid::new_v4(),
            email: "user@example.com".into(),
            role: None,
            token_type,
            exp: now + exp_offset,
            iat: now,
        }
    }

    fn tenant_ctx(record: &TenantRecord, plan: &str) -> TenantContext {
        TenantContext {
            id: record.id,
            slug: record.slug.clone(),
            active: record.status == TenantStatus::Active,
            plan_name: plan.into(),
        }
    }

    #[test]
    fn test_credential_extraction() {
        assert!(matches!(
            Credential::extract(Some("Bearer abc"), None),
            Ok(Credential::Bearer(t)) if t == "abc"
        ));
        assert!(matches!(
            Credential::extract(Some("ApiKey k1"), None),
            Ok(Credential::ApiKey(k)) if k == "k1"
        ));
        // x-api-key wins over Authorization.
        assert!(matches!(
            Credential::extract(Some("Bearer abc"), Some("k2")),
            Ok(Credential::ApiKey(k)) if k == "k2"
        ));
        assert!(matches!(
            Credential::extract(None, None),
            Err(GateError::MissingCredential)
        ));
        assert!(matches!(
            Credential::extract(Some("Basic dXNlcg=="), None),
            Err(GateError::InvalidCredential { .. })
        ));
    }

    #[test]
    fn test_token_verify_round_trip() {
        let verifier = TokenVerifier::new(SECRET);
        let claims = claims(TokenType::Access, 3600);
        let token = issue_token(SECRET, &claims).unwrap();

        let verified = verifier.verify(&token).unwrap();
        assert_eq!(verified.sub, claims.sub);
        assert_eq!(verified.email, "user@example.com");
    }

    #[test]
    fn test_token_verify_fails_closed() {
        let verifier = TokenVerifier::new(SECRET);

        let expired = issue_token(SECRET, &claims(TokenType::Access, -120)).unwrap();
        assert!(matches!(
            verifier.verify(&expired),
            Err(GateError::InvalidCredential { .. })
        ));

        let refresh = issue_token(SECRET, &claims(TokenType::Refresh, 3600)).unwrap();
        assert!(matches!(
            verifier.verify(&refresh),
            Err(GateError::InvalidCredential { .. })
        ));

        let foreign = issue_token("other-secret", &claims(TokenType::Access, 3600)).unwrap();
        assert!(matches!(
            verifier.verify(&foreign),
            Err(GateError::InvalidCredential { .. })
        ));
    }

    #[test]
    fn test_hash_is_deterministic_and_opaque() {
        let a = hash_api_key("ck_live_12345");
        let b = hash_api_key("ck_live_12345");
        let c = hash_api_key("ck_live_12346");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_api_key_happy_path_touches_last_used() {
        let dir = Arc::new(MemoryDirectory::new());
        let tenant = TenantRecord::new("acme", "Acme Corp");
        let ctx = tenant_ctx(&tenant, "pro");
        dir.put_tenant(tenant);
        let record = ApiKeyRecord::new(
            ctx.id,
            &hash_api_key("ck_live_abc"),
            vec!["claims:read".into()],
        );
        let key_id = record.id;
        dir.put_api_key(record);

        let auth = Authenticator::new(Arc::clone(&dir) as Arc<dyn Directory>, SECRET);
        let identity = auth
            .authenticate(Credential::ApiKey("ck_live_abc".into()), Some(&ctx))
            .await
            .unwrap();

        let CallerIdentity::ApiKey(principal) = identity else {
            panic!("expected api key principal");
        };
        assert_eq!(principal.tenant_id, ctx.id);
        assert!(principal.scopes.contains("claims:read"));

        // The touch runs on a spawned task; yield until it lands.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(dir.api_key(key_id).unwrap().last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_api_key_tenant_mismatch() {
        let dir = Arc::new(MemoryDirectory::new());
        let key_tenant = TenantRecord::new("acme", "Acme Corp");
        let other = TenantRecord::new("globex", "Globex");
        let other_ctx = tenant_ctx(&other, "free");
        let key_tenant_id = key_tenant.id;
        dir.put_tenant(key_tenant);
        dir.put_tenant(other);
        dir.put_api_key(ApiKeyRecord::new(
            key_tenant_id,
            &hash_api_key("ck_live_abc"),
            vec![],
        ));

        let auth = Authenticator::new(dir, SECRET);
        let err = auth
            .authenticate(Credential::ApiKey("ck_live_abc".into()), Some(&other_ctx))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::TenantMismatch));
        assert_eq!(err.status(), 403);
    }

    #[tokio::test]
    async fn test_unknown_and_revoked_keys() {
        let dir = Arc::new(MemoryDirectory::new());
        let tenant = TenantRecord::new("acme", "Acme Corp");
        let tenant_id = tenant.id;
        dir.put_tenant(tenant);

        let mut revoked =
            ApiKeyRecord::new(tenant_id, &hash_api_key("ck_revoked"), vec![]);
        revoked.active = false;
        dir.put_api_key(revoked);

        let auth = Authenticator::new(dir, SECRET);
        assert!(matches!(
            auth.authenticate(Credential::ApiKey("ck_nope".into()), None)
                .await,
            Err(GateError::InvalidCredential { .. })
        ));
        assert!(matches!(
            auth.authenticate(Credential::ApiKey("ck_revoked".into()), None)
                .await,
            Err(GateError::InvalidCredential { .. })
        ));
    }

    #[test]
    fn test_scope_requirements() {
        let identity = CallerIdentity::ApiKey(ApiKeyPrincipal {
            api_key_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            scopes: ["claims:read".to_string()].into_iter().collect(),
        });

        assert!(identity.require_scopes(&["claims:read"]).is_ok());
        let err = identity.require_scopes(&["claims:write"]).unwrap_err();
        let GateError::MissingScopes { missing_scopes } = &err else {
            panic!("expected MissingScopes");
        };
        assert_eq!(missing_scopes, &["claims:write".to_string()]);
        assert_eq!(err.status(), 403);

        // User principals are governed by roles, not scopes.
        let user = CallerIdentity::User(UserPrincipal {
            user_id: Uuid::new_v4(),
            email: "u@example.com".into(),
            role: None,
            token_type: TokenType::Access,
        });
        assert!(user.require_scopes(&["claims:write"]).is_ok());
    }
}
