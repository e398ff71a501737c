//! Authorization code storage.
//!
//! Codes live either in a process-global map or in the `oauth2_authorization`
//! table, selected by `oauth2.code_store`. Both stores hand out each code at most
//! once: [`AuthorizationCodeStore::take`] removes the grant in the same step that
//! returns it.

use crate::entity::oauth2_authorization;
use async_trait::async_trait;
use base64::Engine;
use dashmap::DashMap;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use time::OffsetDateTime;

pub const PKCE_METHOD_S256: &str = "S256";
pub const PKCE_METHOD_PLAIN: &str = "plain";

/// Everything the token endpoint needs to redeem a code.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthorizationGrant {
    pub code: String,
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    /// The token request must repeat `redirect_uri` when this is set
    pub redirect_uri_explicit: bool,
    pub scope: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl AuthorizationGrant {
    pub fn is_expired(&self) -> bool {
        self.expires_at < OffsetDateTime::now_utc()
    }

    /// Verify a PKCE code verifier against the stored challenge.
    ///
    /// Grants created without a challenge accept any verifier.
    pub fn verify_pkce(&self, code_verifier: &str) -> bool {
        match (&self.code_challenge, &self.code_challenge_method) {
            (Some(challenge), Some(method)) => match method.as_str() {
                PKCE_METHOD_S256 => s256_challenge(code_verifier) == *challenge,
                PKCE_METHOD_PLAIN => code_verifier == challenge,
                _ => false,
            },
            (Some(challenge), None) => code_verifier == challenge,
            (None, _) => true,
        }
    }
}

impl From<oauth2_authorization::Model> for AuthorizationGrant {
    fn from(m: oauth2_authorization::Model) -> Self {
        Self {
            code: m.code,
            client_id: m.client_id,
            user_id: m.user_id,
            redirect_uri: m.redirect_uri,
            redirect_uri_explicit: m.redirect_uri_explicit,
            scope: m.scope,
            code_challenge: m.code_challenge,
            code_challenge_method: m.code_challenge_method,
            created_at: m.created_at,
            expires_at: m.expires_at,
        }
    }
}

/// BASE64URL(SHA256(verifier)) as defined by RFC 7636.
pub fn s256_challenge(code_verifier: &str) -> String {
    let hash = Sha256::digest(code_verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash)
}

/// Check a PKCE challenge and method from an authorization request.
///
/// Returns the effective method (`plain` when omitted).
pub fn validate_code_challenge(challenge: &str, method: Option<&str>) -> Result<String, String> {
    let method = method.unwrap_or(PKCE_METHOD_PLAIN);
    if method != PKCE_METHOD_S256 && method != PKCE_METHOD_PLAIN {
        return Err(format!("Unsupported code_challenge_method '{method}'"));
    }
    let len_ok = (43..=128).contains(&challenge.len());
    let chars_ok = challenge
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'));
    if !len_ok || !chars_ok {
        return Err("code_challenge must be 43-128 unreserved characters".to_string());
    }
    Ok(method.to_string())
}

#[async_trait]
pub trait AuthorizationCodeStore: Send + Sync {
    async fn insert(&self, grant: AuthorizationGrant) -> Result<(), DbErr>;

    /// Remove and return the grant for `code`. Expired grants are returned too so
    /// the caller can report them; they are gone from the store either way.
    async fn take(&self, code: &str) -> Result<Option<AuthorizationGrant>, DbErr>;

    /// Drop expired grants, returning how many were removed.
    async fn purge_expired(&self) -> Result<u64, DbErr>;
}

/// Process-global code store.
#[derive(Clone, Default)]
pub struct MemoryCodeStore {
    grants: Arc<DashMap<String, AuthorizationGrant>>,
}

impl MemoryCodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[async_trait]
impl AuthorizationCodeStore for MemoryCodeStore {
    async fn insert(&self, grant: AuthorizationGrant) -> Result<(), DbErr> {
        self.grants.insert(grant.code.clone(), grant);
        Ok(())
    }

    async fn take(&self, code: &str) -> Result<Option<AuthorizationGrant>, DbErr> {
        Ok(self.grants.remove(code).map(|(_, grant)| grant))
    }

    async fn purge_expired(&self) -> Result<u64, DbErr> {
        let before = self.grants.len();
        self.grants.retain(|_, grant| !grant.is_expired());
        Ok(before.saturating_sub(self.grants.len()) as u64)
    }
}

/// Code store backed by the `oauth2_authorization` table.
#[derive(Clone)]
pub struct DatabaseCodeStore {
    db: Arc<DatabaseConnection>,
}

impl DatabaseCodeStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuthorizationCodeStore for DatabaseCodeStore {
    async fn insert(&self, grant: AuthorizationGrant) -> Result<(), DbErr> {
        let row = oauth2_authorization::ActiveModel {
            code: Set(grant.code),
            client_id: Set(grant.client_id),
            user_id: Set(grant.user_id),
            redirect_uri: Set(grant.redirect_uri),
            redirect_uri_explicit: Set(grant.redirect_uri_explicit),
            scope: Set(grant.scope),
            code_challenge: Set(grant.code_challenge),
            code_challenge_method: Set(grant.code_challenge_method),
            expires_at: Set(grant.expires_at),
            created_at: Set(grant.created_at),
        };
        row.insert(self.db.as_ref()).await?;
        Ok(())
    }

    async fn take(&self, code: &str) -> Result<Option<AuthorizationGrant>, DbErr> {
        let Some(row) = oauth2_authorization::Entity::find_by_id(code)
            .one(self.db.as_ref())
            .await?
        else {
            return Ok(None);
        };

        // Whoever deletes the row owns the code; a concurrent redeemer sees 0 rows.
        let deleted = oauth2_authorization::Entity::delete_by_id(code)
            .exec(self.db.as_ref())
            .await?;
        if deleted.rows_affected == 0 {
            return Ok(None);
        }
        Ok(Some(row.into()))
    }

    async fn purge_expired(&self) -> Result<u64, DbErr> {
        let result = oauth2_authorization::Entity::delete_many()
            .filter(oauth2_authorization::Column::ExpiresAt.lt(OffsetDateTime::now_utc()))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(code: &str, ttl: time::Duration) -> AuthorizationGrant {
        let now = OffsetDateTime::now_utc();
        AuthorizationGrant {
            code: code.to_string(),
            client_id: "client".into(),
            user_id: "user".into(),
            redirect_uri: "http://localhost/cb".into(),
            redirect_uri_explicit: false,
            scope: "openid".into(),
            code_challenge: None,
            code_challenge_method: None,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    #[test]
    fn pkce_s256_matches_rfc_example() {
        // RFC 7636 appendix B
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let mut g = grant("c", time::Duration::minutes(1));
        g.code_challenge = Some("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".into());
        g.code_challenge_method = Some(PKCE_METHOD_S256.into());
        assert!(g.verify_pkce(verifier));
        assert!(!g.verify_pkce("wrong-verifier"));
    }

    #[test]
    fn pkce_plain_and_absent() {
        let mut g = grant("c", time::Duration::minutes(1));
        assert!(g.verify_pkce("anything"));
        g.code_challenge = Some("abc".into());
        g.code_challenge_method = Some(PKCE_METHOD_PLAIN.into());
        assert!(g.verify_pkce("abc"));
        assert!(!g.verify_pkce("abd"));
        g.code_challenge_method = Some("S512".into());
        assert!(!g.verify_pkce("abc"));
    }

    #[test]
    fn challenge_validation() {
        let good = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
        assert_eq!(validate_code_challenge(good, Some("S256")).unwrap(), "S256");
        assert_eq!(validate_code_challenge(good, None).unwrap(), "plain");
        assert!(validate_code_challenge(good, Some("S1")).is_err());
        assert!(validate_code_challenge("short", Some("S256")).is_err());
        assert!(validate_code_challenge(&format!("{good}!"), Some("S256")).is_err());
    }

    #[tokio::test]
    async fn memory_store_take_is_single_use() {
        let store = MemoryCodeStore::new();
        store
            .insert(grant("abc", time::Duration::minutes(5)))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);

        let first = store.take("abc").await.unwrap();
        assert!(first.is_some());
        let second = store.take("abc").await.unwrap();
        assert!(second.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn memory_store_purges_expired() {
        let store = MemoryCodeStore::new();
        store
            .insert(grant("old", time::Duration::seconds(-5)))
            .await
            .unwrap();
        store
            .insert(grant("new", time::Duration::minutes(5)))
            .await
            .unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.take("old").await.unwrap().is_none());
        assert!(store.take("new").await.unwrap().is_some());
    }
}
