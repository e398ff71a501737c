//! OAuth2 client registry.

use crate::config::ClientSeed;
use crate::entity::{oauth2_authorization, oauth2_client, oauth2_consent, oauth2_token};
use crate::error::OAuthError;
use crate::oauth2::scopes;
use crate::password::{generate_token, hash_password, verify_password};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, TransactionTrait,
};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

#[derive(Debug, Error)]
pub enum ClientRegistryError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("failed to hash client secret: {0}")]
    Hash(String),
    #[error("invalid client definition: {0}")]
    Invalid(String),
}

impl From<ClientRegistryError> for crate::error::ApiError {
    fn from(e: ClientRegistryError) -> Self {
        match e {
            ClientRegistryError::Invalid(msg) => Self::BadRequest(msg),
            ClientRegistryError::Database(db) => db.into(),
            ClientRegistryError::Hash(msg) => {
                tracing::error!(error = %msg, "Failed to hash client secret");
                Self::Server
            }
        }
    }
}

/// Input for registering a client.
#[derive(Debug, Clone)]
pub struct NewClient {
    pub id: Option<String>,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub scopes: String,
    pub grant_types: String,
    pub is_public: bool,
    pub skip_consent: bool,
}

#[derive(Clone)]
pub struct ClientRegistry {
    db: Arc<DatabaseConnection>,
}

impl ClientRegistry {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find(&self, client_id: &str) -> Result<Option<oauth2_client::Model>, DbErr> {
        oauth2_client::Entity::find_by_id(client_id)
            .one(self.db.as_ref())
            .await
    }

    pub async fn list(&self) -> Result<Vec<oauth2_client::Model>, DbErr> {
        oauth2_client::Entity::find()
            .order_by_asc(oauth2_client::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
    }

    /// Resolve the redirect URI for an authorization request.
    ///
    /// A supplied URI must exactly match a registered one; without one the
    /// first registered URI is used.
    pub fn bound_redirect(
        &self,
        client: &oauth2_client::Model,
        requested: Option<&str>,
    ) -> Result<String, OAuthError> {
        match requested {
            Some(uri) if client.is_redirect_uri_allowed(uri) => Ok(uri.to_string()),
            Some(_) => Err(OAuthError::InvalidRequest("Invalid redirect_uri".into())),
            None => client
                .redirect_uris_list()
                .into_iter()
                .next()
                .ok_or_else(|| OAuthError::InvalidRequest("No redirect_uri configured".into())),
        }
    }

    pub fn negotiate_scope(
        &self,
        client: &oauth2_client::Model,
        requested: Option<&str>,
    ) -> Result<String, OAuthError> {
        scopes::negotiate(requested, &client.scopes_list()).ok_or_else(|| {
            OAuthError::InvalidScope("None of the requested scopes are allowed".into())
        })
    }

    /// Authenticate a client at the token endpoint.
    ///
    /// Public clients are identified by id alone. Confidential clients must
    /// present the secret they were registered with.
    pub async fn authenticate(
        &self,
        client_id: &str,
        secret: Option<&str>,
    ) -> Result<oauth2_client::Model, OAuthError> {
        let client = self
            .find(client_id)
            .await?
            .ok_or(OAuthError::InvalidClient)?;
        if client.is_public {
            return Ok(client);
        }
        match (client.secret_hash.as_deref(), secret) {
            (Some(hash), Some(provided)) if verify_password(provided, hash) => Ok(client),
            _ => Err(OAuthError::InvalidClient),
        }
    }

    /// Register a client. Returns the plaintext secret for confidential
    /// clients; it is not recoverable afterwards.
    pub async fn create(
        &self,
        new: NewClient,
    ) -> Result<(oauth2_client::Model, Option<String>), ClientRegistryError> {
        validate_client(&new.name, &new.redirect_uris, &new.scopes)?;
        let secret = (!new.is_public).then(generate_token);
        let secret_hash = secret
            .as_deref()
            .map(hash_password)
            .transpose()
            .map_err(|e| ClientRegistryError::Hash(e.to_string()))?;

        let now = OffsetDateTime::now_utc();
        let client = oauth2_client::ActiveModel {
            id: Set(new.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string())),
            secret_hash: Set(secret_hash),
            name: Set(new.name),
            redirect_uris: Set(encode_uris(&new.redirect_uris)),
            grant_types: Set(new.grant_types),
            scopes: Set(new.scopes),
            is_public: Set(new.is_public),
            skip_consent: Set(new.skip_consent),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let client = client.insert(self.db.as_ref()).await?;
        tracing::info!(client_id = %client.id, public = client.is_public, "Registered OAuth2 client");
        Ok((client, secret))
    }

    /// Delete a client along with its consents, tokens and pending codes.
    pub async fn delete(&self, client_id: &str) -> Result<bool, DbErr> {
        let txn = self.db.begin().await?;
        oauth2_consent::Entity::delete_many()
            .filter(oauth2_consent::Column::ClientId.eq(client_id))
            .exec(&txn)
            .await?;
        oauth2_token::Entity::delete_many()
            .filter(oauth2_token::Column::ClientId.eq(client_id))
            .exec(&txn)
            .await?;
        oauth2_authorization::Entity::delete_many()
            .filter(oauth2_authorization::Column::ClientId.eq(client_id))
            .exec(&txn)
            .await?;
        let result = oauth2_client::Entity::delete_by_id(client_id)
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(result.rows_affected > 0)
    }

    /// Upsert the clients listed in configuration, keyed by id.
    pub async fn sync_configured_clients(
        &self,
        seeds: &[ClientSeed],
    ) -> Result<usize, ClientRegistryError> {
        let now = OffsetDateTime::now_utc();
        for seed in seeds {
            validate_client(&seed.name, &seed.redirect_uris, &seed.scopes)?;
            let existing = self.find(&seed.id).await?;

            // Keep the stored hash when the configured secret still matches it
            let secret_hash = match (&seed.secret, existing.as_ref().and_then(|c| c.secret_hash.clone())) {
                (Some(secret), Some(hash)) if verify_password(secret, &hash) => Some(hash),
                (Some(secret), _) => Some(
                    hash_password(secret).map_err(|e| ClientRegistryError::Hash(e.to_string()))?,
                ),
                (None, _) => None,
            };

            let is_public = seed.secret.is_none();
            match existing {
                Some(client) => {
                    let mut active: oauth2_client::ActiveModel = client.into();
                    active.secret_hash = Set(secret_hash);
                    active.name = Set(seed.name.clone());
                    active.redirect_uris = Set(encode_uris(&seed.redirect_uris));
                    active.grant_types = Set(seed.grant_types.clone());
                    active.scopes = Set(seed.scopes.clone());
                    active.is_public = Set(is_public);
                    active.skip_consent = Set(seed.skip_consent);
                    active.updated_at = Set(now);
                    active.update(self.db.as_ref()).await?;
                }
                None => {
                    oauth2_client::ActiveModel {
                        id: Set(seed.id.clone()),
                        secret_hash: Set(secret_hash),
                        name: Set(seed.name.clone()),
                        redirect_uris: Set(encode_uris(&seed.redirect_uris)),
                        grant_types: Set(seed.grant_types.clone()),
                        scopes: Set(seed.scopes.clone()),
                        is_public: Set(is_public),
                        skip_consent: Set(seed.skip_consent),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(self.db.as_ref())
                    .await?;
                }
            }
            tracing::debug!(client_id = %seed.id, "Synced configured client");
        }
        Ok(seeds.len())
    }
}

fn encode_uris(uris: &[String]) -> String {
    serde_json::to_string(uris).unwrap_or_else(|_| "[]".to_string())
}

fn validate_client(
    name: &str,
    redirect_uris: &[String],
    scopes: &str,
) -> Result<(), ClientRegistryError> {
    if name.trim().is_empty() {
        return Err(ClientRegistryError::Invalid("name must not be empty".into()));
    }
    if redirect_uris.is_empty() {
        return Err(ClientRegistryError::Invalid(
            "at least one redirect URI is required".into(),
        ));
    }
    for uri in redirect_uris {
        let parsed = url::Url::parse(uri)
            .map_err(|e| ClientRegistryError::Invalid(format!("redirect URI '{uri}': {e}")))?;
        if parsed.fragment().is_some() {
            return Err(ClientRegistryError::Invalid(format!(
                "redirect URI '{uri}' must not contain a fragment"
            )));
        }
    }
    if let Some(unknown) = scopes::parse(scopes)
        .into_iter()
        .find(|s| !scopes::SUPPORTED_SCOPES.contains(&s.as_str()))
    {
        return Err(ClientRegistryError::Invalid(format!(
            "unsupported scope '{unknown}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> oauth2_client::Model {
        let now = OffsetDateTime::now_utc();
        oauth2_client::Model {
            id: "web".into(),
            secret_hash: None,
            name: "Website".into(),
            redirect_uris: r#"["https://app.example/cb","https://app.example/alt"]"#.into(),
            grant_types: "authorization_code refresh_token".into(),
            scopes: "openid profile".into(),
            is_public: true,
            skip_consent: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn registry() -> ClientRegistry {
        ClientRegistry::new(Arc::new(DatabaseConnection::default()))
    }

    #[test]
    fn redirect_defaults_to_first_registered() {
        let r = registry();
        assert_eq!(
            r.bound_redirect(&client(), None).unwrap(),
            "https://app.example/cb"
        );
        assert_eq!(
            r.bound_redirect(&client(), Some("https://app.example/alt"))
                .unwrap(),
            "https://app.example/alt"
        );
        assert!(matches!(
            r.bound_redirect(&client(), Some("https://evil.example/cb")),
            Err(OAuthError::InvalidRequest(_))
        ));
    }

    #[test]
    fn scope_negotiation_uses_client_scopes() {
        let r = registry();
        assert_eq!(r.negotiate_scope(&client(), None).unwrap(), "openid profile");
        assert_eq!(
            r.negotiate_scope(&client(), Some("openid email")).unwrap(),
            "openid"
        );
        assert!(matches!(
            r.negotiate_scope(&client(), Some("email")),
            Err(OAuthError::InvalidScope(_))
        ));
    }

    #[test]
    fn client_definitions_are_validated() {
        let uris = vec!["https://app.example/cb".to_string()];
        assert!(validate_client("App", &uris, "openid profile").is_ok());
        assert!(validate_client(" ", &uris, "openid").is_err());
        assert!(validate_client("App", &[], "openid").is_err());
        assert!(validate_client("App", &["not a url".into()], "openid").is_err());
        assert!(validate_client("App", &["https://a.example/#frag".into()], "openid").is_err());
        assert!(validate_client("App", &uris, "openid admin").is_err());
    }
}
