//! Access and refresh token issuance.
//!
//! Every issued pair is persisted in `oauth2_token`. With [`TokenFormat::Jwt`]
//! the access token is an HS256 JWT whose `jti` is the row id; the row is still
//! consulted on validation so revocation takes effect immediately.

use crate::config::TokenFormat;
use crate::entity::oauth2_token;
use crate::error::OAuthError;
use crate::password::generate_token;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

pub const TOKEN_TYPE_BEARER: &str = "Bearer";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("failed to sign access token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

impl From<TokenError> for OAuthError {
    fn from(e: TokenError) -> Self {
        tracing::error!(error = %e, "Token issuance failed");
        OAuthError::ServerError
    }
}

/// Claims carried by JWT access tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessClaims {
    pub iss: String,
    pub sub: String,
    /// Client the token was issued to
    pub aud: String,
    pub scope: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Clone)]
pub struct TokenIssuer {
    db: Arc<DatabaseConnection>,
    format: TokenFormat,
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    pub access_token_lifetime: i64,
    pub refresh_token_lifetime: i64,
}

impl TokenIssuer {
    pub fn new(
        db: Arc<DatabaseConnection>,
        format: TokenFormat,
        issuer: impl Into<String>,
        secret: &str,
        access_token_lifetime: i64,
        refresh_token_lifetime: i64,
    ) -> Self {
        Self {
            db,
            format,
            issuer: issuer.into(),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_token_lifetime,
            refresh_token_lifetime,
        }
    }

    pub fn format(&self) -> TokenFormat {
        self.format
    }

    /// Issue and persist a new access/refresh token pair.
    pub async fn issue_pair(
        &self,
        client_id: &str,
        user_id: &str,
        scope: &str,
    ) -> Result<oauth2_token::Model, TokenError> {
        let now = OffsetDateTime::now_utc();
        let id = uuid::Uuid::new_v4().to_string();
        let access_expires = now + Duration::seconds(self.access_token_lifetime);
        let refresh_expires = now + Duration::seconds(self.refresh_token_lifetime);

        let access_token = match self.format {
            TokenFormat::Opaque => generate_token(),
            TokenFormat::Jwt => {
                let claims = AccessClaims {
                    iss: self.issuer.clone(),
                    sub: user_id.to_string(),
                    aud: client_id.to_string(),
                    scope: scope.to_string(),
                    iat: now.unix_timestamp(),
                    exp: access_expires.unix_timestamp(),
                    jti: id.clone(),
                };
                jsonwebtoken::encode(
                    &Header::new(Algorithm::HS256),
                    &claims,
                    &self.encoding_key,
                )?
            }
        };

        let token = oauth2_token::ActiveModel {
            id: Set(id),
            access_token: Set(access_token),
            refresh_token: Set(Some(generate_token())),
            token_type: Set(TOKEN_TYPE_BEARER.to_string()),
            client_id: Set(client_id.to_string()),
            user_id: Set(user_id.to_string()),
            scope: Set(scope.to_string()),
            access_token_expires_at: Set(access_expires),
            refresh_token_expires_at: Set(Some(refresh_expires)),
            created_at: Set(now),
            revoked_at: Set(None),
        };

        Ok(token.insert(self.db.as_ref()).await?)
    }

    /// Decode a JWT access token without touching the database.
    pub fn decode_jwt(&self, token: &str) -> Option<AccessClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.validate_aud = false;
        jsonwebtoken::decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .ok()
            .map(|data| data.claims)
    }

    /// Resolve a bearer token to its unrevoked, unexpired row.
    pub async fn validate(&self, access_token: &str) -> Result<Option<oauth2_token::Model>, DbErr> {
        let row = match self.format {
            TokenFormat::Jwt => {
                let Some(claims) = self.decode_jwt(access_token) else {
                    return Ok(None);
                };
                oauth2_token::Entity::find_by_id(claims.jti)
                    .one(self.db.as_ref())
                    .await?
                    .filter(|t| t.access_token == access_token)
            }
            TokenFormat::Opaque => {
                oauth2_token::Entity::find()
                    .filter(oauth2_token::Column::AccessToken.eq(access_token))
                    .one(self.db.as_ref())
                    .await?
            }
        };
        Ok(row.filter(|t| t.is_valid()))
    }

    pub async fn find_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<oauth2_token::Model>, DbErr> {
        oauth2_token::Entity::find()
            .filter(oauth2_token::Column::RefreshToken.eq(refresh_token))
            .one(self.db.as_ref())
            .await
    }

    /// Mark a token pair revoked. Returns `false` when it already was, so that
    /// two concurrent refreshes of the same token cannot both succeed.
    pub async fn revoke_if_active(&self, id: &str) -> Result<bool, DbErr> {
        let result = oauth2_token::Entity::update_many()
            .col_expr(
                oauth2_token::Column::RevokedAt,
                Expr::value(Some(OffsetDateTime::now_utc())),
            )
            .filter(oauth2_token::Column::Id.eq(id))
            .filter(oauth2_token::Column::RevokedAt.is_null())
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Revoke the pair that `token` belongs to, looking it up as the hinted
    /// type first. Unknown tokens are ignored.
    pub async fn revoke_by_value(&self, token: &str, hint: Option<&str>) -> Result<bool, DbErr> {
        let by_access = oauth2_token::Column::AccessToken.eq(token);
        let by_refresh = oauth2_token::Column::RefreshToken.eq(token);
        let (first, second) = match hint {
            Some("refresh_token") => (by_refresh, by_access),
            _ => (by_access, by_refresh),
        };

        let mut found = oauth2_token::Entity::find()
            .filter(first)
            .one(self.db.as_ref())
            .await?;
        if found.is_none() {
            found = oauth2_token::Entity::find()
                .filter(second)
                .one(self.db.as_ref())
                .await?;
        }

        match found {
            Some(t) => self.revoke_if_active(&t.id).await,
            None => Ok(false),
        }
    }

    /// Revoke every active token of a user, optionally limited to one client.
    pub async fn revoke_all_for_user(
        &self,
        user_id: &str,
        client_id: Option<&str>,
    ) -> Result<u64, DbErr> {
        let mut query = oauth2_token::Entity::update_many()
            .col_expr(
                oauth2_token::Column::RevokedAt,
                Expr::value(Some(OffsetDateTime::now_utc())),
            )
            .filter(oauth2_token::Column::UserId.eq(user_id))
            .filter(oauth2_token::Column::RevokedAt.is_null());
        if let Some(client_id) = client_id {
            query = query.filter(oauth2_token::Column::ClientId.eq(client_id));
        }
        Ok(query.exec(self.db.as_ref()).await?.rows_affected)
    }

    /// Delete rows whose refresh token expired or that were revoked more than a
    /// day ago.
    pub async fn purge_stale(&self) -> Result<u64, DbErr> {
        let now = OffsetDateTime::now_utc();
        let result = oauth2_token::Entity::delete_many()
            .filter(
                oauth2_token::Column::RefreshTokenExpiresAt
                    .lt(now)
                    .or(oauth2_token::Column::RefreshTokenExpiresAt
                        .is_null()
                        .and(oauth2_token::Column::AccessTokenExpiresAt.lt(now)))
                    .or(oauth2_token::Column::RevokedAt.lt(now - Duration::days(1))),
            )
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}
