//! Authentication extractors.
//!
//! [`CurrentUser`] accepts either the website session cookie or an OAuth2
//! bearer token. Session requests act with every scope; bearer requests are
//! limited to the scopes granted to the token.

use crate::auth::sessions::SessionStore;
use crate::entity::user;
use crate::error::ApiError;
use crate::oauth2::tokens::TokenIssuer;
use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::Arc;

/// Shared by the extractors; installed as a request extension.
#[derive(Clone)]
pub struct AuthContext {
    pub db: Arc<DatabaseConnection>,
    pub sessions: SessionStore,
    pub tokens: TokenIssuer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthMethod {
    /// Website session; `token_hash` identifies the session row
    Session { token_hash: String },
    /// OAuth2 access token issued to `client_id`
    Bearer { client_id: String, scopes: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: user::Model,
    pub method: AuthMethod,
}

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.user.id
    }

    pub fn is_session(&self) -> bool {
        matches!(self.method, AuthMethod::Session { .. })
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        match &self.method {
            AuthMethod::Session { .. } => true,
            AuthMethod::Bearer { scopes, .. } => scopes.iter().any(|s| s == scope),
        }
    }

    pub fn require_scope(&self, scope: &str) -> Result<(), ApiError> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(ApiError::InsufficientScope(scope.to_string()))
        }
    }

    /// Reject bearer tokens on endpoints reserved for the website itself.
    pub fn require_session(&self) -> Result<(), ApiError> {
        if self.is_session() {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "This endpoint requires a signed-in session".into(),
            ))
        }
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.user.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Administrator role required".into()))
        }
    }
}

fn bearer_token(parts: &Parts) -> Result<Option<&str>, ApiError> {
    match parts.headers.get(AUTHORIZATION) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| Some(t.trim()))
            .ok_or_else(|| {
                ApiError::InvalidToken("Authorization header must use Bearer scheme".into())
            }),
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ctx = parts.extensions.get::<AuthContext>().cloned().ok_or_else(|| {
            tracing::error!("AuthContext not found in extensions");
            ApiError::Server
        })?;

        if let Some(access_token) = bearer_token(parts)? {
            let token = ctx
                .tokens
                .validate(access_token)
                .await?
                .ok_or_else(|| ApiError::InvalidToken("Token is invalid or expired".into()))?;
            let user = user::Entity::find_by_id(&token.user_id)
                .one(ctx.db.as_ref())
                .await?
                .ok_or_else(|| ApiError::InvalidToken("User not found".into()))?;
            return Ok(CurrentUser {
                user,
                method: AuthMethod::Bearer {
                    scopes: token.scopes_list(),
                    client_id: token.client_id,
                },
            });
        }

        let session_token = ctx
            .sessions
            .token_from_headers(&parts.headers)
            .ok_or_else(|| ApiError::InvalidToken("Authentication required".into()))?;
        let (session, user) = ctx
            .sessions
            .lookup(&session_token)
            .await?
            .ok_or_else(|| ApiError::InvalidToken("Session expired".into()))?;

        Ok(CurrentUser {
            user,
            method: AuthMethod::Session {
                token_hash: session.token_hash,
            },
        })
    }
}

/// Anonymous requests and stale credentials both yield `None`.
impl<S> OptionalFromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        match <CurrentUser as FromRequestParts<S>>::from_request_parts(parts, state).await {
            Ok(user) => Ok(Some(user)),
            Err(ApiError::InvalidToken(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
