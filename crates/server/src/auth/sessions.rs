//! Browser sessions backed by the `session` table.

use crate::config::SessionConfig;
use crate::entity::{session, user};
use crate::password::{generate_token, sha256_hex};
use axum::http::{HeaderMap, header::COOKIE};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter,
};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

#[derive(Clone)]
pub struct SessionStore {
    db: Arc<DatabaseConnection>,
    cookie_name: String,
    lifetime_secs: i64,
    secure_cookie: bool,
}

impl SessionStore {
    pub fn new(db: Arc<DatabaseConnection>, config: &SessionConfig) -> Self {
        Self {
            db,
            cookie_name: config.cookie_name.clone(),
            lifetime_secs: config.lifetime_secs,
            secure_cookie: config.secure_cookie,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Start a session. Returns the raw token for the cookie; only its digest
    /// is persisted.
    pub async fn create(
        &self,
        user_id: &str,
        user_agent: Option<String>,
    ) -> Result<(String, session::Model), DbErr> {
        let token = generate_token();
        let now = OffsetDateTime::now_utc();
        let row = session::ActiveModel {
            token_hash: Set(sha256_hex(&token)),
            user_id: Set(user_id.to_string()),
            user_agent: Set(user_agent),
            created_at: Set(now),
            expires_at: Set(now + Duration::seconds(self.lifetime_secs)),
        }
        .insert(self.db.as_ref())
        .await?;
        Ok((token, row))
    }

    /// Resolve a session token to its live session and user.
    pub async fn lookup(
        &self,
        token: &str,
    ) -> Result<Option<(session::Model, user::Model)>, DbErr> {
        let found = session::Entity::find_by_id(sha256_hex(token))
            .find_also_related(user::Entity)
            .one(self.db.as_ref())
            .await?;
        Ok(match found {
            Some((session, Some(user))) if !session.is_expired() => Some((session, user)),
            _ => None,
        })
    }

    pub async fn destroy(&self, token: &str) -> Result<(), DbErr> {
        session::Entity::delete_by_id(sha256_hex(token))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// End every session of a user except, optionally, the one with `keep_hash`.
    pub async fn destroy_all_for_user(
        &self,
        user_id: &str,
        keep_hash: Option<&str>,
    ) -> Result<u64, DbErr> {
        let mut query =
            session::Entity::delete_many().filter(session::Column::UserId.eq(user_id));
        if let Some(keep) = keep_hash {
            query = query.filter(session::Column::TokenHash.ne(keep));
        }
        Ok(query.exec(self.db.as_ref()).await?.rows_affected)
    }

    pub async fn purge_expired(&self) -> Result<u64, DbErr> {
        let result = session::Entity::delete_many()
            .filter(session::Column::ExpiresAt.lt(OffsetDateTime::now_utc()))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    /// Session token from the request's `Cookie` headers.
    pub fn token_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        extract_cookie_value(headers, &self.cookie_name)
    }

    pub fn set_cookie(&self, token: &str) -> String {
        let secure = if self.secure_cookie { "; Secure" } else { "" };
        format!(
            "{}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{secure}",
            self.cookie_name, self.lifetime_secs
        )
    }

    pub fn clear_cookie(&self) -> String {
        let secure = if self.secure_cookie { "; Secure" } else { "" };
        format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0{secure}",
            self.cookie_name
        )
    }
}

fn extract_cookie_value(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    for raw in headers.get_all(COOKIE) {
        let Ok(raw) = raw.to_str() else {
            continue;
        };
        for part in raw.split(';') {
            if let Some((key, value)) = part.trim().split_once('=')
                && key.trim() == cookie_name
                && !value.trim().is_empty()
            {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}
