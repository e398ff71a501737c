//! Account lifecycle: registration, email verification, password login,
//! password changes and account deletion.

use crate::config::AuthConfig;
use crate::entity::{
    download_event, oauth2_authorization, oauth2_consent, oauth2_token, session, user,
    user_settings,
};
use crate::error::{ApiError, is_unique_violation};
use crate::password::{MIN_PASSWORD_LENGTH, generate_token, hash_password, verify_password};
use crate::validation::profile::{NAME_MAX, normalize_email, validate_max_len};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, TransactionTrait, sea_query::Expr,
};
use std::sync::Arc;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("{0}")]
    Invalid(String),
    #[error("An account with this email already exists")]
    EmailTaken,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Please verify your email address before signing in")]
    EmailNotVerified,
    #[error("Verification link is invalid or has expired")]
    VerificationFailed,
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

impl From<AccountError> for ApiError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::Invalid(msg) => ApiError::BadRequest(msg),
            AccountError::EmailTaken => ApiError::Conflict(e.to_string()),
            AccountError::InvalidCredentials => ApiError::Unauthorized(e.to_string()),
            AccountError::EmailNotVerified => ApiError::Forbidden(e.to_string()),
            AccountError::VerificationFailed => ApiError::BadRequest(e.to_string()),
            AccountError::Database(db) => db.into(),
            AccountError::Hash(msg) => {
                tracing::error!(error = %msg, "Failed to hash password");
                ApiError::Server
            }
        }
    }
}

/// Result of a registration attempt.
#[derive(Debug)]
pub struct Registration {
    pub user: user::Model,
    /// Token to embed in the verification link
    pub verification_token: String,
}

#[derive(Clone)]
pub struct AccountService {
    db: Arc<DatabaseConnection>,
    config: AuthConfig,
}

impl AccountService {
    pub fn new(db: Arc<DatabaseConnection>, config: AuthConfig) -> Self {
        Self { db, config }
    }

    fn hash(password: &str) -> Result<String, AccountError> {
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AccountError::Invalid(format!(
                "Password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }
        hash_password(password).map_err(|e| AccountError::Hash(e.to_string()))
    }

    /// Create an account, or refresh the pending verification of an existing
    /// unverified one.
    #[tracing::instrument(skip(self, password))]
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<Registration, AccountError> {
        let email = normalize_email(email).map_err(AccountError::Invalid)?;
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        if let Some(name) = name {
            validate_max_len("name", name, NAME_MAX).map_err(AccountError::Invalid)?;
        }
        let password_hash = Self::hash(password)?;
        let verification_token = generate_token();
        let now = OffsetDateTime::now_utc();
        let verification_expires = now + Duration::seconds(self.config.verification_lifetime_secs);

        let existing = user::Entity::find()
            .filter(user::Column::Email.eq(&email))
            .one(self.db.as_ref())
            .await?;

        let user = match existing {
            Some(existing) if existing.email_verified => return Err(AccountError::EmailTaken),
            Some(existing) => {
                // Unverified accounts take the most recent password
                let mut active: user::ActiveModel = existing.into();
                active.password_hash = Set(Some(password_hash));
                if name.is_some() {
                    active.name = Set(name.map(String::from));
                }
                active.email_verification_token = Set(Some(verification_token.clone()));
                active.email_verification_expires_at = Set(Some(verification_expires));
                active.updated_at = Set(now);
                active.update(self.db.as_ref()).await?
            }
            None => {
                user::ActiveModel {
                    id: Set(uuid::Uuid::new_v4().to_string()),
                    email: Set(email.clone()),
                    email_verified: Set(false),
                    password_hash: Set(Some(password_hash)),
                    name: Set(name.map(String::from)),
                    username: Set(None),
                    bio: Set(None),
                    website: Set(None),
                    location: Set(None),
                    image: Set(None),
                    role: Set(user::ROLE_USER.to_string()),
                    email_verification_token: Set(Some(verification_token.clone())),
                    email_verification_expires_at: Set(Some(verification_expires)),
                    created_at: Set(now),
                    updated_at: Set(now),
                    last_login_at: Set(None),
                }
                .insert(self.db.as_ref())
                .await
                // Lost a race with a concurrent registration of the same email
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        AccountError::EmailTaken
                    } else {
                        e.into()
                    }
                })?
            }
        };

        tracing::info!(user_id = %user.id, "Account registered, awaiting verification");
        Ok(Registration {
            user,
            verification_token,
        })
    }

    #[tracing::instrument(skip(self, token))]
    pub async fn verify_email(&self, token: &str) -> Result<user::Model, AccountError> {
        let user = user::Entity::find()
            .filter(user::Column::EmailVerificationToken.eq(token))
            .one(self.db.as_ref())
            .await?
            .ok_or(AccountError::VerificationFailed)?;
        if !user.has_pending_verification() {
            return Err(AccountError::VerificationFailed);
        }

        let mut active: user::ActiveModel = user.into();
        active.email_verified = Set(true);
        active.email_verification_token = Set(None);
        active.email_verification_expires_at = Set(None);
        active.updated_at = Set(OffsetDateTime::now_utc());
        let user = active.update(self.db.as_ref()).await?;
        tracing::info!(user_id = %user.id, "Email verified");
        Ok(user)
    }

    #[tracing::instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<user::Model, AccountError> {
        let email = email.trim().to_lowercase();
        let user = user::Entity::find()
            .filter(user::Column::Email.eq(&email))
            .one(self.db.as_ref())
            .await?
            .ok_or(AccountError::InvalidCredentials)?;

        let password_ok = user
            .password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(password, hash));
        if !password_ok {
            return Err(AccountError::InvalidCredentials);
        }
        if self.config.require_verified_email && !user.email_verified {
            return Err(AccountError::EmailNotVerified);
        }

        let mut active: user::ActiveModel = user.into();
        active.last_login_at = Set(Some(OffsetDateTime::now_utc()));
        Ok(active.update(self.db.as_ref()).await?)
    }

    #[tracing::instrument(skip(self, user, current, new))]
    pub async fn change_password(
        &self,
        user: user::Model,
        current: &str,
        new: &str,
    ) -> Result<(), AccountError> {
        let current_ok = user
            .password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(current, hash));
        if !current_ok {
            return Err(AccountError::InvalidCredentials);
        }
        let hash = Self::hash(new)?;
        let mut active: user::ActiveModel = user.into();
        active.password_hash = Set(Some(hash));
        active.updated_at = Set(OffsetDateTime::now_utc());
        active.update(self.db.as_ref()).await?;
        Ok(())
    }

    /// Remove a user and everything tied to them. Download history is kept for
    /// statistics with the user reference cleared.
    #[tracing::instrument(skip(self))]
    pub async fn delete_account(&self, user_id: &str) -> Result<(), AccountError> {
        let txn = self.db.begin().await?;

        download_event::Entity::update_many()
            .col_expr(
                download_event::Column::UserId,
                Expr::value(Option::<String>::None),
            )
            .filter(download_event::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;
        oauth2_token::Entity::delete_many()
            .filter(oauth2_token::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;
        oauth2_consent::Entity::delete_many()
            .filter(oauth2_consent::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;
        oauth2_authorization::Entity::delete_many()
            .filter(oauth2_authorization::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;
        session::Entity::delete_many()
            .filter(session::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;
        user_settings::Entity::delete_by_id(user_id).exec(&txn).await?;
        user::Entity::delete_by_id(user_id).exec(&txn).await?;

        txn.commit().await?;
        tracing::info!(user_id, "Account deleted");
        Ok(())
    }

    /// Clear verification tokens whose link expired.
    pub async fn purge_stale_verifications(&self) -> Result<u64, DbErr> {
        let result = user::Entity::update_many()
            .col_expr(
                user::Column::EmailVerificationToken,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                user::Column::EmailVerificationExpiresAt,
                Expr::value(Option::<OffsetDateTime>::None),
            )
            .filter(user::Column::EmailVerificationExpiresAt.lt(OffsetDateTime::now_utc()))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}
