//! Profile and settings records.

use crate::entity::{user, user_settings};
use crate::error::is_unique_violation;
use crate::validation::profile::{
    BIO_MAX, LOCATION_MAX, NAME_MAX, validate_http_url, validate_language, validate_max_len,
    validate_theme, validate_username,
};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, sea_query::OnConflict,
};
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("{0}")]
    Invalid(String),
    #[error("Username '{0}' is already taken")]
    UsernameTaken(String),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

impl From<ProfileError> for crate::error::ApiError {
    fn from(e: ProfileError) -> Self {
        match e {
            ProfileError::Invalid(msg) => Self::BadRequest(msg),
            ProfileError::UsernameTaken(_) => Self::Conflict(e.to_string()),
            ProfileError::Database(db) => db.into(),
        }
    }
}

/// Partial profile update. `Some(None)` clears a field, `None` leaves it alone.
#[derive(Debug, Default, Clone)]
pub struct ProfileUpdate {
    pub name: Option<Option<String>>,
    pub username: Option<Option<String>>,
    pub bio: Option<Option<String>>,
    pub website: Option<Option<String>>,
    pub location: Option<Option<String>>,
    pub image: Option<Option<String>>,
}

/// Full settings replacement.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsUpdate {
    pub theme: String,
    pub language: String,
    pub email_notifications: bool,
    pub newsletter: bool,
    pub profile_public: bool,
}

impl Default for SettingsUpdate {
    fn default() -> Self {
        Self {
            theme: "system".to_string(),
            language: "en".to_string(),
            email_notifications: true,
            newsletter: false,
            profile_public: true,
        }
    }
}

/// Trim and turn empty strings into `None`.
fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check(result: Result<(), String>) -> Result<(), ProfileError> {
    result.map_err(ProfileError::Invalid)
}

/// Validate and apply a partial profile update.
#[tracing::instrument(skip(db, user, update), fields(user_id = %user.id))]
pub async fn update_profile(
    db: &DatabaseConnection,
    user: user::Model,
    update: ProfileUpdate,
) -> Result<user::Model, ProfileError> {
    let mut active: user::ActiveModel = user.clone().into();
    let mut claimed_username = None;

    if let Some(name) = update.name {
        let name = clean(name);
        if let Some(n) = &name {
            check(validate_max_len("name", n, NAME_MAX))?;
        }
        active.name = Set(name);
    }

    if let Some(username) = update.username {
        let username = clean(username);
        if let Some(u) = &username {
            check(validate_username(u))?;
            let taken = user::Entity::find()
                .filter(user::Column::Username.eq(u.as_str()))
                .filter(user::Column::Id.ne(user.id.as_str()))
                .one(db)
                .await?
                .is_some();
            if taken {
                return Err(ProfileError::UsernameTaken(u.clone()));
            }
        }
        claimed_username = username.clone();
        active.username = Set(username);
    }

    if let Some(bio) = update.bio {
        let bio = clean(bio);
        if let Some(b) = &bio {
            check(validate_max_len("bio", b, BIO_MAX))?;
        }
        active.bio = Set(bio);
    }

    if let Some(website) = update.website {
        let website = clean(website);
        if let Some(w) = &website {
            check(validate_http_url("website", w))?;
        }
        active.website = Set(website);
    }

    if let Some(location) = update.location {
        let location = clean(location);
        if let Some(l) = &location {
            check(validate_max_len("location", l, LOCATION_MAX))?;
        }
        active.location = Set(location);
    }

    if let Some(image) = update.image {
        let image = clean(image);
        if let Some(i) = &image {
            check(validate_http_url("image", i))?;
        }
        active.image = Set(image);
    }

    active.updated_at = Set(OffsetDateTime::now_utc());
    // The lookup above races with concurrent claims; the unique index decides
    active.update(db).await.map_err(|e| match claimed_username {
        Some(name) if is_unique_violation(&e) => ProfileError::UsernameTaken(name),
        _ => e.into(),
    })
}

/// Settings for a user, inserting the defaults on first access.
pub async fn get_or_create_settings(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<user_settings::Model, DbErr> {
    if let Some(settings) = user_settings::Entity::find_by_id(user_id).one(db).await? {
        return Ok(settings);
    }
    let defaults = SettingsUpdate::default();
    // A concurrent first access may insert the row between the lookup and here
    user_settings::Entity::insert(user_settings::ActiveModel {
        user_id: Set(user_id.to_string()),
        theme: Set(defaults.theme),
        language: Set(defaults.language),
        email_notifications: Set(defaults.email_notifications),
        newsletter: Set(defaults.newsletter),
        profile_public: Set(defaults.profile_public),
        updated_at: Set(OffsetDateTime::now_utc()),
    })
    .on_conflict(
        OnConflict::column(user_settings::Column::UserId)
            .do_nothing()
            .to_owned(),
    )
    .exec_without_returning(db)
    .await?;

    user_settings::Entity::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("settings for user {user_id}")))
}

#[tracing::instrument(skip(db, update))]
pub async fn update_settings(
    db: &DatabaseConnection,
    user_id: &str,
    update: SettingsUpdate,
) -> Result<user_settings::Model, ProfileError> {
    check(validate_theme(&update.theme))?;
    check(validate_language(&update.language))?;

    let current = get_or_create_settings(db, user_id).await?;
    let mut active: user_settings::ActiveModel = current.into();
    active.theme = Set(update.theme);
    active.language = Set(update.language);
    active.email_notifications = Set(update.email_notifications);
    active.newsletter = Set(update.newsletter);
    active.profile_public = Set(update.profile_public);
    active.updated_at = Set(OffsetDateTime::now_utc());
    Ok(active.update(db).await?)
}

/// A user's public profile, if they have a username and have not hidden it.
pub async fn find_public_profile(
    db: &DatabaseConnection,
    username: &str,
) -> Result<Option<user::Model>, DbErr> {
    let Some(user) = user::Entity::find()
        .filter(user::Column::Username.eq(username))
        .one(db)
        .await?
    else {
        return Ok(None);
    };
    let public = user_settings::Entity::find_by_id(user.id.as_str())
        .one(db)
        .await?
        .map(|s| s.profile_public)
        .unwrap_or(SettingsUpdate::default().profile_public);
    Ok(public.then_some(user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_trims_and_drops_empty() {
        assert_eq!(clean(Some("  ada ".into())), Some("ada".into()));
        assert_eq!(clean(Some("   ".into())), None);
        assert_eq!(clean(None), None);
    }

    #[test]
    fn default_settings() {
        let d = SettingsUpdate::default();
        assert_eq!(d.theme, "system");
        assert_eq!(d.language, "en");
        assert!(d.email_notifications);
        assert!(!d.newsletter);
        assert!(d.profile_public);
    }
}
