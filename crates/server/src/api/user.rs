//! Endpoints for the signed-in user's own data.
//!
//! Profile reads and writes are open to OAuth2 clients holding the `profile`
//! or `profile:write` scope. Settings, password and account deletion are
//! reserved for website sessions.

use crate::AppResources;
use crate::auth::{AuthMethod, CurrentUser};
use crate::downloads;
use crate::entity::{download_event, user, user_settings};
use crate::error::{ApiError, ErrorResponse};
use crate::oauth2::scopes::{SCOPE_DOWNLOADS_READ, SCOPE_EMAIL, SCOPE_PROFILE, SCOPE_PROFILE_WRITE};
use crate::users::{self, ProfileUpdate, SettingsUpdate};
use axum::{
    Extension, Json,
    http::{StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

pub const USER_TAG: &str = "User";

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProfileResponse {
    pub id: String,
    /// Present for sessions and tokens with the `email` scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub name: Option<String>,
    pub username: Option<String>,
    pub bio: Option<String>,
    pub website: Option<String>,
    pub location: Option<String>,
    pub image: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ProfileResponse {
    fn new(user: user::Model, include_email: bool) -> Self {
        Self {
            id: user.id,
            email: include_email.then_some(user.email),
            name: user.name,
            username: user.username,
            bio: user.bio,
            website: user.website,
            location: user.location,
            image: user.image,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Distinguishes an absent field from an explicit `null`.
fn double_option<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Option<String>>, D::Error> {
    Option::<String>::deserialize(d).map(Some)
}

/// Partial profile update. Omitted fields are left alone, `null` or an empty
/// string clears a field.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub username: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub bio: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub website: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub location: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub image: Option<Option<String>>,
}

impl From<UpdateProfileRequest> for ProfileUpdate {
    fn from(r: UpdateProfileRequest) -> Self {
        Self {
            name: r.name,
            username: r.username,
            bio: r.bio,
            website: r.website,
            location: r.location,
            image: r.image,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SettingsDto {
    /// "light", "dark" or "system"
    pub theme: String,
    /// Language tag such as "en" or "de-CH"
    pub language: String,
    pub email_notifications: bool,
    pub newsletter: bool,
    pub profile_public: bool,
}

impl From<user_settings::Model> for SettingsDto {
    fn from(s: user_settings::Model) -> Self {
        Self {
            theme: s.theme,
            language: s.language,
            email_notifications: s.email_notifications,
            newsletter: s.newsletter,
            profile_public: s.profile_public,
        }
    }
}

impl From<SettingsDto> for SettingsUpdate {
    fn from(s: SettingsDto) -> Self {
        Self {
            theme: s.theme,
            language: s.language,
            email_notifications: s.email_notifications,
            newsletter: s.newsletter,
            profile_public: s.profile_public,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    /// At least 8 characters
    pub new_password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadHistoryEntry {
    pub file_slug: String,
    #[serde(with = "time::serde::rfc3339")]
    pub downloaded_at: OffsetDateTime,
}

impl From<download_event::Model> for DownloadHistoryEntry {
    fn from(e: download_event::Model) -> Self {
        Self {
            file_slug: e.file_slug,
            downloaded_at: e.created_at,
        }
    }
}

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(get_profile, update_profile))
        .routes(routes!(get_settings, update_settings))
        .routes(routes!(change_password))
        .routes(routes!(delete_account))
        .routes(routes!(download_history))
}

#[tracing::instrument(skip_all, fields(user_id = %current.id()))]
#[utoipa::path(
    get,
    path = "/profile",
    tag = USER_TAG,
    operation_id = "Get Profile",
    summary = "Get the user's profile",
    security(("session_cookie" = []), ("OAuth2" = ["profile"])),
    responses(
        (status = 200, description = "Profile", body = ProfileResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 403, description = "Missing `profile` scope", body = ErrorResponse),
    )
)]
async fn get_profile(current: CurrentUser) -> Result<Json<ProfileResponse>, ApiError> {
    current.require_scope(SCOPE_PROFILE)?;
    let include_email = current.has_scope(SCOPE_EMAIL);
    Ok(Json(ProfileResponse::new(current.user, include_email)))
}

#[tracing::instrument(skip_all, fields(user_id = %current.id()))]
#[utoipa::path(
    patch,
    path = "/profile",
    tag = USER_TAG,
    operation_id = "Update Profile",
    summary = "Update profile fields",
    description = "Partial update. Omitted fields keep their value; `null` or an empty string clears a field.\n\n\
                   Usernames are 3-32 characters of `a-z`, `0-9`, `_` and `-` and must be unique.",
    security(("session_cookie" = []), ("OAuth2" = ["profile:write"])),
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated profile", body = ProfileResponse),
        (status = 400, description = "Invalid field value", body = ErrorResponse),
        (status = 403, description = "Missing `profile:write` scope", body = ErrorResponse),
        (status = 409, description = "Username already taken", body = ErrorResponse),
    )
)]
async fn update_profile(
    Extension(resources): Extension<AppResources>,
    current: CurrentUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    current.require_scope(SCOPE_PROFILE_WRITE)?;
    let include_email = current.has_scope(SCOPE_EMAIL);
    let user = users::update_profile(resources.db.as_ref(), current.user, payload.into()).await?;
    Ok(Json(ProfileResponse::new(user, include_email)))
}

#[tracing::instrument(skip_all, fields(user_id = %current.id()))]
#[utoipa::path(
    get,
    path = "/settings",
    tag = USER_TAG,
    operation_id = "Get Settings",
    summary = "Get website preferences",
    description = "Returns the user's settings, creating the defaults on first access.",
    security(("session_cookie" = [])),
    responses(
        (status = 200, description = "Settings", body = SettingsDto),
        (status = 403, description = "Called with a bearer token", body = ErrorResponse),
    )
)]
async fn get_settings(
    Extension(resources): Extension<AppResources>,
    current: CurrentUser,
) -> Result<Json<SettingsDto>, ApiError> {
    current.require_session()?;
    let settings = users::get_or_create_settings(resources.db.as_ref(), current.id()).await?;
    Ok(Json(settings.into()))
}

#[tracing::instrument(skip_all, fields(user_id = %current.id()))]
#[utoipa::path(
    put,
    path = "/settings",
    tag = USER_TAG,
    operation_id = "Update Settings",
    summary = "Replace website preferences",
    security(("session_cookie" = [])),
    request_body = SettingsDto,
    responses(
        (status = 200, description = "Stored settings", body = SettingsDto),
        (status = 400, description = "Invalid theme or language", body = ErrorResponse),
        (status = 403, description = "Called with a bearer token", body = ErrorResponse),
    )
)]
async fn update_settings(
    Extension(resources): Extension<AppResources>,
    current: CurrentUser,
    Json(payload): Json<SettingsDto>,
) -> Result<Json<SettingsDto>, ApiError> {
    current.require_session()?;
    let settings =
        users::update_settings(resources.db.as_ref(), current.id(), payload.into()).await?;
    Ok(Json(settings.into()))
}

#[tracing::instrument(skip_all, fields(user_id = %current.id()))]
#[utoipa::path(
    post,
    path = "/password",
    tag = USER_TAG,
    operation_id = "Change Password",
    summary = "Change the account password",
    description = "Verifies the current password and signs out every other session.",
    security(("session_cookie" = [])),
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "New password too short", body = ErrorResponse),
        (status = 401, description = "Current password is wrong", body = ErrorResponse),
    )
)]
async fn change_password(
    Extension(resources): Extension<AppResources>,
    current: CurrentUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    let AuthMethod::Session { token_hash } = current.method.clone() else {
        return Err(ApiError::Forbidden(
            "This endpoint requires a signed-in session".into(),
        ));
    };
    let user_id = current.user.id.clone();
    resources
        .accounts()
        .change_password(current.user, &payload.current_password, &payload.new_password)
        .await?;
    let ended = resources
        .sessions()
        .destroy_all_for_user(&user_id, Some(&token_hash))
        .await?;
    tracing::info!(user_id = %user_id, other_sessions_ended = ended, "Password changed");
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip_all, fields(user_id = %current.id()))]
#[utoipa::path(
    delete,
    path = "/account",
    tag = USER_TAG,
    operation_id = "Delete Account",
    summary = "Delete the account",
    description = "Deletes the account with its settings, sessions, OAuth2 tokens and consents. \
                   Download history is kept anonymously for statistics.",
    security(("session_cookie" = [])),
    responses(
        (status = 204, description = "Account deleted and session cookie cleared"),
        (status = 403, description = "Called with a bearer token", body = ErrorResponse),
    )
)]
async fn delete_account(
    Extension(resources): Extension<AppResources>,
    current: CurrentUser,
) -> Result<Response, ApiError> {
    current.require_session()?;
    resources.accounts().delete_account(current.id()).await?;
    Ok((
        StatusCode::NO_CONTENT,
        [(SET_COOKIE, resources.sessions().clear_cookie())],
    )
        .into_response())
}

#[tracing::instrument(skip_all, fields(user_id = %current.id()))]
#[utoipa::path(
    get,
    path = "/downloads",
    tag = USER_TAG,
    operation_id = "Download History",
    summary = "List the user's downloads",
    description = "Most recent downloads first, at most 100.",
    security(("session_cookie" = []), ("OAuth2" = ["downloads:read"])),
    responses(
        (status = 200, description = "Download history", body = Vec<DownloadHistoryEntry>),
        (status = 403, description = "Missing `downloads:read` scope", body = ErrorResponse),
    )
)]
async fn download_history(
    Extension(resources): Extension<AppResources>,
    current: CurrentUser,
) -> Result<Json<Vec<DownloadHistoryEntry>>, ApiError> {
    current.require_scope(SCOPE_DOWNLOADS_READ)?;
    let history = downloads::user_history(resources.db.as_ref(), current.id()).await?;
    Ok(Json(history.into_iter().map(Into::into).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_update_distinguishes_null_from_missing() {
        let req: UpdateProfileRequest =
            serde_json::from_str(r#"{"name": null, "bio": "hello"}"#).unwrap();
        assert_eq!(req.name, Some(None));
        assert_eq!(req.bio, Some(Some("hello".into())));
        assert_eq!(req.username, None);
        assert_eq!(req.website, None);
    }
}
