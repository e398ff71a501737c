//! Public profiles.

use crate::AppResources;
use crate::error::{ApiError, ErrorResponse};
use crate::users;
use axum::{Extension, Json, extract::Path};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::user::USER_TAG;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PublicProfile {
    pub username: String,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub website: Option<String>,
    pub location: Option<String>,
    pub image: Option<String>,
    /// Member since
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new().routes(routes!(public_profile))
}

#[tracing::instrument(skip(resources))]
#[utoipa::path(
    get,
    path = "/{username}",
    tag = USER_TAG,
    operation_id = "Public Profile",
    summary = "Get a user's public profile",
    description = "Profiles are public unless the user turned `profile_public` off. \
                   Email addresses are never included.",
    params(("username" = String, Path, description = "Username")),
    responses(
        (status = 200, description = "Public profile", body = PublicProfile),
        (status = 404, description = "No public profile with this username", body = ErrorResponse),
    )
)]
async fn public_profile(
    Extension(resources): Extension<AppResources>,
    Path(username): Path<String>,
) -> Result<Json<PublicProfile>, ApiError> {
    let username = username.to_lowercase();
    let user = users::find_public_profile(resources.db.as_ref(), &username)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No public profile for '{username}'")))?;

    Ok(Json(PublicProfile {
        username,
        name: user.name,
        bio: user.bio,
        website: user.website,
        location: user.location,
        image: user.image,
        created_at: user.created_at,
    }))
}
