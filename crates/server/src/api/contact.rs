//! Contact form.

use crate::AppResources;
use crate::contact::{self, ContactSubmission};
use crate::error::{ApiError, ErrorResponse};
use crate::mail;
use axum::{Extension, Json, http::StatusCode};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::health::MISC_TAG;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    /// Up to 5000 characters
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ContactResponse {
    pub id: String,
}

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new().routes(routes!(submit_contact))
}

#[tracing::instrument(skip_all)]
#[utoipa::path(
    post,
    path = "",
    tag = MISC_TAG,
    operation_id = "Contact",
    summary = "Send a message through the contact form",
    description = "Stores the message and forwards it by email when a recipient is configured.",
    request_body = ContactRequest,
    responses(
        (status = 201, description = "Message received", body = ContactResponse),
        (status = 400, description = "Missing or invalid field", body = ErrorResponse),
    )
)]
async fn submit_contact(
    Extension(resources): Extension<AppResources>,
    Json(payload): Json<ContactRequest>,
) -> Result<(StatusCode, Json<ContactResponse>), ApiError> {
    let submission = ContactSubmission::new(&payload.name, &payload.email, &payload.message)
        .map_err(ApiError::BadRequest)?;
    let stored = contact::store_message(resources.db.as_ref(), &submission).await?;

    if let Err(e) = mail::send_contact_notification(
        &resources,
        &submission.name,
        &submission.email,
        &submission.message,
    )
    .await
    {
        tracing::error!(error = %e, message_id = %stored.id, "Failed to forward contact message");
    }

    Ok((StatusCode::CREATED, Json(ContactResponse { id: stored.id })))
}
