//! OAuth2 consent.
//!
//! A pending authorization request travels to the frontend's consent page as a
//! signed, short-lived JWT. The page reads it back through `GET /consent` and
//! posts the user's decision to `POST /consent`.

use crate::auth::CurrentUser;
use crate::entity::oauth2_consent;
use crate::error::OAuthError;
use crate::oauth2::endpoints::{complete_authorization, error_redirect};
use crate::oauth2::scopes::{self, ScopeInfo};
use crate::oauth2::state::OAuth2State;
use axum::{
    Form, Json,
    extract::{Query, State},
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::{
    ActiveValue::Set, DatabaseConnection, DbErr, EntityTrait, sea_query::OnConflict,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

/// Consent tokens expire after 10 minutes.
pub const CONSENT_TOKEN_LIFETIME: i64 = 600;
const CONSENT_AUDIENCE: &str = "oauth2-consent";

/// An authorization request that passed validation and waits for the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingAuthorization {
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub redirect_uri_explicit: bool,
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConsentClaims {
    sub: String,
    aud: String,
    iat: i64,
    exp: i64,
    #[serde(flatten)]
    request: PendingAuthorization,
}

/// Sign a pending request for `user_id`.
pub fn encode_consent_token(
    secret: &str,
    user_id: &str,
    request: &PendingAuthorization,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let claims = ConsentClaims {
        sub: user_id.to_string(),
        aud: CONSENT_AUDIENCE.to_string(),
        iat: now,
        exp: now + CONSENT_TOKEN_LIFETIME,
        request: request.clone(),
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verify a consent token, returning the user id and the pending request.
pub fn decode_consent_token(
    secret: &str,
    token: &str,
) -> Result<(String, PendingAuthorization), OAuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[CONSENT_AUDIENCE]);
    validation.leeway = 0;
    let data = jsonwebtoken::decode::<ConsentClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!(error = %e, "Rejected consent token");
        OAuthError::InvalidRequest("Consent request is invalid or has expired".into())
    })?;
    Ok((data.claims.sub, data.claims.request))
}

pub async fn find_consent(
    db: &DatabaseConnection,
    user_id: &str,
    client_id: &str,
) -> Result<Option<oauth2_consent::Model>, DbErr> {
    oauth2_consent::Entity::find_by_id((user_id.to_string(), client_id.to_string()))
        .one(db)
        .await
}

/// Remember a grant, merging with scopes granted earlier.
pub async fn record_consent(
    db: &DatabaseConnection,
    user_id: &str,
    client_id: &str,
    scope: &str,
) -> Result<(), DbErr> {
    let merged = match find_consent(db, user_id, client_id).await? {
        Some(existing) => scopes::union(&existing.scope, scope),
        None => scopes::parse(scope).join(" "),
    };
    oauth2_consent::Entity::insert(oauth2_consent::ActiveModel {
        user_id: Set(user_id.to_string()),
        client_id: Set(client_id.to_string()),
        scope: Set(merged),
        granted_at: Set(OffsetDateTime::now_utc()),
    })
    .on_conflict(
        OnConflict::columns([
            oauth2_consent::Column::UserId,
            oauth2_consent::Column::ClientId,
        ])
        .update_columns([oauth2_consent::Column::Scope, oauth2_consent::Column::GrantedAt])
        .to_owned(),
    )
    .exec_without_returning(db)
    .await?;
    Ok(())
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ConsentQuery {
    /// Token from the consent redirect
    pub consent_token: String,
}

/// What the consent page shows the user.
#[derive(Debug, Serialize, ToSchema)]
pub struct ConsentDetails {
    pub client_id: String,
    pub client_name: String,
    pub redirect_uri: String,
    pub user_email: String,
    pub scopes: Vec<ScopeInfo>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConsentForm {
    pub consent_token: String,
    /// "approve" or "deny"
    pub action: String,
}

pub fn router() -> OpenApiRouter<OAuth2State> {
    OpenApiRouter::new().routes(routes!(consent_details, consent_submit))
}

/// The consent token must belong to the signed-in session user.
fn check_owner(current: &CurrentUser, token_user: &str) -> Result<(), OAuthError> {
    if current.is_session() && current.id() == token_user {
        Ok(())
    } else {
        Err(OAuthError::AccessDenied)
    }
}

#[tracing::instrument(skip_all)]
#[utoipa::path(
    get,
    path = "/consent",
    tag = super::OAUTH2_TAG,
    operation_id = "OAuth2 Consent Details",
    summary = "Describe a pending authorization request",
    description = "Returns the application name and the requested permissions so the frontend \
                   can render the consent screen. The consent token expires after 10 minutes.",
    params(ConsentQuery),
    responses(
        (status = 200, description = "Pending request", body = ConsentDetails),
        (status = 400, description = "Consent token is invalid or expired", body = crate::error::ErrorResponse),
        (status = 401, description = "Not signed in", body = crate::error::ErrorResponse),
        (status = 403, description = "Consent token belongs to another user", body = crate::error::ErrorResponse),
    )
)]
async fn consent_details(
    State(state): State<OAuth2State>,
    current: CurrentUser,
    Query(query): Query<ConsentQuery>,
) -> Result<Json<ConsentDetails>, OAuthError> {
    let (user_id, request) = decode_consent_token(&state.secret, &query.consent_token)?;
    check_owner(&current, &user_id)?;

    let client = state
        .clients
        .find(&request.client_id)
        .await?
        .ok_or_else(|| OAuthError::InvalidRequest("Unknown client".into()))?;

    Ok(Json(ConsentDetails {
        client_id: client.id,
        client_name: client.name,
        redirect_uri: request.redirect_uri,
        user_email: current.user.email,
        scopes: scopes::parse(&request.scope)
            .iter()
            .map(|s| scopes::scope_info(s))
            .collect(),
    }))
}

#[tracing::instrument(skip_all, fields(action = %form.action))]
#[utoipa::path(
    post,
    path = "/consent",
    tag = super::OAUTH2_TAG,
    operation_id = "OAuth2 Consent Submit",
    summary = "Submit OAuth2 consent decision",
    description = "Handles the user's consent decision. On approval the grant is remembered, an \
                   authorization code is created and the user is redirected back to the client. \
                   On denial the client receives an `access_denied` error.",
    request_body(
        content = ConsentForm,
        content_type = "application/x-www-form-urlencoded",
        description = "Consent decision and token"
    ),
    responses(
        (status = 303, description = "Redirect to client with authorization code or error"),
        (status = 400, description = "Consent token is invalid or expired", body = crate::error::ErrorResponse),
        (status = 401, description = "Not signed in", body = crate::error::ErrorResponse),
        (status = 403, description = "Consent token belongs to another user", body = crate::error::ErrorResponse),
    )
)]
async fn consent_submit(
    State(state): State<OAuth2State>,
    current: CurrentUser,
    Form(form): Form<ConsentForm>,
) -> Result<Response, OAuthError> {
    let (user_id, request) = decode_consent_token(&state.secret, &form.consent_token)?;
    check_owner(&current, &user_id)?;

    match form.action.as_str() {
        "approve" => {
            record_consent(state.db.as_ref(), &user_id, &request.client_id, &request.scope)
                .await?;
            tracing::info!(user_id = %user_id, client_id = %request.client_id, "User granted consent");
            complete_authorization(&state, &user_id, request).await
        }
        "deny" => {
            tracing::info!(user_id = %user_id, client_id = %request.client_id, "User denied consent");
            Ok(error_redirect(
                &request.redirect_uri,
                request.state.as_deref(),
                &OAuthError::AccessDenied,
            ))
        }
        other => Err(OAuthError::InvalidRequest(format!(
            "Unknown action '{other}'"
        ))),
    }
}
