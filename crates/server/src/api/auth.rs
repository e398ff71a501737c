//! Website account endpoints.
//!
//! - `POST /register` - Create an account and send a verification email
//! - `GET /verify-email` - Confirm an email address from the emailed link
//! - `POST /login` - Start a cookie session
//! - `POST /logout` - End the current session
//! - `GET /session` - Describe the current session

use crate::AppResources;
use crate::auth::{AuthMethod, CurrentUser};
use crate::entity::{session, user};
use crate::error::{ApiError, ErrorResponse};
use crate::mail;
use axum::{
    Extension, Json,
    extract::Query,
    http::{HeaderMap, StatusCode, header::SET_COOKIE, header::USER_AGENT},
    response::{IntoResponse, Redirect, Response},
};
use sea_orm::EntityTrait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

pub const AUTH_TAG: &str = "Accounts";

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    /// At least 8 characters
    pub password: String,
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    pub user_id: String,
    pub email: String,
    /// Whether the address must be verified before signing in
    pub verification_required: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct VerifyEmailQuery {
    pub token: String,
}

/// The signed-in user as the website sees them.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
    pub username: Option<String>,
    pub image: Option<String>,
    pub role: String,
}

impl From<user::Model> for UserSummary {
    fn from(user: user::Model) -> Self {
        Self {
            id: user.id,
            email: user.email,
            email_verified: user.email_verified,
            name: user.name,
            username: user.username,
            image: user.image,
            role: user.role,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub user: UserSummary,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(register))
        .routes(routes!(verify_email))
        .routes(routes!(login))
        .routes(routes!(logout))
        .routes(routes!(current_session))
}

#[tracing::instrument(skip_all)]
#[utoipa::path(
    post,
    path = "/register",
    tag = AUTH_TAG,
    operation_id = "Register",
    summary = "Create an account",
    description = "Creates an account and emails a verification link. Registering again with an \
                   address that is not yet verified replaces the password and sends a fresh link.",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = RegisterResponse),
        (status = 400, description = "Invalid email, name or password", body = ErrorResponse),
        (status = 409, description = "A verified account already uses this email", body = ErrorResponse),
    )
)]
async fn register(
    Extension(resources): Extension<AppResources>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let registration = resources
        .accounts()
        .register(&payload.email, &payload.password, payload.name.as_deref())
        .await?;

    // The account stays; registering again resends the link
    if let Err(e) = mail::send_verification_email(
        &resources,
        &registration.user.email,
        registration.user.name.as_deref(),
        &registration.verification_token,
    )
    .await
    {
        tracing::error!(error = %e, user_id = %registration.user.id, "Failed to send verification email");
    }

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: registration.user.id,
            email: registration.user.email,
            verification_required: resources.config.auth.require_verified_email,
        }),
    ))
}

#[tracing::instrument(skip_all)]
#[utoipa::path(
    get,
    path = "/verify-email",
    tag = AUTH_TAG,
    operation_id = "Verify Email",
    summary = "Confirm an email address",
    description = "Target of the emailed verification link. Redirects to the frontend login page \
                   with `verified=1` on success or `error=verification_failed` otherwise.",
    params(VerifyEmailQuery),
    responses(
        (status = 303, description = "Redirect to the login page"),
    )
)]
async fn verify_email(
    Extension(resources): Extension<AppResources>,
    Query(query): Query<VerifyEmailQuery>,
) -> Redirect {
    let login = format!("{}/login", resources.config.frontend());
    match resources.accounts().verify_email(&query.token).await {
        Ok(_) => Redirect::to(&format!("{login}?verified=1")),
        Err(e) => {
            tracing::info!(error = %e, "Email verification failed");
            Redirect::to(&format!("{login}?error=verification_failed"))
        }
    }
}

#[tracing::instrument(skip_all)]
#[utoipa::path(
    post,
    path = "/login",
    tag = AUTH_TAG,
    operation_id = "Login",
    summary = "Sign in with email and password",
    description = "Starts a website session and sets it as an HttpOnly cookie.",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = SessionResponse),
        (status = 401, description = "Wrong email or password", body = ErrorResponse),
        (status = 403, description = "Email address not verified yet", body = ErrorResponse),
    )
)]
async fn login(
    Extension(resources): Extension<AppResources>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let user = resources
        .accounts()
        .login(&payload.email, &payload.password)
        .await?;

    let sessions = resources.sessions();
    let user_agent = crate::downloads::header_string(&headers, USER_AGENT.as_str());
    let (token, session) = sessions.create(&user.id, user_agent).await?;
    tracing::info!(user_id = %user.id, "User signed in");

    Ok((
        [(SET_COOKIE, sessions.set_cookie(&token))],
        Json(SessionResponse {
            user: user.into(),
            expires_at: session.expires_at,
        }),
    )
        .into_response())
}

#[tracing::instrument(skip_all)]
#[utoipa::path(
    post,
    path = "/logout",
    tag = AUTH_TAG,
    operation_id = "Logout",
    summary = "End the current session",
    responses(
        (status = 204, description = "Session ended and cookie cleared"),
    )
)]
async fn logout(
    Extension(resources): Extension<AppResources>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let sessions = resources.sessions();
    if let Some(token) = sessions.token_from_headers(&headers) {
        sessions.destroy(&token).await?;
    }
    Ok((
        StatusCode::NO_CONTENT,
        [(SET_COOKIE, sessions.clear_cookie())],
    )
        .into_response())
}

#[tracing::instrument(skip_all, fields(user_id = %current.id()))]
#[utoipa::path(
    get,
    path = "/session",
    tag = AUTH_TAG,
    operation_id = "Current Session",
    summary = "Describe the current session",
    security(("session_cookie" = [])),
    responses(
        (status = 200, description = "Signed in", body = SessionResponse),
        (status = 401, description = "Not signed in", body = ErrorResponse),
        (status = 403, description = "Called with a bearer token", body = ErrorResponse),
    )
)]
async fn current_session(
    Extension(resources): Extension<AppResources>,
    current: CurrentUser,
) -> Result<Json<SessionResponse>, ApiError> {
    let AuthMethod::Session { token_hash } = &current.method else {
        return Err(ApiError::Forbidden(
            "This endpoint requires a signed-in session".into(),
        ));
    };
    let session = session::Entity::find_by_id(token_hash.as_str())
        .one(resources.db.as_ref())
        .await?
        .ok_or_else(|| ApiError::InvalidToken("Session expired".into()))?;

    Ok(Json(SessionResponse {
        expires_at: session.expires_at,
        user: current.user.into(),
    }))
}
