//! Administration endpoints.
//!
//! Every route requires a signed-in session whose user has the admin role.

use crate::AppResources;
use crate::auth::CurrentUser;
use crate::downloads::{self, DownloadStats};
use crate::entity::oauth2_client;
use crate::error::{ApiError, ErrorResponse};
use crate::oauth2::ClientRegistry;
use crate::oauth2::clients::{GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN, NewClient};
use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

pub const ADMIN_TAG: &str = "Admin";

const DEFAULT_STATS_DAYS: i64 = 30;
const MAX_STATS_DAYS: i64 = 365;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ClientResponse {
    pub client_id: String,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub scopes: String,
    pub grant_types: String,
    pub is_public: bool,
    pub skip_consent: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<oauth2_client::Model> for ClientResponse {
    fn from(client: oauth2_client::Model) -> Self {
        Self {
            redirect_uris: client.redirect_uris_list(),
            client_id: client.id,
            name: client.name,
            scopes: client.scopes,
            grant_types: client.grant_types,
            is_public: client.is_public,
            skip_consent: client.skip_consent,
            created_at: client.created_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateClientRequest {
    /// Generated when omitted
    pub client_id: Option<String>,
    pub name: String,
    pub redirect_uris: Vec<String>,
    /// Space-separated scopes the client may request
    #[serde(default = "default_client_scopes")]
    pub scopes: String,
    /// Public clients have no secret and must use PKCE
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub skip_consent: bool,
}

fn default_client_scopes() -> String {
    "openid profile email".to_string()
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatedClientResponse {
    #[serde(flatten)]
    pub client: ClientResponse,
    /// Shown once; store it now
    pub client_secret: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct StatsQuery {
    /// Window in days (1-365, default 30)
    pub days: Option<i64>,
}

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(list_clients, create_client))
        .routes(routes!(delete_client))
        .routes(routes!(download_stats))
}

fn registry(resources: &AppResources) -> ClientRegistry {
    ClientRegistry::new(resources.db.clone())
}

fn require_admin(current: &CurrentUser) -> Result<(), ApiError> {
    current.require_session()?;
    current.require_admin()
}

#[tracing::instrument(skip_all, fields(user_id = %current.id()))]
#[utoipa::path(
    get,
    path = "/clients",
    tag = ADMIN_TAG,
    operation_id = "List Clients",
    summary = "List registered OAuth2 clients",
    security(("session_cookie" = [])),
    responses(
        (status = 200, description = "Registered clients", body = Vec<ClientResponse>),
        (status = 401, description = "Not signed in", body = ErrorResponse),
        (status = 403, description = "Not an administrator", body = ErrorResponse),
    )
)]
async fn list_clients(
    Extension(resources): Extension<AppResources>,
    current: CurrentUser,
) -> Result<Json<Vec<ClientResponse>>, ApiError> {
    require_admin(&current)?;
    let clients = registry(&resources).list().await?;
    Ok(Json(clients.into_iter().map(Into::into).collect()))
}

#[tracing::instrument(skip_all, fields(user_id = %current.id()))]
#[utoipa::path(
    post,
    path = "/clients",
    tag = ADMIN_TAG,
    operation_id = "Create Client",
    summary = "Register an OAuth2 client",
    description = "Confidential clients receive a generated `client_secret` in the response. \
                   Only its hash is stored, so it cannot be shown again.",
    security(("session_cookie" = [])),
    request_body = CreateClientRequest,
    responses(
        (status = 201, description = "Client registered", body = CreatedClientResponse),
        (status = 400, description = "Invalid client definition", body = ErrorResponse),
        (status = 401, description = "Not signed in", body = ErrorResponse),
        (status = 403, description = "Not an administrator", body = ErrorResponse),
        (status = 409, description = "Client id already exists", body = ErrorResponse),
    )
)]
async fn create_client(
    Extension(resources): Extension<AppResources>,
    current: CurrentUser,
    Json(payload): Json<CreateClientRequest>,
) -> Result<(StatusCode, Json<CreatedClientResponse>), ApiError> {
    require_admin(&current)?;
    let registry = registry(&resources);

    if let Some(id) = payload.client_id.as_deref() {
        if id.trim().is_empty() {
            return Err(ApiError::BadRequest("client_id must not be empty".into()));
        }
        if registry.find(id).await?.is_some() {
            return Err(ApiError::Conflict(format!("Client '{id}' already exists")));
        }
    }

    let (client, client_secret) = registry
        .create(NewClient {
            id: payload.client_id,
            name: payload.name,
            redirect_uris: payload.redirect_uris,
            scopes: payload.scopes,
            grant_types: format!("{GRANT_AUTHORIZATION_CODE} {GRANT_REFRESH_TOKEN}"),
            is_public: payload.is_public,
            skip_consent: payload.skip_consent,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedClientResponse {
            client: client.into(),
            client_secret,
        }),
    ))
}

#[tracing::instrument(skip_all, fields(user_id = %current.id(), client_id = %client_id))]
#[utoipa::path(
    delete,
    path = "/clients/{client_id}",
    tag = ADMIN_TAG,
    operation_id = "Delete Client",
    summary = "Delete an OAuth2 client",
    description = "Removes the client together with its tokens, consents and pending codes.",
    security(("session_cookie" = [])),
    params(("client_id" = String, Path, description = "Client identifier")),
    responses(
        (status = 204, description = "Client deleted"),
        (status = 401, description = "Not signed in", body = ErrorResponse),
        (status = 403, description = "Not an administrator", body = ErrorResponse),
        (status = 404, description = "Unknown client", body = ErrorResponse),
    )
)]
async fn delete_client(
    Extension(resources): Extension<AppResources>,
    current: CurrentUser,
    Path(client_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_admin(&current)?;
    if registry(&resources).delete(&client_id).await? {
        tracing::info!("Deleted OAuth2 client");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Unknown client '{client_id}'")))
    }
}

#[tracing::instrument(skip_all, fields(user_id = %current.id()))]
#[utoipa::path(
    get,
    path = "/downloads/stats",
    tag = ADMIN_TAG,
    operation_id = "Download Statistics",
    summary = "Download statistics per file",
    security(("session_cookie" = [])),
    params(StatsQuery),
    responses(
        (status = 200, description = "Totals and the recent window per file", body = DownloadStats),
        (status = 401, description = "Not signed in", body = ErrorResponse),
        (status = 403, description = "Not an administrator", body = ErrorResponse),
    )
)]
async fn download_stats(
    Extension(resources): Extension<AppResources>,
    current: CurrentUser,
    Query(query): Query<StatsQuery>,
) -> Result<Json<DownloadStats>, ApiError> {
    require_admin(&current)?;
    let days = stats_window(query.days);
    let stats = downloads::stats(resources.db.as_ref(), &resources.config.downloads, days).await?;
    Ok(Json(stats))
}

fn stats_window(days: Option<i64>) -> i64 {
    days.unwrap_or(DEFAULT_STATS_DAYS).clamp(1, MAX_STATS_DAYS)
}
