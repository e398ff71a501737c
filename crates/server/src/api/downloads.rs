//! Download catalog and tracked file delivery.

use crate::AppResources;
use crate::auth::CurrentUser;
use crate::config::DownloadSource;
use crate::downloads::{self, NewDownload};
use crate::error::{ApiError, ErrorResponse};
use axum::{
    Extension, Json,
    extract::{ConnectInfo, Path, Request},
    http::{
        HeaderValue,
        header::{CONTENT_DISPOSITION, REFERER, USER_AGENT},
    },
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

pub const DOWNLOADS_TAG: &str = "Downloads";

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadEntry {
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    /// Served from another site
    pub external: bool,
    /// All-time download count
    pub downloads: i64,
}

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(list_downloads))
        .routes(routes!(download))
}

#[tracing::instrument(skip_all)]
#[utoipa::path(
    get,
    path = "",
    tag = DOWNLOADS_TAG,
    operation_id = "List Downloads",
    summary = "List downloadable files",
    responses(
        (status = 200, description = "Catalog with download counts", body = Vec<DownloadEntry>),
    )
)]
async fn list_downloads(
    Extension(resources): Extension<AppResources>,
) -> Result<Json<Vec<DownloadEntry>>, ApiError> {
    let totals = downloads::totals(resources.db.as_ref()).await?;
    let entries = resources
        .config
        .downloads
        .files
        .iter()
        .map(|file| DownloadEntry {
            slug: file.slug.clone(),
            title: file.title.clone(),
            description: file.description.clone(),
            external: matches!(file.source, DownloadSource::Url(_)),
            downloads: totals.get(&file.slug).copied().unwrap_or(0),
        })
        .collect();
    Ok(Json(entries))
}

#[tracing::instrument(skip(resources, current, request))]
#[utoipa::path(
    get,
    path = "/{slug}",
    tag = DOWNLOADS_TAG,
    operation_id = "Download File",
    summary = "Download a file",
    description = "Records the download and then streams the file, or redirects (307) to its \
                   external location. Signed-in downloads appear in the user's history.",
    params(("slug" = String, Path, description = "File identifier from the catalog")),
    responses(
        (status = 200, description = "File contents"),
        (status = 307, description = "Redirect to the external file"),
        (status = 404, description = "Unknown file", body = ErrorResponse),
    )
)]
async fn download(
    Extension(resources): Extension<AppResources>,
    current: Option<CurrentUser>,
    Path(slug): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let file = resources
        .config
        .downloads
        .find(&slug)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("Unknown file '{slug}'")))?;

    if let DownloadSource::Path(path) = &file.source
        && tokio::fs::metadata(path).await.is_err()
    {
        tracing::error!(slug, path, "Catalog file is missing on disk");
        return Err(ApiError::NotFound(format!("Unknown file '{slug}'")));
    }

    let headers = request.headers();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip_hash = downloads::client_ip(peer, headers, &resources.config.trusted_proxies)
        .map(|ip| downloads::hash_ip(&resources.config.secret_key, &ip));
    let event = NewDownload {
        file_slug: file.slug.clone(),
        user_id: current.map(|c| c.user.id),
        ip_hash,
        user_agent: downloads::header_string(headers, USER_AGENT.as_str()),
        referer: downloads::header_string(headers, REFERER.as_str()),
    };
    // Tracking must not block the download itself
    if let Err(e) = downloads::record_download(resources.db.as_ref(), event).await {
        tracing::error!(error = %e, slug, "Failed to record download");
    }

    match file.source {
        DownloadSource::Url(url) => Ok(Redirect::temporary(&url).into_response()),
        DownloadSource::Path(path) => {
            let filename = std::path::Path::new(&path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&file.slug)
                .replace('"', "");
            let mut response = ServeFile::new(&path).oneshot(request).await.into_response();
            if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
            {
                response.headers_mut().insert(CONTENT_DISPOSITION, value);
            }
            Ok(response)
        }
    }
}
