//! API module providing the HTTP surface of the portfolio backend.
//!
//! This module is organized into submodules:
//! - `auth` - Registration and website sessions (/api/auth/*)
//! - `user` - The caller's profile, settings and history (/api/user/*)
//! - `users` - Public profiles (/api/users/*)
//! - `downloads` - Download catalog and tracked downloads (/api/downloads/*)
//! - `admin` - Client management and statistics (/api/admin/*)
//! - `contact` - Contact form (/api/contact)
//! - `health` - Health check endpoint (/healthz)
//! - `openapi` - OpenAPI/Utoipa configuration
//!
//! The OAuth2 server lives in [`crate::oauth2`] and is nested at `/oauth2`.

pub mod admin;
pub mod auth;
pub mod contact;
pub mod downloads;
pub mod health;
pub mod openapi;
pub mod user;
pub mod users;

pub use health::MISC_TAG;

use crate::AppResources;
use crate::auth::AuthContext;
use crate::config::AppConfig;
use crate::oauth2::{self, OAuth2State};
use axum::http::{
    HeaderValue, Method,
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
};
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_redoc::{Redoc, Servable};

/// Assemble every route with its middleware and the API docs at `/api-docs`.
pub fn build_router(app_resources: AppResources, oauth_state: OAuth2State) -> axum::Router {
    let auth_context = AuthContext {
        db: app_resources.db.clone(),
        sessions: oauth_state.sessions.clone(),
        tokens: oauth_state.tokens.clone(),
    };

    let cors = cors_layer(&app_resources.config);
    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .nest("/oauth2", oauth2::router(oauth_state.clone()))
        .merge(oauth2::discovery_router(oauth_state))
        .nest("/api/auth", auth::router())
        .nest("/api/user", user::router())
        .nest("/api/users", users::router())
        .nest("/api/downloads", downloads::router())
        .nest("/api/admin", admin::router())
        .nest("/api/contact", contact::router())
        .routes(routes!(health::health))
        .layer(axum::Extension(auth_context))
        .layer(axum::Extension(app_resources))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .split_for_parts();

    router.merge(Redoc::with_url("/api-docs", api))
}

/// The frontend calls the API with its session cookie, so only its origin is
/// allowed and credentials are permitted.
pub fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = origin_of(config.frontend()).into_iter().collect();
    if origins.is_empty() {
        tracing::warn!(frontend_url = %config.frontend_url, "No valid CORS origin in frontend_url");
    }
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION, ACCEPT])
        .allow_credentials(true)
        .max_age(Duration::from_secs(60 * 60))
}

fn origin_of(url: &str) -> Option<HeaderValue> {
    let origin = url::Url::parse(url).ok()?.origin();
    // Opaque origins serialize as "null", which must never be allowed
    if !origin.is_tuple() {
        return None;
    }
    HeaderValue::from_str(&origin.ascii_serialization()).ok()
}

/// Starts the web server with all configured routes.
#[tracing::instrument(skip(app_resources, oauth_state))]
pub async fn start_webserver(
    app_resources: AppResources,
    oauth_state: OAuth2State,
) -> color_eyre::Result<()> {
    let addr = app_resources.config.listen_addr.clone();
    let router = build_router(app_resources, oauth_state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Server running");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    Ok(())
}
