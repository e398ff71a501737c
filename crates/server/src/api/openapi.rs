//! OpenAPI/Utoipa configuration.

use crate::api::{
    admin::ADMIN_TAG, auth::AUTH_TAG, downloads::DOWNLOADS_TAG, health::MISC_TAG, user::USER_TAG,
};
use crate::oauth2::{OAUTH2_TAG, scopes};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{
        ApiKey, ApiKeyValue, AuthorizationCode, Flow, HttpAuthScheme, HttpBuilder, OAuth2, Scopes,
        SecurityScheme,
    },
};

/// Security addon for OpenAPI documentation.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    #[tracing::instrument(skip(self, openapi))]
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            let bearer = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .description(Some(
                    "OAuth2 access token obtained from the `/oauth2/token` endpoint.",
                ))
                .build();
            components.add_security_scheme("bearer", SecurityScheme::Http(bearer));

            let oauth2 = OAuth2::new([Flow::AuthorizationCode(AuthorizationCode::new(
                "/oauth2/authorize",
                "/oauth2/token",
                Scopes::from_iter(scopes::SUPPORTED_SCOPES.iter().map(|scope| {
                    let info = scopes::scope_info(scope);
                    (info.scope, info.description)
                })),
            ))]);
            components.add_security_scheme("OAuth2", SecurityScheme::OAuth2(oauth2));

            components.add_security_scheme(
                "session_cookie",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new("portfolio_session"))),
            );
        }
    }
}

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Portfolio API",
        version = "1.0.0",
        description = "Accounts, OAuth2 provider and download tracking for the portfolio website."
    ),
    tags(
        (name = MISC_TAG, description = "Health and contact form"),
        (name = AUTH_TAG, description = "Registration and website sessions"),
        (name = USER_TAG, description = "Profiles, settings and download history"),
        (name = DOWNLOADS_TAG, description = "Download catalog and tracked downloads"),
        (name = ADMIN_TAG, description = "Client management and statistics"),
        (name = OAUTH2_TAG, description = "OAuth2 authorization server")
    )
)]
pub struct ApiDoc;
