//! OAuth2 HTTP endpoints.
//!
//! Implements the OAuth2 authorization server endpoints:
//! - Authorization endpoint
//! - Token endpoint
//! - Token revocation
//! - UserInfo (OpenID Connect)
//! - Discovery document

use crate::auth::CurrentUser;
use crate::entity::{oauth2_client, oauth2_token, user};
use crate::error::{ErrorResponse, OAuthError};
use crate::oauth2::clients::{GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN};
use crate::oauth2::codes::{
    AuthorizationGrant, PKCE_METHOD_PLAIN, PKCE_METHOD_S256, validate_code_challenge,
};
use crate::oauth2::consent::{self, PendingAuthorization, encode_consent_token, find_consent};
use crate::oauth2::scopes::{self, SCOPE_EMAIL, SCOPE_OPENID, SCOPE_PROFILE};
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};
use crate::password::generate_token;
use axum::{
    Form, Json,
    extract::{Query, State},
    http::{
        HeaderMap, StatusCode, Uri,
        header::{AUTHORIZATION, CACHE_CONTROL, PRAGMA},
    },
    response::{IntoResponse, Redirect, Response},
};
use sea_orm::EntityTrait;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Creates the OAuth2 router, mounted under `/oauth2`.
pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(authorize))
        .routes(routes!(token))
        .routes(routes!(revoke))
        .routes(routes!(userinfo))
        .merge(consent::router())
        .with_state(state)
}

/// Creates the discovery router, mounted at the root.
pub fn discovery_router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(openid_configuration))
        .with_state(state)
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// OAuth2 authorization request parameters.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthorizeRequest {
    /// Must be "code" for Authorization Code flow
    pub response_type: String,
    /// Client identifier issued during registration
    pub client_id: String,
    /// Redirect URI (must match registered URI)
    pub redirect_uri: Option<String>,
    /// Space-separated list of requested scopes
    pub scope: Option<String>,
    /// Opaque value for CSRF protection
    pub state: Option<String>,
    /// PKCE code challenge (base64url-encoded)
    pub code_challenge: Option<String>,
    /// PKCE method: "S256" or "plain"
    pub code_challenge_method: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub code_verifier: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RevokeRequest {
    pub token: String,
    pub token_type_hint: Option<String>,
}

/// Claims about the user, filtered by the token's scopes.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct UserInfoResponse {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    /// Seconds since the epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
}

impl UserInfoResponse {
    pub fn for_scopes(user: user::Model, scopes: &[String]) -> Self {
        let granted = |scope: &str| scopes.iter().any(|s| s == scope);
        let mut info = UserInfoResponse {
            sub: user.id,
            ..Default::default()
        };
        if granted(SCOPE_PROFILE) {
            info.name = user.name;
            info.preferred_username = user.username;
            info.picture = user.image;
            info.website = user.website;
            info.updated_at = Some(user.updated_at.unix_timestamp());
        }
        if granted(SCOPE_EMAIL) {
            info.email = Some(user.email);
            info.email_verified = Some(user.email_verified);
        }
        info
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub revocation_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub claims_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
}

// =============================================================================
// Endpoints
// =============================================================================

/// OAuth2 Authorization endpoint.
#[tracing::instrument(skip_all, fields(client_id = %params.client_id))]
#[utoipa::path(
    get,
    path = "/authorize",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize",
    summary = "Initiate OAuth2 authorization flow",
    description = "Starts the OAuth2 Authorization Code flow.\n\n\
                   Without a website session the user is sent to the frontend login page, which \
                   returns here afterwards. Applications the user has not yet approved are sent \
                   through the consent page. Otherwise the user is redirected straight back to the \
                   client's redirect_uri with an authorization code.\n\n\
                   **PKCE Support:** Public clients must send code_challenge and code_challenge_method. \
                   S256 method is recommended.",
    params(
        ("response_type" = String, Query, description = "OAuth2 response type. Must be `code`."),
        ("client_id" = String, Query, description = "The client identifier issued during client registration."),
        ("redirect_uri" = Option<String>, Query, description = "Must exactly match a registered redirect URI. Defaults to the first registered one."),
        ("scope" = Option<String>, Query, description = "Space-separated list of requested scopes (e.g., `openid profile email`)."),
        ("state" = Option<String>, Query, description = "Opaque value for CSRF protection. Returned unchanged in the redirect."),
        ("code_challenge" = Option<String>, Query, description = "PKCE code challenge."),
        ("code_challenge_method" = Option<String>, Query, description = "PKCE challenge method. Either `S256` (recommended) or `plain`."),
    ),
    responses(
        (status = 303, description = "Redirect to login, consent, or back to the client"),
        (status = 400, description = "Unknown client_id or invalid redirect_uri", body = ErrorResponse),
    )
)]
pub async fn authorize(
    State(state): State<OAuth2State>,
    current: Option<CurrentUser>,
    uri: Uri,
    Query(params): Query<AuthorizeRequest>,
) -> Result<Response, OAuthError> {
    // Until the redirect URI is validated, errors go to the user agent
    let client = state
        .clients
        .find(&params.client_id)
        .await?
        .ok_or_else(|| OAuthError::InvalidRequest("Unknown client_id".into()))?;
    let redirect_uri = state
        .clients
        .bound_redirect(&client, params.redirect_uri.as_deref())?;
    let redirect_error =
        |error: OAuthError| error_redirect(&redirect_uri, params.state.as_deref(), &error);

    if params.response_type != "code" {
        return Ok(redirect_error(OAuthError::UnsupportedResponseType));
    }
    if !client.is_grant_type_allowed(GRANT_AUTHORIZATION_CODE) {
        return Ok(redirect_error(OAuthError::UnauthorizedClient));
    }
    let scope = match state.clients.negotiate_scope(&client, params.scope.as_deref()) {
        Ok(scope) => scope,
        Err(e) => return Ok(redirect_error(e)),
    };
    let code_challenge_method = match params.code_challenge.as_deref() {
        Some(challenge) => {
            match validate_code_challenge(challenge, params.code_challenge_method.as_deref()) {
                Ok(method) => Some(method),
                Err(msg) => return Ok(redirect_error(OAuthError::InvalidRequest(msg))),
            }
        }
        None if client.is_public && state.require_pkce_for_public_clients => {
            return Ok(redirect_error(OAuthError::InvalidRequest(
                "code_challenge is required for public clients".into(),
            )));
        }
        None => None,
    };

    let Some(current) = current.filter(CurrentUser::is_session) else {
        let callback = format!(
            "{}/oauth2/authorize?{}",
            state.issuer_url,
            uri.query().unwrap_or_default()
        );
        let login_url = format!(
            "{}/login?callbackUrl={}",
            state.frontend_url,
            urlencoding::encode(&callback)
        );
        return Ok(Redirect::to(&login_url).into_response());
    };

    let pending = PendingAuthorization {
        client_id: client.id.clone(),
        redirect_uri,
        redirect_uri_explicit: params.redirect_uri.is_some(),
        scope,
        state: params.state.clone(),
        code_challenge: params.code_challenge.clone(),
        code_challenge_method,
    };

    if already_approved(&state, &client, current.id(), &pending.scope).await? {
        return complete_authorization(&state, current.id(), pending).await;
    }

    let consent_token = encode_consent_token(&state.secret, current.id(), &pending).map_err(|e| {
        tracing::error!(error = %e, "Failed to sign consent token");
        OAuthError::ServerError
    })?;
    let consent_url = format!(
        "{}/oauth/consent?consent_token={}",
        state.frontend_url,
        urlencoding::encode(&consent_token)
    );
    Ok(Redirect::to(&consent_url).into_response())
}

/// OAuth2 Token endpoint.
#[tracing::instrument(skip_all, fields(grant_type = %params.grant_type))]
#[utoipa::path(
    post,
    path = "/token",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Token",
    summary = "Exchange authorization code or refresh token for access token",
    description = "Exchanges an authorization code for tokens, or refreshes an existing access token.\n\n\
                   **Supported grant types:**\n\
                   - `authorization_code`: Exchange an authorization code for access and refresh tokens\n\
                   - `refresh_token`: Rotate a refresh token. The old pair is revoked and the scope may only narrow.\n\n\
                   **Client authentication:**\n\
                   - Public clients: Include `client_id` in the request body\n\
                   - Confidential clients: Use HTTP Basic auth or include `client_id` and `client_secret` in the body\n\n\
                   **PKCE:** If the authorization request included a code_challenge, you must provide the code_verifier.",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token request parameters"
    ),
    responses(
        (status = 200, description = "Tokens issued successfully", body = TokenResponse),
        (status = 400, description = "Invalid request (missing parameters, invalid code, PKCE mismatch)", body = ErrorResponse),
        (status = 401, description = "Invalid client credentials or unknown client", body = ErrorResponse),
    )
)]
pub async fn token(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    Form(params): Form<TokenRequest>,
) -> Result<Response, OAuthError> {
    let (client_id, client_secret) = extract_client_credentials(&headers, &params);
    let client_id =
        client_id.ok_or_else(|| OAuthError::InvalidRequest("client_id is required".into()))?;
    let client = state
        .clients
        .authenticate(&client_id, client_secret.as_deref())
        .await?;

    let grant_type = params.grant_type.as_str();
    if grant_type != GRANT_AUTHORIZATION_CODE && grant_type != GRANT_REFRESH_TOKEN {
        return Err(OAuthError::UnsupportedGrantType);
    }
    if !client.is_grant_type_allowed(grant_type) {
        return Err(OAuthError::UnauthorizedClient);
    }

    let issued = if grant_type == GRANT_AUTHORIZATION_CODE {
        authorization_code_grant(&state, &client, &params).await?
    } else {
        refresh_token_grant(&state, &client, &params).await?
    };

    tracing::info!(client_id = %client.id, user_id = %issued.user_id, "Issued tokens");
    let body = TokenResponse {
        expires_in: state.tokens.access_token_lifetime,
        access_token: issued.access_token,
        token_type: issued.token_type,
        refresh_token: issued.refresh_token,
        scope: issued.scope,
    };
    Ok((
        [(CACHE_CONTROL, "no-store"), (PRAGMA, "no-cache")],
        Json(body),
    )
        .into_response())
}

/// Token revocation endpoint (RFC 7009).
#[tracing::instrument(skip_all)]
#[utoipa::path(
    post,
    path = "/revoke",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Revoke Token",
    summary = "Revoke an access or refresh token",
    description = "Revokes an access token or refresh token, preventing further use. \
                   Implements RFC 7009 (OAuth 2.0 Token Revocation).\n\n\
                   **Behavior:**\n\
                   - Returns 200 OK even if the token was already revoked or doesn't exist\n\
                   - When `token_type_hint` is provided, tries that token type first\n\
                   - Unknown `token_type_hint` values are ignored\n\n\
                   **Note:** Access and refresh token are issued as a pair and are revoked together.",
    request_body(
        content = RevokeRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token revocation request"
    ),
    responses(
        (status = 200, description = "Token revoked successfully (or was already invalid)"),
    )
)]
pub async fn revoke(
    State(state): State<OAuth2State>,
    Form(params): Form<RevokeRequest>,
) -> StatusCode {
    match state
        .tokens
        .revoke_by_value(&params.token, params.token_type_hint.as_deref())
        .await
    {
        Ok(true) => tracing::info!("Token revoked"),
        Ok(false) => tracing::debug!("Revocation of unknown or inactive token"),
        // Still 200; internal errors are not leaked
        Err(e) => tracing::error!(error = %e, "Database error during token revocation"),
    }
    StatusCode::OK
}

/// OpenID Connect UserInfo endpoint.
#[tracing::instrument(skip_all)]
#[utoipa::path(
    get,
    path = "/userinfo",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect UserInfo",
    summary = "Get authenticated user's profile information",
    description = "Returns claims about the authenticated user. Requires a valid access token with the `openid` scope.\n\n\
                   **Returned claims depend on granted scopes:**\n\
                   - `openid`: `sub`\n\
                   - `profile`: `name`, `preferred_username`, `picture`, `website`, `updated_at`\n\
                   - `email`: `email`, `email_verified`",
    security(
        ("bearer" = [])
    ),
    responses(
        (status = 200, description = "User profile information", body = UserInfoResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
        (status = 403, description = "Token does not have required `openid` scope", body = ErrorResponse),
    )
)]
pub async fn userinfo(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
) -> Result<Json<UserInfoResponse>, OAuthError> {
    let access_token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| {
            OAuthError::InvalidToken("Missing or invalid Authorization header".into())
        })?;

    let token = state
        .tokens
        .validate(access_token)
        .await?
        .ok_or_else(|| OAuthError::InvalidToken("Token is invalid or expired".into()))?;
    if !token.has_scope(SCOPE_OPENID) {
        return Err(OAuthError::InsufficientScope(
            "Token does not have 'openid' scope".into(),
        ));
    }

    let user = user::Entity::find_by_id(&token.user_id)
        .one(state.db.as_ref())
        .await?
        .ok_or_else(|| OAuthError::InvalidToken("User no longer exists".into()))?;

    Ok(Json(UserInfoResponse::for_scopes(user, &token.scopes_list())))
}

/// OpenID Connect Discovery document.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect Discovery",
    summary = "OpenID Connect Discovery document",
    description = "Returns metadata about the provider: endpoint URLs, supported grant and \
                   response types, scopes, claims, client authentication methods and PKCE methods.",
    responses(
        (status = 200, description = "OpenID Connect configuration document", body = OpenIdConfiguration),
    )
)]
pub async fn openid_configuration(State(state): State<OAuth2State>) -> Json<OpenIdConfiguration> {
    let to_strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    Json(OpenIdConfiguration {
        issuer: state.issuer_url.clone(),
        authorization_endpoint: format!("{}/oauth2/authorize", state.issuer_url),
        token_endpoint: format!("{}/oauth2/token", state.issuer_url),
        userinfo_endpoint: format!("{}/oauth2/userinfo", state.issuer_url),
        revocation_endpoint: format!("{}/oauth2/revoke", state.issuer_url),
        response_types_supported: to_strings(&["code"]),
        grant_types_supported: to_strings(&[GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN]),
        subject_types_supported: to_strings(&["public"]),
        scopes_supported: to_strings(scopes::SUPPORTED_SCOPES),
        claims_supported: to_strings(&[
            "sub",
            "name",
            "preferred_username",
            "picture",
            "website",
            "updated_at",
            "email",
            "email_verified",
        ]),
        token_endpoint_auth_methods_supported: to_strings(&[
            "client_secret_basic",
            "client_secret_post",
            "none",
        ]),
        code_challenge_methods_supported: to_strings(&[PKCE_METHOD_S256, PKCE_METHOD_PLAIN]),
    })
}

// =============================================================================
// Helper Functions
// =============================================================================

/// First-party clients and previously approved scopes skip the consent page.
async fn already_approved(
    state: &OAuth2State,
    client: &oauth2_client::Model,
    user_id: &str,
    scope: &str,
) -> Result<bool, OAuthError> {
    if client.skip_consent {
        return Ok(true);
    }
    Ok(find_consent(state.db.as_ref(), user_id, &client.id)
        .await?
        .is_some_and(|c| c.covers(scope)))
}

/// Store an authorization code for an approved request and send the user
/// back to the client.
pub(crate) async fn complete_authorization(
    state: &OAuth2State,
    user_id: &str,
    request: PendingAuthorization,
) -> Result<Response, OAuthError> {
    let PendingAuthorization {
        client_id,
        redirect_uri,
        redirect_uri_explicit,
        scope,
        state: client_state,
        code_challenge,
        code_challenge_method,
    } = request;

    let code = generate_token();
    let now = OffsetDateTime::now_utc();
    state
        .codes
        .insert(AuthorizationGrant {
            code: code.clone(),
            client_id,
            user_id: user_id.to_string(),
            redirect_uri: redirect_uri.clone(),
            redirect_uri_explicit,
            scope,
            code_challenge,
            code_challenge_method,
            created_at: now,
            expires_at: now + Duration::seconds(state.code_lifetime),
        })
        .await?;

    let mut pairs = vec![("code", code.as_str())];
    if let Some(s) = client_state.as_deref() {
        pairs.push(("state", s));
    }
    Ok(redirect_with(&redirect_uri, &pairs))
}

fn redirect_with(redirect_uri: &str, pairs: &[(&str, &str)]) -> Response {
    match url::Url::parse(redirect_uri) {
        Ok(mut url) => {
            {
                let mut query = url.query_pairs_mut();
                for (key, value) in pairs {
                    query.append_pair(key, value);
                }
            }
            Redirect::to(url.as_str()).into_response()
        }
        Err(_) => OAuthError::InvalidRequest("Invalid redirect_uri".into()).into_response(),
    }
}

/// Report an authorization error to the client via its redirect URI.
pub(crate) fn error_redirect(
    redirect_uri: &str,
    state: Option<&str>,
    error: &OAuthError,
) -> Response {
    let description = error.description();
    let mut pairs = vec![("error", error.code())];
    if let Some(d) = description.as_deref() {
        pairs.push(("error_description", d));
    }
    if let Some(s) = state {
        pairs.push(("state", s));
    }
    redirect_with(redirect_uri, &pairs)
}

fn extract_client_credentials(
    headers: &HeaderMap,
    params: &TokenRequest,
) -> (Option<String>, Option<String>) {
    // Try Basic auth first; both parts are form-urlencoded (RFC 6749 2.3.1)
    if let Some(auth) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        && let Ok(decoded) =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, auth.trim())
        && let Ok(creds) = String::from_utf8(decoded)
        && let Some((id, secret)) = creds.split_once(':')
    {
        let decode = |s: &str| {
            urlencoding::decode(s)
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| s.to_string())
        };
        return (Some(decode(id)), Some(decode(secret)));
    }

    // Fall back to form body
    (params.client_id.clone(), params.client_secret.clone())
}

async fn user_exists(state: &OAuth2State, user_id: &str) -> Result<bool, OAuthError> {
    Ok(user::Entity::find_by_id(user_id)
        .one(state.db.as_ref())
        .await?
        .is_some())
}

async fn authorization_code_grant(
    state: &OAuth2State,
    client: &oauth2_client::Model,
    params: &TokenRequest,
) -> Result<oauth2_token::Model, OAuthError> {
    let code = params
        .code
        .as_deref()
        .ok_or_else(|| OAuthError::InvalidRequest("code is required".into()))?;

    // Taking the code consumes it, so a failed exchange cannot be retried
    let grant = state
        .codes
        .take(code)
        .await?
        .ok_or_else(|| OAuthError::InvalidGrant("Authorization code is invalid or was already used".into()))?;

    if grant.is_expired() {
        return Err(OAuthError::InvalidGrant("Authorization code expired".into()));
    }
    if grant.client_id != client.id {
        return Err(OAuthError::InvalidGrant("Client ID mismatch".into()));
    }
    // RFC 6749 4.1.3: required and identical when the authorization request had one
    match params.redirect_uri.as_deref() {
        Some(uri) if uri != grant.redirect_uri => {
            return Err(OAuthError::InvalidGrant("Redirect URI mismatch".into()));
        }
        None if grant.redirect_uri_explicit => {
            return Err(OAuthError::InvalidGrant("redirect_uri is required".into()));
        }
        _ => {}
    }
    if grant.code_challenge.is_some() {
        let verifier = params
            .code_verifier
            .as_deref()
            .ok_or_else(|| OAuthError::InvalidRequest("code_verifier is required".into()))?;
        if !grant.verify_pkce(verifier) {
            return Err(OAuthError::InvalidGrant("PKCE verification failed".into()));
        }
    }
    if !user_exists(state, &grant.user_id).await? {
        return Err(OAuthError::InvalidGrant("User no longer exists".into()));
    }

    Ok(state
        .tokens
        .issue_pair(&client.id, &grant.user_id, &grant.scope)
        .await?)
}

async fn refresh_token_grant(
    state: &OAuth2State,
    client: &oauth2_client::Model,
    params: &TokenRequest,
) -> Result<oauth2_token::Model, OAuthError> {
    let refresh_token = params
        .refresh_token
        .as_deref()
        .ok_or_else(|| OAuthError::InvalidRequest("refresh_token is required".into()))?;

    let existing = state
        .tokens
        .find_by_refresh_token(refresh_token)
        .await?
        .ok_or_else(|| OAuthError::InvalidGrant("Refresh token is invalid".into()))?;

    if existing.client_id != client.id {
        return Err(OAuthError::InvalidGrant(
            "Token does not belong to this client".into(),
        ));
    }
    if existing.is_revoked() || existing.is_refresh_token_expired() {
        return Err(OAuthError::InvalidGrant(
            "Refresh token is invalid or expired".into(),
        ));
    }

    let scope = match params.scope.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(requested) if scopes::is_subset(requested, &existing.scope) => {
            scopes::parse(requested).join(" ")
        }
        Some(_) => {
            return Err(OAuthError::InvalidScope(
                "Requested scope exceeds the original grant".into(),
            ));
        }
        None => existing.scope.clone(),
    };

    if !user_exists(state, &existing.user_id).await? {
        return Err(OAuthError::InvalidGrant("User no longer exists".into()));
    }

    // Only one of several concurrent refreshes wins the rotation
    if !state.tokens.revoke_if_active(&existing.id).await? {
        return Err(OAuthError::InvalidGrant(
            "Refresh token was already used".into(),
        ));
    }

    Ok(state
        .tokens
        .issue_pair(&client.id, &existing.user_id, &scope)
        .await?)
}
