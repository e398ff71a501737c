//! OAuth2 endpoint tests.
//!
//! Drives the authorization code flow end to end against an in-memory database.

mod common;

use axum::http::{StatusCode, header};
use common::*;
use portfolio_server::config::{CodeStoreKind, TokenFormat};
use portfolio_server::entity::oauth2_authorization;
use portfolio_server::error::ErrorResponse;
use sea_orm::EntityTrait;
use portfolio_server::oauth2::codes::s256_challenge;
use portfolio_server::oauth2::endpoints::{OpenIdConfiguration, TokenResponse, UserInfoResponse};

const VERIFIER: &str = "dBjftJeZ4CVP-mJ92K9kqRFF1hMHQobyJqWcBBAhsbo4Gx";

fn authorize_query(client_id: &str) -> Vec<(&'static str, String)> {
    vec![
        ("response_type", "code".into()),
        ("client_id", client_id.into()),
        ("redirect_uri", REDIRECT_URI.into()),
        ("scope", "openid profile email".into()),
        ("state", "xyz".into()),
        ("code_challenge", s256_challenge(VERIFIER)),
        ("code_challenge_method", "S256".into()),
    ]
}

async fn authorize(
    app: &TestApp,
    cookie: Option<&axum::http::HeaderValue>,
    client_id: &str,
) -> url::Url {
    let mut request = app.server.get("/oauth2/authorize");
    for (k, v) in authorize_query(client_id) {
        request = request.add_query_param(k, v);
    }
    if let Some(cookie) = cookie {
        request = request.add_header(cookie_header(), cookie.clone());
    }
    let response = request.await;
    response.assert_status(StatusCode::SEE_OTHER);
    location(&response)
}

/// Walk the flow up to an authorization code, approving consent on the way.
async fn obtain_code(app: &TestApp, cookie: &axum::http::HeaderValue, client_id: &str) -> String {
    let consent = authorize(app, Some(cookie), client_id).await;
    assert_eq!(consent.path(), "/oauth/consent");
    let consent_token = query_param(&consent, "consent_token").expect("consent token");

    let response = app
        .server
        .post("/oauth2/consent")
        .add_header(cookie_header(), cookie.clone())
        .form(&[("consent_token", consent_token.as_str()), ("action", "approve")])
        .await;
    response.assert_status(StatusCode::SEE_OTHER);
    let callback = location(&response);
    assert!(callback.as_str().starts_with(REDIRECT_URI));
    assert_eq!(query_param(&callback, "state").as_deref(), Some("xyz"));
    query_param(&callback, "code").expect("authorization code")
}

async fn exchange(app: &TestApp, client_id: &str, code: &str) -> axum_test::TestResponse {
    app.server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", client_id),
            ("code_verifier", VERIFIER),
        ])
        .await
}

#[tokio::test]
async fn test_discovery_document() {
    let app = spawn_app(test_config(Vec::new())).await;
    let response = app.server.get("/.well-known/openid-configuration").await;
    response.assert_status_ok();
    let doc: OpenIdConfiguration = response.json();
    assert_eq!(doc.issuer, PUBLIC_URL);
    assert_eq!(doc.token_endpoint, format!("{PUBLIC_URL}/oauth2/token"));
    assert!(doc.code_challenge_methods_supported.contains(&"S256".to_string()));
    assert!(doc.scopes_supported.contains(&"profile:write".to_string()));
}

#[tokio::test]
async fn test_authorize_without_session_redirects_to_login() {
    let app = spawn_app(test_config(Vec::new())).await;
    app.register_client("spa", true, false).await;

    let login = authorize(&app, None, "spa").await;
    assert_eq!(login.origin().ascii_serialization(), FRONTEND_URL);
    assert_eq!(login.path(), "/login");
    let callback = query_param(&login, "callbackUrl").expect("callbackUrl");
    assert!(callback.starts_with(&format!("{PUBLIC_URL}/oauth2/authorize?")));
    assert!(callback.contains("client_id=spa"));
}

#[tokio::test]
async fn test_authorize_unknown_client_is_not_redirected() {
    let app = spawn_app(test_config(Vec::new())).await;
    let response = app
        .server
        .get("/oauth2/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "nope")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorResponse = response.json();
    assert_eq!(body.error, "invalid_request");
}

#[tokio::test]
async fn test_public_client_requires_pkce() {
    let app = spawn_app(test_config(Vec::new())).await;
    app.register_client("spa", true, false).await;
    app.verified_user("ada@example.org").await;
    let cookie = app.login("ada@example.org").await;

    let response = app
        .server
        .get("/oauth2/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "spa")
        .add_query_param("state", "s1")
        .add_header(cookie_header(), cookie)
        .await;
    response.assert_status(StatusCode::SEE_OTHER);
    let redirect = location(&response);
    assert!(redirect.as_str().starts_with(REDIRECT_URI));
    assert_eq!(query_param(&redirect, "error").as_deref(), Some("invalid_request"));
    assert_eq!(query_param(&redirect, "state").as_deref(), Some("s1"));
}

#[tokio::test]
async fn test_full_authorization_code_flow() {
    let app = spawn_app(test_config(Vec::new())).await;
    app.register_client("spa", true, false).await;
    let user = app.verified_user("ada@example.org").await;
    let cookie = app.login("ada@example.org").await;

    // Consent page details
    let consent = authorize(&app, Some(&cookie), "spa").await;
    let consent_token = query_param(&consent, "consent_token").expect("consent token");
    let details = app
        .server
        .get("/oauth2/consent")
        .add_query_param("consent_token", &consent_token)
        .add_header(cookie_header(), cookie.clone())
        .await;
    details.assert_status_ok();
    let details: serde_json::Value = details.json();
    assert_eq!(details["client_id"], "spa");
    assert_eq!(details["user_email"], "ada@example.org");
    assert_eq!(details["scopes"].as_array().map(Vec::len), Some(3));

    let code = obtain_code(&app, &cookie, "spa").await;
    let response = exchange(&app, "spa", &code).await;
    response.assert_status_ok();
    assert_eq!(
        response.header(header::CACHE_CONTROL).to_str().unwrap(),
        "no-store"
    );
    let tokens: TokenResponse = response.json();
    assert_eq!(tokens.token_type, "Bearer");
    assert_eq!(tokens.scope, "openid profile email");
    assert!(tokens.refresh_token.is_some());

    let info = app
        .server
        .get("/oauth2/userinfo")
        .add_header(header::AUTHORIZATION, bearer(&tokens.access_token))
        .await;
    info.assert_status_ok();
    let info: UserInfoResponse = info.json();
    assert_eq!(info.sub, user.id);
    assert_eq!(info.email.as_deref(), Some("ada@example.org"));
    assert_eq!(info.name.as_deref(), Some("Test User"));

    // Codes are single use
    let replay = exchange(&app, "spa", &code).await;
    replay.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorResponse = replay.json();
    assert_eq!(body.error, "invalid_grant");
}

#[tokio::test]
async fn test_consent_is_remembered() {
    let app = spawn_app(test_config(Vec::new())).await;
    app.register_client("spa", true, false).await;
    app.verified_user("ada@example.org").await;
    let cookie = app.login("ada@example.org").await;

    obtain_code(&app, &cookie, "spa").await;

    // Second request for the same scopes goes straight back to the client
    let redirect = authorize(&app, Some(&cookie), "spa").await;
    assert!(redirect.as_str().starts_with(REDIRECT_URI));
    assert!(query_param(&redirect, "code").is_some());
}

#[tokio::test]
async fn test_first_party_client_skips_consent() {
    let app = spawn_app(test_config(Vec::new())).await;
    app.register_client("website", true, true).await;
    app.verified_user("ada@example.org").await;
    let cookie = app.login("ada@example.org").await;

    let redirect = authorize(&app, Some(&cookie), "website").await;
    assert!(redirect.as_str().starts_with(REDIRECT_URI));
    assert!(query_param(&redirect, "code").is_some());
}

#[tokio::test]
async fn test_denied_consent_reports_access_denied() {
    let app = spawn_app(test_config(Vec::new())).await;
    app.register_client("spa", true, false).await;
    app.verified_user("ada@example.org").await;
    let cookie = app.login("ada@example.org").await;

    let consent = authorize(&app, Some(&cookie), "spa").await;
    let consent_token = query_param(&consent, "consent_token").unwrap();
    let response = app
        .server
        .post("/oauth2/consent")
        .add_header(cookie_header(), cookie)
        .form(&[("consent_token", consent_token.as_str()), ("action", "deny")])
        .await;
    response.assert_status(StatusCode::SEE_OTHER);
    let redirect = location(&response);
    assert_eq!(query_param(&redirect, "error").as_deref(), Some("access_denied"));
    assert_eq!(query_param(&redirect, "state").as_deref(), Some("xyz"));
}

#[tokio::test]
async fn test_consent_token_belongs_to_its_user() {
    let app = spawn_app(test_config(Vec::new())).await;
    app.register_client("spa", true, false).await;
    app.verified_user("ada@example.org").await;
    app.verified_user("bob@example.org").await;
    let ada = app.login("ada@example.org").await;
    let bob = app.login("bob@example.org").await;

    let consent = authorize(&app, Some(&ada), "spa").await;
    let consent_token = query_param(&consent, "consent_token").unwrap();
    let response = app
        .server
        .post("/oauth2/consent")
        .add_header(cookie_header(), bob)
        .form(&[("consent_token", consent_token.as_str()), ("action", "approve")])
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_pkce_mismatch_is_rejected() {
    let app = spawn_app(test_config(Vec::new())).await;
    app.register_client("spa", true, false).await;
    app.verified_user("ada@example.org").await;
    let cookie = app.login("ada@example.org").await;
    let code = obtain_code(&app, &cookie, "spa").await;

    let response = app
        .server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", "spa"),
            ("code_verifier", "wrong-verifier-wrong-verifier-wrong-verifier-00"),
        ])
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorResponse = response.json();
    assert_eq!(body.error, "invalid_grant");
}

#[tokio::test]
async fn test_confidential_client_authentication() {
    let app = spawn_app(test_config(Vec::new())).await;
    let secret = app
        .register_client("backend", false, false)
        .await
        .expect("confidential clients get a secret");
    app.verified_user("ada@example.org").await;
    let cookie = app.login("ada@example.org").await;
    let code = obtain_code(&app, &cookie, "backend").await;

    let wrong = app
        .server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", "backend"),
            ("client_secret", "not-the-secret"),
            ("code_verifier", VERIFIER),
        ])
        .await;
    wrong.assert_status(StatusCode::UNAUTHORIZED);
    let body: ErrorResponse = wrong.json();
    assert_eq!(body.error, "invalid_client");

    // Client authentication happens before the code is consumed
    let right = app
        .server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", "backend"),
            ("client_secret", secret.as_str()),
            ("code_verifier", VERIFIER),
        ])
        .await;
    right.assert_status_ok();
}

#[tokio::test]
async fn test_refresh_rotation_and_revocation() {
    let app = spawn_app(test_config(Vec::new())).await;
    app.register_client("spa", true, false).await;
    app.verified_user("ada@example.org").await;
    let cookie = app.login("ada@example.org").await;
    let code = obtain_code(&app, &cookie, "spa").await;
    let first: TokenResponse = exchange(&app, "spa", &code).await.json();
    let first_refresh = first.refresh_token.clone().unwrap();

    // Narrowing is allowed
    let refreshed = app
        .server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", first_refresh.as_str()),
            ("client_id", "spa"),
            ("scope", "openid profile"),
        ])
        .await;
    refreshed.assert_status_ok();
    let second: TokenResponse = refreshed.json();
    assert_eq!(second.scope, "openid profile");
    assert_ne!(second.access_token, first.access_token);

    // The rotated pair is dead
    let old_access = app
        .server
        .get("/oauth2/userinfo")
        .add_header(header::AUTHORIZATION, bearer(&first.access_token))
        .await;
    old_access.assert_status(StatusCode::UNAUTHORIZED);
    let reuse = app
        .server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", first_refresh.as_str()),
            ("client_id", "spa"),
        ])
        .await;
    reuse.assert_status(StatusCode::BAD_REQUEST);

    // Widening is not
    let widen = app
        .server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", second.refresh_token.as_deref().unwrap()),
            ("client_id", "spa"),
            ("scope", "openid profile email"),
        ])
        .await;
    widen.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorResponse = widen.json();
    assert_eq!(body.error, "invalid_scope");

    let revoke = app
        .server
        .post("/oauth2/revoke")
        .form(&[("token", second.access_token.as_str())])
        .await;
    revoke.assert_status_ok();
    let after = app
        .server
        .get("/oauth2/userinfo")
        .add_header(header::AUTHORIZATION, bearer(&second.access_token))
        .await;
    after.assert_status(StatusCode::UNAUTHORIZED);

    // Unknown tokens are still a 200
    app.server
        .post("/oauth2/revoke")
        .form(&[("token", "does-not-exist")])
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_bearer_tokens_are_scoped_on_the_api() {
    let app = spawn_app(test_config(Vec::new())).await;
    app.register_client("spa", true, false).await;
    app.verified_user("ada@example.org").await;
    let cookie = app.login("ada@example.org").await;
    let code = obtain_code(&app, &cookie, "spa").await;
    let tokens: TokenResponse = exchange(&app, "spa", &code).await.json();

    let profile = app
        .server
        .get("/api/user/profile")
        .add_header(header::AUTHORIZATION, bearer(&tokens.access_token))
        .await;
    profile.assert_status_ok();

    // profile:write was not requested
    let update = app
        .server
        .patch("/api/user/profile")
        .add_header(header::AUTHORIZATION, bearer(&tokens.access_token))
        .json(&serde_json::json!({ "bio": "hi" }))
        .await;
    update.assert_status(StatusCode::FORBIDDEN);

    // Session-only endpoints refuse bearer tokens
    let settings = app
        .server
        .get("/api/user/settings")
        .add_header(header::AUTHORIZATION, bearer(&tokens.access_token))
        .await;
    settings.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_consent_details_require_a_session() {
    let app = spawn_app(test_config(Vec::new())).await;
    let response = app
        .server
        .get("/oauth2/consent")
        .add_query_param("consent_token", "garbage")
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

/// Signed-in user and a code issued to the first-party `website` client.
async fn first_party_code(app: &TestApp) -> (portfolio_server::entity::user::Model, String) {
    app.register_client("website", true, true).await;
    let user = app.verified_user("ada@example.org").await;
    let cookie = app.login("ada@example.org").await;
    let redirect = authorize(app, Some(&cookie), "website").await;
    assert!(redirect.as_str().starts_with(REDIRECT_URI));
    let code = query_param(&redirect, "code").expect("authorization code");
    (user, code)
}

#[tokio::test]
async fn test_token_request_must_repeat_explicit_redirect_uri() {
    let app = spawn_app(test_config(Vec::new())).await;
    let (_, code) = first_party_code(&app).await;

    let response = app
        .server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", "website"),
            ("code_verifier", VERIFIER),
        ])
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorResponse = response.json();
    assert_eq!(body.error, "invalid_grant");
    assert_eq!(body.error_description.as_deref(), Some("redirect_uri is required"));
}

#[tokio::test]
async fn test_defaulted_redirect_uri_may_be_omitted_at_token() {
    let app = spawn_app(test_config(Vec::new())).await;
    app.register_client("website", true, true).await;
    app.verified_user("ada@example.org").await;
    let cookie = app.login("ada@example.org").await;

    let response = app
        .server
        .get("/oauth2/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "website")
        .add_query_param("scope", "openid")
        .add_query_param("code_challenge", s256_challenge(VERIFIER))
        .add_query_param("code_challenge_method", "S256")
        .add_header(cookie_header(), cookie)
        .await;
    response.assert_status(StatusCode::SEE_OTHER);
    let redirect = location(&response);
    assert!(redirect.as_str().starts_with(REDIRECT_URI));
    let code = query_param(&redirect, "code").expect("authorization code");

    let response = app
        .server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", "website"),
            ("code_verifier", VERIFIER),
        ])
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn test_expired_code_is_rejected() {
    let mut config = test_config(Vec::new());
    config.oauth2.code_lifetime = -5;
    let app = spawn_app(config).await;
    let (_, code) = first_party_code(&app).await;

    let response = exchange(&app, "website", &code).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorResponse = response.json();
    assert_eq!(body.error, "invalid_grant");
    assert_eq!(body.error_description.as_deref(), Some("Authorization code expired"));
}

#[tokio::test]
async fn test_database_code_store_with_jwt_access_tokens() {
    let mut config = test_config(Vec::new());
    config.oauth2.code_store = CodeStoreKind::Database;
    config.oauth2.token_format = TokenFormat::Jwt;
    let app = spawn_app(config).await;
    let db = app.resources.db.as_ref();
    let (user, code) = first_party_code(&app).await;

    let stored = oauth2_authorization::Entity::find_by_id(code.as_str())
        .one(db)
        .await
        .expect("query")
        .expect("code persisted");
    assert!(stored.redirect_uri_explicit);
    assert_eq!(stored.user_id, user.id);

    let response = exchange(&app, "website", &code).await;
    response.assert_status_ok();
    let tokens: TokenResponse = response.json();
    assert_eq!(tokens.access_token.split('.').count(), 3);
    assert!(
        oauth2_authorization::Entity::find_by_id(code.as_str())
            .one(db)
            .await
            .expect("query")
            .is_none()
    );

    let info = app
        .server
        .get("/oauth2/userinfo")
        .add_header(header::AUTHORIZATION, bearer(&tokens.access_token))
        .await;
    info.assert_status_ok();
    let info: UserInfoResponse = info.json();
    assert_eq!(info.sub, user.id);

    let replay = exchange(&app, "website", &code).await;
    replay.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorResponse = replay.json();
    assert_eq!(body.error, "invalid_grant");

    // A signed token whose row is revoked no longer validates
    app.server
        .post("/oauth2/revoke")
        .form(&[("token", tokens.access_token.as_str())])
        .await
        .assert_status_ok();
    let after = app
        .server
        .get("/oauth2/userinfo")
        .add_header(header::AUTHORIZATION, bearer(&tokens.access_token))
        .await;
    after.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(
        after.header(header::WWW_AUTHENTICATE).to_str().unwrap(),
        r#"Bearer error="invalid_token""#
    );

    let tampered = format!("{}x", tokens.access_token);
    app.server
        .get("/oauth2/userinfo")
        .add_header(header::AUTHORIZATION, bearer(&tampered))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_client_secret_is_challenged() {
    let app = spawn_app(test_config(Vec::new())).await;
    app.register_client("backend", false, false).await;

    let response = app
        .server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", "whatever"),
            ("client_id", "backend"),
            ("client_secret", "wrong"),
        ])
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.header(header::WWW_AUTHENTICATE).to_str().unwrap(),
        r#"Basic realm="oauth2""#
    );
}
