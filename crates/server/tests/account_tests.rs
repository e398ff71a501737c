//! Registration, verification and session lifecycle.

mod common;

use axum::http::{StatusCode, header};
use common::*;
use portfolio_server::api::auth::{RegisterResponse, SessionResponse};
use portfolio_server::auth::AccountError;
use portfolio_server::entity::user;
use portfolio_server::error::ErrorResponse;
use sea_orm::EntityTrait;

#[tokio::test]
async fn test_register_verify_login_logout() {
    let app = spawn_app(test_config(Vec::new())).await;

    let response = app
        .server
        .post("/api/auth/register")
        .json(&serde_json::json!({
            "email": "  Ada@Example.org ",
            "password": PASSWORD,
            "name": "Ada",
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let registered: RegisterResponse = response.json();
    assert_eq!(registered.email, "ada@example.org");
    assert!(registered.verification_required);

    // Unverified accounts cannot sign in
    let early = app
        .server
        .post("/api/auth/login")
        .json(&serde_json::json!({ "email": "ada@example.org", "password": PASSWORD }))
        .await;
    early.assert_status(StatusCode::FORBIDDEN);

    let token = user::Entity::find_by_id(registered.user_id.as_str())
        .one(app.resources.db.as_ref())
        .await
        .unwrap()
        .and_then(|u| u.email_verification_token)
        .expect("verification token stored");
    let verify = app
        .server
        .get("/api/auth/verify-email")
        .add_query_param("token", &token)
        .await;
    verify.assert_status(StatusCode::SEE_OTHER);
    assert_eq!(
        verify.header(header::LOCATION).to_str().unwrap(),
        format!("{FRONTEND_URL}/login?verified=1")
    );

    // The link is single use
    let again = app
        .server
        .get("/api/auth/verify-email")
        .add_query_param("token", &token)
        .await;
    assert_eq!(
        again.header(header::LOCATION).to_str().unwrap(),
        format!("{FRONTEND_URL}/login?error=verification_failed")
    );

    let cookie = app.login("ada@example.org").await;
    let session = app
        .server
        .get("/api/auth/session")
        .add_header(cookie_header(), cookie.clone())
        .await;
    session.assert_status_ok();
    let session: SessionResponse = session.json();
    assert_eq!(session.user.email, "ada@example.org");
    assert_eq!(session.user.role, "user");

    let logout = app
        .server
        .post("/api/auth/logout")
        .add_header(cookie_header(), cookie.clone())
        .await;
    logout.assert_status(StatusCode::NO_CONTENT);
    assert!(
        logout
            .header(header::SET_COOKIE)
            .to_str()
            .unwrap()
            .contains("Max-Age=0")
    );

    let after = app
        .server
        .get("/api/auth/session")
        .add_header(cookie_header(), cookie)
        .await;
    after.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_rejects_bad_input_and_duplicates() {
    let app = spawn_app(test_config(Vec::new())).await;

    let short = app
        .server
        .post("/api/auth/register")
        .json(&serde_json::json!({ "email": "ada@example.org", "password": "short" }))
        .await;
    short.assert_status(StatusCode::BAD_REQUEST);

    let bad_email = app
        .server
        .post("/api/auth/register")
        .json(&serde_json::json!({ "email": "not-an-email", "password": PASSWORD }))
        .await;
    bad_email.assert_status(StatusCode::BAD_REQUEST);

    app.verified_user("ada@example.org").await;
    let duplicate = app
        .server
        .post("/api/auth/register")
        .json(&serde_json::json!({ "email": "ADA@example.org", "password": PASSWORD }))
        .await;
    duplicate.assert_status(StatusCode::CONFLICT);
    let body: ErrorResponse = duplicate.json();
    assert_eq!(body.error, "conflict");
}

#[tokio::test]
async fn test_wrong_password_is_unauthorized() {
    let app = spawn_app(test_config(Vec::new())).await;
    app.verified_user("ada@example.org").await;

    for (email, password) in [
        ("ada@example.org", "wrong password"),
        ("nobody@example.org", PASSWORD),
    ] {
        let response = app
            .server
            .post("/api/auth/login")
            .json(&serde_json::json!({ "email": email, "password": password }))
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn test_password_change_ends_other_sessions() {
    let app = spawn_app(test_config(Vec::new())).await;
    app.verified_user("ada@example.org").await;
    let laptop = app.login("ada@example.org").await;
    let phone = app.login("ada@example.org").await;

    let wrong = app
        .server
        .post("/api/user/password")
        .add_header(cookie_header(), laptop.clone())
        .json(&serde_json::json!({
            "current_password": "not it",
            "new_password": "a brand new password",
        }))
        .await;
    wrong.assert_status(StatusCode::UNAUTHORIZED);

    let changed = app
        .server
        .post("/api/user/password")
        .add_header(cookie_header(), laptop.clone())
        .json(&serde_json::json!({
            "current_password": PASSWORD,
            "new_password": "a brand new password",
        }))
        .await;
    changed.assert_status(StatusCode::NO_CONTENT);

    app.server
        .get("/api/auth/session")
        .add_header(cookie_header(), laptop)
        .await
        .assert_status_ok();
    app.server
        .get("/api/auth/session")
        .add_header(cookie_header(), phone)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let relogin = app
        .server
        .post("/api/auth/login")
        .json(&serde_json::json!({
            "email": "ada@example.org",
            "password": "a brand new password",
        }))
        .await;
    relogin.assert_status_ok();
}

#[tokio::test]
async fn test_delete_account() {
    let app = spawn_app(test_config(Vec::new())).await;
    let user = app.verified_user("ada@example.org").await;
    let cookie = app.login("ada@example.org").await;

    let response = app
        .server
        .delete("/api/user/account")
        .add_header(cookie_header(), cookie.clone())
        .await;
    response.assert_status(StatusCode::NO_CONTENT);

    let gone = user::Entity::find_by_id(user.id.as_str())
        .one(app.resources.db.as_ref())
        .await
        .unwrap();
    assert!(gone.is_none());
    app.server
        .get("/api/auth/session")
        .add_header(cookie_header(), cookie)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    // The address is free again
    app.server
        .post("/api/auth/register")
        .json(&serde_json::json!({ "email": "ada@example.org", "password": PASSWORD }))
        .await
        .assert_status(StatusCode::CREATED);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registration_never_fails_with_server_error() {
    let app = spawn_app(test_config(Vec::new())).await;
    let accounts = app.resources.accounts();

    for i in 0..10 {
        let email = format!("twin{i}@example.org");
        let (a, b) = tokio::join!(
            accounts.register(&email, PASSWORD, None),
            accounts.register(&email, PASSWORD, None)
        );
        for result in [a, b] {
            match result {
                Ok(registration) => assert_eq!(registration.user.email, email),
                Err(AccountError::EmailTaken) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
    }

    let rows = user::Entity::find()
        .all(app.resources.db.as_ref())
        .await
        .expect("users");
    assert_eq!(rows.len(), 10);
}
