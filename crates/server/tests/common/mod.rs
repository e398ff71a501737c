//! Shared fixtures for the HTTP integration tests.

#![allow(dead_code)]

use axum::http::{HeaderName, HeaderValue, header};
use axum_test::{TestResponse, TestServer};
use migration::{Migrator, MigratorTrait};
use portfolio_server::{
    AppResources,
    config::{
        AppConfig, AuthConfig, DownloadFile, DownloadSource, DownloadsConfig, OAuth2Config,
        SessionConfig,
    },
    entity::user,
    oauth2::{
        AuthorizationCodeStore, ClientRegistry, OAuth2State, clients::NewClient, state::code_store,
    },
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, Database, DatabaseConnection};
use std::sync::Arc;

pub const SECRET: &str = "test-secret-key-that-is-long-enough-000";
pub const PUBLIC_URL: &str = "http://auth.test";
pub const FRONTEND_URL: &str = "http://frontend.test";
pub const REDIRECT_URI: &str = "http://app.test/callback";
pub const PASSWORD: &str = "correct horse battery";

pub struct TestApp {
    pub server: TestServer,
    pub resources: AppResources,
    pub oauth: OAuth2State,
    pub codes: Arc<dyn AuthorizationCodeStore>,
}

pub fn test_config(downloads: Vec<DownloadFile>) -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        listen_addr: "127.0.0.1:0".into(),
        public_url: PUBLIC_URL.into(),
        frontend_url: FRONTEND_URL.into(),
        secret_key: SECRET.into(),
        smtp: None,
        contact_recipient: None,
        trusted_proxies: Vec::new(),
        session: SessionConfig {
            secure_cookie: false,
            ..SessionConfig::default()
        },
        oauth2: OAuth2Config::default(),
        auth: AuthConfig::default(),
        downloads: DownloadsConfig { files: downloads },
    }
}

pub fn external_file(slug: &str, url: &str) -> DownloadFile {
    DownloadFile {
        slug: slug.into(),
        title: format!("{slug} title"),
        description: None,
        source: DownloadSource::Url(url.into()),
    }
}

pub async fn migrated_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.expect("connect");
    Migrator::up(&db, None).await.expect("migrate");
    db
}

pub async fn spawn_app(config: AppConfig) -> TestApp {
    let db = Arc::new(migrated_db().await);
    let config = Arc::new(config);
    let codes = code_store(db.clone(), config.oauth2.code_store);
    let oauth = OAuth2State::new(db.clone(), &config, codes.clone());
    let resources = AppResources {
        db,
        mailer: None,
        config,
    };
    let router = portfolio_server::api::build_router(resources.clone(), oauth.clone());
    let server = TestServer::new(router).expect("test server");
    TestApp {
        server,
        resources,
        oauth,
        codes,
    }
}

impl TestApp {
    /// Register and verify an account.
    pub async fn verified_user(&self, email: &str) -> user::Model {
        let accounts = self.resources.accounts();
        let registration = accounts
            .register(email, PASSWORD, Some("Test User"))
            .await
            .expect("register");
        accounts
            .verify_email(&registration.verification_token)
            .await
            .expect("verify")
    }

    pub async fn make_admin(&self, user: user::Model) -> user::Model {
        let mut active: user::ActiveModel = user.into();
        active.role = Set(user::ROLE_ADMIN.to_string());
        active
            .update(self.resources.db.as_ref())
            .await
            .expect("promote")
    }

    /// Log in through the API and return the `Cookie` header value.
    pub async fn login(&self, email: &str) -> HeaderValue {
        let response = self
            .server
            .post("/api/auth/login")
            .json(&serde_json::json!({ "email": email, "password": PASSWORD }))
            .await;
        response.assert_status_ok();
        session_cookie(&response)
    }

    pub async fn register_client(&self, id: &str, is_public: bool, skip_consent: bool) -> Option<String> {
        let (_, secret) = ClientRegistry::new(self.resources.db.clone())
            .create(NewClient {
                id: Some(id.into()),
                name: format!("{id} app"),
                redirect_uris: vec![REDIRECT_URI.into()],
                scopes: "openid profile email profile:write downloads:read".into(),
                grant_types: "authorization_code refresh_token".into(),
                is_public,
                skip_consent,
            })
            .await
            .expect("create client");
        secret
    }
}

/// Turn a `Set-Cookie` response header into a `Cookie` request header value.
pub fn session_cookie(response: &TestResponse) -> HeaderValue {
    let set_cookie = response.header(header::SET_COOKIE);
    let raw = set_cookie.to_str().expect("ascii cookie");
    let pair = raw.split(';').next().expect("cookie pair");
    HeaderValue::from_str(pair).expect("cookie header")
}

pub fn cookie_header() -> HeaderName {
    header::COOKIE
}

pub fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {token}")).expect("bearer header")
}

pub fn location(response: &TestResponse) -> url::Url {
    let value = response.header(header::LOCATION);
    url::Url::parse(value.to_str().expect("ascii location")).expect("absolute location")
}

pub fn query_param(url: &url::Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
