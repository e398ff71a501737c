//! Shared state of the OAuth2 authorization server.

use crate::auth::SessionStore;
use crate::config::{AppConfig, CodeStoreKind};
use crate::oauth2::clients::ClientRegistry;
use crate::oauth2::codes::{AuthorizationCodeStore, DatabaseCodeStore, MemoryCodeStore};
use crate::oauth2::tokens::TokenIssuer;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Everything the protocol endpoints need.
#[derive(Clone)]
pub struct OAuth2State {
    pub db: Arc<DatabaseConnection>,
    pub clients: ClientRegistry,
    pub codes: Arc<dyn AuthorizationCodeStore>,
    pub tokens: TokenIssuer,
    pub sessions: SessionStore,
    /// Base URL for the OAuth2 server (used for issuer in tokens)
    pub issuer_url: String,
    /// Hosts the login and consent pages
    pub frontend_url: String,
    /// Signs consent tokens
    pub secret: String,
    /// Authorization code lifetime in seconds
    pub code_lifetime: i64,
    pub require_pkce_for_public_clients: bool,
}

impl OAuth2State {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        codes: Arc<dyn AuthorizationCodeStore>,
    ) -> Self {
        Self {
            clients: ClientRegistry::new(db.clone()),
            tokens: token_issuer(db.clone(), config),
            sessions: SessionStore::new(db.clone(), &config.session),
            db,
            codes,
            issuer_url: config.issuer().to_string(),
            frontend_url: config.frontend().to_string(),
            secret: config.secret_key.clone(),
            code_lifetime: config.oauth2.code_lifetime,
            require_pkce_for_public_clients: config.oauth2.require_pkce_for_public_clients,
        }
    }
}

/// Build the configured authorization code store.
pub fn code_store(db: Arc<DatabaseConnection>, kind: CodeStoreKind) -> Arc<dyn AuthorizationCodeStore> {
    match kind {
        CodeStoreKind::Memory => Arc::new(MemoryCodeStore::new()),
        CodeStoreKind::Database => Arc::new(DatabaseCodeStore::new(db)),
    }
}

pub fn token_issuer(db: Arc<DatabaseConnection>, config: &AppConfig) -> TokenIssuer {
    TokenIssuer::new(
        db,
        config.oauth2.token_format,
        config.issuer(),
        &config.secret_key,
        config.oauth2.access_token_lifetime,
        config.oauth2.refresh_token_lifetime,
    )
}
