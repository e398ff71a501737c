//! Backend of a portfolio website.
//!
//! Provides website accounts and sessions, an OAuth2 / OpenID Connect
//! authorization server for third-party applications, profile and settings
//! management, download tracking and a contact form.

use std::sync::Arc;

use lettre::{AsyncSmtpTransport, Tokio1Executor};
use sea_orm::DatabaseConnection;

use crate::auth::{AccountService, SessionStore};
use crate::config::AppConfig;

pub mod api;
pub mod auth;
pub mod config;
pub mod contact;
pub mod downloads;
pub mod email_templates;
pub mod entity;
pub mod error;
pub mod mail;
pub mod maintenance;
pub mod oauth2;
pub mod password;
pub mod users;
pub mod validation;

#[derive(Clone, Debug)]
pub struct AppResources {
    pub db: Arc<DatabaseConnection>,
    /// `None` when no SMTP server is configured
    pub mailer: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    pub config: Arc<AppConfig>,
}

impl AppResources {
    pub fn accounts(&self) -> AccountService {
        AccountService::new(self.db.clone(), self.config.auth.clone())
    }

    pub fn sessions(&self) -> SessionStore {
        SessionStore::new(self.db.clone(), &self.config.session)
    }
}
