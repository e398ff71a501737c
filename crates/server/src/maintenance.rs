//! Periodic removal of expired records.

use crate::AppResources;
use crate::config::CodeStoreKind;
use crate::oauth2::{AuthorizationCodeStore, DatabaseCodeStore};
use crate::oauth2::state::token_issuer;
use std::sync::Arc;
use std::time::Duration;

pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Rows removed by one cleanup pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub codes: u64,
    pub tokens: u64,
    pub sessions: u64,
    pub verifications: u64,
}

/// Run one pass. Failures are logged and the remaining steps still run.
#[tracing::instrument(skip_all)]
pub async fn run_cleanup(
    resources: &AppResources,
    codes: &dyn AuthorizationCodeStore,
) -> CleanupReport {
    fn log_err(what: &str, result: Result<u64, sea_orm::DbErr>) -> u64 {
        result.unwrap_or_else(|e| {
            tracing::warn!(error = %e, what, "Cleanup step failed");
            0
        })
    }

    let mut expired_codes = log_err("authorization codes", codes.purge_expired().await);
    // Rows left behind by an earlier deployment on the database store
    if resources.config.oauth2.code_store == CodeStoreKind::Memory {
        expired_codes += log_err(
            "stored authorization codes",
            DatabaseCodeStore::new(resources.db.clone())
                .purge_expired()
                .await,
        );
    }

    let report = CleanupReport {
        codes: expired_codes,
        tokens: log_err(
            "tokens",
            token_issuer(resources.db.clone(), &resources.config)
                .purge_stale()
                .await,
        ),
        sessions: log_err("sessions", resources.sessions().purge_expired().await),
        verifications: log_err(
            "verifications",
            resources.accounts().purge_stale_verifications().await,
        ),
    };

    if report != CleanupReport::default() {
        tracing::info!(
            codes = report.codes,
            tokens = report.tokens,
            sessions = report.sessions,
            verifications = report.verifications,
            "Removed expired records"
        );
    }
    report
}

/// Clean up every five minutes for the lifetime of the process.
pub fn spawn_cleanup_task(resources: AppResources, codes: Arc<dyn AuthorizationCodeStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            run_cleanup(&resources, codes.as_ref()).await;
        }
    });
}
