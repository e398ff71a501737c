//! Download tracking: client identification, event recording and statistics.

use crate::config::{DownloadsConfig, IpNet};
use crate::entity::{download_counter, download_event};
use axum::http::HeaderMap;
use blake3::Hasher;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, FromQueryResult,
    QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
    sea_query::{Expr, OnConflict},
};
use serde::Serialize;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use time::{Duration, OffsetDateTime};
use utoipa::ToSchema;

pub const HISTORY_LIMIT: u64 = 100;
const MAX_HEADER_LEN: usize = 512;

/// Address of the requesting client.
///
/// `X-Forwarded-For` is only honoured when the direct peer is a trusted proxy.
/// The chain is walked right to left and the first untrusted hop is the client.
pub fn client_ip(peer: Option<SocketAddr>, headers: &HeaderMap, trusted: &[IpNet]) -> Option<IpAddr> {
    let peer_ip = peer?.ip();
    let is_trusted = |ip: &IpAddr| trusted.iter().any(|net| net.contains(ip));

    if !is_trusted(&peer_ip) {
        return Some(peer_ip);
    }

    let forwarded: Vec<IpAddr> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    forwarded
        .iter()
        .rev()
        .find(|ip| !is_trusted(ip))
        .or_else(|| forwarded.first())
        .copied()
        .or(Some(peer_ip))
}

/// Salted BLAKE3 digest of an address, so unique visitors can be counted
/// without storing addresses.
pub fn hash_ip(salt: &str, ip: &IpAddr) -> String {
    let mut hasher = Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"::");
    hasher.update(ip.to_string().as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Header value truncated to a sane length.
pub fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.chars().take(MAX_HEADER_LEN).collect::<String>())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone)]
pub struct NewDownload {
    pub file_slug: String,
    pub user_id: Option<String>,
    pub ip_hash: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

/// Store the event and bump the file's counter in one transaction.
#[tracing::instrument(skip(db, download), fields(slug = %download.file_slug))]
pub async fn record_download(db: &DatabaseConnection, download: NewDownload) -> Result<(), DbErr> {
    let now = OffsetDateTime::now_utc();
    let txn = db.begin().await?;

    download_event::Entity::insert(download_event::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        file_slug: Set(download.file_slug.clone()),
        user_id: Set(download.user_id),
        ip_hash: Set(download.ip_hash),
        user_agent: Set(download.user_agent),
        referer: Set(download.referer),
        created_at: Set(now),
    })
    .exec_without_returning(&txn)
    .await?;

    // INSERT .. ON CONFLICT DO UPDATE SET total = download_counter.total + 1
    download_counter::Entity::insert(download_counter::ActiveModel {
        file_slug: Set(download.file_slug),
        total: Set(1),
        last_downloaded_at: Set(Some(now)),
    })
    .on_conflict(
        OnConflict::column(download_counter::Column::FileSlug)
            .value(
                download_counter::Column::Total,
                Expr::col((download_counter::Entity, download_counter::Column::Total)).add(1),
            )
            .update_column(download_counter::Column::LastDownloadedAt)
            .to_owned(),
    )
    .exec_without_returning(&txn)
    .await?;

    txn.commit().await
}

/// Total downloads per slug.
pub async fn totals(db: &DatabaseConnection) -> Result<HashMap<String, i64>, DbErr> {
    Ok(download_counter::Entity::find()
        .all(db)
        .await?
        .into_iter()
        .map(|c| (c.file_slug, c.total))
        .collect())
}

/// The user's most recent downloads, newest first.
pub async fn user_history(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<Vec<download_event::Model>, DbErr> {
    download_event::Entity::find()
        .filter(download_event::Column::UserId.eq(user_id))
        .order_by_desc(download_event::Column::CreatedAt)
        .limit(HISTORY_LIMIT)
        .all(db)
        .await
}

#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct FileStats {
    pub slug: String,
    pub title: String,
    /// All-time downloads
    pub total: i64,
    /// Downloads inside the requested window
    pub recent: i64,
    /// Distinct visitors inside the requested window
    pub unique_visitors: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_downloaded_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct DownloadStats {
    pub days: i64,
    pub total: i64,
    pub recent: i64,
    pub unique_visitors: i64,
    pub files: Vec<FileStats>,
}

#[derive(Debug, FromQueryResult)]
struct WindowRow {
    file_slug: String,
    downloads: i64,
    unique_visitors: i64,
}

/// Aggregate statistics for catalog files over the last `days` days.
#[tracing::instrument(skip(db, catalog))]
pub async fn stats(
    db: &DatabaseConnection,
    catalog: &DownloadsConfig,
    days: i64,
) -> Result<DownloadStats, DbErr> {
    let since = OffsetDateTime::now_utc() - Duration::days(days);

    let counters: HashMap<String, download_counter::Model> = download_counter::Entity::find()
        .all(db)
        .await?
        .into_iter()
        .map(|c| (c.file_slug.clone(), c))
        .collect();

    let window: HashMap<String, WindowRow> = download_event::Entity::find()
        .select_only()
        .column(download_event::Column::FileSlug)
        .column_as(Expr::cust("COUNT(*)"), "downloads")
        .column_as(Expr::cust("COUNT(DISTINCT ip_hash)"), "unique_visitors")
        .filter(download_event::Column::CreatedAt.gte(since))
        .group_by(download_event::Column::FileSlug)
        .into_model::<WindowRow>()
        .all(db)
        .await?
        .into_iter()
        .map(|r| (r.file_slug.clone(), r))
        .collect();

    let unique_visitors: Option<i64> = download_event::Entity::find()
        .select_only()
        .column_as(Expr::cust("COUNT(DISTINCT ip_hash)"), "unique_visitors")
        .filter(download_event::Column::CreatedAt.gte(since))
        .filter(
            download_event::Column::FileSlug
                .is_in(catalog.files.iter().map(|f| f.slug.as_str())),
        )
        .into_tuple()
        .one(db)
        .await?;

    let files: Vec<FileStats> = catalog
        .files
        .iter()
        .map(|file| {
            let counter = counters.get(&file.slug);
            let recent = window.get(&file.slug);
            FileStats {
                slug: file.slug.clone(),
                title: file.title.clone(),
                total: counter.map(|c| c.total).unwrap_or(0),
                recent: recent.map(|r| r.downloads).unwrap_or(0),
                unique_visitors: recent.map(|r| r.unique_visitors).unwrap_or(0),
                last_downloaded_at: counter.and_then(|c| c.last_downloaded_at),
            }
        })
        .collect();

    Ok(DownloadStats {
        days,
        total: files.iter().map(|f| f.total).sum(),
        recent: files.iter().map(|f| f.recent).sum(),
        unique_visitors: unique_visitors.unwrap_or(0),
        files,
    })
}
