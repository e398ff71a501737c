//! Download tracking, admin statistics, client management and the contact form.

mod common;

use axum::http::{HeaderValue, StatusCode, header};
use common::*;
use portfolio_server::api::admin::{ClientResponse, CreatedClientResponse};
use portfolio_server::api::downloads::DownloadEntry;
use portfolio_server::api::user::DownloadHistoryEntry;
use portfolio_server::config::{DownloadFile, DownloadSource};
use portfolio_server::downloads::{self, NewDownload};
use portfolio_server::entity::contact_message;
use sea_orm::EntityTrait;
use std::io::Write;

struct Catalog {
    _dir: tempfile::TempDir,
    files: Vec<DownloadFile>,
}

fn catalog() -> Catalog {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("resume.pdf");
    let mut file = std::fs::File::create(&path).expect("create file");
    file.write_all(b"%PDF-1.4 test").expect("write file");

    let files = vec![
        DownloadFile {
            slug: "resume".into(),
            title: "Resume".into(),
            description: Some("One page".into()),
            source: DownloadSource::Path(path.to_string_lossy().into_owned()),
        },
        external_file("talk", "https://cdn.example.org/talk.mp4"),
        DownloadFile {
            slug: "missing".into(),
            title: "Missing".into(),
            description: None,
            source: DownloadSource::Path(dir.path().join("nope.zip").to_string_lossy().into_owned()),
        },
    ];
    Catalog { _dir: dir, files }
}

#[tokio::test]
async fn test_download_catalog_and_tracking() {
    let catalog = catalog();
    let app = spawn_app(test_config(catalog.files.clone())).await;

    let entries: Vec<DownloadEntry> = app.server.get("/api/downloads").await.json();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.downloads == 0));
    assert!(entries.iter().any(|e| e.slug == "talk" && e.external));

    let file = app
        .server
        .get("/api/downloads/resume")
        .add_header(header::USER_AGENT, axum::http::HeaderValue::from_static("tests"))
        .await;
    file.assert_status_ok();
    assert_eq!(&file.as_bytes()[..], b"%PDF-1.4 test");
    assert_eq!(
        file.header(header::CONTENT_DISPOSITION).to_str().unwrap(),
        "attachment; filename=\"resume.pdf\""
    );

    let redirect = app.server.get("/api/downloads/talk").await;
    redirect.assert_status(StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        redirect.header(header::LOCATION).to_str().unwrap(),
        "https://cdn.example.org/talk.mp4"
    );
    app.server.get("/api/downloads/talk").await;

    app.server
        .get("/api/downloads/unknown")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    app.server
        .get("/api/downloads/missing")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let entries: Vec<DownloadEntry> = app.server.get("/api/downloads").await.json();
    let count = |slug: &str| entries.iter().find(|e| e.slug == slug).map(|e| e.downloads);
    assert_eq!(count("resume"), Some(1));
    assert_eq!(count("talk"), Some(2));
    assert_eq!(count("missing"), Some(0));
}

#[tokio::test]
async fn test_signed_in_downloads_appear_in_history() {
    let catalog = catalog();
    let app = spawn_app(test_config(catalog.files.clone())).await;
    app.verified_user("ada@example.org").await;
    let cookie = app.login("ada@example.org").await;

    app.server.get("/api/downloads/talk").await;
    app.server
        .get("/api/downloads/resume")
        .add_header(cookie_header(), cookie.clone())
        .await
        .assert_status_ok();

    let history: Vec<DownloadHistoryEntry> = app
        .server
        .get("/api/user/downloads")
        .add_header(cookie_header(), cookie)
        .await
        .json();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].file_slug, "resume");
}

#[tokio::test]
async fn test_admin_download_stats() {
    let catalog = catalog();
    let app = spawn_app(test_config(catalog.files.clone())).await;
    let admin = app.verified_user("admin@example.org").await;
    app.make_admin(admin).await;
    app.verified_user("ada@example.org").await;
    let admin = app.login("admin@example.org").await;
    let ada = app.login("ada@example.org").await;

    app.server.get("/api/downloads/talk").await;
    app.server.get("/api/downloads/talk").await;

    app.server
        .get("/api/admin/downloads/stats")
        .add_header(cookie_header(), ada)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let response = app
        .server
        .get("/api/admin/downloads/stats")
        .add_query_param("days", 7)
        .add_header(cookie_header(), admin)
        .await;
    response.assert_status_ok();
    let stats: serde_json::Value = response.json();
    assert_eq!(stats["days"], 7);
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["recent"], 2);
    let talk = stats["files"]
        .as_array()
        .and_then(|files| files.iter().find(|f| f["slug"] == "talk"))
        .expect("talk stats");
    assert_eq!(talk["total"], 2);
}

#[tokio::test]
async fn test_stats_cover_only_catalog_files() {
    let catalog = catalog();
    let config = test_config(catalog.files.clone());
    let downloads_config = config.downloads.clone();
    let app = spawn_app(config).await;
    let db = app.resources.db.as_ref();

    for (slug, visitor) in [("resume", "a"), ("talk", "b"), ("retired-slides", "c")] {
        downloads::record_download(
            db,
            NewDownload {
                file_slug: slug.into(),
                user_id: None,
                ip_hash: Some(visitor.into()),
                user_agent: None,
                referer: None,
            },
        )
        .await
        .expect("record");
    }

    let stats = downloads::stats(db, &downloads_config, 30).await.expect("stats");
    assert_eq!(stats.total, 2);
    assert_eq!(stats.recent, 2);
    assert_eq!(stats.unique_visitors, 2);
    assert!(stats.files.iter().all(|f| f.slug != "retired-slides"));
}

#[tokio::test]
async fn test_admin_client_management() {
    let app = spawn_app(test_config(Vec::new())).await;
    let admin = app.verified_user("admin@example.org").await;
    app.make_admin(admin).await;
    let cookie = app.login("admin@example.org").await;

    let created = app
        .server
        .post("/api/admin/clients")
        .add_header(cookie_header(), cookie.clone())
        .json(&serde_json::json!({
            "client_id": "blog",
            "name": "Blog",
            "redirect_uris": [REDIRECT_URI],
        }))
        .await;
    created.assert_status(StatusCode::CREATED);
    let created: CreatedClientResponse = created.json();
    assert_eq!(created.client.client_id, "blog");
    assert!(created.client_secret.is_some());

    app.server
        .post("/api/admin/clients")
        .add_header(cookie_header(), cookie.clone())
        .json(&serde_json::json!({
            "client_id": "blog",
            "name": "Blog again",
            "redirect_uris": [REDIRECT_URI],
        }))
        .await
        .assert_status(StatusCode::CONFLICT);

    app.server
        .post("/api/admin/clients")
        .add_header(cookie_header(), cookie.clone())
        .json(&serde_json::json!({
            "name": "Bad",
            "redirect_uris": ["https://app.example/cb#frag"],
        }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let clients: Vec<ClientResponse> = app
        .server
        .get("/api/admin/clients")
        .add_header(cookie_header(), cookie.clone())
        .await
        .json();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].redirect_uris, vec![REDIRECT_URI.to_string()]);

    app.server
        .delete("/api/admin/clients/blog")
        .add_header(cookie_header(), cookie.clone())
        .await
        .assert_status(StatusCode::NO_CONTENT);
    app.server
        .delete("/api/admin/clients/blog")
        .add_header(cookie_header(), cookie)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_contact_form() {
    let app = spawn_app(test_config(Vec::new())).await;

    app.server
        .post("/api/contact")
        .json(&serde_json::json!({ "name": "", "email": "ada@example.org", "message": "hi" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let response = app
        .server
        .post("/api/contact")
        .json(&serde_json::json!({
            "name": "Ada",
            "email": "Ada@Example.org",
            "message": "Loved the talk",
        }))
        .await;
    response.assert_status(StatusCode::CREATED);

    let stored = contact_message::Entity::find()
        .all(app.resources.db.as_ref())
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].email, "ada@example.org");
}

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app(test_config(Vec::new())).await;
    let response = app.server.get("/healthz").await;
    response.assert_status_ok();
    response.assert_text("ok");
}

#[tokio::test]
async fn test_cors_allows_credentials_from_the_frontend_only() {
    let app = spawn_app(test_config(Vec::new())).await;

    let response = app
        .server
        .get("/healthz")
        .add_header(header::ORIGIN, HeaderValue::from_static(FRONTEND_URL))
        .await;
    response.assert_status_ok();
    assert_eq!(
        response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN).to_str().unwrap(),
        FRONTEND_URL
    );
    assert_eq!(
        response
            .header(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .to_str()
            .unwrap(),
        "true"
    );

    let foreign = app
        .server
        .get("/healthz")
        .add_header(header::ORIGIN, HeaderValue::from_static("http://evil.test"))
        .await;
    foreign.assert_status_ok();
    assert!(
        foreign
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );
}
