//! Directory index and listing tests

use std::fs::{self, File};
use std::time::{Duration, SystemTime};

use crate::helpers::*;
use reqwest::StatusCode;

#[tokio::test]
async fn test_listing_without_index() {
    let server = TestServer::new();
    let resp = server.get("/docs/").await;

    assert_status(&resp, StatusCode::OK);
    assert_header_starts_with(&resp, "content-type", "text/html");
    let body = resp.text().await.unwrap();
    assert!(body.contains("Index of /docs/"));
    assert!(body.contains("href=\"a.txt\""));
    assert!(body.contains("href=\"b%20dir/\""));
    assert!(body.contains("href=\"../\""));
}

#[tokio::test]
async fn test_listing_disabled() {
    let server = TestServer::with_config(|c| c.with_dir_listing(false));
    let resp = server.get("/docs/").await;
    assert_status(&resp, StatusCode::FORBIDDEN);

    // Index files are still served.
    let resp = server.get("/").await;
    assert_status(&resp, StatusCode::OK);
}

#[tokio::test]
async fn test_custom_index_file() {
    let server = TestServer::with_config(|c| c.with_index_file("a.txt"));
    let resp = server.get("/docs/").await;
    assert_status(&resp, StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "alpha\n");
}

#[tokio::test]
async fn test_unreadable_index_is_forbidden() {
    if unsafe { libc::geteuid() } == 0 {
        return;
    }
    use std::os::unix::fs::PermissionsExt;

    let server = TestServer::new();
    let index = server.path("docs/index.html");
    fs::write(&index, "locked").unwrap();
    fs::set_permissions(&index, fs::Permissions::from_mode(0o000)).unwrap();

    let resp = server.get("/docs/").await;
    assert_status(&resp, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_listing_refreshes_when_directory_changes() {
    let server = TestServer::with_config(|c| c.with_dir_cache(16, Some(Duration::from_secs(3600))));

    let body = server.get("/docs/").await.text().await.unwrap();
    assert!(!body.contains("new.txt"));

    fs::write(server.path("docs/new.txt"), "new").unwrap();
    // Push the directory mtime forward so the change is visible even on
    // filesystems with coarse timestamps.
    File::open(server.path("docs"))
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(5))
        .unwrap();

    let body = server.get("/docs/").await.text().await.unwrap();
    assert!(body.contains("new.txt"));
}

#[tokio::test]
async fn test_listing_escapes_names() {
    let server = TestServer::new();
    fs::write(server.path("docs/<b>.txt"), "x").unwrap();
    let body = server.get("/docs/").await.text().await.unwrap();
    assert!(body.contains("&lt;b&gt;.txt"));
    assert!(!body.contains("<b>.txt"));
}
