//! Static file serving tests

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::{Duration, SystemTime};

use crate::helpers::*;
use reqwest::StatusCode;

#[tokio::test]
async fn test_serve_text_file() {
    let server = TestServer::new();
    let resp = server.get("/hello.txt").await;

    assert_status(&resp, StatusCode::OK);
    assert_header(&resp, "content-type", "text/plain");
    assert_header(&resp, "content-length", "14");
    assert_header(&resp, "accept-ranges", "bytes");
    assert_has_header(&resp, "last-modified");
    assert_eq!(resp.text().await.unwrap(), "Hello, world!\n");
}

#[tokio::test]
async fn test_content_type_from_table() {
    let server = TestServer::new();
    let resp = server.get("/styles.css").await;
    assert_header(&resp, "content-type", "text/css");
}

#[tokio::test]
async fn test_unknown_extension_uses_default_type() {
    let server = TestServer::new();
    fs::write(server.path("blob.unknownext"), "x").unwrap();
    let resp = server.get("/blob.unknownext").await;
    assert_header(&resp, "content-type", "text/plain");
}

#[tokio::test]
async fn test_binary_file_intact() {
    let server = TestServer::new();
    let resp = server.get("/data.bin").await;
    let body = resp.bytes().await.unwrap();
    assert_eq!(body.to_vec(), (0u8..=255).collect::<Vec<u8>>());
}

#[tokio::test]
async fn test_empty_file() {
    let server = TestServer::new();
    let resp = server.get("/empty.txt").await;
    assert_status(&resp, StatusCode::OK);
    assert_header(&resp, "content-length", "0");
}

#[tokio::test]
async fn test_static_file_not_found() {
    let server = TestServer::new();
    let resp = server.get("/nonexistent.css").await;
    assert_status(&resp, StatusCode::NOT_FOUND);
    assert_header_starts_with(&resp, "content-type", "text/html");
}

#[tokio::test]
async fn test_unreadable_file_forbidden() {
    if unsafe { libc::geteuid() } == 0 {
        return;
    }
    let server = TestServer::new();
    let path = server.path("secret.txt");
    fs::write(&path, "hidden").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o000)).unwrap();

    let resp = server.get("/secret.txt").await;
    assert_status(&resp, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_percent_encoded_path() {
    let server = TestServer::new();
    fs::write(server.path("with space.txt"), "spaced").unwrap();
    let resp = server.get("/with%20space.txt").await;
    assert_status(&resp, StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "spaced");
}

#[tokio::test]
async fn test_query_string_ignored_for_files() {
    let server = TestServer::new();
    let resp = server.get("/hello.txt?v=2").await;
    assert_status(&resp, StatusCode::OK);
}

#[tokio::test]
async fn test_trailing_slash_on_file() {
    let server = TestServer::new();
    let resp = server.get("/hello.txt/").await;
    assert_status(&resp, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_directory_without_slash_redirects() {
    let server = TestServer::new();
    let resp = server.get("/docs?x=1").await;

    assert_status(&resp, StatusCode::MOVED_PERMANENTLY);
    let expected = format!("http://{}/docs/?x=1", server.addr());
    assert_header(&resp, "location", &expected);
}

#[test]
fn test_directory_traversal_protection() {
    let server = TestServer::new();

    // Sent raw; HTTP clients normalize dot segments away.
    for target in ["/../../../etc/passwd", "/%2e%2e/%2e%2e/etc/passwd", "/docs/../../etc/passwd"] {
        let req = format!("GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n", target);
        let resp = server.raw(req.as_bytes());
        assert!(
            resp.starts_with("HTTP/1.1 403") || resp.starts_with("HTTP/1.1 400"),
            "Expected 400 or 403 for {}, got: {}",
            target,
            resp.lines().next().unwrap_or("")
        );
        assert!(!resp.contains("root:"));
    }
}

#[test]
fn test_dot_segments_inside_root_resolve() {
    let server = TestServer::new();
    let resp = server.raw(b"GET /docs/../hello.txt HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    assert!(resp.starts_with("HTTP/1.1 200"), "got: {}", resp);
    assert!(resp.ends_with("Hello, world!\n"));
}

#[tokio::test]
async fn test_symlink_outside_root_followed() {
    let server = TestServer::new();
    let outside = server.aux.path().join("outside.txt");
    fs::write(&outside, "outside").unwrap();
    std::os::unix::fs::symlink(&outside, server.path("link.txt")).unwrap();

    // Only request paths are confined, not symlink targets.
    let resp = server.get("/link.txt").await;
    assert_status(&resp, StatusCode::OK);
}

#[tokio::test]
async fn test_byte_range() {
    let server = TestServer::new();
    let resp = server
        .get_with_headers("/data.bin", &[("range", "bytes=10-19")])
        .await;

    assert_status(&resp, StatusCode::PARTIAL_CONTENT);
    assert_header(&resp, "content-range", "bytes 10-19/256");
    assert_header(&resp, "content-length", "10");
    assert_eq!(resp.bytes().await.unwrap().to_vec(), (10u8..20).collect::<Vec<u8>>());
}

#[tokio::test]
async fn test_suffix_and_open_ranges() {
    let server = TestServer::new();

    let resp = server.get_with_headers("/data.bin", &[("range", "bytes=-6")]).await;
    assert_status(&resp, StatusCode::PARTIAL_CONTENT);
    assert_header(&resp, "content-range", "bytes 250-255/256");

    let resp = server.get_with_headers("/data.bin", &[("range", "bytes=200-")]).await;
    assert_status(&resp, StatusCode::PARTIAL_CONTENT);
    assert_header(&resp, "content-range", "bytes 200-255/256");

    let resp = server.get_with_headers("/data.bin", &[("range", "bytes=250-9999")]).await;
    assert_header(&resp, "content-range", "bytes 250-255/256");
}

#[tokio::test]
async fn test_unsatisfiable_range() {
    let server = TestServer::new();
    let resp = server.get_with_headers("/data.bin", &[("range", "bytes=256-")]).await;

    assert_status(&resp, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_header(&resp, "content-range", "bytes */256");
}

#[tokio::test]
async fn test_ignored_ranges_serve_full_file() {
    let server = TestServer::new();
    for range in ["bytes=0-1,5-6", "items=0-1", "bytes=9-3", "bytes=0-255"] {
        let resp = server.get_with_headers("/data.bin", &[("range", range)]).await;
        assert_status(&resp, StatusCode::OK);
        assert_header(&resp, "content-length", "256");
    }
}

#[tokio::test]
async fn test_if_modified_since() {
    let server = TestServer::new();
    let resp = server.get("/hello.txt").await;
    let last_modified = resp.headers()["last-modified"].to_str().unwrap().to_string();

    let resp = server
        .get_with_headers("/hello.txt", &[("if-modified-since", &last_modified)])
        .await;
    assert_status(&resp, StatusCode::NOT_MODIFIED);
    assert!(resp.bytes().await.unwrap().is_empty());

    let old = httpdate::fmt_http_date(SystemTime::now() - Duration::from_secs(86400 * 365));
    fs::write(server.path("hello.txt"), "Hello, world!\n").unwrap();
    let resp = server
        .get_with_headers("/hello.txt", &[("if-modified-since", &old)])
        .await;
    assert_status(&resp, StatusCode::OK);
}

#[tokio::test]
async fn test_bogus_if_modified_since_ignored() {
    let server = TestServer::new();
    let resp = server
        .get_with_headers("/hello.txt", &[("if-modified-since", "yesterday")])
        .await;
    assert_status(&resp, StatusCode::OK);
}

#[tokio::test]
async fn test_expires_headers() {
    let server = TestServer::with_config(|mut c| {
        c.server.expires.0 = Some(Duration::from_secs(3600));
        c
    });
    let resp = server.get("/hello.txt").await;
    assert_header(&resp, "cache-control", "max-age=3600");
    assert_has_header(&resp, "expires");
}
