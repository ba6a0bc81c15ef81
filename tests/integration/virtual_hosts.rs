//! Virtual host tests

use std::fs;

use crate::helpers::*;
use reqwest::StatusCode;
use tempfile::TempDir;

fn vhost_server() -> TestServer {
    let root = TempDir::new().unwrap();
    populate(root.path());
    fs::create_dir(root.path().join("example.com")).unwrap();
    fs::write(root.path().join("example.com/hello.txt"), "from example.com\n").unwrap();
    fs::create_dir(root.path().join("other.test")).unwrap();
    fs::write(root.path().join("other.test/hello.txt"), "from other.test\n").unwrap();
    TestServer::start(root, |c| c.with_virtual_hosts(true))
}

#[tokio::test]
async fn test_host_selects_subdirectory() {
    let server = vhost_server();

    let resp = server.get_with_headers("/hello.txt", &[("host", "example.com")]).await;
    assert_status(&resp, StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "from example.com\n");

    let resp = server.get_with_headers("/hello.txt", &[("host", "OTHER.test:8080")]).await;
    assert_eq!(resp.text().await.unwrap(), "from other.test\n");
}

#[tokio::test]
async fn test_unknown_host_uses_document_root() {
    let server = vhost_server();
    let resp = server.get_with_headers("/hello.txt", &[("host", "unknown.org")]).await;
    assert_eq!(resp.text().await.unwrap(), "Hello, world!\n");
}

#[test]
fn test_absolute_form_target_selects_host() {
    let server = vhost_server();
    let resp = server.raw(
        b"GET http://example.com/hello.txt HTTP/1.1\r\nHost: ignored.org\r\nConnection: close\r\n\r\n",
    );
    assert!(resp.ends_with("from example.com\n"), "got: {}", resp);
}

#[test]
fn test_traversal_out_of_virtual_host() {
    let server = vhost_server();
    let resp = server.raw(
        b"GET /../hello.txt HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n",
    );
    assert!(resp.starts_with("HTTP/1.1 403"), "got: {}", resp);
}
