//! Error page tests

use std::fs;

use crate::helpers::*;
use reqwest::StatusCode;

#[tokio::test]
async fn test_builtin_error_page() {
    let server = TestServer::new();
    let resp = server.get("/nope").await;

    assert_status(&resp, StatusCode::NOT_FOUND);
    assert_header_starts_with(&resp, "content-type", "text/html");
    assert_body_contains(resp, "404 Not Found").await;
}

#[tokio::test]
async fn test_custom_error_page() {
    let pages = tempfile::tempdir().unwrap();
    fs::write(pages.path().join("404.html"), "<p>custom missing</p>").unwrap();
    let dir = pages.path().to_path_buf();

    let server = TestServer::with_config(move |mut c| {
        c.server.error_pages_dir = Some(dir);
        c
    });

    let resp = server.get("/nope").await;
    assert_status(&resp, StatusCode::NOT_FOUND);
    assert_eq!(resp.text().await.unwrap(), "<p>custom missing</p>");

    // Codes without a custom page keep the built-in body.
    let resp = server
        .client
        .delete(format!("{}/nope", server.base_url))
        .send()
        .await
        .unwrap();
    assert_status(&resp, StatusCode::METHOD_NOT_ALLOWED);
    assert_body_contains(resp, "405 Method Not Allowed").await;
}
