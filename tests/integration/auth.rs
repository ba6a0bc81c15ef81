//! Basic authentication tests

use crate::helpers::*;
use reqwest::StatusCode;

fn protected() -> TestServer {
    TestServer::with_config(|c| c.with_auth("admin", "s3cret"))
}

#[tokio::test]
async fn test_missing_credentials_challenged() {
    let server = protected();
    let resp = server.get("/hello.txt").await;

    assert_status(&resp, StatusCode::UNAUTHORIZED);
    assert_header(&resp, "www-authenticate", "Basic realm=\"webfs\"");
}

#[tokio::test]
async fn test_valid_credentials() {
    let server = protected();
    let resp = server
        .client
        .get(format!("{}/hello.txt", server.base_url))
        .basic_auth("admin", Some("s3cret"))
        .send()
        .await
        .unwrap();

    assert_status(&resp, StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "Hello, world!\n");
}

#[tokio::test]
async fn test_wrong_password() {
    let server = protected();
    let resp = server
        .client
        .get(format!("{}/hello.txt", server.base_url))
        .basic_auth("admin", Some("nope"))
        .send()
        .await
        .unwrap();

    assert_status(&resp, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_listings_protected() {
    let server = protected();
    let resp = server.get("/docs/").await;
    assert_status(&resp, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_cgi_sees_remote_user() {
    let server = TestServer::with_config(|c| c.with_auth("admin", "s3cret").with_cgi_prefix("/cgi-bin"));
    let resp = server
        .client
        .get(format!("{}/cgi-bin/env.sh", server.base_url))
        .basic_auth("admin", Some("s3cret"))
        .send()
        .await
        .unwrap();

    assert_status(&resp, StatusCode::OK);
    assert!(resp.text().await.unwrap().contains("user=admin"));
}
