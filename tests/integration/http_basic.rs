//! Protocol-level tests: methods, framing, keep-alive and pipelining

use std::io::Write;

use crate::helpers::*;
use reqwest::StatusCode;

#[tokio::test]
async fn test_get_root_serves_index() {
    let server = TestServer::new();
    let resp = server.get("/").await;

    assert_status(&resp, StatusCode::OK);
    assert_header_starts_with(&resp, "content-type", "text/html");
    assert_header_starts_with(&resp, "server", "tokio_webfs/");
    assert_has_header(&resp, "date");
    assert_body_contains(resp, "<h1>home</h1>").await;
}

#[tokio::test]
async fn test_head_has_no_body() {
    let server = TestServer::new();
    let resp = server
        .client
        .head(format!("{}/hello.txt", server.base_url))
        .send()
        .await
        .unwrap();

    assert_status(&resp, StatusCode::OK);
    assert_header(&resp, "content-length", "14");
    assert!(resp.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unsupported_method() {
    let server = TestServer::new();
    let resp = server
        .client
        .delete(format!("{}/hello.txt", server.base_url))
        .send()
        .await
        .unwrap();

    assert_status(&resp, StatusCode::METHOD_NOT_ALLOWED);
    assert_header(&resp, "allow", "GET, HEAD");
}

#[test]
fn test_malformed_request_line() {
    let server = TestServer::new();
    let resp = server.raw(b"NONSENSE\r\n\r\n");
    assert!(resp.starts_with("HTTP/1.1 400"), "got: {}", resp);
}

#[test]
fn test_unsupported_version() {
    let server = TestServer::new();
    let resp = server.raw(b"GET / HTTP/2.0\r\n\r\n");
    assert!(resp.starts_with("HTTP/1.1 505"), "got: {}", resp);
}

#[test]
fn test_oversized_header_block() {
    let server = TestServer::new();
    let mut req = b"GET / HTTP/1.1\r\nHost: localhost\r\nX-Filler: ".to_vec();
    req.extend(std::iter::repeat(b'a').take(9 * 1024));
    req.extend_from_slice(b"\r\n\r\n");
    let resp = server.raw(&req);
    assert!(resp.starts_with("HTTP/1.1 431"), "got: {}", resp);
}

#[test]
fn test_http10_closes_by_default() {
    let server = TestServer::new();
    let resp = server.raw(b"GET /hello.txt HTTP/1.0\r\n\r\n");
    assert!(resp.starts_with("HTTP/1.1 200"), "got: {}", resp);
    assert!(resp.to_ascii_lowercase().contains("connection: close"));
    assert!(resp.ends_with("Hello, world!\n"));
}

#[test]
fn test_keep_alive_serves_sequential_requests() {
    let server = TestServer::new();
    let mut stream = server.connect();

    for _ in 0..3 {
        stream
            .write_all(b"GET /hello.txt HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        let resp = read_response(&mut stream);
        assert!(resp.starts_with("HTTP/1.1 200"), "got: {}", resp);
        assert!(resp.ends_with("Hello, world!\n"));
    }
}

#[test]
fn test_pipelined_requests_answered_in_order() {
    let server = TestServer::new();
    let mut stream = server.connect();
    stream
        .write_all(
            b"GET /hello.txt HTTP/1.1\r\nHost: localhost\r\n\r\n\
              GET /docs/a.txt HTTP/1.1\r\nHost: localhost\r\n\r\n\
              GET /missing HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .unwrap();

    let first = read_response(&mut stream);
    let second = read_response(&mut stream);
    let third = read_to_close(&mut stream);

    assert!(first.ends_with("Hello, world!\n"), "got: {}", first);
    assert!(second.ends_with("alpha\n"), "got: {}", second);
    assert!(third.starts_with("HTTP/1.1 404"), "got: {}", third);
}

#[test]
fn test_small_request_body_discarded() {
    let server = TestServer::new();
    let mut stream = server.connect();
    stream
        .write_all(
            b"GET /hello.txt HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nabcde\
              GET /docs/a.txt HTTP/1.1\r\nHost: localhost\r\n\r\n",
        )
        .unwrap();

    assert!(read_response(&mut stream).ends_with("Hello, world!\n"));
    assert!(read_response(&mut stream).ends_with("alpha\n"));
}

#[test]
fn test_chunked_request_rejected() {
    let server = TestServer::new();
    let resp = server.raw(
        b"GET / HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n",
    );
    assert!(resp.starts_with("HTTP/1.1 400"), "got: {}", resp);
}

#[tokio::test]
async fn test_cors_header() {
    let server = TestServer::with_config(|mut c| {
        c.server.cors_origin = Some("*".into());
        c
    });
    let resp = server.get("/hello.txt").await;
    assert_header(&resp, "access-control-allow-origin", "*");
}
