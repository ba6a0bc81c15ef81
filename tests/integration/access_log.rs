//! Access log tests

use std::fs;

use crate::helpers::*;
use tokio_webfs::config::AccessLogTarget;

#[tokio::test]
async fn test_requests_logged_in_common_format() {
    let logs = tempfile::tempdir().unwrap();
    let log_path = logs.path().join("access.log");
    let target = AccessLogTarget::File(log_path.clone());

    let mut server = TestServer::with_config(move |c| c.with_access_log(target));
    server.get("/hello.txt").await;
    server.get("/nope").await;
    server.stop();

    let log = fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 2, "log: {}", log);

    assert!(lines[0].starts_with("127.0.0.1 - - ["), "line: {}", lines[0]);
    assert!(lines[0].ends_with("\"GET /hello.txt HTTP/1.1\" 200 14"), "line: {}", lines[0]);
    assert!(lines[1].contains("\"GET /nope HTTP/1.1\" 404 "), "line: {}", lines[1]);
}

#[tokio::test]
async fn test_authenticated_user_logged() {
    let logs = tempfile::tempdir().unwrap();
    let log_path = logs.path().join("access.log");
    let target = AccessLogTarget::File(log_path.clone());

    let mut server = TestServer::with_config(move |c| c.with_access_log(target).with_auth("admin", "pw"));
    server
        .client
        .get(format!("{}/hello.txt", server.base_url))
        .basic_auth("admin", Some("pw"))
        .send()
        .await
        .unwrap();
    server.stop();

    let log = fs::read_to_string(&log_path).unwrap();
    assert!(log.starts_with("127.0.0.1 - admin ["), "log: {}", log);
}
