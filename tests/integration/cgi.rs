//! CGI execution tests

use std::time::{Duration, Instant};

use crate::helpers::*;
use reqwest::StatusCode;

fn cgi_server() -> TestServer {
    TestServer::with_config(|c| c.with_cgi_prefix("/cgi-bin"))
}

#[tokio::test]
async fn test_script_output() {
    let server = cgi_server();
    let resp = server.get("/cgi-bin/env.sh/extra/path?a=1&b=%20").await;

    assert_status(&resp, StatusCode::OK);
    assert_header(&resp, "content-type", "text/plain");
    assert_header(&resp, "connection", "close");
    let body = resp.text().await.unwrap();
    assert!(body.contains("query=a=1&b=%20"), "body: {}", body);
    assert!(body.contains("info=/extra/path"), "body: {}", body);
    assert!(body.contains("method=GET"), "body: {}", body);
}

#[tokio::test]
async fn test_status_and_location_headers() {
    let server = cgi_server();
    install_script(
        server.root.path(),
        "cgi-bin/missing.sh",
        "#!/bin/sh\nprintf 'Status: 404 Not Here\\r\\nContent-Type: text/plain\\r\\n\\r\\ngone'\n",
    );
    install_script(
        server.root.path(),
        "cgi-bin/redirect.sh",
        "#!/bin/sh\nprintf 'Location: /hello.txt\\r\\n\\r\\n'\n",
    );

    let resp = server.get("/cgi-bin/missing.sh").await;
    assert_status(&resp, StatusCode::NOT_FOUND);
    assert_eq!(resp.text().await.unwrap(), "gone");

    let resp = server.get("/cgi-bin/redirect.sh").await;
    assert_status(&resp, StatusCode::FOUND);
    assert_header(&resp, "location", "/hello.txt");
}

#[tokio::test]
async fn test_post_rejected() {
    let server = cgi_server();
    let resp = server
        .client
        .post(format!("{}/cgi-bin/env.sh", server.base_url))
        .body("x=1")
        .send()
        .await
        .unwrap();
    assert_status(&resp, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_head_rejected_for_scripts() {
    let server = cgi_server();
    let resp = server
        .client
        .head(format!("{}/cgi-bin/env.sh", server.base_url))
        .send()
        .await
        .unwrap();
    assert_status(&resp, StatusCode::METHOD_NOT_ALLOWED);
    assert_header(&resp, "allow", "GET");
}

#[tokio::test]
async fn test_non_executable_forbidden() {
    let server = cgi_server();
    std::fs::write(server.path("cgi-bin/plain.txt"), "not a script").unwrap();
    let resp = server.get("/cgi-bin/plain.txt").await;
    assert_status(&resp, StatusCode::FORBIDDEN);

    let resp = server.get("/cgi-bin/").await;
    assert_status(&resp, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_missing_script() {
    let server = cgi_server();
    let resp = server.get("/cgi-bin/nope.sh").await;
    assert_status(&resp, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_output() {
    let server = cgi_server();
    install_script(server.root.path(), "cgi-bin/bad.sh", "#!/bin/sh\necho 'no header block'\n");
    let resp = server.get("/cgi-bin/bad.sh").await;
    assert_status(&resp, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_hung_script_times_out() {
    let server = TestServer::with_config(|c| {
        c.with_cgi_prefix("/cgi-bin")
            .with_network_timeout(Duration::from_secs(1))
    });
    install_script(server.root.path(), "cgi-bin/hang.sh", "#!/bin/sh\nexec sleep 30\n");

    let started = Instant::now();
    let resp = server.get("/cgi-bin/hang.sh").await;
    assert_status(&resp, StatusCode::GATEWAY_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(10));

    // The worker is free again.
    let resp = server.get("/hello.txt").await;
    assert_status(&resp, StatusCode::OK);
}

#[tokio::test]
async fn test_scripts_outside_prefix_served_as_files() {
    let server = TestServer::new();
    let resp = server.get("/cgi-bin/env.sh").await;
    assert_status(&resp, StatusCode::OK);
    assert!(resp.text().await.unwrap().starts_with("#!/bin/sh"));
}
