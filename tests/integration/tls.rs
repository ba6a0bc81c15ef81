//! HTTPS serving tests

use std::fs;
use std::time::Duration;

use crate::helpers::*;
use reqwest::{redirect, Certificate, Client, StatusCode};
use tempfile::TempDir;
use tokio_webfs::Config;

struct TlsFixture {
    server: TestServer,
    client: Client,
    base_url: String,
    _certs: TempDir,
}

fn tls_server() -> TlsFixture {
    tls_server_with(|c| c)
}

fn tls_server_with(configure: impl FnOnce(Config) -> Config) -> TlsFixture {
    let certs = TempDir::new().unwrap();
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_pem = generated.cert.pem();
    let cert_path = certs.path().join("cert.pem");
    let key_path = certs.path().join("key.pem");
    fs::write(&cert_path, &cert_pem).unwrap();
    fs::write(&key_path, generated.key_pair.serialize_pem()).unwrap();

    let server = TestServer::with_config(move |c| configure(c.with_tls(cert_path, key_path)));
    let addr = server.addr();
    let client = Client::builder()
        .add_root_certificate(Certificate::from_pem(cert_pem.as_bytes()).unwrap())
        .resolve("localhost", addr)
        .redirect(redirect::Policy::none())
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap();

    TlsFixture {
        server,
        client,
        base_url: format!("https://localhost:{}", addr.port()),
        _certs: certs,
    }
}

#[tokio::test]
async fn test_file_served_over_tls() {
    let tls = tls_server();
    let resp = tls
        .client
        .get(format!("{}/hello.txt", tls.base_url))
        .send()
        .await
        .unwrap();

    assert_status(&resp, StatusCode::OK);
    assert_header(&resp, "content-length", "14");
    assert_eq!(resp.text().await.unwrap(), "Hello, world!\n");
}

#[tokio::test]
async fn test_directory_redirect_uses_https_scheme() {
    let tls = tls_server();
    let resp = tls
        .client
        .get(format!("{}/docs?x=1", tls.base_url))
        .send()
        .await
        .unwrap();

    assert_status(&resp, StatusCode::MOVED_PERMANENTLY);
    assert_header(
        &resp,
        "location",
        &format!("{}/docs/?x=1", tls.base_url),
    );
}

#[tokio::test]
async fn test_cgi_sees_tls_session() {
    let tls = tls_server_with(|c| c.with_cgi_prefix("/cgi-bin"));
    install_script(
        tls.server.root.path(),
        "cgi-bin/tls.sh",
        "#!/bin/sh\nprintf 'Content-Type: text/plain\\r\\n\\r\\n'\necho \"https=$HTTPS\"\necho \"proto=$SSL_PROTOCOL\"\n",
    );

    let resp = tls
        .client
        .get(format!("{}/cgi-bin/tls.sh", tls.base_url))
        .send()
        .await
        .unwrap();
    assert_status(&resp, StatusCode::OK);
    let body = resp.text().await.unwrap();
    assert!(body.contains("https=on\n"), "body: {}", body);
    assert!(body.contains("proto=TLSv1."), "body: {}", body);
}

#[test]
fn test_plaintext_client_rejected() {
    let tls = tls_server();
    let resp = tls
        .server
        .raw(b"GET /hello.txt HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    assert!(!resp.contains("Hello, world!"), "got: {}", resp);
}
