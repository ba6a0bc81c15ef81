//! Test helpers and utilities

use std::fs;
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{redirect, Client, Response};
use tempfile::TempDir;
use tokio_webfs::{Config, Server, ServerHandle};

/// A server bound to an ephemeral loopback port, serving a temporary tree.
pub struct TestServer {
    pub root: TempDir,
    /// Holds the MIME table and other files that must not be served.
    pub aux: TempDir,
    pub base_url: String,
    pub client: Client,
    handle: Option<ServerHandle>,
}

#[allow(dead_code)]
impl TestServer {
    /// Start with the default fixture tree and configuration.
    pub fn new() -> Self {
        Self::with_config(|c| c)
    }

    /// Start with the default fixture tree, adjusting the configuration.
    pub fn with_config(configure: impl FnOnce(Config) -> Config) -> Self {
        let root = TempDir::new().expect("Failed to create document root");
        populate(root.path());
        Self::start(root, configure)
    }

    /// Start serving an existing tree.
    pub fn start(root: TempDir, configure: impl FnOnce(Config) -> Config) -> Self {
        let aux = TempDir::new().expect("Failed to create aux dir");
        let mime_types = aux.path().join("mime.types");
        fs::write(
            &mime_types,
            "text/html html htm\ntext/plain txt\ntext/css css\nimage/png png\n",
        )
        .expect("Failed to write mime.types");

        let config = Config::new(root.path())
            .with_bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_port(0)
            .with_workers(1)
            .with_network_timeout(Duration::from_secs(5))
            .with_server_name("localhost")
            .with_mime_types(&mime_types);
        let handle = Server::launch(configure(config)).expect("Failed to start server");
        let base_url = format!("http://{}", handle.local_addr());

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(redirect::Policy::none())
            .build()
            .expect("Failed to create HTTP client");

        Self {
            root,
            aux,
            base_url,
            client,
            handle: Some(handle),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle().local_addr()
    }

    pub fn handle(&self) -> &ServerHandle {
        self.handle.as_ref().expect("server already stopped")
    }

    /// Path inside the document root.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }

    /// Make a GET request to the server
    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("GET request failed")
    }

    /// Make a GET request with custom headers
    pub async fn get_with_headers(&self, path: &str, headers: &[(&str, &str)]) -> Response {
        let mut req = self.client.get(format!("{}{}", self.base_url, path));
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        req.send().await.expect("GET request failed")
    }

    /// Open a raw connection.
    pub fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr()).expect("connect failed");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .expect("set_read_timeout failed");
        stream
    }

    /// Send raw bytes and read until the server closes the connection.
    pub fn raw(&self, request: &[u8]) -> String {
        let mut stream = self.connect();
        stream.write_all(request).expect("write failed");
        read_to_close(&mut stream)
    }

    /// Stop accepting and wait for workers to drain.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
            handle.join();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read until EOF or timeout, lossily decoded.
pub fn read_to_close(stream: &mut TcpStream) -> String {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Read one response head plus a `Content-Length` body from `stream`.
pub fn read_response(stream: &mut TcpStream) -> String {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    while !out.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte) {
            Ok(0) | Err(_) => return String::from_utf8_lossy(&out).into_owned(),
            Ok(_) => out.push(byte[0]),
        }
    }
    let head = String::from_utf8_lossy(&out).into_owned();
    let len = head
        .lines()
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).expect("body read failed");
    head + &String::from_utf8_lossy(&body)
}

/// Default fixture tree:
///
/// ```text
/// index.html
/// hello.txt          "Hello, world!\n"
/// styles.css
/// data.bin           256 bytes 0..=255
/// docs/              no index
///   a.txt
///   b dir/
/// empty.txt
/// cgi-bin/env.sh     prints QUERY_STRING and PATH_INFO
/// ```
pub fn populate(root: &Path) {
    fs::write(root.join("index.html"), "<h1>home</h1>\n").unwrap();
    fs::write(root.join("hello.txt"), "Hello, world!\n").unwrap();
    fs::write(root.join("styles.css"), "body { margin: 0 }\n").unwrap();
    fs::write(root.join("data.bin"), (0u8..=255).collect::<Vec<u8>>()).unwrap();
    fs::write(root.join("empty.txt"), "").unwrap();
    fs::create_dir_all(root.join("docs/b dir")).unwrap();
    fs::write(root.join("docs/a.txt"), "alpha\n").unwrap();
    install_script(
        root,
        "cgi-bin/env.sh",
        "#!/bin/sh\nprintf 'Content-Type: text/plain\\r\\n\\r\\n'\necho \"query=$QUERY_STRING\"\necho \"info=$PATH_INFO\"\necho \"method=$REQUEST_METHOD\"\necho \"user=$REMOTE_USER\"\n",
    );
}

/// Write an executable script under `root`.
pub fn install_script(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Assert that response has expected status
pub fn assert_status(response: &Response, expected: reqwest::StatusCode) {
    assert_eq!(
        response.status(),
        expected,
        "Expected status {}, got {}",
        expected,
        response.status()
    );
}

/// Assert that response contains header
pub fn assert_header(response: &Response, name: &str, expected: &str) {
    let value = response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("Header '{}' not found", name))
        .to_str()
        .unwrap();
    assert_eq!(value, expected, "Header '{}' mismatch", name);
}

/// Assert that response contains header with prefix
pub fn assert_header_starts_with(response: &Response, name: &str, prefix: &str) {
    let value = response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("Header '{}' not found", name))
        .to_str()
        .unwrap();
    assert!(
        value.starts_with(prefix),
        "Header '{}' expected to start with '{}', got '{}'",
        name,
        prefix,
        value
    );
}

/// Assert that response has header present
pub fn assert_has_header(response: &Response, name: &str) {
    assert!(
        response.headers().contains_key(name),
        "Header '{}' not found",
        name
    );
}

/// Assert that response body contains substring
pub async fn assert_body_contains(response: Response, substring: &str) {
    let body = response.text().await.expect("Failed to read body");
    assert!(
        body.contains(substring),
        "Body does not contain '{}'. Body: {}",
        substring,
        &body[..body.len().min(500)]
    );
}
