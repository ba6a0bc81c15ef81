//! Worker capacity, idle timeout and shutdown tests

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use crate::helpers::*;

const REQUEST: &[u8] = b"GET /hello.txt HTTP/1.1\r\nHost: localhost\r\n\r\n";

#[test]
fn test_connections_beyond_cap_wait_in_backlog() {
    let server = TestServer::with_config(|c| c.with_workers(1).with_max_connections(2));

    let mut first = server.connect();
    first.write_all(REQUEST).unwrap();
    assert!(read_response(&mut first).starts_with("HTTP/1.1 200"));

    let mut second = server.connect();
    second.write_all(REQUEST).unwrap();
    assert!(read_response(&mut second).starts_with("HTTP/1.1 200"));

    // Connects through the kernel backlog but is not served yet.
    let mut third = TcpStream::connect(server.addr()).unwrap();
    third.write_all(REQUEST).unwrap();
    third
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    let mut buf = [0u8; 64];
    match third.read(&mut buf) {
        Err(e) => assert!(
            matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
            "unexpected error: {}",
            e
        ),
        Ok(n) => panic!("third connection served early ({} bytes)", n),
    }

    drop(first);
    third.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    let resp = read_response(&mut third);
    assert!(resp.starts_with("HTTP/1.1 200"), "got: {}", resp);
}

#[test]
fn test_idle_connection_closed_after_timeout() {
    let server = TestServer::with_config(|c| c.with_network_timeout(Duration::from_secs(1)));

    let mut stream = server.connect();
    let started = Instant::now();
    let resp = read_to_close(&mut stream);
    assert!(resp.is_empty(), "got: {}", resp);
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_idle_keep_alive_closed_after_timeout() {
    let server = TestServer::with_config(|c| c.with_network_timeout(Duration::from_secs(1)));

    let mut stream = server.connect();
    stream.write_all(REQUEST).unwrap();
    assert!(read_response(&mut stream).starts_with("HTTP/1.1 200"));

    let started = Instant::now();
    assert!(read_to_close(&mut stream).is_empty());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_slow_client_cannot_hold_worker() {
    let server = TestServer::with_config(|c| {
        c.with_max_connections(1)
            .with_network_timeout(Duration::from_secs(1))
    });

    // Never finishes its request head.
    let mut slow = server.connect();
    slow.write_all(b"GET /hello.txt HTTP/1.1\r\n").unwrap();

    let mut next = server.connect();
    next.write_all(REQUEST).unwrap();
    let resp = read_response(&mut next);
    assert!(resp.starts_with("HTTP/1.1 200"), "got: {}", resp);
}

#[test]
fn test_shutdown_finishes_in_flight_request() {
    let mut server = TestServer::with_config(|c| c.with_cgi_prefix("/cgi-bin"));
    install_script(
        server.root.path(),
        "cgi-bin/slow.sh",
        "#!/bin/sh\nsleep 1\nprintf 'Content-Type: text/plain\\r\\n\\r\\ndone'\n",
    );

    let mut stream = server.connect();
    stream
        .write_all(b"GET /cgi-bin/slow.sh HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();
    let client = std::thread::spawn(move || read_to_close(&mut stream));

    std::thread::sleep(Duration::from_millis(300));
    server.handle().shutdown();
    assert!(!server.handle().is_accepting());

    let resp = client.join().unwrap();
    assert!(resp.starts_with("HTTP/1.1 200"), "got: {}", resp);
    assert!(resp.ends_with("done"));

    let addr = server.addr();
    server.stop();
    assert!(TcpStream::connect(addr).is_err());
}

#[test]
fn test_shutdown_closes_idle_connections() {
    let mut server = TestServer::new();
    let mut stream = server.connect();
    stream.write_all(REQUEST).unwrap();
    assert!(read_response(&mut stream).starts_with("HTTP/1.1 200"));

    let started = Instant::now();
    server.stop();
    assert!(read_to_close(&mut stream).is_empty());
    assert!(started.elapsed() < Duration::from_secs(5));
}
