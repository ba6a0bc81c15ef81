//! Integration tests for tokio_webfs
//!
//! Each test starts an in-process server on an ephemeral loopback port,
//! serving a temporary document root.
//!
//! Run with: cargo test --test integration

mod helpers;

mod access_log;
mod auth;
mod cgi;
mod connection_limits;
mod error_pages;
mod http_basic;
mod listing;
mod static_files;
mod tls;
mod virtual_hosts;
