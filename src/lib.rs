//! tokio_webfs - Small static file web server powered by Rust and Tokio.
//!
//! Serves a directory tree over HTTP/1.x with a fixed pool of worker
//! threads, each capped at a fixed number of connections.
//!
//! # Features
//!
//! - **Static files**: Range requests, If-Modified-Since, zero-copy sendfile
//! - **Directory listings**: HTML indexes cached with TTL and mtime checks
//! - **CGI**: GET-only scripts under a configured prefix, with a hard timeout
//! - **Virtual hosts**: One subdirectory of the document root per host
//! - **HTTPS**: TLS via rustls
//! - **Hardening**: chroot, privilege drop and daemon mode at startup
//! - **Access logging**: Common Log Format to a file or stdout
//!
//! # Startup
//!
//! Startup is an ordered pipeline (see [`lifecycle`]): bind, load TLS
//! material, load static data, chroot, drop privileges, detach and write
//! the pidfile. Workers start accepting only after all of it succeeds.
//!
//! # Example
//!
//! ```rust,ignore
//! use tokio_webfs::{Config, Server};
//!
//! let config = Config::from_env()?;
//! let handle = Server::launch(config)?;
//! // ... wait for a signal ...
//! handle.shutdown();
//! handle.join();
//! ```

/// Package version from Cargo.toml
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit hash (8 chars) with optional "-dirty" suffix
pub const BUILD_VERSION: &str = env!("BUILD_VERSION");

/// Full version string: "0.1.0 (abc12345)" or "0.1.0 (abc12345-dirty)"
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_VERSION"), ")");

pub mod cgi;
pub mod config;
pub mod lifecycle;
pub mod listener;
pub mod logging;
pub mod mime;
pub mod server;

// Re-exports for convenience
pub use config::Config;
pub use lifecycle::StartupError;
pub use server::{Server, ServerHandle};
