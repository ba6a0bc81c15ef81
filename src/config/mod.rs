//! Configuration module for tokio_webfs.
//!
//! This module provides centralized configuration loading from environment variables.
//! Embedding supervisors can build the same snapshot programmatically.
//!
//! # Example
//!
//! ```rust,ignore
//! use tokio_webfs::config::Config;
//!
//! let config = Config::from_env()?;
//! println!("Port: {}", config.server.port);
//!
//! let config = Config::new("/srv/www")
//!     .with_port(8080)
//!     .with_auth("admin", "secret");
//! ```

mod error;
mod logging;
mod parse;
mod security;
mod server;

pub use error::ConfigError;
pub use logging::{LogFormat, LoggingConfig};
pub use security::{Credential, DetachMode, SecurityConfig, TlsConfig};
pub use server::{AccessLogTarget, IpFamily, OptionalDuration, ServerConfig, DEFAULT_MIME_TYPES};
pub(crate) use server::normalize_cgi_prefix;

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Complete application configuration.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Network and serving configuration.
    pub server: ServerConfig,
    /// TLS, auth, chroot, privilege and daemon configuration.
    pub security: SecurityConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            security: SecurityConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Default configuration serving `document_root`.
    pub fn new(document_root: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.server.document_root = document_root.into();
        config
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.server.port = port;
        self
    }

    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.server.bind_ip = Some(ip);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.server.workers = workers;
        self
    }

    /// Per-worker connection cap.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.server.max_connections = max;
        self
    }

    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.server.network_timeout = timeout;
        self
    }

    pub fn with_index_file(mut self, index: impl Into<String>) -> Self {
        self.server.index_file = index.into();
        self
    }

    pub fn with_dir_listing(mut self, enabled: bool) -> Self {
        self.server.dir_listing = enabled;
        self
    }

    /// Directory cache capacity and TTL (`None` disables caching).
    pub fn with_dir_cache(mut self, size: usize, ttl: Option<Duration>) -> Self {
        self.server.dir_cache_size = size;
        self.server.dir_cache_ttl = OptionalDuration(ttl);
        self
    }

    pub fn with_cgi_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.server.cgi_prefix = Some(prefix.into());
        self
    }

    pub fn with_canonical_name(mut self, enabled: bool) -> Self {
        self.server.canonical_name = enabled;
        self
    }

    pub fn with_virtual_hosts(mut self, enabled: bool) -> Self {
        self.server.virtual_hosts = enabled;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server.server_name = name.into();
        self
    }

    pub fn with_mime_types(mut self, path: impl Into<PathBuf>) -> Self {
        self.server.mime_types = path.into();
        self
    }

    pub fn with_access_log(mut self, target: AccessLogTarget) -> Self {
        self.server.access_log = Some(target);
        self
    }

    pub fn with_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.security.auth = Some(Credential {
            user: user.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.security.tls = TlsConfig {
            cert_path: Some(cert.into()),
            key_path: Some(key.into()),
        };
        self
    }

    /// Validate the whole snapshot, including cross-section constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(ref cred) = self.security.auth {
            if cred.user.is_empty() || cred.user.contains(':') {
                return Err(ConfigError::invalid("AUTH", "expected user:password"));
            }
        }
        if self.security.tls.cert_path.is_some() != self.security.tls.key_path.is_some() {
            return Err(ConfigError::Missing {
                key: "TLS_CERT/TLS_KEY".into(),
            });
        }
        Ok(())
    }

    /// Print configuration summary to log.
    pub fn log_summary(&self) {
        use tracing::info;

        let server = &self.server;
        info!("Configuration loaded:");
        info!("  Port: {}", server.port);
        if let Some(ip) = server.bind_ip {
            info!("  Bind address: {}", ip);
        } else {
            info!("  Address family: {:?}", server.ip_family);
        }
        info!("  Document root: {:?}", server.document_root);
        info!(
            "  Workers: {} (max {} connections each)",
            server.worker_count(),
            server.max_connections
        );
        info!("  Network timeout: {}s", server.network_timeout.as_secs());
        info!("  Index file: {}", server.index_file);

        if server.dir_listing {
            if server.dir_cache_ttl.is_enabled() {
                info!(
                    "  Directory listings: enabled (cache {} entries, TTL {}s)",
                    server.dir_cache_size,
                    server.dir_cache_ttl.as_secs()
                );
            } else {
                info!("  Directory listings: enabled (cache disabled)");
            }
        } else {
            info!("  Directory listings: disabled");
        }

        if let Some(ref prefix) = server.cgi_prefix {
            info!("  CGI prefix: {}", prefix);
        }
        if server.virtual_hosts {
            info!("  Virtual hosts: enabled");
        }
        if self.security.tls.is_enabled() {
            info!("  TLS: enabled");
        }
        if let Some(ref cred) = self.security.auth {
            info!("  Basic auth: user '{}'", cred.user);
        }
        if self.security.chroot {
            info!("  chroot: enabled");
        }
        if let Some(ref target) = server.access_log {
            info!("  Access log: {:?}", target);
        }
    }
}
