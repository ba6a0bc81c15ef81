//! Server configuration: network, serving and access log settings.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use super::parse::{env_bool, env_duration, env_opt, env_or, env_parse};
use super::ConfigError;

/// Default location of the system MIME table.
pub const DEFAULT_MIME_TYPES: &str = "/etc/mime.types";

/// Optional duration setting ("off" disables it).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OptionalDuration(pub Option<Duration>);

impl OptionalDuration {
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }

    #[inline]
    pub fn as_secs(&self) -> u64 {
        self.0.map(|d| d.as_secs()).unwrap_or(0)
    }

    #[inline]
    pub fn as_duration(&self) -> Option<Duration> {
        self.0
    }
}

/// Address family selection for the listening socket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IpFamily {
    /// IPv6 dual-stack socket, falling back to IPv4 when IPv6 is unavailable.
    #[default]
    Any,
    V4,
    V6,
}

impl IpFamily {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "" | "any" | "both" => Ok(IpFamily::Any),
            "4" | "ipv4" | "v4" => Ok(IpFamily::V4),
            "6" | "ipv6" | "v6" => Ok(IpFamily::V6),
            other => Err(ConfigError::invalid(
                "IP_FAMILY",
                format!("expected any, ipv4 or ipv6, got '{}'", other),
            )),
        }
    }
}

/// Where access log records go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessLogTarget {
    Stdout,
    File(PathBuf),
}

impl AccessLogTarget {
    fn parse(value: &str) -> Self {
        if value == "-" {
            AccessLogTarget::Stdout
        } else {
            AccessLogTarget::File(PathBuf::from(value))
        }
    }
}

/// Server configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// TCP port (default: 8000).
    pub port: u16,
    /// Explicit bind address; overrides `ip_family` when set.
    pub bind_ip: Option<IpAddr>,
    /// Address family used when no explicit bind address is configured.
    pub ip_family: IpFamily,
    /// Document root directory (default: current directory).
    pub document_root: PathBuf,
    /// Worker thread count (0 = one per CPU).
    pub workers: usize,
    /// Per-worker connection cap.
    pub max_connections: usize,
    /// Kernel accept backlog (None = 2 * total connection capacity).
    pub listen_backlog: Option<u32>,
    /// Idle timeout, also the upper bound on CGI execution.
    pub network_timeout: Duration,
    /// Directory index filename.
    pub index_file: String,
    /// Generate listings for directories without an index file.
    pub dir_listing: bool,
    /// Maximum number of cached directory listings.
    pub dir_cache_size: usize,
    /// Maximum age of a cached listing ("off" disables the cache).
    pub dir_cache_ttl: OptionalDuration,
    /// URL prefix handled by CGI (normalized to "/prefix/").
    pub cgi_prefix: Option<String>,
    /// Map the Host header onto subdirectories of the document root.
    pub virtual_hosts: bool,
    /// Name used for redirects and the CGI SERVER_NAME variable.
    pub server_name: String,
    /// Replace `server_name` with its canonical DNS name at startup.
    pub canonical_name: bool,
    /// Value for the Access-Control-Allow-Origin header.
    pub cors_origin: Option<String>,
    /// Expiry added to file responses via Cache-Control/Expires.
    pub expires: OptionalDuration,
    /// mime.types-format table.
    pub mime_types: PathBuf,
    /// Fallback content type.
    pub default_mime_type: String,
    /// Directory with `{status}.html` error pages.
    pub error_pages_dir: Option<PathBuf>,
    /// Access log destination (None = disabled).
    pub access_log: Option<AccessLogTarget>,
    /// Flush the access log after every record.
    pub access_log_flush: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_ip: None,
            ip_family: IpFamily::Any,
            document_root: PathBuf::from("."),
            workers: 0,
            max_connections: 32,
            listen_backlog: None,
            network_timeout: Duration::from_secs(60),
            index_file: "index.html".to_string(),
            dir_listing: true,
            dir_cache_size: 128,
            dir_cache_ttl: OptionalDuration(Some(Duration::from_secs(60))),
            cgi_prefix: None,
            virtual_hosts: false,
            server_name: system_hostname(),
            canonical_name: false,
            cors_origin: None,
            expires: OptionalDuration(None),
            mime_types: PathBuf::from(DEFAULT_MIME_TYPES),
            default_mime_type: "text/plain".to_string(),
            error_pages_dir: None,
            access_log: None,
            access_log_flush: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind_ip = env_opt("BIND_IP")
            .map(|s| {
                s.parse::<IpAddr>().map_err(|e| ConfigError::Parse {
                    key: "BIND_IP".into(),
                    value: s,
                    error: format!("{}", e),
                })
            })
            .transpose()?;

        let network_timeout =
            env_duration("NETWORK_TIMEOUT", "60s")?.ok_or_else(|| {
                ConfigError::invalid("NETWORK_TIMEOUT", "an idle timeout is required")
            })?;

        let cgi_prefix = env_opt("CGI_PREFIX")
            .map(|p| normalize_cgi_prefix(&p))
            .transpose()?;

        let listen_backlog = match env_opt("LISTEN_BACKLOG") {
            Some(_) => Some(env_parse("LISTEN_BACKLOG", 0u32)?),
            None => None,
        };

        let config = Self {
            port: env_parse("LISTEN_PORT", defaults.port)?,
            bind_ip,
            ip_family: IpFamily::parse(&env_or("IP_FAMILY", "any"))?,
            document_root: PathBuf::from(env_or("DOCUMENT_ROOT", ".")),
            workers: env_parse("WORKERS", defaults.workers)?,
            max_connections: env_parse("MAX_CONNECTIONS", defaults.max_connections)?,
            listen_backlog,
            network_timeout,
            index_file: env_or("INDEX_FILE", &defaults.index_file),
            dir_listing: env_bool("DIR_LISTING", defaults.dir_listing),
            dir_cache_size: env_parse("DIR_CACHE_SIZE", defaults.dir_cache_size)?,
            dir_cache_ttl: OptionalDuration(env_duration("DIR_CACHE_TTL", "60s")?),
            cgi_prefix,
            virtual_hosts: env_bool("VIRTUAL_HOSTS", false),
            server_name: env_opt("SERVER_NAME").unwrap_or(defaults.server_name),
            canonical_name: env_bool("CANONICAL_NAME", false),
            cors_origin: env_opt("CORS_ORIGIN"),
            expires: OptionalDuration(env_duration("EXPIRES", "off")?),
            mime_types: env_opt("MIME_TYPES")
                .map(PathBuf::from)
                .unwrap_or(defaults.mime_types),
            default_mime_type: env_or("DEFAULT_MIME_TYPE", &defaults.default_mime_type),
            error_pages_dir: env_opt("ERROR_PAGES_DIR").map(PathBuf::from),
            access_log: env_opt("ACCESS_LOG").map(|v| AccessLogTarget::parse(&v)),
            access_log_flush: env_bool("ACCESS_LOG_FLUSH", false),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check invariants that apply to both env and programmatic configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::invalid(
                "MAX_CONNECTIONS",
                "must be at least 1",
            ));
        }
        if self.network_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "NETWORK_TIMEOUT",
                "an idle timeout is required",
            ));
        }
        if self.index_file.is_empty() || self.index_file.contains('/') {
            return Err(ConfigError::invalid(
                "INDEX_FILE",
                "must be a plain file name",
            ));
        }
        if let Some(ref prefix) = self.cgi_prefix {
            normalize_cgi_prefix(prefix)?;
        }
        if self.default_mime_type.parse::<mime_guess::Mime>().is_err() {
            return Err(ConfigError::invalid(
                "DEFAULT_MIME_TYPE",
                format!("'{}' is not a media type", self.default_mime_type),
            ));
        }
        Ok(())
    }

    /// Worker count with auto-detection resolved.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    /// Kernel accept backlog.
    pub fn backlog(&self) -> u32 {
        self.listen_backlog.unwrap_or_else(|| {
            let total = self.max_connections.saturating_mul(self.worker_count());
            u32::try_from(total.saturating_mul(2)).unwrap_or(u32::MAX)
        })
    }

    /// Whether the mime table path was changed from the system default.
    pub fn mime_types_is_default(&self) -> bool {
        self.mime_types.as_os_str() == DEFAULT_MIME_TYPES
    }
}

/// Normalize a CGI prefix to "/segment/.../" form.
pub(crate) fn normalize_cgi_prefix(prefix: &str) -> Result<String, ConfigError> {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::invalid(
            "CGI_PREFIX",
            "must name a subdirectory of the document root",
        ));
    }
    if trimmed
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(ConfigError::invalid(
            "CGI_PREFIX",
            format!("'{}' is not a clean relative path", prefix),
        ));
    }
    Ok(format!("/{}/", trimmed))
}

/// Hostname of this machine, "localhost" when unavailable.
fn system_hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for buf.len() bytes; gethostname NUL-terminates on success
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    match std::str::from_utf8(&buf[..len]) {
        Ok(name) if !name.is_empty() => name.to_string(),
        _ => "localhost".to_string(),
    }
}
