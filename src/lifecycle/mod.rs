//! Ordered startup: bind, TLS, static data, chroot, privilege drop, detach.
//!
//! Each stage consumes the previous one, so the steps cannot be reordered
//! or skipped:
//!
//! ```rust,ignore
//! let ready = Startup::new(config)?
//!     .bind()?
//!     .wrap_tls()?
//!     .load_static_data()?
//!     .confine()?
//!     .drop_privileges()?
//!     .detach()?;
//! ```
//!
//! Everything that needs the original filesystem view (certificates, the
//! MIME table, error pages, log and pid files) is opened before the chroot.
//! Everything that needs root (low ports, chroot) happens before the
//! privilege drop. Any failure is fatal.

mod daemon;
mod hostname;
mod privileges;

pub use daemon::PidFile;
pub use privileges::Identity;

use std::fmt;
use std::fs::File;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigError};
use crate::listener::{self, BindOptions};
use crate::mime::MimeTable;
use crate::server::access_log::AccessLog;
use crate::server::error_pages::ErrorPages;
use crate::server::vhost::VirtualHostMap;

/// Fatal startup failure.
#[derive(Debug)]
pub enum StartupError {
    Config(ConfigError),
    Bind { addr: String, error: io::Error },
    Tls(String),
    Mime { path: PathBuf, error: io::Error },
    StaticData(String),
    Chroot(io::Error),
    Privileges(String),
    Daemon(io::Error),
    PidFile { path: PathBuf, error: io::Error },
    Workers(io::Error),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupError::Config(e) => write!(f, "configuration: {}", e),
            StartupError::Bind { addr, error } => write!(f, "cannot bind {}: {}", addr, error),
            StartupError::Tls(msg) => write!(f, "TLS setup failed: {}", msg),
            StartupError::Mime { path, error } => {
                write!(f, "cannot read MIME types from {}: {}", path.display(), error)
            }
            StartupError::StaticData(msg) => write!(f, "{}", msg),
            StartupError::Chroot(e) => write!(f, "chroot failed: {}", e),
            StartupError::Privileges(msg) => write!(f, "privilege drop failed: {}", msg),
            StartupError::Daemon(e) => write!(f, "cannot detach: {}", e),
            StartupError::PidFile { path, error } => {
                write!(f, "pidfile {}: {}", path.display(), error)
            }
            StartupError::Workers(e) => write!(f, "cannot start workers: {}", e),
        }
    }
}

impl std::error::Error for StartupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartupError::Config(e) => Some(e),
            StartupError::Bind { error, .. }
            | StartupError::Mime { error, .. }
            | StartupError::PidFile { error, .. } => Some(error),
            StartupError::Chroot(e) | StartupError::Daemon(e) | StartupError::Workers(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for StartupError {
    fn from(e: ConfigError) -> Self {
        StartupError::Config(e)
    }
}

/// Data loaded from the original filesystem before confinement.
pub struct StaticData {
    pub mime: MimeTable,
    pub error_pages: ErrorPages,
    pub vhosts: VirtualHostMap,
    pub access_log: Option<AccessLog>,
    pub pid_file: Option<PidFile>,
    identity: Option<Identity>,
    dev_null: Option<File>,
}

/// Stage marker: configuration validated.
pub struct Validated;

/// Stage marker: listening socket bound.
pub struct Bound {
    listener: std::net::TcpListener,
}

/// Stage marker: TLS material loaded.
pub struct Secured {
    listener: std::net::TcpListener,
    tls: Option<TlsAcceptor>,
}

/// Static data loaded, not yet confined.
pub struct Loaded;
/// Chroot applied when configured.
pub struct Confined;
/// Privileges dropped when configured.
pub struct Dropped;

/// Listener, TLS and static data in hand.
pub struct Assembled<M> {
    listener: std::net::TcpListener,
    tls: Option<TlsAcceptor>,
    data: StaticData,
    root: PathBuf,
    _marker: PhantomData<M>,
}

impl<M> Assembled<M> {
    fn advance<N>(self) -> Assembled<N> {
        Assembled {
            listener: self.listener,
            tls: self.tls,
            data: self.data,
            root: self.root,
            _marker: PhantomData,
        }
    }
}

/// Startup pipeline in stage `S`.
pub struct Startup<S> {
    config: Config,
    stage: S,
}

/// Fully prepared process, ready to start workers.
pub struct Ready {
    pub config: Arc<Config>,
    pub listener: std::net::TcpListener,
    pub tls: Option<TlsAcceptor>,
    pub data: StaticData,
    /// Document root as seen after confinement.
    pub root: PathBuf,
}

/// Run every startup stage in order.
pub fn startup(config: Config) -> Result<Ready, StartupError> {
    Startup::new(config)?
        .bind()?
        .wrap_tls()?
        .load_static_data()?
        .confine()?
        .drop_privileges()?
        .detach()
}

impl Startup<Validated> {
    pub fn new(config: Config) -> Result<Self, StartupError> {
        config.validate()?;
        Ok(Self {
            config,
            stage: Validated,
        })
    }

    /// Bind the listening socket. Privileged ports are fine while still root.
    pub fn bind(self) -> Result<Startup<Bound>, StartupError> {
        let server = &self.config.server;
        let opts = BindOptions {
            port: server.port,
            ip: server.bind_ip,
            family: server.ip_family,
            backlog: server.backlog(),
        };
        let listener = listener::bind(opts).map_err(|error| StartupError::Bind {
            addr: match server.bind_ip {
                Some(ip) => format!("{}:{}", ip, server.port),
                None => format!("port {} ({:?})", server.port, server.ip_family),
            },
            error,
        })?;
        if let Ok(addr) = listener.local_addr() {
            info!("Listening on {} (backlog {})", addr, opts.backlog);
        }
        Ok(Startup {
            config: self.config,
            stage: Bound { listener },
        })
    }
}

impl Startup<Bound> {
    /// Load certificate and key when TLS is configured.
    pub fn wrap_tls(self) -> Result<Startup<Secured>, StartupError> {
        let tls = match (
            &self.config.security.tls.cert_path,
            &self.config.security.tls.key_path,
        ) {
            (Some(cert), Some(key)) => {
                let acceptor = listener::load_acceptor(cert, key)
                    .map_err(|e| StartupError::Tls(e.to_string()))?;
                info!("TLS enabled with certificate {}", cert.display());
                Some(acceptor)
            }
            _ => None,
        };
        Ok(Startup {
            config: self.config,
            stage: Secured {
                listener: self.stage.listener,
                tls,
            },
        })
    }
}

impl Startup<Secured> {
    /// Open everything that lives outside the document root.
    pub fn load_static_data(mut self) -> Result<Startup<Assembled<Loaded>>, StartupError> {
        if self.config.server.canonical_name {
            let name = hostname::canonical_name(&self.config.server.server_name)
                .map_err(StartupError::StaticData)?;
            info!("Using canonical server name {}", name);
            self.config.server.server_name = name;
        }

        let config = &self.config;
        let server = &config.server;
        let security = &config.security;

        let root = canonical_root(&server.document_root)?;
        let mime = load_mime(config)?;

        let error_pages = match server.error_pages_dir {
            Some(ref dir) => ErrorPages::from_directory(dir),
            None => ErrorPages::new(),
        };

        let vhosts = if server.virtual_hosts {
            VirtualHostMap::scan(&root).map_err(|e| {
                StartupError::StaticData(format!("cannot scan virtual hosts in {}: {}", root.display(), e))
            })?
        } else {
            VirtualHostMap::disabled()
        };

        let access_log = match server.access_log {
            Some(ref target) => Some(AccessLog::open(target, server.access_log_flush).map_err(|e| {
                StartupError::StaticData(format!("cannot open access log {:?}: {}", target, e))
            })?),
            None => None,
        };

        let pid_file = match security.pid_file {
            Some(ref path) => Some(PidFile::create(path).map_err(|error| StartupError::PidFile {
                path: path.clone(),
                error,
            })?),
            None => None,
        };

        let identity = if security.drops_privileges() {
            let id = privileges::resolve(
                security.run_as_user.as_deref(),
                security.run_as_group.as_deref(),
            )
            .map_err(StartupError::Privileges)?;
            debug!(uid = id.uid, gid = id.gid, "Resolved run-as identity");
            Some(id)
        } else {
            None
        };

        let dev_null = if daemon::should_detach(security.detach) {
            Some(daemon::open_dev_null().map_err(StartupError::Daemon)?)
        } else {
            None
        };

        if let Some(ref prefix) = server.cgi_prefix {
            let dir = root.join(prefix.trim_matches('/'));
            if !dir.is_dir() {
                warn!("CGI directory {} does not exist", dir.display());
            }
        }

        Ok(Startup {
            stage: Assembled {
                listener: self.stage.listener,
                tls: self.stage.tls,
                data: StaticData {
                    mime,
                    error_pages,
                    vhosts,
                    access_log,
                    pid_file,
                    identity,
                    dev_null,
                },
                root,
                _marker: PhantomData,
            },
            config: self.config,
        })
    }
}

impl Startup<Assembled<Loaded>> {
    /// chroot into the document root when configured.
    pub fn confine(mut self) -> Result<Startup<Assembled<Confined>>, StartupError> {
        if self.config.security.chroot {
            privileges::chroot(&self.stage.root).map_err(StartupError::Chroot)?;
            info!("Confined to {}", self.stage.root.display());
            self.stage.root = PathBuf::from("/");
        }
        Ok(Startup {
            config: self.config,
            stage: self.stage.advance(),
        })
    }
}

impl Startup<Assembled<Confined>> {
    /// Switch to the configured user and group.
    pub fn drop_privileges(self) -> Result<Startup<Assembled<Dropped>>, StartupError> {
        if let Some(ref id) = self.stage.data.identity {
            privileges::drop_to(id).map_err(StartupError::Privileges)?;
            info!("Running as uid {} gid {}", id.uid, id.gid);
        } else if privileges::is_root() {
            warn!("Running as root; set RUN_AS_USER to drop privileges");
        }
        Ok(Startup {
            config: self.config,
            stage: self.stage.advance(),
        })
    }
}

impl Startup<Assembled<Dropped>> {
    /// Detach when requested, then record the final pid.
    pub fn detach(mut self) -> Result<Ready, StartupError> {
        if let Some(dev_null) = self.stage.data.dev_null.take() {
            daemon::detach(&dev_null).map_err(StartupError::Daemon)?;
        }

        if let Some(ref mut pid_file) = self.stage.data.pid_file {
            let pid = std::process::id();
            pid_file.write_pid(pid).map_err(|error| StartupError::PidFile {
                path: pid_file.path().to_path_buf(),
                error,
            })?;
            debug!(pid, "Wrote pidfile");
        }

        Ok(Ready {
            config: Arc::new(self.config),
            listener: self.stage.listener,
            tls: self.stage.tls,
            data: self.stage.data,
            root: self.stage.root,
        })
    }
}

fn canonical_root(path: &Path) -> Result<PathBuf, StartupError> {
    let root = path.canonicalize().map_err(|e| {
        StartupError::StaticData(format!("document root {}: {}", path.display(), e))
    })?;
    if !root.is_dir() {
        return Err(StartupError::StaticData(format!(
            "document root {} is not a directory",
            root.display()
        )));
    }
    Ok(root)
}

/// An explicit MIME table must exist; the system default may be missing.
fn load_mime(config: &Config) -> Result<MimeTable, StartupError> {
    let server = &config.server;
    match MimeTable::load(&server.mime_types, server.default_mime_type.as_str()) {
        Ok(table) => {
            debug!(entries = table.len(), "Loaded MIME types from {}", server.mime_types.display());
            Ok(table)
        }
        Err(e) if server.mime_types_is_default() && e.kind() == io::ErrorKind::NotFound => {
            warn!(
                "{} not found, using built-in MIME types",
                server.mime_types.display()
            );
            Ok(MimeTable::new(server.default_mime_type.as_str()))
        }
        Err(error) => Err(StartupError::Mime {
            path: server.mime_types.clone(),
            error,
        }),
    }
}
