//! Static file server with bounded worker threads.
//!
//! # Example
//!
//! ```rust,ignore
//! use tokio_webfs::{Config, Server};
//!
//! let config = Config::new("/srv/www").with_port(8000);
//! let handle = Server::launch(config)?;
//! println!("listening on {}", handle.local_addr());
//!
//! handle.shutdown();
//! handle.join();
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Server                          │
//! │        one listening socket, cloned per worker       │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐   │
//! │  │  Worker 0   │  │  Worker 1   │  │  Worker N   │   │
//! │  │ <= C conns  │  │ <= C conns  │  │ <= C conns  │   │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘   │
//! │         ▼                ▼                ▼          │
//! │  ┌────────────────────────────────────────────────┐  │
//! │  │              ConnectionContext                 │  │
//! │  │  • Request parsing   • Auth  • Virtual hosts   │  │
//! │  │  • Static files      • Directory listings      │  │
//! │  │  • CGI               • Access log              │  │
//! │  └────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod access_log;
pub mod auth;
pub mod connection;
pub mod dir_cache;
mod dispatch;
pub mod error_pages;
pub mod listing;
pub mod request;
pub mod response;
pub mod routing;
pub mod timestamp;
pub mod vhost;
mod worker;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use http::header::HeaderValue;
use tokio::sync::watch;
use tracing::{debug, error, info};

use access_log::AccessLog;
use auth::BasicAuth;
use connection::ConnectionContext;
use dir_cache::DirCache;
use worker::Worker;

use crate::cgi::CgiInvoker;
use crate::config::{normalize_cgi_prefix, Config, ConfigError};
use crate::lifecycle::{self, PidFile, Ready, StartupError};

/// Entry points for starting the server.
pub struct Server;

impl Server {
    /// Run the whole startup pipeline, then start workers.
    pub fn launch(config: Config) -> Result<ServerHandle, StartupError> {
        let ready = lifecycle::startup(config)?;
        Self::start(ready)
    }

    /// Start worker threads on a fully prepared process.
    ///
    /// Returns once every worker is accepting.
    pub fn start(ready: Ready) -> Result<ServerHandle, StartupError> {
        let Ready {
            config,
            listener,
            tls,
            data,
            root,
        } = ready;

        let local_addr = listener.local_addr().map_err(StartupError::Workers)?;
        let is_tls = tls.is_some();
        let access_log = data.access_log.map(Arc::new);
        let server = &config.server;

        let cgi = match server.cgi_prefix {
            Some(ref prefix) => Some(CgiInvoker::new(
                normalize_cgi_prefix(prefix)?,
                server.network_timeout,
                server.server_name.clone(),
                local_addr.port(),
            )),
            None => None,
        };
        let cors_origin = match server.cors_origin {
            Some(ref origin) => Some(
                HeaderValue::from_str(origin)
                    .map_err(|_| ConfigError::invalid("CORS_ORIGIN", "not a valid header value"))?,
            ),
            None => None,
        };
        let auth = config
            .security
            .auth
            .as_ref()
            .map(|cred| BasicAuth::new(cred, &config.security.auth_realm));
        let dir_cache = DirCache::new(server.dir_cache_size, server.dir_cache_ttl.as_duration());

        let workers = server.worker_count();
        let max_connections = server.max_connections;
        let ctx = Arc::new(ConnectionContext {
            config: Arc::clone(&config),
            root,
            vhosts: data.vhosts,
            dir_cache: Arc::new(dir_cache),
            mime: Arc::new(data.mime),
            auth,
            cgi,
            error_pages: data.error_pages,
            access_log: access_log.clone(),
            cors_origin,
            is_tls,
            port: local_addr.port(),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = mpsc::channel();
        let mut handles = Vec::with_capacity(workers);

        for id in 0..workers {
            let spawned = listener.try_clone().and_then(|worker_listener| {
                let worker = Worker {
                    id,
                    listener: worker_listener,
                    tls: tls.clone(),
                    ctx: Arc::clone(&ctx),
                    max_connections,
                    shutdown: shutdown_rx.clone(),
                    ready: ready_tx.clone(),
                };
                thread::Builder::new()
                    .name(format!("webfs-worker-{}", id))
                    .spawn(move || worker.run())
            });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    abort_workers(&shutdown_tx, handles);
                    return Err(StartupError::Workers(e));
                }
            }
        }
        drop(ready_tx);
        drop(listener);

        for _ in 0..workers {
            let result = ready_rx
                .recv()
                .unwrap_or_else(|_| Err(std::io::Error::other("worker exited during startup")));
            if let Err(e) = result {
                abort_workers(&shutdown_tx, handles);
                return Err(StartupError::Workers(e));
            }
        }

        let protocol = if is_tls { "https" } else { "http" };
        info!(
            "Server listening on {}://{} (workers: {}, max connections per worker: {})",
            protocol, local_addr, workers, max_connections
        );

        Ok(ServerHandle {
            local_addr,
            shutdown_tx,
            accepting: Arc::new(AtomicBool::new(true)),
            workers: handles,
            pid_file: data.pid_file,
            access_log,
        })
    }
}

fn abort_workers(shutdown_tx: &watch::Sender<bool>, handles: Vec<thread::JoinHandle<()>>) {
    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.join();
    }
}

/// Running server. Dropping the handle signals shutdown without waiting.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accepting: Arc<AtomicBool>,
    workers: Vec<thread::JoinHandle<()>>,
    pid_file: Option<PidFile>,
    access_log: Option<Arc<AccessLog>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether workers are accepting new connections.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Stop accepting. In-flight requests finish; idle connections close.
    pub fn shutdown(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!("Shutting down, draining connections");
        }
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for every worker to finish and release process resources.
    pub fn join(mut self) {
        for handle in std::mem::take(&mut self.workers) {
            if handle.join().is_err() {
                error!("Worker thread panicked");
            }
        }
        if let Some(ref log) = self.access_log {
            log.flush();
        }
        if let Some(pid_file) = self.pid_file.take() {
            pid_file.remove();
        }
        debug!("All workers stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.accepting.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }
}
