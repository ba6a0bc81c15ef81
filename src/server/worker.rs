//! Worker threads.
//!
//! Each worker owns a single-threaded runtime and a clone of the shared
//! listening socket. A worker holds at most `max_connections` connections;
//! at the cap it stops calling accept, so further clients wait in the
//! kernel backlog instead of being accepted and starved.

use std::io;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener as TokioTcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinSet, LocalSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, trace, warn};

use super::connection::ConnectionContext;
use crate::listener::{Listener, TcpListener, TlsListener};

/// Pause after accept fails for lack of descriptors or memory.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub(crate) struct Worker {
    pub id: usize,
    pub listener: std::net::TcpListener,
    pub tls: Option<TlsAcceptor>,
    pub ctx: Arc<ConnectionContext>,
    pub max_connections: usize,
    pub shutdown: watch::Receiver<bool>,
    /// Told once the listener is registered with this worker's runtime.
    pub ready: mpsc::Sender<io::Result<()>>,
}

impl Worker {
    /// Thread body. Returns once shutdown is signalled and every connection
    /// owned by this worker has finished.
    pub(crate) fn run(self) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                let _ = self.ready.send(Err(e));
                return;
            }
        };

        let local = LocalSet::new();
        local.block_on(&runtime, async move {
            let Worker {
                id,
                listener,
                tls,
                ctx,
                max_connections,
                shutdown,
                ready,
            } = self;

            let tokio_listener = match TokioTcpListener::from_std(listener) {
                Ok(l) => l,
                Err(e) => {
                    error!("Worker {}: Failed to register listener: {}", id, e);
                    let _ = ready.send(Err(e));
                    return;
                }
            };
            let _ = ready.send(Ok(()));
            debug!("Worker {} started", id);

            match tls {
                Some(acceptor) => {
                    let listener = TlsListener::from_parts(tokio_listener, acceptor);
                    accept_loop(id, listener, ctx, max_connections, shutdown).await;
                }
                None => {
                    let listener = TcpListener::new(tokio_listener);
                    accept_loop(id, listener, ctx, max_connections, shutdown).await;
                }
            }
        });
    }
}

async fn accept_loop<L: Listener>(
    id: usize,
    listener: L,
    ctx: Arc<ConnectionContext>,
    max_connections: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let listener = Arc::new(listener);
    let slots = Arc::new(Semaphore::new(max_connections));
    let mut connections = JoinSet::new();

    loop {
        while let Some(result) = connections.try_join_next() {
            log_join(id, result);
        }
        if *shutdown.borrow() {
            break;
        }

        // Wait for a free slot before accepting.
        let permit = tokio::select! {
            permit = Arc::clone(&slots).acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
            _ = shutdown.changed() => break,
        };

        let (stream, remote_addr) = tokio::select! {
            result = listener.accept() => match result {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Worker {}: Accept error: {}", id, e);
                    if is_resource_exhaustion(&e) {
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    continue;
                }
            },
            _ = shutdown.changed() => break,
        };

        trace!(worker = id, %remote_addr, listener = listener.name(), "Accepted connection");
        let ctx = Arc::clone(&ctx);
        let listener = Arc::clone(&listener);
        let conn_shutdown = shutdown.clone();
        connections.spawn_local(async move {
            let _permit = permit;
            match listener.handshake(stream, remote_addr).await {
                Ok(conn) => ctx.serve(conn, conn_shutdown).await,
                Err(e) => debug!(%remote_addr, error = %e, "Handshake failed"),
            }
        });
    }

    debug!(
        "Worker {} stopped accepting, draining {} connections",
        id,
        connections.len()
    );
    while let Some(result) = connections.join_next().await {
        log_join(id, result);
    }
    debug!("Worker {} finished", id);
}

fn log_join(id: usize, result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!("Worker {}: Connection task panicked", id);
        }
    }
}

fn is_resource_exhaustion(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOBUFS) | Some(libc::ENOMEM)
    )
}
