//! Request dispatch: method and auth checks, virtual host and path
//! resolution, then CGI, directory or file handling.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use http::header::{self, HeaderValue};
use http::{Method, StatusCode};
use tracing::{debug, warn};

use super::connection::{ConnectionContext, Peer};
use super::request::Request;
use super::response::{io_error_status, serve_file, Response};
use super::routing::{self, ResolvedPath};
use crate::cgi::{CgiContext, CgiInvoker};

impl ConnectionContext {
    /// Produce the response for one request.
    ///
    /// The flag reports whether the request carried valid credentials.
    pub(crate) async fn dispatch(&self, req: &mut Request, peer: &Peer) -> (Response, bool) {
        if req.method != Method::GET && req.method != Method::HEAD {
            let resp = self
                .error_response(StatusCode::METHOD_NOT_ALLOWED)
                .with_header(header::ALLOW, HeaderValue::from_static("GET, HEAD"))
                .closing();
            return (resp, false);
        }

        let authenticated = match self.auth {
            Some(ref auth) => {
                if auth.check(req.authorization.as_ref()).is_none() {
                    let resp = self
                        .error_response(StatusCode::UNAUTHORIZED)
                        .with_header(header::WWW_AUTHENTICATE, auth.challenge().clone());
                    return (resp, false);
                }
                true
            }
            None => false,
        };

        let root = self.request_root(req);
        let resp = self.route(req, &root, peer, authenticated).await;
        (resp, authenticated)
    }

    /// Document root for the request's virtual host, if any.
    fn request_root(&self, req: &mut Request) -> PathBuf {
        let vhost = match req.host {
            Some(ref host) => self.vhosts.resolve(host).cloned(),
            None => None,
        };
        match vhost {
            Some(dir) => {
                let root = self.root.join(&*dir);
                req.vhost = Some(dir);
                root
            }
            None => self.root.clone(),
        }
    }

    async fn route(&self, req: &Request, root: &Path, peer: &Peer, authenticated: bool) -> Response {
        let resolved = match routing::resolve(root, &req.path) {
            Ok(r) => r,
            Err(_) => {
                debug!(path = %req.path, "Rejected path above document root");
                return self.error_response(StatusCode::FORBIDDEN);
            }
        };

        if let Some(ref cgi) = self.cgi {
            if cgi.matches(&resolved.url_path) {
                return self.run_cgi(cgi, req, root, &resolved, peer, authenticated).await;
            }
        }

        let meta = match tokio::fs::metadata(&resolved.fs_path).await {
            Ok(m) => m,
            Err(e) => return self.error_response(io_error_status(&e)),
        };

        if meta.is_dir() {
            if !resolved.trailing_slash {
                return self.redirect_to_directory(req);
            }
            return self.serve_directory(req, &resolved).await;
        }
        if !meta.is_file() {
            return self.error_response(StatusCode::FORBIDDEN);
        }
        // A trailing slash on a file names a directory that does not exist
        if resolved.trailing_slash {
            return self.error_response(StatusCode::NOT_FOUND);
        }

        match self.open_file(&resolved.fs_path, req).await {
            Ok(resp) => resp,
            Err(e) => self.error_response(io_error_status(&e)),
        }
    }

    async fn open_file(&self, path: &Path, req: &Request) -> io::Result<Response> {
        let file = tokio::fs::File::open(path).await?.into_std().await;
        let meta = file.metadata()?;
        if !meta.is_file() {
            return Ok(self.error_response(StatusCode::FORBIDDEN));
        }
        Ok(serve_file(
            file,
            &meta,
            path,
            req,
            &self.mime,
            self.config.server.expires.as_duration(),
        ))
    }

    /// Index file first, then a listing when enabled.
    ///
    /// An index that exists but cannot be opened is a 403 and never falls
    /// back to the listing.
    async fn serve_directory(&self, req: &Request, resolved: &ResolvedPath) -> Response {
        let index = resolved.fs_path.join(&self.config.server.index_file);
        match tokio::fs::metadata(&index).await {
            Ok(meta) if meta.is_file() => {
                return match self.open_file(&index, req).await {
                    Ok(resp) => resp,
                    Err(e) => self.error_response(io_error_status(&e)),
                };
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return self.error_response(io_error_status(&e)),
        }

        if !self.config.server.dir_listing {
            return self.error_response(StatusCode::FORBIDDEN);
        }

        let cache = Arc::clone(&self.dir_cache);
        let dir = resolved.fs_path.clone();
        let url_path = resolved.url_path.clone();
        let rendered =
            tokio::task::spawn_blocking(move || cache.lookup_or_render(&dir, &url_path)).await;

        match rendered {
            Ok(Ok((body, hit))) => {
                debug!(path = %resolved.url_path, hit, "Directory listing");
                Response::bytes(StatusCode::OK, "text/html; charset=utf-8", body)
            }
            Ok(Err(e)) => self.error_response(io_error_status(&e)),
            Err(e) => {
                warn!(error = %e, "Listing task failed");
                self.error_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// 301 to the same path with a trailing slash.
    fn redirect_to_directory(&self, req: &Request) -> Response {
        let scheme = if self.is_tls { "https" } else { "http" };
        let host = req
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| {
                let default_port = if self.is_tls { 443 } else { 80 };
                if self.port == default_port {
                    self.config.server.server_name.clone()
                } else {
                    format!("{}:{}", self.config.server.server_name, self.port)
                }
            });

        let mut location = format!("{}://{}{}/", scheme, host, req.raw_path);
        if let Some(ref q) = req.query {
            location.push('?');
            location.push_str(q);
        }

        match HeaderValue::from_str(&location) {
            Ok(value) => self
                .error_response(StatusCode::MOVED_PERMANENTLY)
                .with_header(header::LOCATION, value),
            Err(_) => self.error_response(StatusCode::BAD_REQUEST),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_cgi(
        &self,
        cgi: &CgiInvoker,
        req: &Request,
        root: &Path,
        resolved: &ResolvedPath,
        peer: &Peer,
        authenticated: bool,
    ) -> Response {
        if req.method != Method::GET {
            return self
                .error_response(StatusCode::METHOD_NOT_ALLOWED)
                .with_header(header::ALLOW, HeaderValue::from_static("GET"));
        }

        let script = match cgi.locate(root, &resolved.url_path).await {
            Ok(s) => s,
            Err(status) => return self.error_response(status),
        };

        let ctx = CgiContext {
            remote_addr: peer.addr,
            tls_protocol: peer.tls.as_ref().map(|t| t.protocol.as_str()),
            remote_user: match (authenticated, self.auth.as_ref()) {
                (true, Some(auth)) => Some(auth.user()),
                _ => None,
            },
            document_root: root,
        };

        match cgi.invoke(&script, req, &ctx).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(script = %script.script_name, error = %e, "CGI request failed");
                let mut resp = self.error_response(e.status());
                if e.is_timeout() {
                    resp.close = true;
                }
                resp
            }
        }
    }
}
