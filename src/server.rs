//! HTTP transport and graceful shutdown.
//!
//! Four ways to serve one entry-point handler, each binding a listener and
//! then running the same accept loop:
//!
//! | Function | Listener |
//! |---|---|
//! | [`listen_and_serve`] | TCP |
//! | [`listen_and_serve_unix`] | Unix-domain socket, chmod'ed to `mode` |
//! | [`listen_and_serve_tls`] | TCP + TLS, PEM certificate and key files |
//! | [`listen_and_serve_tls_embed`] | TCP + TLS, PEM certificate and key bytes |
//!
//! Every connection runs on its own task. HTTP/1.1 and HTTP/2 are
//! negotiated automatically (ALPN under TLS).
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or **Ctrl-C** the server stops accepting, lets every
//! in-flight connection finish, then returns. Set the orchestrator's grace
//! period longer than your slowest request.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::{self, ServerConfig};
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::response::Response;

// ── Transport start routines ─────────────────────────────────────────────────

/// Serves `handler` over plain TCP until shutdown.
pub async fn listen_and_serve(addr: &str, handler: BoxedHandler) -> Result<(), Error> {
    Server::bind(addr).await?.serve(handler).await
}

/// Serves `handler` on a Unix-domain socket at `path` until shutdown.
///
/// A stale socket file at `path` is removed first; the new socket file gets
/// the permission bits `mode`. Fails with an `Unsupported` I/O error on
/// platforms without Unix sockets.
pub async fn listen_and_serve_unix(
    path: impl AsRef<Path>,
    mode: u32,
    handler: BoxedHandler,
) -> Result<(), Error> {
    #[cfg(unix)]
    {
        Server::bind_unix(path, mode).await?.serve(handler).await
    }

    #[cfg(not(unix))]
    {
        let _ = (path, mode, handler);
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "unix sockets are not available on this platform",
        )))
    }
}

/// Serves `handler` over TLS with a PEM certificate chain and private key
/// read from disk.
pub async fn listen_and_serve_tls(
    addr: &str,
    cert_file: impl AsRef<Path>,
    key_file: impl AsRef<Path>,
    handler: BoxedHandler,
) -> Result<(), Error> {
    let cert = read_pem(cert_file.as_ref()).await?;
    let key = read_pem(key_file.as_ref()).await?;
    Server::bind_tls(addr, &cert, &key).await?.serve(handler).await
}

/// Serves `handler` over TLS with a PEM certificate chain and private key
/// held in memory.
pub async fn listen_and_serve_tls_embed(
    addr: &str,
    cert_pem: &[u8],
    key_pem: &[u8],
    handler: BoxedHandler,
) -> Result<(), Error> {
    Server::bind_tls(addr, cert_pem, key_pem).await?.serve(handler).await
}

// ── Server ────────────────────────────────────────────────────────────────────

/// A bound listener, ready to serve.
///
/// Binding and serving are separate steps so callers can learn the actual
/// address (for example after binding port `0`) before requests flow.
pub struct Server {
    listener: Listener,
}

enum Listener {
    Tcp(TcpListener),
    Tls(TcpListener, TlsAcceptor),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

enum Connection {
    Tcp(TcpStream),
    Tls(TcpStream, TlsAcceptor),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl Server {
    /// Binds a TCP listener to `addr` (`host:port`).
    pub async fn bind(addr: &str) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener: Listener::Tcp(listener) })
    }

    /// Binds a TCP listener that terminates TLS with the given PEM
    /// certificate chain and private key.
    pub async fn bind_tls(addr: &str, cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, Error> {
        let acceptor = tls_acceptor(cert_pem, key_pem)?;
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener: Listener::Tls(listener, acceptor) })
    }

    /// Binds a Unix-domain socket at `path` with permission bits `mode`,
    /// replacing any file already there.
    #[cfg(unix)]
    pub async fn bind_unix(path: impl AsRef<Path>, mode: u32) -> Result<Self, Error> {
        use std::os::unix::fs::PermissionsExt;

        let path = path.as_ref();
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "removed stale unix socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let listener = tokio::net::UnixListener::bind(path)?;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
        Ok(Self { listener: Listener::Unix(listener) })
    }

    /// The bound TCP address; `None` for Unix sockets.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listener {
            Listener::Tcp(l) | Listener::Tls(l, _) => l.local_addr().ok(),
            #[cfg(unix)]
            Listener::Unix(_) => None,
        }
    }

    /// Serves `handler` until SIGTERM or Ctrl-C, then drains in-flight
    /// connections.
    pub async fn serve(self, handler: BoxedHandler) -> Result<(), Error> {
        self.serve_with_shutdown(handler, shutdown_signal()).await
    }

    /// Serves `handler` until `signal` resolves, then drains in-flight
    /// connections.
    pub async fn serve_with_shutdown(
        self,
        handler: BoxedHandler,
        signal: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        info!(listener = %self.listener, "portico listening");

        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Check shutdown first so a signal stops accepting at once,
                // even with connections still queued.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = self.listener.accept() => {
                    let (conn, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };
                    let handler = Arc::clone(&handler);
                    tasks.spawn(async move { conn.serve(handler, peer).await });
                }

                // Reap finished tasks so the set does not grow without bound.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("portico stopped");
        Ok(())
    }
}

impl Listener {
    async fn accept(&self) -> std::io::Result<(Connection, String)> {
        match self {
            Self::Tcp(l) => {
                let (stream, peer) = l.accept().await?;
                Ok((Connection::Tcp(stream), peer.to_string()))
            }
            Self::Tls(l, acceptor) => {
                let (stream, peer) = l.accept().await?;
                Ok((Connection::Tls(stream, acceptor.clone()), peer.to_string()))
            }
            #[cfg(unix)]
            Self::Unix(l) => {
                let (stream, peer) = l.accept().await?;
                Ok((Connection::Unix(stream), format!("{peer:?}")))
            }
        }
    }
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(l) => write!(f, "http://{}", display_addr(l)),
            Self::Tls(l, _) => write!(f, "https://{}", display_addr(l)),
            #[cfg(unix)]
            Self::Unix(l) => match l.local_addr().ok().and_then(|a| a.as_pathname().map(Path::to_path_buf)) {
                Some(path) => write!(f, "unix:{}", path.display()),
                None => f.write_str("unix:?"),
            },
        }
    }
}

fn display_addr(listener: &TcpListener) -> String {
    listener.local_addr().map_or_else(|_| "?".to_owned(), |a| a.to_string())
}

impl Connection {
    async fn serve(self, handler: BoxedHandler, peer: String) {
        match self {
            Self::Tcp(stream) => serve_io(stream, handler, &peer).await,
            Self::Tls(stream, acceptor) => match acceptor.accept(stream).await {
                Ok(stream) => serve_io(stream, handler, &peer).await,
                Err(e) => warn!(peer = %peer, "tls handshake failed: {e}"),
            },
            #[cfg(unix)]
            Self::Unix(stream) => serve_io(stream, handler, &peer).await,
        }
    }
}

async fn serve_io<S>(stream: S, handler: BoxedHandler, peer: &str)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // `service_fn` is called once per request on the connection.
    let svc = service_fn(move |req| {
        let handler = Arc::clone(&handler);
        async move { dispatch(handler, req).await }
    });

    // `auto::Builder` serves HTTP/1.1 and HTTP/2, whichever the client speaks.
    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(stream), svc)
        .await
    {
        error!(peer = %peer, "connection error: {e}");
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Collects the body and runs the entry-point handler.
///
/// Failures become responses, so hyper never sees an error.
async fn dispatch(
    handler: BoxedHandler,
    req: hyper::Request<Incoming>,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("request body read failed: {e}");
            return Ok(Response::status(StatusCode::BAD_REQUEST).into_inner());
        }
    };

    let response = handler.call(Request::new(parts, body)).await;
    Ok(response.into_inner())
}

// ── TLS ───────────────────────────────────────────────────────────────────────

async fn read_pem(path: &Path) -> Result<Vec<u8>, Error> {
    tokio::fs::read(path)
        .await
        .map_err(|e| Error::Tls(format!("reading {}: {e}", path.display())))
}

fn tls_acceptor(cert_pem: &[u8], key_pem: &[u8]) -> Result<TlsAcceptor, Error> {
    let mut reader = cert_pem;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("invalid certificate: {e}")))?;
    if certs.is_empty() {
        return Err(Error::Tls("no certificate found in PEM data".into()));
    }

    let mut reader = key_pem;
    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::Tls(format!("invalid private key: {e}")))?
        .ok_or_else(|| Error::Tls("no private key found in PEM data".into()))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** and **SIGINT** (Ctrl-C). On
/// Windows only Ctrl-C is available. A signal that cannot be installed is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
