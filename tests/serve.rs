//! End-to-end: a real listener, raw HTTP/1.1 on the wire.

use std::net::SocketAddr;
use std::sync::Arc;

use http::StatusCode;
use portico::middleware::bearer::{BearerAuth, Token, TokenVerifier};
use portico::{Application, BoxedHandler, Request, Response, Router, Server};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};

struct Verifier;
struct Name(String);

impl TokenVerifier for Verifier {
    type Token = Name;
    type Error = &'static str;

    fn parse_raw(&self, raw: &str) -> Result<Name, Self::Error> {
        raw.strip_prefix("ok-").map(|n| Name(n.to_owned())).ok_or("unknown token")
    }
}

impl Token for Name {
    type Error = &'static str;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.0.is_empty() { Err("empty subject") } else { Ok(()) }
    }
}

#[derive(Clone)]
struct Subject(String);

fn site(name: &'static str) -> Router {
    Router::new().get("/", move |_req: Request| async move { name })
}

fn app() -> Application {
    let auth = BearerAuth::new(Verifier).on_success(|req, name: &Name| {
        req.extensions_mut().insert(Subject(name.0.clone()));
    });
    let api = Router::new()
        .get("/whoami", |req: Request| async move {
            match req.extensions().get::<Subject>() {
                Some(Subject(s)) => Response::text(s.clone()),
                None => Response::status(StatusCode::INTERNAL_SERVER_ERROR),
            }
        })
        .with(auth);

    let mut app = Application::new();
    app.add_router("api.example.com", api);
    app.add_router("www.example.com", site("www"));
    app.add_router("", site("default"));
    app
}

struct Running {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), portico::Error>>,
}

async fn start(handler: BoxedHandler) -> Running {
    run(Server::bind("127.0.0.1:0").await.unwrap(), handler)
}

fn run(server: Server, handler: BoxedHandler) -> Running {
    let addr = server.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(server.serve_with_shutdown(handler, async move {
        let _ = stopped.await;
    }));
    Running { addr, stop, task }
}

impl Running {
    async fn shutdown(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap().unwrap();
    }
}

async fn exchange<S>(mut stream: S, host: &str, target: &str, extra: &[(&str, &str)]) -> (u16, String)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = format!("GET {target} HTTP/1.1\r\nhost: {host}\r\nconnection: close\r\n");
    for (name, value) in extra {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    // A TLS peer may close without close_notify; what was read still counts.
    let mut raw = Vec::new();
    if let Err(e) = stream.read_to_end(&mut raw).await {
        assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof, "{e}");
    }
    let text = String::from_utf8(raw).unwrap();

    let status = text[9..12].parse().unwrap();
    let body = text.split_once("\r\n\r\n").map(|(_, b)| b.to_owned()).unwrap_or_default();
    (status, body)
}

async fn get(addr: SocketAddr, host: &str, target: &str, extra: &[(&str, &str)]) -> (u16, String) {
    exchange(TcpStream::connect(addr).await.unwrap(), host, target, extra).await
}

#[tokio::test]
async fn routes_by_host_with_default_fallback() {
    let handler = app().into_entry_point().unwrap().into_handler();
    let server = start(handler).await;

    assert_eq!(get(server.addr, "www.example.com", "/", &[]).await, (200, "www".to_owned()));
    assert_eq!(get(server.addr, "www.example.com:8080", "/", &[]).await, (200, "www".to_owned()));
    assert_eq!(get(server.addr, "other.example.com", "/", &[]).await, (200, "default".to_owned()));
    assert_eq!(get(server.addr, "www.example.com", "/missing", &[]).await.0, 404);

    server.shutdown().await;
}

#[tokio::test]
async fn bearer_auth_gates_one_site() {
    let handler = app().into_entry_point().unwrap().into_handler();
    let server = start(handler).await;
    let api = "api.example.com";

    assert_eq!(get(server.addr, api, "/whoami", &[]).await, (401, String::new()));
    assert_eq!(get(server.addr, api, "/whoami", &[("authorization", "Bearer nope")]).await.0, 401);
    assert_eq!(get(server.addr, api, "/whoami", &[("authorization", "Bearer ok-")]).await.0, 401);
    assert_eq!(
        get(server.addr, api, "/whoami", &[("authorization", "Bearer ok-alice")]).await,
        (200, "alice".to_owned()),
    );
    assert_eq!(
        get(server.addr, api, "/whoami?_jwt=ok-bob", &[("authorization", "Bearer ok-alice")]).await,
        (200, "bob".to_owned()),
    );

    // The default site is not behind auth.
    assert_eq!(get(server.addr, "www.example.com", "/", &[]).await.0, 200);

    server.shutdown().await;
}

#[tokio::test]
async fn shutdown_returns_cleanly_without_traffic() {
    let server = start(site("idle").into_handler()).await;
    server.shutdown().await;
}

/// Self-signed `localhost` certificate: (cert PEM, key PEM, cert DER).
fn self_signed() -> (String, String, CertificateDer<'static>) {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
    (cert.pem(), key_pair.serialize_pem(), cert.der().clone())
}

fn tls_connector(ca: CertificateDer<'static>, alpn: &[&[u8]]) -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.add(ca).unwrap();
    let mut config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    TlsConnector::from(Arc::new(config))
}

#[tokio::test]
async fn tls_serves_host_dispatched_requests() {
    let (cert, key, ca) = self_signed();
    let handler = app().into_entry_point().unwrap().into_handler();
    let server = Server::bind_tls("127.0.0.1:0", cert.as_bytes(), key.as_bytes()).await.unwrap();
    let server = run(server, handler);
    let localhost = ServerName::try_from("localhost").unwrap();

    // Both protocols offered: the server picks HTTP/2.
    let tcp = TcpStream::connect(server.addr).await.unwrap();
    let tls = tls_connector(ca.clone(), &[b"h2", b"http/1.1"])
        .connect(localhost.clone(), tcp)
        .await
        .unwrap();
    assert_eq!(tls.get_ref().1.alpn_protocol(), Some(&b"h2"[..]));
    drop(tls);

    let connector = tls_connector(ca, &[b"http/1.1"]);
    for (host, target, extra, want) in [
        ("www.example.com", "/", &[][..], (200, "www")),
        ("other.example.com:443", "/", &[][..], (200, "default")),
        ("api.example.com", "/whoami", &[("authorization", "Bearer ok-alice")][..], (200, "alice")),
        ("api.example.com", "/whoami", &[][..], (401, "")),
    ] {
        let tcp = TcpStream::connect(server.addr).await.unwrap();
        let tls = connector.connect(localhost.clone(), tcp).await.unwrap();
        assert_eq!(tls.get_ref().1.alpn_protocol(), Some(&b"http/1.1"[..]));
        assert_eq!(exchange(tls, host, target, extra).await, (want.0, want.1.to_owned()), "{host}{target}");
    }

    server.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn unix_socket_replaces_stale_file_and_applies_mode() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("portico.sock");
    std::fs::write(&path, b"stale").unwrap();

    let server = Server::bind_unix(&path, 0o600).await.unwrap();
    assert!(server.local_addr().is_none());
    let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);

    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(server.serve_with_shutdown(site("unix").into_handler(), async move {
        let _ = stopped.await;
    }));

    let stream = tokio::net::UnixStream::connect(&path).await.unwrap();
    assert_eq!(exchange(stream, "localhost", "/", &[]).await, (200, "unix".to_owned()));

    let _ = stop.send(());
    task.await.unwrap().unwrap();
}
