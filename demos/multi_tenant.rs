//! Two sites in one process, one of them behind bearer auth.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example multi_tenant
//!
//! Try:
//!   curl -H 'host: www.example.com' http://localhost:8080/
//!   curl -H 'host: api.example.com' http://localhost:8080/me
//!   curl -H 'host: api.example.com' -H 'authorization: Bearer demo-alice' http://localhost:8080/me
//!   curl -H 'host: api.example.com' 'http://localhost:8080/me?_jwt=demo-bob'
//!   curl -H 'host: unknown.example.com' http://localhost:8080/

use std::sync::Arc;

use http::StatusCode;
use portico::middleware::bearer::{BearerAuth, Token, TokenVerifier};
use portico::{Application, IntoResponse, MemoryStore, Request, Response, Router};
use tracing::info_span;
use tracing_subscriber::EnvFilter;

/// Accepts `demo-<name>` and rejects the name `mallory`.
struct DemoVerifier;

struct DemoToken {
    user: String,
}

impl TokenVerifier for DemoVerifier {
    type Token = DemoToken;
    type Error = &'static str;

    fn parse_raw(&self, raw: &str) -> Result<DemoToken, Self::Error> {
        let user = raw.strip_prefix("demo-").ok_or("not a demo token")?;
        Ok(DemoToken { user: user.to_owned() })
    }
}

impl Token for DemoToken {
    type Error = &'static str;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.user == "mallory" { Err("revoked") } else { Ok(()) }
    }
}

#[derive(Clone)]
struct User(String);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut app = Application::new();
    app.set_session_store(Arc::new(MemoryStore::new()));
    app.set_logger(info_span!("site", host = "default"));

    let auth = BearerAuth::new(DemoVerifier)
        .on_success(|req, token: &DemoToken| {
            req.extensions_mut().insert(User(token.user.clone()));
        })
        .on_error(|_req: Request| async {
            Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .header("www-authenticate", "Bearer")
                .no_body()
        });

    app.add_router(
        "api.example.com",
        Router::new()
            .get("/me", me)
            .with(auth)
            .with_logger(info_span!("site", host = "api.example.com")),
    );
    app.add_router("www.example.com", Router::new().get("/", |_req: Request| async { "www" }));
    app.add_router("", Router::new().get("/", |_req: Request| async { "default site" }));

    if let Err(e) = app.run().await {
        eprintln!("fatal: {e}");
        std::process::exit(1);
    }
}

// GET /me on api.example.com, only reached with a valid token.
async fn me(req: Request) -> Response {
    match req.extensions().get::<User>() {
        Some(User(name)) => Response::json(format!(r#"{{"user":"{name}"}}"#)),
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
