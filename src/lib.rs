//! # portico
//!
//! One process, many sites. portico picks a router by the request's `Host`
//! and runs it behind a chain of middleware.
//!
//! ## The model
//!
//! ```text
//! transport ──▶ entry point ──▶ RouterRegistry ──▶ Router ──▶ M1 ──▶ M2 ──▶ route handler
//!                                  │ host lookup,               │ each middleware may
//!                                  │ default on miss            │ answer and stop here
//! ```
//!
//! - **Host dispatch** — routers are registered per domain; unknown hosts
//!   fall back to the default router. With one router on the empty domain,
//!   the host is never looked at.
//! - **Middleware** — an ordered [`Chain`](middleware::Chain) folded around
//!   the router once at startup. [`BearerAuth`](middleware::bearer::BearerAuth)
//!   ships in the box.
//! - **Transport** — plain TCP, Unix socket, or TLS (from files or embedded
//!   PEM), HTTP/1.1 + HTTP/2, graceful shutdown on SIGTERM / Ctrl-C.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use portico::{Application, Request, Response, Router};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut app = Application::new();
//!     app.add_router("api.example.com", Router::new().get("/users/{id}", get_user));
//!     app.add_router("", Router::new().get("/", |_req: Request| async { "welcome" }));
//!
//!     if let Err(e) = app.run().await {
//!         eprintln!("fatal: {e}");
//!         std::process::exit(1);
//!     }
//! }
//!
//! async fn get_user(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#))
//! }
//! ```

mod application;
mod config;
mod error;
mod handler;
mod registry;
mod request;
mod response;
mod router;
mod server;
mod session;

pub mod middleware;

pub use application::Application;
pub use config::{Config, ServerType};
pub use error::Error;
pub use handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, boxed};
pub use registry::{EntryPoint, RouterRegistry};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::{
    Server, listen_and_serve, listen_and_serve_tls, listen_and_serve_tls_embed,
    listen_and_serve_unix,
};
pub use session::{MemoryStore, SessionStore};
