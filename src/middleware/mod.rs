//! Middleware layer.
//!
//! A middleware receives the *next* handler and returns a new handler that
//! runs in front of it. At request time the new handler either calls
//! `next.call(req)` or answers the request itself (a short-circuit). There is
//! no other channel between layers: a middleware that stops the chain owns
//! the complete response.
//!
//! # Composition order
//!
//! [`Chain`] folds its layers right to left around a terminal handler:
//!
//! ```text
//! Chain [M1, M2, M3] .then(T)   ==   M1.handle(M2.handle(M3.handle(T)))
//!
//! request ──▶ M1 ──▶ M2 ──▶ M3 ──▶ T
//!                 ◀── response ◀──
//! ```
//!
//! The first layer added runs first and returns last. Composition happens
//! once, when a router is registered; per request it costs one virtual call
//! per layer.
//!
//! # Writing middleware
//!
//! Any `Fn(BoxedHandler) -> BoxedHandler` is a middleware:
//!
//! ```rust
//! use http::StatusCode;
//! use portico::{BoxedHandler, Request, IntoResponse, boxed};
//!
//! fn require_json(next: BoxedHandler) -> BoxedHandler {
//!     boxed(move |req: Request| {
//!         let next = next.clone();
//!         async move {
//!             if req.header("content-type") != Some("application/json") {
//!                 return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
//!             }
//!             next.call(req).await
//!         }
//!     })
//! }
//! ```
//!
//! Built-in middleware:
//! - [`bearer::BearerAuth`] — bearer-token authentication

pub mod bearer;

use std::fmt;
use std::sync::Arc;

use crate::handler::BoxedHandler;

/// A unit of request processing wrapped around the next handler.
///
/// Implementations keep only configuration in `self`; everything that varies
/// per request lives in the request or in the returned handler's future.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, next: BoxedHandler) -> BoxedHandler;
}

impl<F> Middleware for F
where
    F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
{
    fn handle(&self, next: BoxedHandler) -> BoxedHandler {
        self(next)
    }
}

/// An ordered list of middleware, composed around a terminal handler with
/// [`Chain::then`].
#[derive(Clone, Default)]
pub struct Chain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `middleware` as the innermost layer so far.
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.push(middleware);
        self
    }

    pub fn push(&mut self, middleware: impl Middleware) {
        self.layers.push(Arc::new(middleware));
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Wraps every layer around `terminal`, outermost first.
    ///
    /// Calling this twice on the same chain yields handlers that behave
    /// identically; the chain itself is not consumed.
    pub fn then(&self, terminal: BoxedHandler) -> BoxedHandler {
        self.layers
            .iter()
            .rev()
            .fold(terminal, |next, layer| layer.handle(next))
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("layers", &self.layers.len()).finish()
    }
}
