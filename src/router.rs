//! Per-domain request router.
//!
//! One radix tree per HTTP method, O(path-length) lookup, wrapped in the
//! router's own middleware [`Chain`]. A router is the unit the
//! [`RouterRegistry`](crate::RouterRegistry) selects by host; everything
//! after that selection happens here.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;
use tracing::{Instrument, Span};

use crate::handler::{BoxedHandler, Handler, boxed};
use crate::middleware::{Chain, Middleware};
use crate::request::Request;
use crate::response::Response;
use crate::session::SessionStore;

/// A router for one domain.
///
/// Build it once at startup, then hand it to
/// [`Application::add_router`](crate::Application::add_router). Each builder
/// method returns `self` so registrations chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
    chain: Chain,
    not_found: BoxedHandler,
    session_store: Option<Arc<dyn SessionStore>>,
    logger: Option<Span>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            chain: Chain::new(),
            not_found: boxed(not_found),
            session_store: None,
            logger: None,
        }
    }

    /// Register a handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax and are read with
    /// [`Request::param`]:
    ///
    /// ```rust
    /// # use http::Method;
    /// # use portico::{Request, Response, Router};
    /// # async fn get_user(_: Request) -> Response { Response::text("") }
    /// Router::new().on(Method::GET, "/users/{id}", get_user);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for `method`.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, boxed(handler))
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PUT, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, path, handler)
    }

    /// Appends a middleware. Middleware runs in the order it is added, around
    /// every route of this router, including the not-found handler.
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.chain.push(middleware);
        self
    }

    /// Handler for requests no route matches. Defaults to `404`.
    pub fn fallback(mut self, handler: impl Handler) -> Self {
        self.not_found = boxed(handler);
        self
    }

    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Span every request of this router runs inside.
    pub fn with_logger(mut self, span: Span) -> Self {
        self.logger = Some(span);
        self
    }

    pub fn session_store(&self) -> Option<&Arc<dyn SessionStore>> {
        self.session_store.as_ref()
    }

    pub fn logger(&self) -> Option<&Span> {
        self.logger.as_ref()
    }

    /// Composes the middleware chain around the route table, yielding the
    /// handler the transport can serve directly.
    pub fn into_handler(self) -> BoxedHandler {
        Arc::new(self).entry()
    }

    /// Fills in a session store and logger the router does not have yet.
    /// Values the router already carries are kept.
    pub(crate) fn inherit(&mut self, store: Option<&Arc<dyn SessionStore>>, logger: Option<&Span>) {
        if self.session_store.is_none() {
            self.session_store = store.cloned();
        }
        if self.logger.is_none() {
            self.logger = logger.cloned();
        }
    }

    /// Builds the router's entry handler: attach the session store, enter
    /// the router span, run the chain, dispatch by method and path.
    pub(crate) fn entry(self: &Arc<Self>) -> BoxedHandler {
        let router = Arc::clone(self);
        let terminal = boxed(move |req: Request| {
            let router = Arc::clone(&router);
            async move { router.dispatch(req).await }
        });

        let chain = self.chain.then(terminal);
        let store = self.session_store.clone();
        let span = self.logger.clone().unwrap_or_else(Span::none);

        boxed(move |mut req: Request| {
            req.set_session_store(store.clone());
            chain.call(req).instrument(span.clone())
        })
    }

    async fn dispatch(&self, mut req: Request) -> Response {
        match self.lookup(req.method(), req.path()) {
            Some((handler, params)) => {
                req.set_params(params);
                handler.call(req).await
            }
            None => self.not_found.call(req).await,
        }
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("methods", &self.routes.keys().collect::<Vec<_>>())
            .field("middleware", &self.chain.len())
            .field("session_store", &self.session_store.is_some())
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

async fn not_found(_req: Request) -> StatusCode {
    StatusCode::NOT_FOUND
}
