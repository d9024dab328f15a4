//! Host-based router selection.
//!
//! The registry is a lookup with a guaranteed fallback, not a general map:
//! it only exposes [`register`](RouterRegistry::register),
//! [`resolve`](RouterRegistry::resolve) and
//! [`select_entry_point`](RouterRegistry::select_entry_point), and
//! `resolve` always yields a router.
//!
//! # Lifecycle
//!
//! Routers are registered during single-threaded startup. Selecting the
//! entry point consumes the registry and freezes it behind an `Arc`, so
//! request tasks read it without locks and nothing can register a router
//! while requests are being served.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::Span;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::request::Request;
use crate::router::Router;
use crate::session::SessionStore;

/// A router plus its composed entry handler.
#[derive(Clone)]
struct Mounted {
    router: Arc<Router>,
    entry: BoxedHandler,
}

impl Mounted {
    fn new(router: Router) -> Self {
        let router = Arc::new(router);
        let entry = router.entry();
        Self { router, entry }
    }
}

/// Routers keyed by domain, plus the default router.
pub struct RouterRegistry {
    routers: HashMap<String, Mounted>,
    default: Mounted,
    session_store: Option<Arc<dyn SessionStore>>,
    logger: Option<Span>,
}

impl RouterRegistry {
    /// An empty registry whose default router answers `404` to everything.
    pub fn new() -> Self {
        Self {
            routers: HashMap::new(),
            default: Mounted::new(Router::new()),
            session_store: None,
            logger: None,
        }
    }

    /// Session store handed to routers registered from now on that have
    /// none of their own.
    pub fn set_session_store(&mut self, store: Arc<dyn SessionStore>) {
        self.session_store = Some(store);
    }

    /// Span handed to routers registered from now on that have none of
    /// their own.
    pub fn set_logger(&mut self, span: Span) {
        self.logger = Some(span);
    }

    /// Replaces the default router without registering it under any domain.
    ///
    /// The router keeps exactly the session store and logger it was built
    /// with, and it does not count towards [`len`](Self::len).
    pub fn set_default_router(&mut self, router: Router) {
        self.default = Mounted::new(router);
    }

    /// Associates `router` with `domain`; the last registration for a domain
    /// wins.
    ///
    /// The router inherits the registry's session store and logger if it has
    /// none of its own. This happens once, here: later `set_session_store` or
    /// `set_logger` calls do not reach routers that are already registered.
    ///
    /// Registering under the empty domain also makes `router` the default.
    pub fn register(&mut self, domain: impl Into<String>, mut router: Router) {
        router.inherit(self.session_store.as_ref(), self.logger.as_ref());

        let domain = domain.into();
        let mounted = Mounted::new(router);
        if domain.is_empty() {
            self.default = mounted.clone();
        }
        self.routers.insert(domain, mounted);
    }

    /// The router for `host`, or the default router.
    ///
    /// Any port suffix is ignored: `"example.com:8080"` and `"example.com"`
    /// resolve identically. Matching is case-sensitive.
    pub fn resolve(&self, host: &str) -> &Arc<Router> {
        &self.mounted_for(host).router
    }

    pub fn default_router(&self) -> &Arc<Router> {
        &self.default.router
    }

    /// Number of routers registered under a domain (the empty one included).
    pub fn len(&self) -> usize {
        self.routers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routers.is_empty()
    }

    /// Decides once how requests enter the registry.
    ///
    /// With a single router registered under the empty domain, its handler is
    /// served directly and hosts are never inspected. Otherwise every request
    /// is dispatched by host.
    pub fn select_entry_point(self) -> EntryPoint {
        if self.routers.len() == 1 {
            if let Some(sole) = self.routers.get("") {
                return EntryPoint::Direct(Arc::clone(&sole.entry));
            }
        }
        EntryPoint::ByHost(Arc::new(self))
    }

    fn mounted_for(&self, host: &str) -> &Mounted {
        let domain = host.split_once(':').map_or(host, |(domain, _port)| domain);
        self.routers.get(domain).unwrap_or(&self.default)
    }

    fn dispatch(&self, req: Request) -> BoxFuture {
        let mounted = self.mounted_for(req.host().unwrap_or_default());
        mounted.entry.call(req)
    }
}

impl Default for RouterRegistry {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for RouterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut domains: Vec<&str> = self.routers.keys().map(String::as_str).collect();
        domains.sort_unstable();
        f.debug_struct("RouterRegistry")
            .field("domains", &domains)
            .finish_non_exhaustive()
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// The single handler the transport calls for every request.
pub enum EntryPoint {
    /// The sole router's handler, no host lookup.
    Direct(BoxedHandler),
    /// Resolve a router by host on every request.
    ByHost(Arc<RouterRegistry>),
}

impl EntryPoint {
    pub fn bypasses_host(&self) -> bool {
        matches!(self, Self::Direct(_))
    }

    pub fn into_handler(self) -> BoxedHandler {
        match self {
            Self::Direct(handler) => handler,
            Self::ByHost(registry) => Arc::new(HostDispatch(registry)),
        }
    }
}

impl ErasedHandler for EntryPoint {
    fn call(&self, req: Request) -> BoxFuture {
        match self {
            Self::Direct(handler) => handler.call(req),
            Self::ByHost(registry) => registry.dispatch(req),
        }
    }
}

struct HostDispatch(Arc<RouterRegistry>);

impl ErasedHandler for HostDispatch {
    fn call(&self, req: Request) -> BoxFuture {
        self.0.dispatch(req)
    }
}
