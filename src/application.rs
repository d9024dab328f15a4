//! Process entry point.
//!
//! An [`Application`] owns the router registry and the transport
//! [`Config`]. Register routers during startup, then call
//! [`run`](Application::run) once; it consumes the application, so the
//! registry cannot change while requests are served.

use std::sync::Arc;

use tracing::{Span, error};

use crate::config::{Config, ServerType};
use crate::error::Error;
use crate::registry::{EntryPoint, RouterRegistry};
use crate::router::Router;
use crate::server::{
    listen_and_serve, listen_and_serve_tls, listen_and_serve_tls_embed, listen_and_serve_unix,
};
use crate::session::SessionStore;

#[derive(Debug, Default)]
pub struct Application {
    registry: RouterRegistry,
    config: Config,
}

impl Application {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Self { registry: RouterRegistry::new(), config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Span inherited by routers added afterwards that have none.
    pub fn set_logger(&mut self, span: Span) {
        self.registry.set_logger(span);
    }

    /// Session store inherited by routers added afterwards that have none.
    pub fn set_session_store(&mut self, store: Arc<dyn SessionStore>) {
        self.registry.set_session_store(store);
    }

    /// See [`RouterRegistry::set_default_router`].
    pub fn set_default_router(&mut self, router: Router) {
        self.registry.set_default_router(router);
    }

    /// Serves `router` for requests whose host is `domain`. An empty
    /// `domain` makes it the default router. See
    /// [`RouterRegistry::register`].
    pub fn add_router(&mut self, domain: impl Into<String>, router: Router) {
        self.registry.register(domain, router);
    }

    pub fn registry(&self) -> &RouterRegistry {
        &self.registry
    }

    /// The handler [`run`](Self::run) would serve, for embedding the
    /// application in another transport.
    pub fn into_entry_point(self) -> Result<EntryPoint, Error> {
        if self.registry.is_empty() {
            return Err(Error::NoRouter);
        }
        Ok(self.registry.select_entry_point())
    }

    /// Starts the transport selected by the config and serves until
    /// shutdown.
    ///
    /// Every error is fatal and returned without retry: no registered
    /// router (checked before any socket is touched), an invalid config, or
    /// a transport that fails to start. Each is logged before it is
    /// returned; the caller is expected to exit the process.
    pub async fn run(self) -> Result<(), Error> {
        let Self { registry, config } = self;

        if registry.is_empty() {
            error!("no router registered, nothing to serve");
            return Err(Error::NoRouter);
        }
        if let Err(e) = config.validate() {
            error!(error = %e, "invalid server config");
            return Err(e);
        }

        let handler = registry.select_entry_point().into_handler();

        let addr = config.server_addr.as_str();
        let result = match config.server_type {
            ServerType::Unix => listen_and_serve_unix(addr, config.server_mode, handler).await,
            ServerType::Tls => {
                listen_and_serve_tls(addr, &config.server_cert_file, &config.server_key_file, handler)
                    .await
            }
            ServerType::TlsEmbed => {
                listen_and_serve_tls_embed(addr, &config.server_cert_data, &config.server_key_data, handler)
                    .await
            }
            ServerType::Plain => listen_and_serve(addr, handler).await,
        };

        if let Err(e) = &result {
            error!(server_type = ?config.server_type, addr, error = %e, "server failed");
        }
        result
    }
}
