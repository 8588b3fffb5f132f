//! Fixture configuration
//!
//! [`ServerOptions`] carries the pluggable parts of a fixture (how
//! connections are handled, how the socket is bound, extra environment);
//! [`ServerBuilder`] adds the address and the application on top.

use super::listener::{ListenerFactory, PlainListenerFactory, TlsListenerFactory};
use super::{Error, Result, Scheme, Server};
use crate::app::Application;
use crate::http::{Environ, HandlerFactory, StandardHandlerFactory};
use std::env::{self, VarError};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Pluggable parts of a fixture
#[derive(Clone)]
pub struct ServerOptions {
    pub handler_factory: Arc<dyn HandlerFactory>,
    pub listener_factory: Arc<dyn ListenerFactory>,
    pub extra_base_environ: Environ,
}

impl ServerOptions {
    /// Options for an HTTPS fixture using the bundled certificates
    pub fn secure() -> Self {
        ServerOptions {
            listener_factory: Arc::new(TlsListenerFactory::default()),
            ..Self::default()
        }
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            handler_factory: Arc::new(StandardHandlerFactory::new()),
            listener_factory: Arc::new(PlainListenerFactory),
            extra_base_environ: Environ::new(),
        }
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("scheme", &self.listener_factory.scheme())
            .field("extra_base_environ", &self.extra_base_environ)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Server`]
///
/// ```no_run
/// use httpbin_fixture::{app, Server};
/// use bytes::Bytes;
///
/// let server = Server::builder()
///     .port(0)
///     .tls()
///     .application(app::from_fn(|_environ, _input, start| {
///         start.start("200 OK", [("Content-Type", "text/plain")])?;
///         Ok(vec![Bytes::from_static(b"hi")])
///     }))
///     .build()
///     .unwrap();
/// ```
pub struct ServerBuilder {
    host: String,
    port: u16,
    options: ServerOptions,
    app: Option<Arc<dyn Application>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        ServerBuilder {
            host: "127.0.0.1".to_string(),
            port: 0,
            options: ServerOptions::default(),
            app: None,
        }
    }

    /// Interface to bind; defaults to `127.0.0.1`
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Port to bind; `0` (the default) lets the OS choose
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Application to serve
    pub fn application<A: Application + 'static>(mut self, app: A) -> Self {
        self.app = Some(Arc::new(app));
        self
    }

    /// Application already shared with other fixtures
    pub fn shared_application(mut self, app: Arc<dyn Application>) -> Self {
        self.app = Some(app);
        self
    }

    /// Serve HTTPS with the bundled certificates
    pub fn tls(mut self) -> Self {
        self.options.listener_factory = Arc::new(TlsListenerFactory::default());
        self
    }

    /// Serve HTTPS with the given certificate chain and key
    pub fn tls_files(mut self, cert_file: impl AsRef<Path>, key_file: impl AsRef<Path>) -> Self {
        self.options.listener_factory = Arc::new(TlsListenerFactory::new(cert_file, key_file));
        self
    }

    pub fn handler_factory<H: HandlerFactory + 'static>(mut self, factory: H) -> Self {
        self.options.handler_factory = Arc::new(factory);
        self
    }

    pub fn listener_factory<L: ListenerFactory + 'static>(mut self, factory: L) -> Self {
        self.options.listener_factory = Arc::new(factory);
        self
    }

    /// Add a key to every request's environment
    pub fn base_environ(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.extra_base_environ.insert(key, value);
        self
    }

    /// Replace all pluggable parts at once
    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// Bind the listening socket; the server is not started yet
    pub fn build(self) -> Result<Server> {
        let app = self.app.ok_or(Error::NoApplication)?;
        Server::with_options(&self.host, self.port, app, self.options)
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Port forced through the environment for `scheme`, if any
pub(crate) fn port_override(scheme: Scheme) -> Result<Option<u16>> {
    let var = scheme.port_envvar();
    match env::var(var) {
        Ok(value) => match value.trim().parse::<u16>() {
            Ok(port) => Ok(Some(port)),
            Err(_) => Err(Error::PortOverride { var, value }),
        },
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(raw)) => Err(Error::PortOverride {
            var,
            value: raw.to_string_lossy().into_owned(),
        }),
    }
}
