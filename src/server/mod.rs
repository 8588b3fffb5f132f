//! The server fixture
//!
//! A [`Server`] binds a listening socket as soon as it is built, so its
//! address is known before anything runs. [`Server::start`] spawns one
//! worker thread running the accept loop; [`Server::stop`] wakes that loop
//! and joins the thread. Dropping a server stops it.
//!
//! ```no_run
//! use httpbin_fixture::{app, Server, TestClient};
//! use bytes::Bytes;
//!
//! let mut server = Server::new(app::from_fn(|environ, _input, start| {
//!     start.start("200 OK", [("Content-Type", "text/plain")])?;
//!     Ok(vec![Bytes::copy_from_slice(environ.get("PATH_INFO").unwrap_or("").as_bytes())])
//! }))
//! .unwrap();
//!
//! {
//!     let running = server.scope().unwrap();
//!     let response = TestClient::new().get(&running.join("/hello", true).unwrap()).unwrap();
//!     assert_eq!(response.body(), b"/hello");
//! }
//! assert!(!server.is_running());
//! ```

pub mod listener;
pub mod options;
mod reference;

pub use listener::{Listener, ListenerFactory, PlainListenerFactory, TlsListenerFactory};
pub use options::{ServerBuilder, ServerOptions};

use crate::app::Application;
use crate::http::tls::TlsError;
use crate::http::HandlerFactory;
use crate::net::{self, ShutdownSignal, ShutdownTrigger};
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::ops::{Add, Deref, DerefMut};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info_span, trace};
use url::Url;

/// Result type for fixture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Fixture errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Cannot resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("Invalid port in {var}: {value:?}")]
    PortOverride { var: &'static str, value: String },

    #[error("Server already started")]
    AlreadyStarted,

    #[error("Server has been stopped")]
    Stopped,

    #[error("No application configured")]
    NoApplication,

    #[error("Failed to spawn server thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("Cannot join {input:?} onto the server URL: {source}")]
    Join {
        input: String,
        #[source]
        source: url::ParseError,
    },
}

impl Error {
    /// Whether the listening address was already taken
    pub fn is_addr_in_use(&self) -> bool {
        matches!(self, Error::Bind { source, .. } if source.kind() == io::ErrorKind::AddrInUse)
    }
}

impl From<net::Error> for Error {
    fn from(err: net::Error) -> Self {
        match err {
            net::Error::Bind { addr, source } => Error::Bind { addr, source },
            net::Error::Io(e) => Error::Io(e),
        }
    }
}

/// URL scheme served by a fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// Environment variable that overrides the port for this scheme
    pub fn port_envvar(&self) -> &'static str {
        match self {
            Scheme::Http => "HTTPBIN_HTTP_PORT",
            Scheme::Https => "HTTPBIN_HTTPS_PORT",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Constructed,
    Started,
    Stopped,
}

/// An HTTP or HTTPS server hosting one application on a background thread
pub struct Server {
    host: String,
    port: u16,
    scheme: Scheme,
    local_addr: SocketAddr,
    app: Arc<dyn Application>,
    handler_factory: Arc<dyn HandlerFactory>,
    listener: Option<Listener>,
    trigger: ShutdownTrigger,
    signal: Option<ShutdownSignal>,
    worker: Option<JoinHandle<()>>,
    state: State,
}

impl Server {
    /// Plain HTTP fixture on `127.0.0.1`, OS-chosen port
    pub fn new<A: Application + 'static>(app: A) -> Result<Self> {
        ServerBuilder::new().application(app).build()
    }

    /// HTTPS fixture on `127.0.0.1` using the bundled certificates
    pub fn secure<A: Application + 'static>(app: A) -> Result<Self> {
        ServerBuilder::new().application(app).tls().build()
    }

    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Bind a fixture from explicit parts
    ///
    /// The port environment variable of the listener's scheme, when set,
    /// replaces `port`.
    pub fn with_options(
        host: &str,
        port: u16,
        app: Arc<dyn Application>,
        options: ServerOptions,
    ) -> Result<Self> {
        let scheme = options.listener_factory.scheme();
        let port = options::port_override(scheme)?.unwrap_or(port);
        let addr = resolve(host, port)?;

        let listener = options
            .listener_factory
            .bind(addr, &options.extra_base_environ)?;
        let local_addr = listener.local_addr();
        let (trigger, signal) = net::shutdown_channel()?;

        let server = Server {
            host: local_addr.ip().to_string(),
            port: local_addr.port(),
            scheme,
            local_addr,
            app,
            handler_factory: options.handler_factory,
            listener: Some(listener),
            trigger,
            signal: Some(signal),
            worker: None,
            state: State::Constructed,
        };
        debug!(url = %server.url(), "fixture bound");
        Ok(server)
    }

    /// Start serving on a background thread
    ///
    /// Returns as soon as the thread is spawned; the socket was already
    /// listening, so connections made from now on are served.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            State::Constructed => {}
            State::Started => return Err(Error::AlreadyStarted),
            State::Stopped => return Err(Error::Stopped),
        }

        let (Some(listener), Some(signal)) = (self.listener.take(), self.signal.take()) else {
            return Err(Error::Stopped);
        };
        let app = Arc::clone(&self.app);
        let handler = Arc::clone(&self.handler_factory);
        let span = info_span!("fixture", url = %self.url());

        let spawned = thread::Builder::new()
            .name(format!("httpbin-{}-{}", self.scheme, self.port))
            .spawn(move || {
                let _entered = span.enter();
                listener.serve(&signal, handler.as_ref(), app.as_ref());
            });

        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                self.state = State::Started;
                trace!(url = %self.url(), "fixture started");
                Ok(())
            }
            Err(err) => {
                // the listener went down with the closure
                self.state = State::Stopped;
                Err(Error::Spawn(err))
            }
        }
    }

    /// Stop serving and wait for the worker thread
    ///
    /// A request already being handled is completed first. Calling this on
    /// a server that never started, or that already stopped, does nothing.
    pub fn stop(&mut self) {
        if self.state != State::Started {
            return;
        }

        if let Err(err) = self.trigger.trigger() {
            debug!(error = %err, "failed to wake accept loop");
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(url = %self.url(), "fixture worker panicked");
            }
        }

        self.state = State::Stopped;
        trace!(url = %self.url(), "fixture stopped");
    }

    /// Start and return a guard that stops the server when dropped
    pub fn scope(&mut self) -> Result<ServerScope<'_>> {
        self.start()?;
        Ok(ServerScope { server: self })
    }

    /// Start and hand the server back; it stops when dropped
    pub fn serve(mut self) -> Result<Self> {
        self.start()?;
        Ok(self)
    }

    /// Base URL, e.g. `http://127.0.0.1:8080` (no trailing slash)
    pub fn url(&self) -> String {
        format!("{}://{}", self.scheme, self.authority())
    }

    /// Resolve `relative` against [`url`](Self::url)
    ///
    /// The reference is kept as written, so `"?a=1"` gives `url() + "?a=1"`
    /// and `"/a b"` is not percent-encoded. With `allow_fragments` off, a
    /// `#` in `relative` is literal text rather than starting a fragment.
    /// Fails when the result is not a valid URL.
    pub fn join(&self, relative: &str, allow_fragments: bool) -> Result<String> {
        if relative.is_empty() {
            return Ok(self.url());
        }

        let joined = reference::resolve(
            self.scheme.as_str(),
            &self.authority(),
            relative,
            allow_fragments,
        );
        Url::parse(&joined).map_err(|source| Error::Join {
            input: relative.to_string(),
            source,
        })?;
        Ok(joined)
    }

    /// [`url`](Self::url) with `suffix` appended verbatim
    pub fn concat(&self, suffix: &str) -> String {
        format!("{}{}", self.url(), suffix)
    }

    /// Bound IP address as text
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Bound port
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Scheme as text, `http` or `https`
    pub fn protocol(&self) -> &'static str {
        self.scheme.as_str()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the worker thread is serving
    pub fn is_running(&self) -> bool {
        self.state == State::Started
    }

    fn authority(&self) -> String {
        match self.local_addr.ip() {
            IpAddr::V4(ip) => format!("{}:{}", ip, self.port),
            IpAddr::V6(ip) => format!("[{}]:{}", ip, self.port),
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("url", &self.url())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Add<&str> for &Server {
    type Output = String;

    fn add(self, suffix: &str) -> String {
        self.concat(suffix)
    }
}

/// A started server; dropping the guard stops it
#[derive(Debug)]
pub struct ServerScope<'a> {
    server: &'a mut Server,
}

impl Deref for ServerScope<'_> {
    type Target = Server;

    fn deref(&self) -> &Server {
        self.server
    }
}

impl DerefMut for ServerScope<'_> {
    fn deref_mut(&mut self) -> &mut Server {
        self.server
    }
}

impl Drop for ServerScope<'_> {
    fn drop(&mut self) {
        self.server.stop();
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let resolve_error = |source| Error::Resolve {
        host: host.to_string(),
        source,
    };

    (host, port)
        .to_socket_addrs()
        .map_err(resolve_error)?
        .next()
        .ok_or_else(|| {
            resolve_error(io::Error::new(
                io::ErrorKind::NotFound,
                "no addresses found",
            ))
        })
}
