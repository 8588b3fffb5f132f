//! Listening sockets and the accept loop
//!
//! A [`ListenerFactory`] decides how the fixture listens: plain TCP or TLS on
//! top of it. The resulting [`Listener`] owns the socket and runs the serial
//! accept loop on the worker thread.

use super::{Result, Scheme};
use crate::app::Application;
use crate::certs;
use crate::http::tls::TlsConfig;
use crate::http::{BoxedSession, Environ, FdSessionOps, HandlerFactory, HttpSession, SERVER_SOFTWARE};
use crate::net::{self, Readiness, ShutdownSignal};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, trace};

/// Clients that stall the TLS handshake longer than this are dropped
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Binds the fixture's listening socket
pub trait ListenerFactory: Send + Sync {
    /// Scheme served by the listeners this factory creates
    fn scheme(&self) -> Scheme;

    /// Bind to `addr`; `extra_base_environ` is merged into the base environment
    fn bind(&self, addr: SocketAddr, extra_base_environ: &Environ) -> Result<Listener>;
}

/// Plain HTTP over TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainListenerFactory;

impl ListenerFactory for PlainListenerFactory {
    fn scheme(&self) -> Scheme {
        Scheme::Http
    }

    fn bind(&self, addr: SocketAddr, extra_base_environ: &Environ) -> Result<Listener> {
        Listener::bind(addr, Scheme::Http, None, extra_base_environ)
    }
}

/// HTTPS with a certificate and key read from disk
///
/// Defaults to the bundled `certs/server.pem` and `certs/server.key`.
#[derive(Debug, Clone)]
pub struct TlsListenerFactory {
    cert_file: PathBuf,
    key_file: PathBuf,
}

impl TlsListenerFactory {
    pub fn new(cert_file: impl AsRef<Path>, key_file: impl AsRef<Path>) -> Self {
        TlsListenerFactory {
            cert_file: cert_file.as_ref().to_path_buf(),
            key_file: key_file.as_ref().to_path_buf(),
        }
    }

    pub fn cert_file(&self) -> &Path {
        &self.cert_file
    }

    pub fn key_file(&self) -> &Path {
        &self.key_file
    }
}

impl Default for TlsListenerFactory {
    fn default() -> Self {
        Self::new(certs::server_cert(), certs::server_key())
    }
}

impl ListenerFactory for TlsListenerFactory {
    fn scheme(&self) -> Scheme {
        Scheme::Https
    }

    fn bind(&self, addr: SocketAddr, extra_base_environ: &Environ) -> Result<Listener> {
        let tls = TlsConfig::server()
            .cert_file(&self.cert_file)
            .key_file(&self.key_file)
            .build()?;
        Listener::bind(addr, Scheme::Https, Some(tls), extra_base_environ)
    }
}

/// A bound, listening socket plus everything the accept loop needs
pub struct Listener {
    socket: TcpListener,
    local_addr: SocketAddr,
    scheme: Scheme,
    tls: Option<TlsConfig>,
    base_environ: Environ,
}

impl Listener {
    /// Bind and listen; the socket accepts connections once this returns
    pub fn bind(
        addr: SocketAddr,
        scheme: Scheme,
        tls: Option<TlsConfig>,
        extra_base_environ: &Environ,
    ) -> Result<Self> {
        let socket = net::bind_listener(addr)?;
        let local_addr = socket.local_addr()?;

        Ok(Listener {
            socket,
            local_addr,
            scheme,
            base_environ: base_environ(local_addr, scheme, tls.is_some(), extra_base_environ),
            tls,
        })
    }

    /// Address actually bound, with the OS-chosen port filled in
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Environment shared by every request on this listener
    pub fn base_environ(&self) -> &Environ {
        &self.base_environ
    }

    /// Serial accept loop; returns once `signal` fires
    ///
    /// Each connection is handled to completion before the next is accepted.
    /// The listening socket is closed when this returns.
    pub fn serve(self, signal: &ShutdownSignal, handler: &dyn HandlerFactory, app: &dyn Application) {
        trace!(addr = %self.local_addr, "accept loop started");

        loop {
            match net::wait_for_accept(&self.socket, signal) {
                Ok(Readiness::Acceptable) => {}
                Ok(Readiness::Shutdown) => break,
                Err(err) => {
                    error!(error = %err, "waiting for connections failed");
                    break;
                }
            }

            let (stream, peer) = match self.socket.accept() {
                Ok(accepted) => accepted,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(err) => {
                    debug!(error = %err, "accept failed");
                    continue;
                }
            };

            match self.open_session(stream) {
                Ok(session) => handler.serve(HttpSession::new(session), peer, &self.base_environ, app),
                Err(err) => debug!(client = %peer, error = %err, "dropping connection"),
            }
        }

        trace!(addr = %self.local_addr, "accept loop stopped");
    }

    fn open_session(&self, stream: TcpStream) -> Result<BoxedSession> {
        stream.set_nonblocking(false)?;

        let Some(tls) = &self.tls else {
            return Ok(Box::new(FdSessionOps::new(stream)));
        };

        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        let session = tls.accept(stream)?;
        session.get_ref().set_read_timeout(None)?;
        Ok(Box::new(session))
    }
}

fn base_environ(addr: SocketAddr, scheme: Scheme, secure: bool, extra: &Environ) -> Environ {
    let server_name = if addr.ip().is_loopback() {
        "localhost".to_string()
    } else {
        addr.ip().to_string()
    };

    let mut environ = Environ::new();
    environ.insert("SERVER_NAME", server_name);
    environ.insert("SERVER_PORT", addr.port().to_string());
    environ.insert("GATEWAY_INTERFACE", "CGI/1.1");
    environ.insert("SCRIPT_NAME", "");
    environ.insert("SERVER_SOFTWARE", SERVER_SOFTWARE);
    environ.insert("wsgi.url_scheme", scheme.as_str());
    if secure {
        environ.insert("HTTPS", "yes");
    }
    environ.extend(extra.iter());
    environ
}
