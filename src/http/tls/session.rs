//! TLS session operations
//!
//! This module implements the SessionOps trait for TLS connections,
//! enabling transparent switching between plain TCP and TLS I/O.
//!
//! Test clients routinely hang up without sending `close_notify`. Such a
//! ragged EOF reads as a normal end of stream instead of an error.

use super::config::{TlsConfig, TlsError};
use crate::http::session::{poll_fd, PollEvents, SessionOps};
use crate::http::{Error, Result as HttpResult};
use openssl::ssl::{ErrorCode, Ssl, SslStream};
use std::io::{self, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::os::fd::AsRawFd;
use std::time::Duration;

/// TLS session operations
///
/// Implements SessionOps trait for TLS-encrypted connections.
/// Wraps an OpenSSL SslStream and provides poll/read/write/close operations.
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
    failed: bool,
}

impl TlsSessionOps {
    /// Create a client TLS connection (perform handshake)
    pub fn connect(
        tcp_stream: TcpStream,
        config: &TlsConfig,
        servername: &str,
    ) -> std::result::Result<Self, TlsError> {
        let mut ssl = Ssl::new(&config.ctx)?;

        match servername.parse::<IpAddr>() {
            Ok(ip) => ssl.param_mut().set_ip(ip)?,
            Err(_) => {
                ssl.set_hostname(servername)?;
                ssl.param_mut().set_host(servername)?;
            }
        }

        let stream = ssl
            .connect(tcp_stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("Connection failed: {}", e)))?;

        Ok(TlsSessionOps {
            stream,
            failed: false,
        })
    }

    /// Accept a client connection with TLS (perform handshake)
    pub fn accept(
        tcp_stream: TcpStream,
        config: &TlsConfig,
    ) -> std::result::Result<Self, TlsError> {
        let ssl = Ssl::new(&config.ctx)?;

        let stream = ssl
            .accept(tcp_stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("Accept failed: {}", e)))?;

        Ok(TlsSessionOps {
            stream,
            failed: false,
        })
    }

    /// Negotiated protocol version, e.g. `TLSv1.3`
    pub fn version(&self) -> &'static str {
        self.stream.ssl().version_str()
    }

    /// Check if TLS failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Get reference to underlying TCP stream
    pub fn get_ref(&self) -> &TcpStream {
        self.stream.get_ref()
    }
}

/// Peer went away without `close_notify`, or sent it
///
/// A hangup can surface as a failed write too: reads may flush pending
/// handshake records to a socket the peer already closed.
fn is_eof(err: &openssl::ssl::Error) -> bool {
    match err.code() {
        ErrorCode::ZERO_RETURN => true,
        ErrorCode::SYSCALL => err.io_error().map_or(true, |e| {
            matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
            )
        }),
        ErrorCode::SSL => err.ssl_error().is_some_and(|stack| {
            stack
                .errors()
                .iter()
                .any(|e| e.reason().is_some_and(|r| r.contains("unexpected eof")))
        }),
        _ => false,
    }
}

fn into_io_error(err: openssl::ssl::Error) -> io::Error {
    err.into_io_error()
        .unwrap_or_else(|e| io::Error::new(io::ErrorKind::Other, e))
}

impl SessionOps for TlsSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> HttpResult<bool> {
        // decrypted bytes already buffered inside OpenSSL
        if events != PollEvents::Write && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }
        poll_fd(self.stream.get_ref().as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> HttpResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.stream.ssl_read(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_eof(&e) => {
                if e.code() != ErrorCode::ZERO_RETURN {
                    // no shutdown alert to answer on a dead transport
                    self.failed = true;
                }
                Ok(0)
            }
            Err(e) => {
                self.failed = true;
                Err(Error::Io(into_io_error(e)))
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> HttpResult<usize> {
        self.stream.write(buf).map_err(|e| {
            self.failed = true;
            Error::Io(e)
        })
    }

    fn flush(&mut self) -> HttpResult<()> {
        self.stream.flush().map_err(|e| {
            self.failed = true;
            Error::Io(e)
        })
    }

    fn close(&mut self) -> HttpResult<()> {
        if !self.failed {
            // best effort; the peer may already be gone
            let _ = self.stream.shutdown();
        }

        match self.stream.get_mut().shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(Error::Io(e)),
            _ => Ok(()),
        }
    }

    fn peer_addr(&self) -> HttpResult<SocketAddr> {
        self.stream.get_ref().peer_addr().map_err(Error::from)
    }
}
