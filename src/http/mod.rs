//! HTTP/1.1 plumbing for the fixture
//!
//! This module holds the per-connection request handler and the small pieces
//! it is built from: a request-head parser, the CGI-style environment, the
//! response writer and a one-shot client used to talk to a running fixture.
//!
//! # Architecture
//!
//! Every connection is wrapped in an [`HttpSession`] over a [`SessionOps`]
//! implementation, so the handler does not care whether the bytes travel over
//! plain TCP ([`FdSessionOps`]) or TLS ([`tls::TlsSessionOps`]):
//!
//! - `SessionOps` defines the transport operations (poll, read, write, close)
//! - `HttpSession` adds buffered line reading on top of any `SessionOps`
//! - `RequestHandler` reads one request, runs the application, writes one response
//!
//! # Examples
//!
//! ```no_run
//! use httpbin_fixture::http::TestClient;
//!
//! let client = TestClient::new();
//! let response = client.get("http://127.0.0.1:8080/").unwrap();
//! assert_eq!(response.status(), 200);
//! assert_eq!(response.headers().get("Connection"), Some("Close"));
//! ```

pub mod client;
pub mod environ;
pub mod handler;
pub mod headers;
pub mod message;
pub mod parser;
pub mod session;
pub mod tls;

pub use client::{ClientResponse, TestClient};
pub use environ::Environ;
pub use handler::{HandlerFactory, RequestHandler, StandardHandlerFactory};
pub use headers::Headers;
pub use message::{RequestHead, StatusLine, Version};
pub use parser::{ParseFailure, Parsed, RequestParser};
pub use session::{BoxedSession, FdSessionOps, HttpSession, PollEvents, SessionOps};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] tls::TlsError),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::Timeout => std::io::Error::new(std::io::ErrorKind::TimedOut, err),
            Error::ConnectionClosed => std::io::Error::new(std::io::ErrorKind::UnexpectedEof, err),
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}

/// Value of the `Server` response header and `SERVER_SOFTWARE`
pub const SERVER_SOFTWARE: &str = "Pytest-HTTPBIN/0.1.0";

/// Maximum number of request headers
pub const MAX_HEADERS: usize = 100;

/// Maximum length of the request line or a single header line
pub const MAX_LINE: usize = 65536;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
