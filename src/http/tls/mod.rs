//! TLS support for HTTP connections
//!
//! This module implements TLS for the fixture's HTTPS listener and for the
//! test client that talks to it.
//!
//! # Architecture
//!
//! The TLS implementation uses the session operations abstraction pattern:
//!
//! 1. `TlsConfig` holds an OpenSSL context built from certificate files
//! 2. `TlsSessionOps` implements the `SessionOps` trait for encrypted I/O
//! 3. The request handler is unchanged; it only sees a `SessionOps`
//!
//! # Examples
//!
//! ## Server with TLS
//!
//! ```no_run
//! use httpbin_fixture::certs;
//! use httpbin_fixture::http::tls::TlsConfig;
//! use std::net::TcpListener;
//!
//! let tls_config = TlsConfig::server()
//!     .cert_file(certs::server_cert())
//!     .key_file(certs::server_key())
//!     .build()
//!     .unwrap();
//!
//! let listener = TcpListener::bind("127.0.0.1:0").unwrap();
//! let (tcp_stream, _) = listener.accept().unwrap();
//! let tls_session = tls_config.accept(tcp_stream).unwrap();
//! ```
//!
//! ## Client trusting the test CA
//!
//! ```no_run
//! use httpbin_fixture::certs;
//! use httpbin_fixture::http::tls::TlsConfig;
//! use std::net::TcpStream;
//!
//! let tls_config = TlsConfig::client()
//!     .ca_file(certs::client_pem())
//!     .build()
//!     .unwrap();
//!
//! let tcp_stream = TcpStream::connect("127.0.0.1:8443").unwrap();
//! let tls_session = tls_config.connect(tcp_stream, "localhost").unwrap();
//! ```

pub mod config;
pub mod session;

pub use config::{ClientConfigBuilder, ServerConfigBuilder, TlsConfig, TlsError};
pub use session::TlsSessionOps;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;
