//! TLS configuration
//!
//! This module provides TLS configuration builders for both client and server.
//! Builders only collect settings; everything that touches OpenSSL or the
//! filesystem happens in `build()`, so misconfiguration surfaces as a
//! [`TlsError`] there.

use super::session::TlsSessionOps;
use openssl::ssl::{SslContext, SslContextBuilder, SslFiletype, SslMethod, SslVerifyMode};
use std::net::TcpStream;
use std::path::{Path, PathBuf};

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
}

/// TLS configuration (immutable after building)
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) ctx: SslContext,
    pub(crate) is_server: bool,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("is_server", &self.is_server)
            .finish_non_exhaustive()
    }
}

impl TlsConfig {
    /// Create a new client configuration builder
    pub fn client() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Create a new server configuration builder
    pub fn server() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Whether this configuration accepts rather than connects
    pub fn is_server(&self) -> bool {
        self.is_server
    }

    /// Connect to a server with TLS (client-side)
    ///
    /// `servername` is sent as SNI (unless it is an IP address) and checked
    /// against the server certificate when peer verification is on.
    pub fn connect(&self, stream: TcpStream, servername: &str) -> Result<TlsSessionOps, TlsError> {
        if self.is_server {
            return Err(TlsError::InvalidConfig(
                "Cannot use server config for client connection".to_string(),
            ));
        }
        TlsSessionOps::connect(stream, self, servername)
    }

    /// Accept a client connection with TLS (server-side)
    pub fn accept(&self, stream: TcpStream) -> Result<TlsSessionOps, TlsError> {
        if !self.is_server {
            return Err(TlsError::InvalidConfig(
                "Cannot use client config for server accept".to_string(),
            ));
        }
        TlsSessionOps::accept(stream, self)
    }
}

/// Client configuration builder
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    ca_file: Option<PathBuf>,
    verify_peer: bool,
}

impl ClientConfigBuilder {
    /// Trust the certificates in `path` (PEM) and turn on peer verification
    pub fn ca_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.ca_file = Some(path.as_ref().to_path_buf());
        self.verify_peer = true;
        self
    }

    /// Enable/disable peer certificate verification
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        let mut ctx = SslContextBuilder::new(SslMethod::tls_client())?;

        match &self.ca_file {
            Some(ca_file) => {
                require_file(ca_file)?;
                ctx.set_ca_file(ca_file).map_err(|e| {
                    TlsError::Certificate(format!(
                        "Failed to load CA file {}: {}",
                        ca_file.display(),
                        e
                    ))
                })?;
            }
            None if self.verify_peer => ctx.set_default_verify_paths()?,
            None => {}
        }

        ctx.set_verify(if self.verify_peer {
            SslVerifyMode::PEER
        } else {
            SslVerifyMode::NONE
        });

        Ok(TlsConfig {
            ctx: ctx.build(),
            is_server: false,
        })
    }
}

/// Server configuration builder
#[derive(Debug, Clone, Default)]
pub struct ServerConfigBuilder {
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
}

impl ServerConfigBuilder {
    /// Certificate chain in PEM format, leaf first
    pub fn cert_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cert_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Private key in PEM format; defaults to the certificate file
    pub fn key_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.key_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        let cert_file = self
            .cert_file
            .ok_or_else(|| TlsError::InvalidConfig("No server certificate configured".to_string()))?;
        let key_file = self.key_file.unwrap_or_else(|| cert_file.clone());
        require_file(&cert_file)?;
        require_file(&key_file)?;

        let mut ctx = SslContextBuilder::new(SslMethod::tls_server())?;
        ctx.set_certificate_chain_file(&cert_file).map_err(|e| {
            TlsError::Certificate(format!(
                "Failed to load certificate {}: {}",
                cert_file.display(),
                e
            ))
        })?;
        ctx.set_private_key_file(&key_file, SslFiletype::PEM)
            .map_err(|e| {
                TlsError::Certificate(format!(
                    "Failed to load private key {}: {}",
                    key_file.display(),
                    e
                ))
            })?;
        ctx.check_private_key().map_err(|e| {
            TlsError::Certificate(format!("Private key does not match certificate: {}", e))
        })?;

        // no client certificates
        ctx.set_verify(SslVerifyMode::NONE);
        // one request per connection: resumption tickets are never used, and
        // writing them during the first read fails once the client hangs up
        ctx.set_num_tickets(0)?;

        Ok(TlsConfig {
            ctx: ctx.build(),
            is_server: true,
        })
    }
}

fn require_file(path: &Path) -> Result<(), TlsError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(TlsError::Certificate(format!(
            "File not found: {}",
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs;
    use std::io::Write;

    #[test]
    fn test_server_config_builder() {
        let config = TlsConfig::server()
            .cert_file(certs::server_cert())
            .key_file(certs::server_key())
            .build()
            .unwrap();

        assert!(config.is_server());
    }

    #[test]
    fn test_client_config_builder() {
        let config = TlsConfig::client()
            .ca_file(certs::client_pem())
            .build()
            .unwrap();
        assert!(!config.is_server());

        let config = TlsConfig::client().verify_peer(false).build().unwrap();
        assert!(!config.is_server());
    }

    #[test]
    fn test_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let result = TlsConfig::server()
            .cert_file(dir.path().join("nope.pem"))
            .key_file(certs::server_key())
            .build();
        assert!(matches!(result, Err(TlsError::Certificate(_))));

        let result = TlsConfig::server().build();
        assert!(matches!(result, Err(TlsError::InvalidConfig(_))));
    }

    #[test]
    fn test_malformed_certificate() {
        let mut bogus = tempfile::NamedTempFile::new().unwrap();
        writeln!(bogus, "-----BEGIN CERTIFICATE-----\nnot base64\n-----END CERTIFICATE-----").unwrap();

        let result = TlsConfig::server()
            .cert_file(bogus.path())
            .key_file(certs::server_key())
            .build();
        assert!(matches!(result, Err(TlsError::Certificate(_))));
    }

    #[test]
    fn test_mismatched_key() {
        // the CA certificate does not belong to the server key
        let result = TlsConfig::server()
            .cert_file(certs::client_pem())
            .key_file(certs::server_key())
            .build();
        assert!(matches!(result, Err(TlsError::Certificate(_))));
    }

    #[test]
    fn test_config_direction_checked() {
        let client = TlsConfig::client().build().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        assert!(matches!(
            client.accept(stream),
            Err(TlsError::InvalidConfig(_))
        ));
    }
}
