//! Bundled test certificates
//!
//! The `certs/` directory at the package root holds a throwaway PKI:
//!
//! - `server.pem`: certificate for `localhost`, `127.0.0.1` and `::1`,
//!   followed by the CA that issued it
//! - `server.key`: the server's private key (PKCS#8, PEM)
//! - `client.pem`: the issuing CA, for clients to use as their trust anchor
//!
//! None of this is secret. Never use it outside of tests.
//!
//! The default location is the package root recorded at compile time, which
//! holds for `cargo test` runs. A test binary moved elsewhere can point at a
//! copy of the directory through `HTTPBIN_CERT_DIR`.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Environment variable that relocates the certificate directory
pub const CERT_DIR_ENV: &str = "HTTPBIN_CERT_DIR";

/// Directory holding the bundled certificates
///
/// `HTTPBIN_CERT_DIR` when set and non-empty, otherwise `<package root>/certs`.
pub fn cert_dir() -> PathBuf {
    cert_dir_from(env::var_os(CERT_DIR_ENV))
}

fn cert_dir_from(overridden: Option<OsString>) -> PathBuf {
    match overridden {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => Path::new(env!("CARGO_MANIFEST_DIR")).join("certs"),
    }
}

/// Server certificate chain used by the HTTPS fixture
pub fn server_cert() -> PathBuf {
    cert_dir().join("server.pem")
}

/// Private key matching [`server_cert`]
pub fn server_key() -> PathBuf {
    cert_dir().join("server.key")
}

/// CA certificate that clients should trust
pub fn client_pem() -> PathBuf {
    cert_dir().join("client.pem")
}
