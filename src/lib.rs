//! httpbin-fixture - throwaway HTTP and HTTPS servers for tests
//!
//! A [`Server`] hosts one [`Application`] on a loopback port chosen by the
//! OS, serving one connection at a time on a background thread. The HTTPS
//! flavour uses the certificates bundled under `certs/`; point a client at
//! [`certs::client_pem`] to verify them.
//!
//! Ports can be pinned for a whole test run with `HTTPBIN_HTTP_PORT` and
//! `HTTPBIN_HTTPS_PORT`.

pub mod app;
pub mod certs;
pub mod http;
pub mod net;
pub mod server;

pub use app::{AppError, AppResult, Application, StartResponse};
pub use http::{ClientResponse, Environ, TestClient};
pub use server::{Scheme, Server, ServerBuilder, ServerOptions, ServerScope};
