//! Port pinning through `HTTPBIN_HTTP_PORT` / `HTTPBIN_HTTPS_PORT`
//!
//! These tests mutate the process environment, so they run serially.

use bytes::Bytes;
use httpbin_fixture::app::{self, AppResult};
use httpbin_fixture::server::Error;
use httpbin_fixture::{Environ, Server, StartResponse, TestClient};
use serial_test::serial;
use std::env;
use std::io::Read;

const HTTP_VAR: &str = "HTTPBIN_HTTP_PORT";
const HTTPS_VAR: &str = "HTTPBIN_HTTPS_PORT";

fn hello(_: &Environ, _: &mut dyn Read, start: &mut StartResponse) -> AppResult {
    start.start("200 OK", [("Content-Type", "text/plain")])?;
    Ok(vec![Bytes::from_static(b"hello")])
}

/// Sets a variable for the lifetime of the guard
struct EnvGuard(&'static str);

impl EnvGuard {
    fn set(var: &'static str, value: &str) -> Self {
        env::set_var(var, value);
        EnvGuard(var)
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        env::remove_var(self.0);
    }
}

#[test]
#[serial]
fn test_http_port_override() {
    let _guard = EnvGuard::set(HTTP_VAR, "18080");

    let mut server = Server::new(hello).unwrap();
    let running = server.scope().unwrap();
    assert_eq!(running.port(), 18080);
    assert_eq!(running.url(), "http://127.0.0.1:18080");

    let response = TestClient::new().get("http://127.0.0.1:18080/").unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text(), "hello");
}

#[test]
#[serial]
fn test_override_beats_explicit_port() {
    let _guard = EnvGuard::set(HTTP_VAR, "18081");

    let server = Server::builder().port(9).application(hello).build().unwrap();
    assert_eq!(server.port(), 18081);
}

#[test]
#[serial]
fn test_override_is_per_scheme() {
    let _guard = EnvGuard::set(HTTPS_VAR, "18443");

    let plain = Server::new(hello).unwrap();
    assert_ne!(plain.port(), 18443);

    let mut secure = Server::secure(hello).unwrap();
    let running = secure.scope().unwrap();
    assert_eq!(running.url(), "https://127.0.0.1:18443");

    let response = TestClient::with_client_pem()
        .unwrap()
        .get(&running.url())
        .unwrap();
    assert_eq!(response.text(), "hello");
}

#[test]
#[serial]
fn test_invalid_override() {
    let _guard = EnvGuard::set(HTTP_VAR, "not-a-port");

    match Server::new(hello) {
        Err(Error::PortOverride { var, value }) => {
            assert_eq!(var, HTTP_VAR);
            assert_eq!(value, "not-a-port");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
#[serial]
fn test_out_of_range_override() {
    let _guard = EnvGuard::set(HTTP_VAR, "70000");
    assert!(matches!(Server::new(hello), Err(Error::PortOverride { .. })));
}

#[test]
#[serial]
fn test_no_override_uses_ephemeral_port() {
    env::remove_var(HTTP_VAR);
    let server = Server::new(app::from_fn(hello)).unwrap();
    assert_ne!(server.port(), 0);
}
