//! Application contract
//!
//! The fixture never looks inside an application. It hands over the request
//! environment and body, lets the application pick a status and headers
//! through [`StartResponse`], and writes the returned body chunks.

use crate::http::headers::is_hop_by_hop;
use crate::http::{Environ, Headers, StatusLine};
use bytes::Bytes;
use std::io::Read;

/// Error an application may return; answered with a 500
pub type AppError = Box<dyn std::error::Error + Send + Sync>;

/// Body chunks produced by an application
pub type AppResult = std::result::Result<Vec<Bytes>, AppError>;

/// A request-handling application served by the fixture
///
/// Only ever called from the fixture's worker thread, one request at a time.
pub trait Application: Send + Sync {
    fn call(
        &self,
        environ: &Environ,
        input: &mut dyn Read,
        start_response: &mut StartResponse,
    ) -> AppResult;
}

impl<F> Application for F
where
    F: Fn(&Environ, &mut dyn Read, &mut StartResponse) -> AppResult + Send + Sync,
{
    fn call(
        &self,
        environ: &Environ,
        input: &mut dyn Read,
        start_response: &mut StartResponse,
    ) -> AppResult {
        self(environ, input, start_response)
    }
}

/// Pin a closure to the application signature
///
/// Closures passed straight to a generic parameter often fail to infer
/// higher-ranked lifetimes; routing them through here fixes that.
pub fn from_fn<F>(f: F) -> F
where
    F: Fn(&Environ, &mut dyn Read, &mut StartResponse) -> AppResult + Send + Sync,
{
    f
}

/// Errors raised by [`StartResponse::start`]
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("start_response called twice")]
    AlreadyStarted,

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Hop-by-hop header not allowed: {0}")]
    HopByHop(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

/// Collects the status line and headers chosen by the application
#[derive(Debug, Default)]
pub struct StartResponse {
    status: Option<StatusLine>,
    headers: Headers,
}

impl StartResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the response status (e.g. `"200 OK"`) and headers
    pub fn start<I, K, V>(&mut self, status: &str, headers: I) -> Result<(), ResponseError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if self.status.is_some() {
            return Err(ResponseError::AlreadyStarted);
        }

        let status =
            StatusLine::parse(status).map_err(|e| ResponseError::InvalidStatus(e.to_string()))?;

        let mut collected = Headers::new();
        for (name, value) in headers {
            let name: String = name.into();
            let value: String = value.into();
            if is_hop_by_hop(&name) {
                return Err(ResponseError::HopByHop(name));
            }
            if name.is_empty()
                || name.contains(':')
                || has_line_break(&name)
                || has_line_break(&value)
            {
                return Err(ResponseError::InvalidHeader(name));
            }
            collected.insert(name, value);
        }

        self.status = Some(status);
        self.headers = collected;
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.status.is_some()
    }

    pub fn status(&self) -> Option<&StatusLine> {
        self.status.as_ref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub(crate) fn into_parts(self) -> Option<(StatusLine, Headers)> {
        let headers = self.headers;
        self.status.map(|status| (status, headers))
    }
}

fn has_line_break(text: &str) -> bool {
    text.bytes().any(|b| b == b'\r' || b == b'\n')
}
