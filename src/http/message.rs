//! HTTP message types
//!
//! The fixture never builds full request objects: the application reads the
//! body itself. What the handler needs is the parsed request head and the
//! status line the application chose.

use super::{Error, Headers, Result};
use std::fmt;

/// HTTP version as sent on the request line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    major: u16,
    minor: u16,
}

impl Version {
    pub const HTTP_10: Version = Version { major: 1, minor: 0 };
    pub const HTTP_11: Version = Version { major: 1, minor: 1 };

    /// Parse `HTTP/<major>.<minor>`
    pub fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidVersion(s.to_string());

        let numbers = s.strip_prefix("HTTP/").ok_or_else(invalid)?;
        let (major, minor) = numbers.split_once('.').ok_or_else(invalid)?;
        if major.is_empty()
            || minor.is_empty()
            || !major.bytes().all(|b| b.is_ascii_digit())
            || !minor.bytes().all(|b| b.is_ascii_digit())
            || major.len() > 10
            || minor.len() > 10
        {
            return Err(invalid());
        }

        Ok(Version {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }

    pub fn major(&self) -> u16 {
        self.major
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::HTTP_11
    }
}

/// Parsed request line and headers
#[derive(Debug, Clone)]
pub struct RequestHead {
    method: String,
    target: String,
    version: Version,
    headers: Headers,
    request_line: String,
}

impl RequestHead {
    pub fn new(
        method: impl Into<String>,
        target: impl Into<String>,
        version: Version,
        headers: Headers,
        request_line: impl Into<String>,
    ) -> Self {
        RequestHead {
            method: method.into(),
            target: target.into(),
            version,
            headers,
            request_line: request_line.into(),
        }
    }

    /// Request method exactly as sent
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request target (path and query)
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Path part of the target, still percent-encoded
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    /// Query string, empty when the target has none
    pub fn query(&self) -> &str {
        self.target.split_once('?').map_or("", |(_, query)| query)
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The request line without its terminator, used for logging
    pub fn request_line(&self) -> &str {
        &self.request_line
    }

    /// Declared body length; unparseable values count as no body
    pub fn content_length(&self) -> u64 {
        self.headers
            .get("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Whether the client asked for an interim `100 Continue`
    pub fn expects_continue(&self) -> bool {
        self.version >= Version::HTTP_11
            && self
                .headers
                .get("Expect")
                .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    }
}

/// Status line chosen by the application, e.g. `"200 OK"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    code: u16,
    text: String,
}

impl StatusLine {
    /// Parse a status string: three digits, a space, then a reason phrase
    pub fn parse(status: &str) -> Result<Self> {
        let bytes = status.as_bytes();
        if bytes.len() < 4 || !bytes[..3].iter().all(u8::is_ascii_digit) || bytes[3] != b' ' {
            return Err(Error::InvalidStatus(format!(
                "Status must be 3 digits, a space and a reason: {:?}",
                status
            )));
        }
        if status.contains(|c: char| c == '\r' || c == '\n') {
            return Err(Error::InvalidStatus(format!(
                "Status contains a line break: {:?}",
                status
            )));
        }

        let code = status[..3]
            .parse::<u16>()
            .map_err(|_| Error::InvalidStatus(status.to_string()))?;
        if !(100..600).contains(&code) {
            return Err(Error::InvalidStatus(format!(
                "Invalid status code: {}",
                code
            )));
        }

        Ok(StatusLine {
            code,
            text: status.to_string(),
        })
    }

    /// Build a status line from a code and its canonical reason phrase
    pub fn from_code(code: u16) -> Self {
        StatusLine {
            code,
            text: format!("{} {}", code, reason_phrase(code)),
        }
    }

    /// Numeric status code
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Full status string as given
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Canonical reason phrase for the codes the fixture emits on its own
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        408 => "Request Timeout",
        414 => "URI Too Long",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}
