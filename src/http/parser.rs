//! Request head parsing
//!
//! Reads exactly one request line and its header block from a session. Bytes
//! after the blank line stay buffered in the session for the application to
//! read as the request body. Malformed input is turned into a
//! [`ParseFailure`], which already knows how to render its error response.

use super::message::reason_phrase;
use super::{
    Headers, HttpSession, RequestHead, Result, SessionOps, Version, CRLF, MAX_HEADERS, MAX_LINE,
    SERVER_SOFTWARE,
};
use std::time::SystemTime;

/// Outcome of reading a request head
#[derive(Debug)]
pub enum Parsed {
    /// A complete request head
    Request(RequestHead),
    /// The client closed or sent a blank line; nothing to answer
    Empty,
    /// The head was rejected; `failure` must be sent back to the client
    Rejected {
        failure: ParseFailure,
        request_line: String,
    },
}

/// A request the parser refused, with the status to answer it with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    status: u16,
    message: String,
}

impl ParseFailure {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        ParseFailure {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Render the complete error response
    pub fn to_wire(&self) -> Vec<u8> {
        let reason = reason_phrase(self.status);
        let body = format!(
            "<!DOCTYPE html>\n<html>\n<head><title>{code} {reason}</title></head>\n\
             <body>\n<h1>{reason}</h1>\n<p>{message}</p>\n</body>\n</html>\n",
            code = self.status,
            reason = reason,
            message = escape_html(&self.message),
        );

        let mut headers = Headers::new();
        headers.insert("Server", SERVER_SOFTWARE);
        headers.insert("Date", httpdate::fmt_http_date(SystemTime::now()));
        headers.insert("Connection", "close");
        headers.insert("Content-Type", "text/html;charset=utf-8");
        headers.insert("Content-Length", body.len().to_string());

        let mut wire = format!("{} {} {}{}", Version::HTTP_11, self.status, reason, CRLF).into_bytes();
        headers.write_wire(&mut wire);
        wire.extend_from_slice(CRLF.as_bytes());
        wire.extend_from_slice(body.as_bytes());
        wire
    }
}

/// Parse a request line (terminator already removed)
///
/// Format: METHOD TARGET VERSION
/// Example: GET /index.html HTTP/1.1
pub fn parse_request_line(line: &str) -> std::result::Result<(String, String, Version), ParseFailure> {
    let words: Vec<&str> = line.split_ascii_whitespace().collect();

    match words.as_slice() {
        [method, target, version] => {
            let version = Version::from_str(version)
                .map_err(|_| ParseFailure::new(400, format!("Bad request version ({:?})", version)))?;
            if version.major() >= 2 {
                return Err(ParseFailure::new(
                    505,
                    format!("Invalid HTTP version ({})", version),
                ));
            }
            Ok((method.to_string(), normalize_target(target), version))
        }
        [method, _] => Err(ParseFailure::new(
            400,
            format!("Bad HTTP/0.9 request type ({:?})", method),
        )),
        _ => Err(ParseFailure::new(
            400,
            format!("Bad request syntax ({:?})", line),
        )),
    }
}

/// Collapse leading slashes so `//host/path` is never read as an authority
fn normalize_target(target: &str) -> String {
    if target.starts_with("//") {
        format!("/{}", target.trim_start_matches('/'))
    } else {
        target.to_string()
    }
}

/// HTTP request head parser
#[derive(Debug, Clone)]
pub struct RequestParser {
    max_line: usize,
    max_headers: usize,
}

impl RequestParser {
    /// Create a parser with the default limits
    pub fn new() -> Self {
        Self::with_limits(MAX_LINE, MAX_HEADERS)
    }

    /// Create a parser with custom line-length and header-count limits
    pub fn with_limits(max_line: usize, max_headers: usize) -> Self {
        RequestParser {
            max_line,
            max_headers,
        }
    }

    /// Read one request head from the session
    ///
    /// I/O errors are returned as `Err`; protocol errors come back as
    /// [`Parsed::Rejected`].
    pub fn read_head<S: SessionOps>(&self, session: &mut HttpSession<S>) -> Result<Parsed> {
        let raw = session.read_line(self.max_line)?;
        if raw.len() > self.max_line {
            return Ok(Parsed::Rejected {
                failure: ParseFailure::new(414, "Request line too long"),
                request_line: String::new(),
            });
        }

        let request_line = latin1(trim_eol(&raw));
        if request_line.trim().is_empty() {
            return Ok(Parsed::Empty);
        }

        let (method, target, version) = match parse_request_line(&request_line) {
            Ok(parts) => parts,
            Err(failure) => {
                return Ok(Parsed::Rejected {
                    failure,
                    request_line,
                })
            }
        };

        match self.read_headers(session)? {
            Ok(headers) => Ok(Parsed::Request(RequestHead::new(
                method,
                target,
                version,
                headers,
                request_line,
            ))),
            Err(failure) => Ok(Parsed::Rejected {
                failure,
                request_line,
            }),
        }
    }

    fn read_headers<S: SessionOps>(
        &self,
        session: &mut HttpSession<S>,
    ) -> Result<std::result::Result<Headers, ParseFailure>> {
        let mut headers = Headers::new();

        loop {
            let raw = session.read_line(self.max_line)?;
            if raw.len() > self.max_line {
                return Ok(Err(ParseFailure::new(431, "Line too long")));
            }

            let line = trim_eol(&raw);
            if line.is_empty() {
                // blank line or end of stream
                return Ok(Ok(headers));
            }

            let line = latin1(line);
            if line.starts_with([' ', '\t']) {
                if !headers.continue_last(line.trim()) {
                    return Ok(Err(ParseFailure::new(400, "Bad header line")));
                }
                continue;
            }

            match Headers::parse_header_line(&line) {
                Ok((name, value)) => headers.insert(name, value),
                Err(_) => return Ok(Err(ParseFailure::new(400, "Bad header line"))),
            }

            if headers.len() > self.max_headers {
                return Ok(Err(ParseFailure::new(431, "Too many headers")));
            }
        }
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|&b| b != b'\r' && b != b'\n')
        .map_or(0, |pos| pos + 1);
    &line[..end]
}

/// Request heads are ISO-8859-1; every byte maps to one char
pub(crate) fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::session::from_tcp_stream;
    use std::io::Write;
    use std::net::{Shutdown, TcpListener, TcpStream};

    fn parse_bytes(input: &[u8]) -> Parsed {
        parse_with(RequestParser::new(), input)
    }

    fn parse_with(parser: RequestParser, input: &[u8]) -> Parsed {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();

        client.write_all(input).unwrap();
        client.shutdown(Shutdown::Write).unwrap();

        let mut session = from_tcp_stream(server);
        parser.read_head(&mut session).unwrap()
    }

    fn rejected_status(parsed: Parsed) -> u16 {
        match parsed {
            Parsed::Rejected { failure, .. } => failure.status(),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_request_line() {
        let (method, target, version) = parse_request_line("GET /index.html HTTP/1.1").unwrap();
        assert_eq!(method, "GET");
        assert_eq!(target, "/index.html");
        assert_eq!(version, Version::HTTP_11);
    }

    #[test]
    fn test_parse_request_line_errors() {
        assert_eq!(parse_request_line("GET / HTTP/2.0").unwrap_err().status(), 505);
        assert_eq!(parse_request_line("GET / HTTX/1.1").unwrap_err().status(), 400);
        assert_eq!(parse_request_line("GET /").unwrap_err().status(), 400);
        assert_eq!(parse_request_line("GET / HTTP/1.1 extra").unwrap_err().status(), 400);
    }

    #[test]
    fn test_leading_slashes_collapsed() {
        let (_, target, _) = parse_request_line("GET //evil.example/x HTTP/1.1").unwrap();
        assert_eq!(target, "/evil.example/x");
    }

    #[test]
    fn test_read_head() {
        let parsed = parse_bytes(
            b"POST /post?x=1 HTTP/1.1\r\nHost: localhost\r\nContent-Type: text/plain\r\n\r\n",
        );
        let Parsed::Request(head) = parsed else {
            panic!("expected request");
        };
        assert_eq!(head.method(), "POST");
        assert_eq!(head.path(), "/post");
        assert_eq!(head.query(), "x=1");
        assert_eq!(head.headers().get("content-type"), Some("text/plain"));
        assert_eq!(head.request_line(), "POST /post?x=1 HTTP/1.1");
    }

    #[test]
    fn test_bare_lf_and_folded_headers() {
        let parsed = parse_bytes(b"GET / HTTP/1.0\nX-Long: one\n two\n\n");
        let Parsed::Request(head) = parsed else {
            panic!("expected request");
        };
        assert_eq!(head.version(), Version::HTTP_10);
        assert_eq!(head.headers().get("X-Long"), Some("one two"));
    }

    #[test]
    fn test_empty_connection() {
        assert!(matches!(parse_bytes(b""), Parsed::Empty));
        assert!(matches!(parse_bytes(b"\r\n"), Parsed::Empty));
    }

    #[test]
    fn test_rejections() {
        assert_eq!(rejected_status(parse_bytes(b"NONSENSE\r\n\r\n")), 400);
        assert_eq!(rejected_status(parse_bytes(b"GET / HTTP/3.0\r\n\r\n")), 505);
        assert_eq!(
            rejected_status(parse_bytes(b"GET / HTTP/1.1\r\nno colon here\r\n\r\n")),
            400
        );
    }

    #[test]
    fn test_limits() {
        let parser = RequestParser::with_limits(32, 2);
        let long_line = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(64));
        assert_eq!(rejected_status(parse_with(parser.clone(), long_line.as_bytes())), 414);

        let many = b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n";
        assert_eq!(rejected_status(parse_with(parser.clone(), many)), 431);

        let long_header = format!("GET / HTTP/1.1\r\nX: {}\r\n\r\n", "b".repeat(64));
        assert_eq!(rejected_status(parse_with(parser, long_header.as_bytes())), 431);
    }

    #[test]
    fn test_failure_response() {
        let failure = ParseFailure::new(400, "Bad request version ('<HTTP>')");
        let wire = String::from_utf8(failure.to_wire()).unwrap();

        assert!(wire.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(wire.contains("Server: Pytest-HTTPBIN/0.1.0\r\n"));
        assert!(wire.contains("Connection: close\r\n"));
        assert!(wire.contains("&lt;HTTP&gt;"));

        let (head, body) = wire.split_once("\r\n\r\n").unwrap();
        let length = head
            .lines()
            .find_map(|l| l.strip_prefix("Content-Length: "))
            .unwrap();
        assert_eq!(length.parse::<usize>().unwrap(), body.len());
    }
}
