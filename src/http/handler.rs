//! Per-connection request handler
//!
//! One connection carries exactly one request. The handler reads the request
//! head, builds the environment, runs the application, writes the response
//! with `Connection: Close` and logs a single line for the exchange.
//!
//! # Response finalisation
//!
//! Before the head goes out the handler:
//! - sets `Content-Length` when the body is a single chunk (or empty) and the
//!   application did not set it
//! - adds `Date` and `Server` when absent
//! - replaces any `Connection` header with `Connection: Close`, placed last
//!
//! An application that fails before its response is written (error, panic,
//! `start_response` never called) gets a plain-text 500 instead.

use super::environ::request_environ;
use super::{
    BoxedSession, Environ, Headers, HttpSession, Parsed, RequestParser, Result, SessionOps,
    StatusLine, Version, CRLF, SERVER_SOFTWARE,
};
use crate::app::{AppError, Application, StartResponse};
use bytes::Bytes;
use std::any::Any;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info};

const ERROR_BODY: &[u8] = b"A server error occurred.  Please contact the administrator.";

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Produces the handling for each accepted connection
///
/// The accept loop calls [`serve`](HandlerFactory::serve) once per connection
/// and closes nothing itself; the handler owns the session.
pub trait HandlerFactory: Send + Sync {
    fn serve(
        &self,
        session: HttpSession<BoxedSession>,
        peer: SocketAddr,
        base_environ: &Environ,
        app: &dyn Application,
    );
}

/// Default handler: parse, run the application, respond, close
#[derive(Debug, Clone, Default)]
pub struct StandardHandlerFactory {
    parser: RequestParser,
    timeout: Option<Duration>,
}

impl StandardHandlerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a parser with custom limits
    pub fn with_parser(mut self, parser: RequestParser) -> Self {
        self.parser = parser;
        self
    }

    /// Give up on clients that stall for longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl HandlerFactory for StandardHandlerFactory {
    fn serve(
        &self,
        mut session: HttpSession<BoxedSession>,
        peer: SocketAddr,
        base_environ: &Environ,
        app: &dyn Application,
    ) {
        session.set_timeout(self.timeout);
        RequestHandler::new(session, peer).run(&self.parser, base_environ, app);
    }
}

/// Response produced by a successful application call
struct Response {
    status: StatusLine,
    headers: Headers,
    body: Vec<Bytes>,
}

/// Handles the single request on one connection
pub struct RequestHandler<S: SessionOps> {
    session: HttpSession<S>,
    peer: SocketAddr,
    request_line: String,
    status: Option<u16>,
    headers_sent: bool,
    bytes_sent: Option<u64>,
}

impl<S: SessionOps> RequestHandler<S> {
    pub fn new(session: HttpSession<S>, peer: SocketAddr) -> Self {
        RequestHandler {
            session,
            peer,
            request_line: String::new(),
            status: None,
            headers_sent: false,
            bytes_sent: None,
        }
    }

    /// Serve the request, log it and close the connection
    pub fn run(mut self, parser: &RequestParser, base_environ: &Environ, app: &dyn Application) {
        if let Err(err) = self.handle(parser, base_environ, app) {
            debug!(client = %self.peer, error = %err, "connection error");
        }

        self.log_request();

        if let Err(err) = self.session.close() {
            debug!(client = %self.peer, error = %err, "error closing connection");
        }
    }

    fn handle(
        &mut self,
        parser: &RequestParser,
        base_environ: &Environ,
        app: &dyn Application,
    ) -> Result<()> {
        let head = match parser.read_head(&mut self.session)? {
            Parsed::Request(head) => head,
            Parsed::Empty => return Ok(()),
            Parsed::Rejected {
                failure,
                request_line,
            } => {
                self.request_line = request_line;
                self.status = Some(failure.status());
                debug!(client = %self.peer, "code {}, message {}", failure.status(), failure.message());
                self.session.write_all(&failure.to_wire())?;
                return self.session.flush();
            }
        };
        self.request_line = head.request_line().to_string();

        if head.expects_continue() {
            self.session.write_all(CONTINUE)?;
            self.session.flush()?;
        }

        let environ = request_environ(base_environ, &head, self.peer);
        let mut body = BodyReader {
            session: &mut self.session,
            remaining: head.content_length(),
        };
        let outcome = call_application(app, &environ, &mut body);
        if let Err(err) = body.drain() {
            debug!(client = %self.peer, error = %err, "failed to drain request body");
        }

        match outcome {
            Ok(response) => self.send_response(response),
            Err(err) => {
                error!(
                    client = %self.peer,
                    request = %self.request_line,
                    error = %err,
                    "application error"
                );
                self.send_server_error()
            }
        }
    }

    fn send_server_error(&mut self) -> Result<()> {
        if self.headers_sent {
            // too late for a new status line; the close tells the client
            return Ok(());
        }

        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");
        self.send_response(Response {
            status: StatusLine::from_code(500),
            headers,
            body: vec![Bytes::from_static(ERROR_BODY)],
        })
    }

    fn send_response(&mut self, response: Response) -> Result<()> {
        let Response {
            status,
            mut headers,
            body,
        } = response;

        if !headers.contains("Content-Length") {
            match body.as_slice() {
                [] => headers.set("Content-Length", "0"),
                [only] => headers.set("Content-Length", only.len().to_string()),
                _ => {}
            }
        }
        headers.set_default("Date", httpdate::fmt_http_date(SystemTime::now()));
        headers.set_default("Server", SERVER_SOFTWARE);
        headers.set("Connection", "Close");

        self.status = Some(status.code());
        self.bytes_sent = Some(0);

        let mut head = format!("{} {}{}", Version::HTTP_11, status, CRLF).into_bytes();
        headers.write_wire(&mut head);
        head.extend_from_slice(CRLF.as_bytes());
        self.headers_sent = true;
        self.session.write_all(&head)?;

        for chunk in &body {
            self.session.write_all(chunk)?;
            if let Some(sent) = self.bytes_sent.as_mut() {
                *sent += chunk.len() as u64;
            }
        }
        self.session.flush()
    }

    fn log_request(&self) {
        let Some(code) = self.status else {
            return;
        };
        match self.bytes_sent {
            Some(bytes) => info!(client = %self.peer, "\"{}\" {} {}", self.request_line, code, bytes),
            None => info!(client = %self.peer, "\"{}\" {} -", self.request_line, code),
        }
    }
}

fn call_application(
    app: &dyn Application,
    environ: &Environ,
    input: &mut dyn Read,
) -> std::result::Result<Response, AppError> {
    let mut start_response = StartResponse::new();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        app.call(environ, input, &mut start_response)
    }));

    let body = match outcome {
        Ok(result) => result?,
        Err(payload) => return Err(panic_message(payload).into()),
    };

    match start_response.into_parts() {
        Some((status, headers)) => Ok(Response {
            status,
            headers,
            body,
        }),
        None => Err("application returned without calling start_response".into()),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("application panicked: {}", detail)
}

/// The request body as seen by the application: at most `Content-Length`
/// bytes, buffered head overflow first
struct BodyReader<'a, S: SessionOps> {
    session: &'a mut HttpSession<S>,
    remaining: u64,
}

impl<S: SessionOps> BodyReader<'_, S> {
    /// Consume whatever the application left unread
    fn drain(&mut self) -> io::Result<()> {
        let mut scratch = [0u8; 8192];
        while self.read(&mut scratch)? > 0 {}
        Ok(())
    }
}

impl<S: SessionOps> Read for BodyReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = usize::try_from(self.remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let n = self.session.read(&mut buf[..max])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{from_fn, AppResult};
    use crate::http::session::from_tcp_stream;
    use std::io::Write;
    use std::net::{Shutdown, TcpListener, TcpStream};
    use tracing_test::traced_test;

    /// Run one exchange on the current thread and return the raw response
    fn exchange(request: &[u8], app: &dyn Application) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();

        client.write_all(request).unwrap();
        client.shutdown(Shutdown::Write).unwrap();

        RequestHandler::new(from_tcp_stream(server), peer).run(
            &RequestParser::new(),
            &Environ::new(),
            app,
        );

        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        response
    }

    fn echo_body(_: &Environ, input: &mut dyn Read, start: &mut StartResponse) -> AppResult {
        let mut body = Vec::new();
        input.read_to_end(&mut body)?;
        start.start("200 OK", [("Content-Type", "text/plain")])?;
        Ok(vec![Bytes::from(body)])
    }

    #[test]
    #[traced_test]
    fn test_response_and_log_line() {
        let app = from_fn(|environ, _input, start| {
            start.start("200 OK", [("Content-Type", "text/plain")])?;
            Ok(vec![Bytes::copy_from_slice(
                environ.get("PATH_INFO").unwrap_or("").as_bytes(),
            )])
        });
        let response = exchange(b"GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n", &app);

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Length: 6\r\n"));
        assert!(response.contains("Server: Pytest-HTTPBIN/0.1.0\r\n"));
        assert!(response.contains("Date: "));
        assert!(response.contains("Connection: Close\r\n\r\n/hello"));
        assert!(logs_contain("\"GET /hello HTTP/1.1\" 200 6"));
    }

    #[test]
    fn test_body_limited_to_content_length() {
        let response = exchange(
            b"POST /post HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello trailing",
            &echo_body,
        );
        assert!(response.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn test_multi_chunk_body_has_no_length() {
        let app = from_fn(|_, _, start| {
            start.start("200 OK", Vec::<(String, String)>::new())?;
            Ok(vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")])
        });
        let response = exchange(b"GET / HTTP/1.1\r\n\r\n", &app);
        assert!(!response.contains("Content-Length"));
        assert!(response.ends_with("\r\n\r\nabcd"));
    }

    #[test]
    fn test_empty_body_sends_zero_length() {
        let app = from_fn(|_, _, start| {
            start.start("204 No Content", Vec::<(String, String)>::new())?;
            Ok(Vec::new())
        });
        let response = exchange(b"GET / HTTP/1.1\r\n\r\n", &app);
        assert!(response.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(response.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn test_expect_continue() {
        let response = exchange(
            b"POST / HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\nok",
            &echo_body,
        );
        assert!(response.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"));
    }

    #[test]
    #[traced_test]
    fn test_application_error_gives_500() {
        let app = from_fn(|_, _, _| Err("boom".into()));
        let response = exchange(b"GET /fail HTTP/1.1\r\n\r\n", &app);

        assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(response.contains("Content-Type: text/plain\r\n"));
        assert!(response.ends_with(
            "\r\n\r\nA server error occurred.  Please contact the administrator."
        ));
        assert!(logs_contain("boom"));
        assert!(logs_contain("\"GET /fail HTTP/1.1\" 500 59"));
    }

    #[test]
    fn test_missing_start_response_gives_500() {
        let app = from_fn(|_, _, _| Ok(vec![Bytes::from_static(b"orphan")]));
        let response = exchange(b"GET / HTTP/1.1\r\n\r\n", &app);
        assert!(response.starts_with("HTTP/1.1 500 "));
    }

    #[test]
    fn test_panic_gives_500() {
        let app = from_fn(|_, _, _| panic!("handler exploded"));
        let response = exchange(b"GET / HTTP/1.1\r\n\r\n", &app);
        assert!(response.starts_with("HTTP/1.1 500 "));
    }

    #[test]
    fn test_connection_header_replaced() {
        let app = from_fn(|_, _, start| {
            start.start("200 OK", [("X-First", "1")])?;
            Ok(vec![Bytes::from_static(b"x")])
        });
        let response = exchange(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n", &app);
        let head = response.split("\r\n\r\n").next().unwrap();
        assert!(head.ends_with("Connection: Close"));
        assert_eq!(head.matches("Connection").count(), 1);
    }

    #[test]
    #[traced_test]
    fn test_bad_request_never_reaches_application() {
        let app = from_fn(|_, _, _| panic!("must not be called"));
        let response = exchange(b"GARBAGE\r\n\r\n", &app);

        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.contains("Bad request syntax"));
        assert!(logs_contain("\"GARBAGE\" 400 -"));
    }

    #[test]
    fn test_empty_request_gets_no_response() {
        let app = from_fn(|_, _, _| panic!("must not be called"));
        assert_eq!(exchange(b"", &app), "");
    }
}
