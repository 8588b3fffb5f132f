//! One-shot HTTP client for talking to a running fixture
//!
//! Every request opens a fresh connection, sends `Connection: close` and
//! reads the response until the server hangs up, which is exactly how the
//! fixture behaves.

use super::tls::TlsConfig;
use super::{
    BoxedSession, Error, FdSessionOps, Headers, HttpSession, Result, Version, CRLF,
};
use std::borrow::{Borrow, Cow};
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;
use url::{form_urlencoded, Url};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP/1.1 test client
#[derive(Debug, Clone)]
pub struct TestClient {
    tls: Option<TlsConfig>,
    timeout: Duration,
}

impl TestClient {
    /// Plain client; HTTPS peers are not verified
    pub fn new() -> Self {
        TestClient {
            tls: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Client that only accepts HTTPS servers signed by the CA in `ca_file`
    pub fn trusting<P: AsRef<Path>>(ca_file: P) -> Result<Self> {
        let tls = TlsConfig::client().ca_file(ca_file).build()?;
        Ok(TestClient {
            tls: Some(tls),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Client trusting the bundled test CA (`certs/client.pem`)
    pub fn with_client_pem() -> Result<Self> {
        Self::trusting(crate::certs::client_pem())
    }

    /// Give up when the server stalls for longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a GET request
    pub fn get(&self, url: &str) -> Result<ClientResponse> {
        self.request("GET", url, &[], b"")
    }

    /// POST `fields` as `application/x-www-form-urlencoded`
    pub fn post_form<I, K, V>(&self, url: &str, fields: I) -> Result<ClientResponse>
    where
        I: IntoIterator,
        I::Item: Borrow<(K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        serializer.extend_pairs(fields);
        let body = serializer.finish();

        self.request(
            "POST",
            url,
            &[("Content-Type", "application/x-www-form-urlencoded")],
            body.as_bytes(),
        )
    }

    /// Send an arbitrary request
    ///
    /// `Host`, `Content-Length` (when there is a body) and `Connection` are
    /// added by the client.
    pub fn request(
        &self,
        method: &str,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<ClientResponse> {
        let url = Url::parse(url)?;

        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }

        let mut host = url
            .host_str()
            .ok_or_else(|| Error::Parse(format!("URL has no host: {}", url)))?
            .to_string();
        if let Some(port) = url.port() {
            host = format!("{}:{}", host, port);
        }

        let mut request_headers = Headers::new();
        request_headers.insert("Host", host);
        for (name, value) in headers {
            request_headers.insert(*name, *value);
        }
        if !body.is_empty() || method == "POST" || method == "PUT" {
            request_headers.set_default("Content-Length", body.len().to_string());
        }
        request_headers.set("Connection", "close");

        let mut wire = format!("{} {} {}{}", method, target, Version::HTTP_11, CRLF).into_bytes();
        request_headers.write_wire(&mut wire);
        wire.extend_from_slice(CRLF.as_bytes());
        wire.extend_from_slice(body);

        let raw = self.exchange(&url, &wire)?;
        ClientResponse::parse(&raw)
    }

    /// Write `raw` as-is and return everything the server sends back
    pub fn send_raw(&self, url: &str, raw: &[u8]) -> Result<Vec<u8>> {
        self.exchange(&Url::parse(url)?, raw)
    }

    fn exchange(&self, url: &Url, wire: &[u8]) -> Result<Vec<u8>> {
        let mut session = self.connect(url)?;
        session.write_all(wire)?;
        session.flush()?;

        let mut response = Vec::new();
        let result = session.read_to_end(&mut response);
        // the server has already closed; errors here change nothing
        let _ = session.close();
        result?;

        Ok(response)
    }

    fn connect(&self, url: &Url) -> Result<HttpSession<BoxedSession>> {
        let secure = match url.scheme() {
            "http" => false,
            "https" => true,
            other => return Err(Error::UnsupportedScheme(other.to_string())),
        };

        let addrs = url.socket_addrs(|| None)?;
        let stream = TcpStream::connect(&*addrs)?;

        let transport: BoxedSession = if secure {
            let servername = match url.host() {
                Some(url::Host::Domain(name)) => name.to_string(),
                Some(url::Host::Ipv4(ip)) => ip.to_string(),
                Some(url::Host::Ipv6(ip)) => ip.to_string(),
                None => return Err(Error::Parse(format!("URL has no host: {}", url))),
            };
            let tls = match &self.tls {
                Some(tls) => Cow::Borrowed(tls),
                None => Cow::Owned(TlsConfig::client().verify_peer(false).build()?),
            };
            Box::new(tls.connect(stream, &servername)?)
        } else {
            Box::new(FdSessionOps::new(stream))
        };

        let mut session = HttpSession::new(transport);
        session.set_timeout(Some(self.timeout));
        Ok(session)
    }
}

impl Default for TestClient {
    fn default() -> Self {
        Self::new()
    }
}

/// A complete response as read from the wire
#[derive(Debug, Clone)]
pub struct ClientResponse {
    version: Version,
    status: u16,
    reason: String,
    headers: Headers,
    body: Vec<u8>,
}

impl ClientResponse {
    /// Parse a full response; interim `1xx` responses are skipped
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let mut rest = raw;
        loop {
            let head_end = find_head_end(rest)
                .ok_or_else(|| Error::Parse("Incomplete response head".to_string()))?;
            let head = String::from_utf8_lossy(&rest[..head_end]);
            let body = &rest[head_end + 4..];

            let mut lines = head.split(CRLF);
            let status_line = lines.next().unwrap_or("");
            let (version, status, reason) = parse_status_line(status_line)?;

            if (100..200).contains(&status) {
                rest = body;
                continue;
            }

            let mut headers = Headers::new();
            for line in lines {
                let (name, value) = Headers::parse_header_line(line)?;
                headers.insert(name, value);
            }

            let body = match headers.get("Content-Length").map(str::parse::<usize>) {
                Some(Ok(length)) if length <= body.len() => body[..length].to_vec(),
                Some(Ok(length)) => {
                    return Err(Error::Parse(format!(
                        "Body shorter than Content-Length: {} < {}",
                        body.len(),
                        length
                    )))
                }
                Some(Err(_)) => return Err(Error::Parse("Invalid Content-Length".to_string())),
                None => body.to_vec(),
            };

            return Ok(ClientResponse {
                version,
                status,
                reason,
                headers,
                body,
            });
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Reason phrase
    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Body bytes
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as UTF-8, lossily
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Parse a status line
///
/// Format: VERSION STATUS [REASON]
/// Example: HTTP/1.1 200 OK
fn parse_status_line(line: &str) -> Result<(Version, u16, String)> {
    let parts: Vec<&str> = line.splitn(3, ' ').collect();

    if parts.len() < 2 {
        return Err(Error::Parse(format!("Invalid status line: {:?}", line)));
    }

    let version = Version::from_str(parts[0])?;
    let status = parts[1]
        .parse::<u16>()
        .map_err(|_| Error::InvalidStatus(parts[1].to_string()))?;
    let reason = parts.get(2).copied().unwrap_or("").to_string();

    Ok((version, status, reason))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
