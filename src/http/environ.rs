//! CGI-style request environment
//!
//! Every request gets a fresh [`Environ`]: the listener's base environment
//! plus the keys derived from the request head.

use super::{RequestHead, SERVER_SOFTWARE};
use percent_encoding::percent_decode;
use std::collections::btree_map::{self, BTreeMap};
use std::net::SocketAddr;

/// String-to-string environment handed to the application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environ {
    vars: BTreeMap<String, String>,
}

impl Environ {
    pub fn new() -> Self {
        Environ {
            vars: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Set `key`, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.vars.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Environ {
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environ {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut environ = Environ::new();
        environ.extend(iter);
        environ
    }
}

impl<'a> IntoIterator for &'a Environ {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.iter()
    }
}

/// Build the environment for one request
///
/// `CONTENT_TYPE` is only present when the client sent a `Content-Type`
/// header, even if the base environment carries one.
pub fn request_environ(base: &Environ, head: &RequestHead, peer: SocketAddr) -> Environ {
    let mut env = base.clone();

    env.insert("SERVER_PROTOCOL", head.version().to_string());
    env.insert("SERVER_SOFTWARE", SERVER_SOFTWARE);
    env.insert("REQUEST_METHOD", head.method());
    env.insert("PATH_INFO", unquote_latin1(head.path()));
    env.insert("QUERY_STRING", head.query());
    env.insert("REMOTE_ADDR", peer.ip().to_string());

    let headers = head.headers();
    match headers.get("Content-Type") {
        Some(content_type) => env.insert("CONTENT_TYPE", content_type),
        None => env.remove("CONTENT_TYPE"),
    };
    match headers.get("Content-Length") {
        Some(length) if !length.is_empty() => env.insert("CONTENT_LENGTH", length),
        _ => env.remove("CONTENT_LENGTH"),
    };

    for (name, value) in headers.iter() {
        let key = name.replace('-', "_").to_ascii_uppercase();
        if env.contains_key(&key) {
            continue;
        }

        let value = value.trim();
        let key = format!("HTTP_{}", key);
        match env.vars.get_mut(&key) {
            Some(existing) => {
                existing.push(',');
                existing.push_str(value);
            }
            None => {
                env.insert(key, value);
            }
        }
    }

    env
}

/// Percent-decode a path whose chars are ISO-8859-1 code points
fn unquote_latin1(path: &str) -> String {
    let raw: Vec<u8> = path.chars().map(|c| c as u8).collect();
    percent_decode(&raw).map(char::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Headers, Version};

    fn head(target: &str, headers: &[(&str, &str)]) -> RequestHead {
        let headers: Headers = headers.iter().copied().collect();
        RequestHead::new(
            "POST",
            target,
            Version::HTTP_11,
            headers,
            format!("POST {} HTTP/1.1", target),
        )
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:54321".parse().unwrap()
    }

    #[test]
    fn test_request_keys() {
        let base: Environ = [("SERVER_NAME", "localhost"), ("SERVER_PORT", "8080")]
            .into_iter()
            .collect();
        let env = request_environ(&base, &head("/a%20b?x=1&y=2", &[]), peer());

        assert_eq!(env.get("SERVER_NAME"), Some("localhost"));
        assert_eq!(env.get("REQUEST_METHOD"), Some("POST"));
        assert_eq!(env.get("SERVER_PROTOCOL"), Some("HTTP/1.1"));
        assert_eq!(env.get("PATH_INFO"), Some("/a b"));
        assert_eq!(env.get("QUERY_STRING"), Some("x=1&y=2"));
        assert_eq!(env.get("REMOTE_ADDR"), Some("127.0.0.1"));
        assert!(!env.contains_key("CONTENT_LENGTH"));
        assert!(!env.contains_key("REMOTE_HOST"));
    }

    #[test]
    fn test_content_type_omitted_when_not_sent() {
        let base: Environ = [("CONTENT_TYPE", "text/plain")].into_iter().collect();
        let env = request_environ(&base, &head("/", &[("Host", "localhost")]), peer());
        assert!(!env.contains_key("CONTENT_TYPE"));
        assert!(!env.contains_key("HTTP_CONTENT_TYPE"));
    }

    #[test]
    fn test_content_headers() {
        let env = request_environ(
            &Environ::new(),
            &head(
                "/",
                &[("Content-Type", "application/json"), ("Content-Length", "7")],
            ),
            peer(),
        );
        assert_eq!(env.get("CONTENT_TYPE"), Some("application/json"));
        assert_eq!(env.get("CONTENT_LENGTH"), Some("7"));
        assert!(!env.contains_key("HTTP_CONTENT_TYPE"));
        assert!(!env.contains_key("HTTP_CONTENT_LENGTH"));
    }

    #[test]
    fn test_http_headers_joined() {
        let env = request_environ(
            &Environ::new(),
            &head(
                "/",
                &[("X-Forwarded-For", "10.0.0.1"), ("x-forwarded-for", " 10.0.0.2 ")],
            ),
            peer(),
        );
        assert_eq!(env.get("HTTP_X_FORWARDED_FOR"), Some("10.0.0.1,10.0.0.2"));
    }

    #[test]
    fn test_path_decoded_as_latin1() {
        let env = request_environ(&Environ::new(), &head("/caf%E9", &[]), peer());
        assert_eq!(env.get("PATH_INFO"), Some("/caf\u{e9}"));
    }
}
