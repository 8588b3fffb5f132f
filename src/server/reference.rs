//! Resolving references against a fixture's base URL
//!
//! The base is always `scheme://authority` with an empty path. Resolution
//! follows RFC 3986 section 5.2 but keeps the reference text as written: no
//! percent-encoding, no added trailing slash. Only dot segments are removed.

/// A reference split into its RFC 3986 components
#[derive(Debug, PartialEq, Eq)]
struct Parts<'a> {
    scheme: Option<&'a str>,
    authority: Option<&'a str>,
    path: &'a str,
    query: Option<&'a str>,
    fragment: Option<&'a str>,
}

/// With `allow_fragments` off, `#` is ordinary text in the path or query.
fn split(reference: &str, allow_fragments: bool) -> Parts<'_> {
    let (rest, fragment) = match reference.split_once('#') {
        Some((head, tail)) if allow_fragments => (head, Some(tail)),
        _ => (reference, None),
    };
    let (rest, query) = match rest.split_once('?') {
        Some((head, tail)) => (head, Some(tail)),
        None => (rest, None),
    };
    let (scheme, rest) = match rest.split_once(':') {
        Some((scheme, tail)) if is_scheme(scheme) => (Some(scheme), tail),
        _ => (None, rest),
    };
    let (authority, path) = match rest.strip_prefix("//") {
        Some(tail) => {
            let end = tail.find('/').unwrap_or(tail.len());
            (Some(&tail[..end]), &tail[end..])
        }
        None => (None, rest),
    };

    Parts {
        scheme,
        authority,
        path,
        query,
        fragment,
    }
}

fn is_scheme(text: &str) -> bool {
    let mut chars = text.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Resolve a non-empty `reference` against `scheme://authority`
pub(crate) fn resolve(
    scheme: &str,
    authority: &str,
    reference: &str,
    allow_fragments: bool,
) -> String {
    let parts = split(reference, allow_fragments);

    match (parts.scheme, parts.authority) {
        // absolute, or a different scheme: nothing to resolve
        (Some(other), _) if !other.eq_ignore_ascii_case(scheme) => return reference.to_string(),
        (Some(_), Some(_)) => return reference.to_string(),
        (None, Some(_)) => return format!("{}:{}", scheme, reference),
        _ => {}
    }

    let mut joined = format!("{}://{}", scheme, authority);
    if !parts.path.is_empty() {
        if parts.path.starts_with('/') {
            joined.push_str(&remove_dot_segments(parts.path));
        } else {
            joined.push_str(&remove_dot_segments(&format!("/{}", parts.path)));
        }
    }
    if let Some(query) = parts.query {
        joined.push('?');
        joined.push_str(query);
    }
    if let Some(fragment) = parts.fragment {
        joined.push('#');
        joined.push_str(fragment);
    }
    joined
}

/// RFC 3986 section 5.2.4, for a path starting with `/`
fn remove_dot_segments(path: &str) -> String {
    let mut output: Vec<&str> = Vec::new();
    let mut segments = path.split('/').skip(1).peekable();

    while let Some(segment) = segments.next() {
        let last = segments.peek().is_none();
        match segment {
            "." => {}
            ".." => {
                output.pop();
            }
            _ => {
                output.push(segment);
                continue;
            }
        }
        // a trailing dot segment still names a directory
        if last {
            output.push("");
        }
    }

    format!("/{}", output.join("/"))
}
