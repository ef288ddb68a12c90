//! Percent-encoding of path segments and query strings
//!
//! Everything outside the RFC 3986 unreserved set is encoded, so `/`, `&`,
//! spaces and non-ASCII text always travel as a single opaque segment or value.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use crate::error::Result;

/// Bytes that pass through unencoded: `A-Z a-z 0-9 - . _ ~`
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Encode a single path segment or query component
pub fn encode_segment(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED).to_string()
}

/// Encode query pairs; a `None` value yields a bare key (`?update`)
pub fn encode_query(pairs: &[(&str, Option<&str>)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| match value {
            Some(value) => format!("{}={}", encode_segment(key), encode_segment(value)),
            None => encode_segment(key),
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Append encoded segments and a query to a base URL
///
/// The base path is kept as-is, so `https://host/compute/v2.0` joined with
/// `["servers", "a b"]` becomes `https://host/compute/v2.0/servers/a%20b`.
pub fn join_url(base: &Url, segments: &[&str], query: &[(&str, Option<&str>)]) -> Result<Url> {
    let mut url = base.as_str().split(['?', '#']).next().unwrap_or_default().to_string();
    for segment in segments {
        if !url.ends_with('/') {
            url.push('/');
        }
        url.push_str(&encode_segment(segment));
    }
    if !query.is_empty() {
        url.push('?');
        url.push_str(&encode_query(query));
    }
    Ok(Url::parse(&url)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_reserved_characters() {
        assert_eq!(encode_segment("a b"), "a%20b");
        assert_eq!(encode_segment("a&b=c"), "a%26b%3Dc");
        assert_eq!(encode_segment("dir/file"), "dir%2Ffile");
        assert_eq!(encode_segment("safe-._~"), "safe-._~");
        assert_eq!(encode_segment("ελληνικά"), "%CE%B5%CE%BB%CE%BB%CE%B7%CE%BD%CE%B9%CE%BA%CE%AC");
    }

    #[test]
    fn test_encode_query() {
        let query = encode_query(&[("format", Some("json")), ("update", None), ("prefix", Some("a b/c"))]);
        assert_eq!(query, "format=json&update&prefix=a%20b%2Fc");
    }

    #[test]
    fn test_join_url_keeps_base_path() {
        let base = Url::parse("https://cloud.example.org/compute/v2.0/").unwrap();
        let url = join_url(&base, &["servers", "my server"], &[]).unwrap();
        assert_eq!(url.as_str(), "https://cloud.example.org/compute/v2.0/servers/my%20server");

        let base = Url::parse("https://cloud.example.org/object-store/v1").unwrap();
        let url = join_url(&base, &["acc", "c/1"], &[("format", Some("json"))]).unwrap();
        assert_eq!(url.as_str(), "https://cloud.example.org/object-store/v1/acc/c%2F1?format=json");
    }

    #[test]
    fn test_join_url_drops_base_query() {
        let base = Url::parse("https://cloud.example.org/v1?stale=1").unwrap();
        let url = join_url(&base, &["x"], &[]).unwrap();
        assert_eq!(url.as_str(), "https://cloud.example.org/v1/x");
    }
}
