//! CORS specific request header handling
//!
//! `http::HeaderMap` already stores header names in canonical lower-case form
//! and keeps the values for a repeated name in order of arrival, so the
//! helpers here only have to pick first values, join token sets into response
//! values and fold `Origin` into `Vary`.

use std::borrow::Cow;
use std::collections::HashSet;

use http::header::{self, InvalidHeaderValue};
use http::{HeaderMap, HeaderValue};
use log::warn;

/// Returns the first `Origin` value. A request that repeats the header keeps
/// its first occurrence; the rest are ignored rather than treated as an error.
pub(crate) fn origin(headers: &HeaderMap) -> Option<&HeaderValue> {
    headers.get(header::ORIGIN)
}

/// Returns the first `Access-Control-Request-Method` value.
pub(crate) fn request_method(headers: &HeaderMap) -> Option<&HeaderValue> {
    headers.get(header::ACCESS_CONTROL_REQUEST_METHOD)
}

/// Returns the first `Access-Control-Request-Headers` value.
pub(crate) fn request_headers(headers: &HeaderMap) -> Option<&HeaderValue> {
    headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS)
}

/// Whether the request carries a `Cookie` header.
pub(crate) fn has_cookie(headers: &HeaderMap) -> bool {
    headers.contains_key(header::COOKIE)
}

/// Text form of a header value for log lines and rejection bodies. Bytes that
/// are not UTF-8 are replaced instead of failing the request.
pub(crate) fn lossy(value: &HeaderValue) -> Cow<'_, str> {
    String::from_utf8_lossy(value.as_bytes())
}

/// Joins a token set into one `", "` separated header value.
///
/// Tokens are sorted first so the emitted value is the same from run to run;
/// set iteration order is not.
pub(crate) fn join_sorted(tokens: &HashSet<String>) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut tokens: Vec<&str> = tokens.iter().map(String::as_str).collect();
    tokens.sort_unstable();
    HeaderValue::from_str(&tokens.join(", "))
}

/// Adds `Origin` to the response's `Vary` header.
///
/// An existing value is extended with `,Origin` rather than overwritten, and
/// one that already lists `Origin` is left alone, so applying this twice is
/// the same as applying it once.
pub(crate) fn merge_vary(headers: &mut HeaderMap) {
    let value = match headers.get(header::VARY) {
        None => HeaderValue::from_static("Origin"),
        Some(existing) => match existing.to_str() {
            Ok(existing) => {
                // header names compare case insensitively
                if existing
                    .split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("origin"))
                {
                    return;
                }
                match HeaderValue::from_str(&format!("{existing},Origin")) {
                    Ok(value) => value,
                    // the existing value was readable, so the merged one is too
                    Err(_) => return,
                }
            }
            // opaque bytes; leave the existing value untouched
            Err(_) => {
                let existing = lossy(existing);
                warn!("skipping vary merge; existing value {existing} is not UTF-8");
                return;
            }
        },
    };
    headers.insert(header::VARY, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_value_wins_for_duplicate_headers() {
        let mut headers = HeaderMap::new();
        headers.append(header::ORIGIN, HeaderValue::from_static("https://a.test"));
        headers.append(header::ORIGIN, HeaderValue::from_static("https://b.test"));

        let first = origin(&headers).expect("to exist");
        assert_eq!("https://a.test", first);
    }

    #[test]
    fn cookie_presence_is_detected() {
        let mut headers = HeaderMap::new();
        assert!(!has_cookie(&headers));

        headers.insert(header::COOKIE, HeaderValue::from_static("session=abc"));
        assert!(has_cookie(&headers));
    }

    #[test]
    fn joined_tokens_are_sorted() {
        let tokens: HashSet<String> = ["X-Request-Id", "Authorization", "Content-Type"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();

        let value = not_err!(join_sorted(&tokens));
        assert_eq!("Authorization, Content-Type, X-Request-Id", value);
    }

    #[test]
    fn join_rejects_values_that_cannot_go_on_the_wire() {
        let tokens: HashSet<String> = ["X-Custom\r\nX-Smuggled"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();

        assert_matches!(join_sorted(&tokens), Err(_));
    }

    #[test]
    fn vary_is_set_when_absent() {
        let mut headers = HeaderMap::new();
        merge_vary(&mut headers);

        assert_eq!("Origin", headers.get(header::VARY).expect("to exist"));
    }

    #[test]
    fn vary_is_merged_with_existing_values() {
        let mut headers = HeaderMap::new();
        headers.insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        merge_vary(&mut headers);

        assert_eq!(
            "Accept-Encoding,Origin",
            headers.get(header::VARY).expect("to exist")
        );
    }

    #[test]
    fn vary_merge_skips_an_already_listed_origin() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::VARY,
            HeaderValue::from_static("Accept-Encoding, origin"),
        );
        merge_vary(&mut headers);

        assert_eq!(
            "Accept-Encoding, origin",
            headers.get(header::VARY).expect("to exist")
        );
    }

    #[test]
    fn vary_merge_is_idempotent() {
        let mut headers = HeaderMap::new();
        merge_vary(&mut headers);
        merge_vary(&mut headers);

        assert_eq!("Origin", headers.get(header::VARY).expect("to exist"));
    }

    #[test]
    fn vary_merge_leaves_unreadable_values_untouched() {
        let mut headers = HeaderMap::new();
        let opaque = HeaderValue::from_bytes(b"Accept-\xFFEncoding").expect("to not fail");
        headers.insert(header::VARY, opaque.clone());
        merge_vary(&mut headers);

        assert_eq!(&opaque, headers.get(header::VARY).expect("to exist"));
    }
}
