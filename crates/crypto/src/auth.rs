//! HMAC-SHA512 application request authentication.
//!
//! A client signs `"<window> <method> <path> <body>"` where `window` is the
//! Unix time divided by five seconds, and sends
//! `Authorization: hmac <app>:<digest>` with the digest base64-url-encoded.
//! The server accepts the current or the previous window, so a digest
//! computed at the end of window `t-1` stays valid for at most five seconds
//! into window `t`. Comparison is constant-time.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE as B64_URL;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use subtle::ConstantTimeEq;

use crate::error::AuthError;

type HmacSha512 = Hmac<Sha512>;

/// Length of one auth window in seconds.
pub const WINDOW_SECONDS: u64 = 5;

/// An application's shared HMAC key.
///
/// The `Debug` implementation is redacted to keep key material out of logs.
#[derive(Clone)]
pub struct ApplicationKey(Vec<u8>);

impl ApplicationKey {
    #[must_use]
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self(key.into())
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Crate-internal access to the raw key bytes.
    pub(crate) fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ApplicationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApplicationKey([REDACTED])")
    }
}

/// The auth window containing the given Unix time.
#[must_use]
pub fn window_of(unix_time: u64) -> u64 {
    unix_time / WINDOW_SECONDS
}

/// Compute the base64-url digest for one window.
///
/// `path` must include the query string when one is present
/// (`/v0/incidents?active=1`).
#[must_use]
pub fn sign_window(key: &ApplicationKey, window: u64, method: &str, path: &str, body: &str) -> String {
    let text = format!("{window} {method} {path} {body}");
    let mut mac =
        HmacSha512::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(text.as_bytes());
    B64_URL.encode(mac.finalize().into_bytes())
}

/// Build a complete `Authorization` header value for a request signed now.
#[must_use]
pub fn auth_header(
    app: &str,
    key: &ApplicationKey,
    unix_time: u64,
    method: &str,
    path: &str,
    body: &str,
) -> String {
    let digest = sign_window(key, window_of(unix_time), method, path, body);
    format!("hmac {app}:{digest}")
}

/// Split an `Authorization: hmac <app>:<digest>` header value.
pub fn parse_header(header: &str) -> Result<(&str, &str), AuthError> {
    let rest = header
        .strip_prefix("hmac ")
        .ok_or(AuthError::UnsupportedScheme)?;
    rest.split_once(':').ok_or(AuthError::MalformedHeader)
}

/// Verify a client digest against the current and previous windows.
///
/// Both comparisons are constant-time; the previous window is only checked
/// when the current one fails.
#[must_use]
pub fn verify(
    key: &ApplicationKey,
    unix_time: u64,
    method: &str,
    path: &str,
    body: &str,
    client_digest: &str,
) -> bool {
    let window = window_of(unix_time);
    if constant_time_eq(&sign_window(key, window, method, path, body), client_digest) {
        return true;
    }
    let Some(previous) = window.checked_sub(1) else {
        return false;
    };
    constant_time_eq(&sign_window(key, previous, method, path, body), client_digest)
}

fn constant_time_eq(expected: &str, provided: &str) -> bool {
    // ct_eq requires equal lengths; a length mismatch can fail fast because
    // digest length is public.
    expected.len() == provided.len()
        && expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ApplicationKey {
        ApplicationKey::new(b"test-application-key".to_vec())
    }

    #[test]
    fn digest_accepted_in_same_window() {
        let header = auth_header("grafana", &key(), 5000, "POST", "/v0/incidents", "{}");
        let (app, digest) = parse_header(&header).unwrap();
        assert_eq!(app, "grafana");
        assert!(verify(&key(), 5003, "POST", "/v0/incidents", "{}", digest));
    }

    #[test]
    fn previous_window_accepted_for_one_window() {
        // Sign inside window 1000, verify inside windows 1001 and 1002.
        let digest = sign_window(&key(), 1000, "GET", "/v0/plans", "");
        assert!(verify(&key(), 1001 * WINDOW_SECONDS, "GET", "/v0/plans", "", &digest));
        assert!(verify(
            &key(),
            1001 * WINDOW_SECONDS + WINDOW_SECONDS - 1,
            "GET",
            "/v0/plans",
            "",
            &digest
        ));
        assert!(!verify(&key(), 1002 * WINDOW_SECONDS, "GET", "/v0/plans", "", &digest));
    }

    #[test]
    fn digest_bound_to_method_path_and_body() {
        let digest = sign_window(&key(), 1000, "POST", "/v0/incidents", "{\"a\":1}");
        let now = 1000 * WINDOW_SECONDS;
        assert!(!verify(&key(), now, "GET", "/v0/incidents", "{\"a\":1}", &digest));
        assert!(!verify(&key(), now, "POST", "/v0/plans", "{\"a\":1}", &digest));
        assert!(!verify(&key(), now, "POST", "/v0/incidents", "{}", &digest));
        assert!(verify(&key(), now, "POST", "/v0/incidents", "{\"a\":1}", &digest));
    }

    #[test]
    fn query_string_is_part_of_the_path() {
        let digest = sign_window(&key(), 1000, "GET", "/v0/incidents?active=1", "");
        let now = 1000 * WINDOW_SECONDS;
        assert!(!verify(&key(), now, "GET", "/v0/incidents", "", &digest));
        assert!(verify(&key(), now, "GET", "/v0/incidents?active=1", "", &digest));
    }

    #[test]
    fn wrong_key_rejected() {
        let digest = sign_window(&key(), 1000, "GET", "/v0/plans", "");
        let other = ApplicationKey::new(b"other-key".to_vec());
        assert!(!verify(&other, 1000 * WINDOW_SECONDS, "GET", "/v0/plans", "", &digest));
    }

    #[test]
    fn header_parsing() {
        assert_eq!(parse_header("hmac app:abc").unwrap(), ("app", "abc"));
        assert!(matches!(
            parse_header("basic app:abc"),
            Err(AuthError::UnsupportedScheme)
        ));
        assert!(matches!(
            parse_header("hmac appabc"),
            Err(AuthError::MalformedHeader)
        ));
    }

    #[test]
    fn key_debug_is_redacted() {
        let debug = format!("{:?}", key());
        assert_eq!(debug, "ApplicationKey([REDACTED])");
    }
}
