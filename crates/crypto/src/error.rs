use thiserror::Error;

/// Errors raised while parsing or verifying request authentication.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The `Authorization` header does not use the `hmac` scheme.
    #[error("unsupported authorization scheme")]
    UnsupportedScheme,

    /// The header is not of the form `hmac <app>:<digest>`.
    #[error("malformed authorization header")]
    MalformedHeader,

    /// The digest did not match any accepted window.
    #[error("authentication failure")]
    InvalidDigest,
}
