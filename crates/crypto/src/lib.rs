//! Request authentication and signed URLs for Klaxon.
//!
//! Two independent primitives live here:
//!
//! - [`auth`]: HMAC-SHA512 application request signing over five-second
//!   windows, accepting the current or previous window with constant-time
//!   comparison.
//! - [`oneclick`]: HMAC-signed claim URLs embedded in incident emails and
//!   validated by the response webhook.

pub mod auth;
pub mod error;
pub mod oneclick;

pub use auth::{ApplicationKey, WINDOW_SECONDS, auth_header, parse_header, sign_window, verify};
pub use error::AuthError;
pub use oneclick::{
    OneclickParams, generate_oneclick_url, oneclick_token, validate_oneclick_token,
};
