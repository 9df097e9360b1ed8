//! Secrets that keep themselves out of logs
//!
//! Tokens and passwords format as a placeholder such as `***ACCESS TOKEN***`.
//! The alternate debug form (`{:#?}`) shows a short prefix of a token instead,
//! enough to tell two tokens apart; a width (`{:#8?}`) changes its length.
//! Passwords show no characters in any form.

use aliri_braid::braid;
use std::fmt;

macro_rules! redacted {
    (@display $ty:ty, $label:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(concat!("***", $label, "***"))
            }
        }
    };
    ($ty:ty, $label:literal, prefix = $prefix:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    write_prefix(self.as_str(), f, $prefix)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $label, "***"))
                }
            }
        }

        redacted!(@display $ty, $label);
    };
    ($ty:ty, $label:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"…\"")
                } else {
                    f.write_str(concat!("***", $label, "***"))
                }
            }
        }

        redacted!(@display $ty, $label);
    };
}

/// Writes at most `len - 1` characters of `secret` followed by an ellipsis,
/// or all of it if it is shorter
fn write_prefix(secret: &str, f: &mut fmt::Formatter, len: usize) -> fmt::Result {
    let keep = f.width().unwrap_or(len).saturating_sub(1);
    match secret.char_indices().nth(keep) {
        Some((end, _)) => {
            f.write_str(&secret[..end])?;
            f.write_str("…")
        }
        None => f.write_str(secret),
    }
}

/// An access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

redacted!(AccessTokenRef, "ACCESS TOKEN", prefix = 15);

/// A refresh token
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

redacted!(RefreshTokenRef, "REFRESH TOKEN", prefix = 5);

/// The scheme written before the access token in an `Authorization` header
///
/// Authorities that leave it out of a token response mean `Bearer`.
#[braid(serde)]
pub struct TokenType;

impl Default for TokenType {
    fn default() -> Self {
        Self::from_static("Bearer")
    }
}

/// A password on its way to the authority
///
/// Serializes as plain text for login and registration bodies.
#[braid(serde, debug = "owned", display = "owned")]
pub struct Password;

redacted!(PasswordRef, "PASSWORD");
