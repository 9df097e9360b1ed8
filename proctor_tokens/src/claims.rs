//! Unverified access to the payload of a signed token
//!
//! The payload is decoded for display purposes only. Nothing here checks the
//! signature, so the claims must never be used for authorization decisions.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use serde_json::{Map, Value};
use thiserror::Error;

const URL_SAFE_ANY_PADDING: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The token is not a three-part signed token with a JSON object payload
#[derive(Clone, Copy, Debug, Error)]
#[error("malformed token")]
pub struct MalformedToken {
    _p: (),
}

const fn malformed_token() -> MalformedToken {
    MalformedToken { _p: () }
}

/// The decoded payload of a token
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Claims(Map<String, Value>);

impl Claims {
    /// Gets a claim by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Gets a claim by name if it is a non-empty string
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// The subject, falling back to a `username` claim
    pub fn username(&self) -> Option<&str> {
        self.get_str("sub").or_else(|| self.get_str("username"))
    }

    /// All claims
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Decodes the payload section of `token`
pub fn decode_claims(token: &str) -> Result<Claims, MalformedToken> {
    let mut sections = token.split('.');
    let (Some(_), Some(payload), Some(_), None) = (
        sections.next(),
        sections.next(),
        sections.next(),
        sections.next(),
    ) else {
        return Err(malformed_token());
    };

    let decoded = URL_SAFE_ANY_PADDING
        .decode(payload)
        .map_err(|_| malformed_token())?;

    match serde_json::from_slice(&decoded) {
        Ok(Value::Object(map)) => Ok(Claims(map)),
        _ => Err(malformed_token()),
    }
}

/// Reads the user name from `token`, if it can be decoded and carries one
pub fn username_from_token(token: &str) -> Option<String> {
    match decode_claims(token) {
        Ok(claims) => claims.username().map(str::to_owned),
        Err(error) => {
            tracing::debug!(%error, "unable to decode token claims");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with(payload: &str) -> String {
        format!(
            "eyJhbGciOiJIUzI1NiJ9.{}.c2lnbmF0dXJl",
            URL_SAFE_ANY_PADDING.encode(payload)
        )
    }

    #[test]
    fn reads_subject() {
        let token = token_with(r#"{"sub":"ada","exp":1700000000}"#);
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.username(), Some("ada"));
        assert_eq!(claims.get("exp"), Some(&Value::from(1700000000)));
    }

    #[test]
    fn falls_back_to_username_claim() {
        let token = token_with(r#"{"sub":"","username":"grace"}"#);
        assert_eq!(username_from_token(&token).as_deref(), Some("grace"));
    }

    #[test]
    fn no_user_claims_yields_none() {
        let token = token_with(r#"{"role":"TEACHER"}"#);
        assert_eq!(username_from_token(&token), None);
    }

    #[test]
    fn accepts_padded_payload() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"sub":"ada"}"#);
        let token = format!("h.{payload}.s");
        assert_eq!(username_from_token(&token).as_deref(), Some("ada"));
    }

    #[test]
    fn rejects_wrong_number_of_sections() {
        assert!(decode_claims("only.two").is_err());
        assert!(decode_claims("a.b.c.d").is_err());
        assert!(decode_claims("").is_err());
    }

    #[test]
    fn rejects_non_object_payload() {
        let token = token_with("[1,2,3]");
        assert!(decode_claims(&token).is_err());
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(decode_claims("h.!!!.s").is_err());
    }
}
