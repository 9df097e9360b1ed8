//! DTOs for interacting with the authentication endpoints

use serde::{Deserialize, Serialize};

use crate::{AccessToken, Password, RefreshToken, RefreshTokenRef, TokenType};

/// Login credentials
#[derive(Clone, Debug, Serialize)]
pub struct Credentials {
    /// The user's name
    pub name: String,

    /// The user's password
    pub password: Password,
}

/// A new account request
#[derive(Clone, Debug, Serialize)]
pub struct Registration {
    /// The requested user name
    pub username: String,

    /// The requested password
    pub password: Password,

    /// The password, repeated
    #[serde(rename = "confirmPassword")]
    pub confirm_password: Password,
}

/// Tokens issued by the authority on login or refresh
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    /// The new access token
    pub access_token: AccessToken,

    /// The new refresh token, if the authority rotated it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,

    /// The token type, if the authority stated one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<TokenType>,
}

#[derive(Debug, Serialize)]
pub(super) struct RefreshRequest<'a> {
    #[serde(rename = "refreshToken")]
    pub refresh_token: &'a RefreshTokenRef,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_uses_camel_case_confirmation() {
        let registration = Registration {
            username: "ada".into(),
            password: Password::from_static("pw"),
            confirm_password: Password::from_static("pw"),
        };
        assert_eq!(
            serde_json::to_value(&registration).unwrap(),
            serde_json::json!({ "username": "ada", "password": "pw", "confirmPassword": "pw" })
        );
    }

    #[test]
    fn refresh_response_may_omit_refresh_token_and_type() {
        let resp: TokenResponse = serde_json::from_str(r#"{"access_token":"A2"}"#).unwrap();
        assert_eq!(resp.access_token.as_str(), "A2");
        assert!(resp.refresh_token.is_none());
        assert!(resp.token_type.is_none());
    }

    #[test]
    fn refresh_request_body_is_camel_case() {
        let token = RefreshToken::from_static("R1");
        let body = RefreshRequest {
            refresh_token: &token,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({ "refreshToken": "R1" })
        );
    }
}
