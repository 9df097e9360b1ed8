//! The backend's authentication endpoints

use std::{io, sync::Arc};

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use thiserror::Error;

use crate::RefreshTokenRef;

pub mod dto;
mod http;

pub use self::http::HttpAuthority;
pub use dto::{Credentials, Registration, TokenResponse};

/// The authority that issues, renews, and revokes session tokens
#[async_trait]
pub trait Authority: Send + Sync {
    /// Exchanges credentials for a token set
    async fn login(&self, credentials: &Credentials) -> Result<TokenResponse, AuthError>;

    /// Creates a new account; no tokens are issued
    async fn register(&self, registration: &Registration) -> Result<(), AuthError>;

    /// Exchanges a refresh token for a new access token
    ///
    /// The response may omit the refresh token and the token type.
    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenResponse, AuthError>;

    /// Invalidates a refresh token
    async fn logout(&self, refresh_token: &RefreshTokenRef) -> Result<(), AuthError>;
}

/// An error from an authentication operation
///
/// The error is cheaply cloneable so that a single refresh outcome can be
/// handed to every request waiting on it.
#[derive(Clone, Debug, Error)]
pub enum AuthError {
    /// The authority refused the request
    #[error("{message}")]
    Rejected {
        /// The response status
        status: StatusCode,
        /// The authority's message, or a generic description
        message: String,
    },
    /// A refresh was requested but the session holds no refresh token
    #[error("refresh token missing")]
    MissingRefreshToken,
    /// Unable to send the request to the authority
    #[error("error sending request to authority")]
    RequestSend(#[source] Arc<reqwest::Error>),
    /// Unable to read the authority's response
    #[error("error reading response body")]
    BodyRead(#[source] Arc<reqwest::Error>),
    /// Unable to deserialize the authority's response
    #[error("error deserializing response body from authority")]
    Body(#[source] Arc<serde_json::Error>),
    /// The token store failed
    #[error("token store failure")]
    Storage(#[source] Arc<io::Error>),
}

impl AuthError {
    /// Constructs a rejection with the given status and message
    pub fn rejected(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// The HTTP status returned by the authority, if it answered
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// A message suitable for showing to the user
    pub fn message(&self) -> String {
        match self {
            Self::Rejected { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Best-effort guess at whether the refresh token itself is at fault
    ///
    /// True for a missing refresh token, an authorization failure status, or a
    /// message that mentions the refresh token. Transport failures are not
    /// attributed to the token.
    pub fn implicates_refresh_token(&self) -> bool {
        match self {
            Self::MissingRefreshToken => true,
            Self::Rejected { status, message } => {
                *status == StatusCode::UNAUTHORIZED
                    || *status == StatusCode::FORBIDDEN
                    || message.to_ascii_lowercase().contains("refresh")
            }
            _ => false,
        }
    }
}

impl From<io::Error> for AuthError {
    fn from(error: io::Error) -> Self {
        Self::Storage(Arc::new(error))
    }
}

/// Resolves `path` against `base`, keeping any path prefix of `base`
///
/// Unlike [`Url::join()`], a base of `https://host/api` and a path of
/// `/auth/login` resolve to `https://host/api/auth/login`.
pub fn resolve(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .pop_if_empty()
            .extend(path.split('/').filter(|s| !s.is_empty()));
    }
    url
}
