use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;

use super::{
    dto::{ErrorBody, RefreshRequest},
    resolve, AuthError, Authority, Credentials, Registration, TokenResponse,
};
use crate::RefreshTokenRef;

const LOGIN_FAILED: &str = "login failed";
const REGISTRATION_FAILED: &str = "registration failed";
const REFRESH_FAILED: &str = "token refresh failed";
const LOGOUT_FAILED: &str = "logout failed";

/// An authority reached over HTTP
///
/// These calls go out on a plain client: the authentication endpoints are
/// public and never carry a bearer token.
#[derive(Clone, Debug)]
pub struct HttpAuthority {
    client: reqwest::Client,
    login_url: Url,
    register_url: Url,
    refresh_url: Url,
    logout_url: Url,
}

impl HttpAuthority {
    /// Constructs an authority rooted at the backend's base URL
    pub fn new(client: reqwest::Client, base_url: &Url) -> Self {
        Self {
            client,
            login_url: resolve(base_url, "/auth/login"),
            register_url: resolve(base_url, "/auth/register"),
            refresh_url: resolve(base_url, "/auth/refresh"),
            logout_url: resolve(base_url, "/auth/logout"),
        }
    }

    async fn post_json<B: serde::Serialize + Sync>(
        &self,
        url: &Url,
        body: &B,
        fallback: &'static str,
    ) -> Result<Response, AuthError> {
        let resp = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| AuthError::RequestSend(Arc::new(e)))?;

        tracing::debug!(
            response.status = resp.status().as_u16(),
            "received response from authority"
        );

        check_status(resp, fallback).await
    }
}

#[async_trait]
impl Authority for HttpAuthority {
    #[tracing::instrument(err, skip_all, fields(url = %self.login_url, user = %credentials.name))]
    async fn login(&self, credentials: &Credentials) -> Result<TokenResponse, AuthError> {
        let resp = self
            .post_json(&self.login_url, credentials, LOGIN_FAILED)
            .await?;
        read_json(resp).await
    }

    #[tracing::instrument(err, skip_all, fields(url = %self.register_url, user = %registration.username))]
    async fn register(&self, registration: &Registration) -> Result<(), AuthError> {
        self.post_json(&self.register_url, registration, REGISTRATION_FAILED)
            .await?;
        Ok(())
    }

    #[tracing::instrument(err, skip_all, fields(url = %self.refresh_url))]
    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenResponse, AuthError> {
        let body = RefreshRequest { refresh_token };
        let resp = self
            .post_json(&self.refresh_url, &body, REFRESH_FAILED)
            .await?;
        let tokens: TokenResponse = read_json(resp).await?;

        tracing::info!(
            has_refresh_token = tokens.refresh_token.is_some(),
            has_token_type = tokens.token_type.is_some(),
            "received refreshed tokens"
        );

        Ok(tokens)
    }

    #[tracing::instrument(err, skip_all, fields(url = %self.logout_url))]
    async fn logout(&self, refresh_token: &RefreshTokenRef) -> Result<(), AuthError> {
        let resp = self
            .client
            .get(self.logout_url.clone())
            .query(&[("refreshToken", refresh_token.as_str())])
            .send()
            .await
            .map_err(|e| AuthError::RequestSend(Arc::new(e)))?;

        check_status(resp, LOGOUT_FAILED).await?;
        Ok(())
    }
}

async fn check_status(resp: Response, fallback: &'static str) -> Result<Response, AuthError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp
        .bytes()
        .await
        .map_err(|e| AuthError::BodyRead(Arc::new(e)))?;
    Err(rejection(status, &body, fallback))
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, AuthError> {
    let body = resp
        .bytes()
        .await
        .map_err(|e| AuthError::BodyRead(Arc::new(e)))?;
    serde_json::from_slice(&body).map_err(|e| AuthError::Body(Arc::new(e)))
}

/// Builds a rejection from an error response, preferring the backend's message
fn rejection(status: StatusCode, body: &[u8], fallback: &str) -> AuthError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .unwrap_or_default()
        .message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| fallback.to_owned());

    AuthError::Rejected { status, message }
}
