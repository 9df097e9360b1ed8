//! Durable storage for session tokens

use std::io;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{AccessToken, RefreshToken, TokenType};

#[cfg(feature = "file")]
pub mod file;
pub mod in_memory;

#[cfg(feature = "file")]
pub use file::FileTokenStore;
pub use in_memory::InMemoryTokenStore;

/// The persisted form of a session
///
/// Each entry is stored under a fixed key (`access_token`, `refresh_token`,
/// `token_type`). Absent entries are omitted entirely.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// The stored access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<AccessToken>,

    /// The stored refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,

    /// The stored token type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<TokenType>,
}

impl TokenRecord {
    /// Constructs a record holding a complete set of tokens
    pub fn new(access_token: AccessToken, refresh_token: RefreshToken, token_type: TokenType) -> Self {
        Self {
            access_token: Some(access_token),
            refresh_token: Some(refresh_token),
            token_type: Some(token_type),
        }
    }

    /// Whether both an access token and a refresh token are present
    ///
    /// Empty strings count as absent.
    pub fn has_tokens(&self) -> bool {
        let present = |s: Option<&str>| s.is_some_and(|s| !s.is_empty());
        present(self.access_token.as_ref().map(|t| t.as_str()))
            && present(self.refresh_token.as_ref().map(|t| t.as_str()))
    }
}

/// A key-value store holding the persisted session
///
/// Stores perform no validation of token content. Failures of the underlying
/// medium are reported as I/O errors and are not retried.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Reads the full record; a store with nothing in it yields an empty record
    async fn load(&self) -> io::Result<TokenRecord>;

    /// Replaces the stored record
    async fn save(&self, record: &TokenRecord) -> io::Result<()>;

    /// Erases every stored entry
    async fn clear(&self) -> io::Result<()>;

    /// Reads the stored access token
    async fn access_token(&self) -> io::Result<Option<AccessToken>> {
        Ok(self.load().await?.access_token)
    }

    /// Reads the stored refresh token
    async fn refresh_token(&self) -> io::Result<Option<RefreshToken>> {
        Ok(self.load().await?.refresh_token)
    }

    /// Reads the stored token type
    async fn token_type(&self) -> io::Result<Option<TokenType>> {
        Ok(self.load().await?.token_type)
    }

    /// Whether the store holds both an access token and a refresh token
    async fn has_tokens(&self) -> io::Result<bool> {
        Ok(self.load().await?.has_tokens())
    }
}
