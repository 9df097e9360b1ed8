use std::path::PathBuf;

use reqwest::Url;
use thiserror::Error;

/// Environment variable naming the backend's base URL
pub const API_URL_VAR: &str = "PROCTOR_API_URL";

/// Environment variable naming the file used to persist the session
pub const TOKEN_FILE_VAR: &str = "PROCTOR_TOKEN_FILE";

/// The base URL used when none is configured
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Where the client finds the backend and keeps its session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// The backend's base URL; request paths are resolved beneath it
    pub base_url: Url,

    /// The file holding the persisted session
    ///
    /// Without one, the session lasts only as long as the process.
    pub token_file: Option<PathBuf>,
}

/// An error in the client configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The base URL could not be parsed
    #[error("invalid base URL {value:?}")]
    InvalidUrl {
        /// The offending value
        value: String,
        /// The parse failure
        #[source]
        source: url::ParseError,
    },
    /// The base URL cannot have paths resolved beneath it
    #[error("base URL {0} cannot be used as a base")]
    NotABase(Url),
}

impl ClientConfig {
    /// Constructs a configuration for `base_url` with no token file
    pub fn new(base_url: Url) -> Result<Self, ConfigError> {
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::NotABase(base_url));
        }

        Ok(Self {
            base_url,
            token_file: None,
        })
    }

    /// Persists the session in `path`
    pub fn with_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = Some(path.into());
        self
    }

    /// Reads the configuration from the process environment
    ///
    /// Uses [`API_URL_VAR`], falling back to [`DEFAULT_API_URL`], and
    /// [`TOKEN_FILE_VAR`]. Empty values count as unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |name: &str| lookup(name).filter(|v: &String| !v.trim().is_empty());

        let value = set(API_URL_VAR).unwrap_or_else(|| DEFAULT_API_URL.to_owned());
        let base_url = Url::parse(value.trim())
            .map_err(|source| ConfigError::InvalidUrl { value, source })?;

        let config = Self::new(base_url)?;
        Ok(match set(TOKEN_FILE_VAR) {
            Some(path) => config.with_token_file(path),
            None => config,
        })
    }
}
