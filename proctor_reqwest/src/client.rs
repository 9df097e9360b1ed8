use std::{fmt, sync::Arc};

use proctor_tokens::{
    authority, AuthError, FileTokenStore, HttpAuthority, InMemoryTokenStore, LoginRedirect,
    Session, TokenStore,
};
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, RequestBuilder};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::{
    AccessTokenMiddleware, ClientConfig, ConfigError, Paged, RefreshCoordinator,
    RefreshMiddleware,
};

/// Unable to connect a client to its backend
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The configuration is unusable
    #[error("invalid client configuration")]
    Config(#[from] ConfigError),
    /// The persisted session could not be restored
    #[error("unable to restore session")]
    Session(#[from] AuthError),
    /// The underlying HTTP client could not be built
    #[error("unable to build HTTP client")]
    Http(#[from] reqwest::Error),
}

/// A client whose requests carry the session's access token
///
/// Request paths are resolved beneath the base URL. A request rejected with
/// `401 Unauthorized` triggers a token refresh, shared with any other request
/// rejected at the same time, and is then replayed once.
#[derive(Clone, Debug)]
pub struct AuthenticatedClient {
    client: ClientWithMiddleware,
    base_url: Url,
    session: Arc<Session>,
    coordinator: Arc<RefreshCoordinator>,
}

impl AuthenticatedClient {
    /// Constructs a client for `base_url` sending requests through `client`
    pub fn new(
        client: reqwest::Client,
        base_url: Url,
        session: Arc<Session>,
    ) -> Result<Self, ConfigError> {
        Self::builder(client, base_url, session).build()
    }

    /// Starts building a client that runs additional middleware
    pub fn builder(
        client: reqwest::Client,
        base_url: Url,
        session: Arc<Session>,
    ) -> AuthenticatedClientBuilder {
        AuthenticatedClientBuilder {
            client,
            base_url,
            session,
            inner: Vec::new(),
        }
    }

    /// Constructs a client from configuration and restores any persisted session
    pub async fn connect(
        config: &ClientConfig,
        redirect: impl LoginRedirect + 'static,
    ) -> Result<Self, ConnectError> {
        let client = reqwest::Client::builder().build()?;
        let authority = HttpAuthority::new(client.clone(), &config.base_url);

        let store: Arc<dyn TokenStore> = match &config.token_file {
            Some(path) => Arc::new(FileTokenStore::new(path.clone())),
            None => {
                tracing::debug!("no token file configured, session will not persist");
                Arc::new(InMemoryTokenStore::new())
            }
        };

        let session = Session::new(Arc::new(authority), store).with_login_redirect(redirect);
        session.initialize().await?;

        Ok(Self::new(client, config.base_url.clone(), Arc::new(session))?)
    }

    /// Resolves `path` beneath the base URL
    pub fn url(&self, path: &str) -> Url {
        authority::resolve(&self.base_url, path)
    }

    /// Starts a request with the given method
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path))
    }

    /// Starts a `GET` request
    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    /// Starts a `POST` request
    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    /// Starts a `PUT` request
    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request(Method::PUT, path)
    }

    /// Starts a `PATCH` request
    pub fn patch(&self, path: &str) -> RequestBuilder {
        self.request(Method::PATCH, path)
    }

    /// Starts a `DELETE` request
    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }

    /// Fetches one page of a collection
    ///
    /// `query` is appended to the URL, typically `page` and `size`.
    pub async fn fetch_paged<T, Q>(
        &self,
        path: &str,
        query: &Q,
    ) -> reqwest_middleware::Result<Paged<T>>
    where
        T: DeserializeOwned,
        Q: serde::Serialize + ?Sized,
    {
        let resp = self
            .get(path)
            .query(query)
            .send()
            .await?
            .error_for_status()?;

        Ok(resp.json().await?)
    }

    /// The session whose tokens this client presents
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Whether a failed refresh has left this client unable to renew tokens
    pub fn refresh_is_broken(&self) -> bool {
        self.coordinator.is_broken()
    }

    /// Allows token refreshes again after a failed one
    ///
    /// Call this after signing in again.
    pub fn reset_refresh(&self) {
        self.coordinator.reset();
    }

    /// The underlying middleware client
    pub fn inner(&self) -> &ClientWithMiddleware {
        &self.client
    }
}

/// A builder for an [`AuthenticatedClient`]
pub struct AuthenticatedClientBuilder {
    client: reqwest::Client,
    base_url: Url,
    session: Arc<Session>,
    inner: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for AuthenticatedClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AuthenticatedClientBuilder")
            .field("base_url", &self.base_url.as_str())
            .field("session", &self.session)
            .field("inner", &self.inner.len())
            .finish_non_exhaustive()
    }
}

impl AuthenticatedClientBuilder {
    /// Adds a middleware between the authorization stage and dispatch
    ///
    /// These run in the order added and see every attempt, including replays
    /// after a refresh.
    pub fn with<M: Middleware>(self, middleware: M) -> Self {
        self.with_arc(Arc::new(middleware))
    }

    /// Adds a shared middleware between the authorization stage and dispatch
    pub fn with_arc(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.inner.push(middleware);
        self
    }

    /// Builds the client
    pub fn build(self) -> Result<AuthenticatedClient, ConfigError> {
        if self.base_url.cannot_be_a_base() {
            return Err(ConfigError::NotABase(self.base_url));
        }

        let coordinator = Arc::new(RefreshCoordinator::new());
        let client = self
            .inner
            .into_iter()
            .fold(
                ClientBuilder::new(self.client)
                    .with(RefreshMiddleware::new(
                        self.session.clone(),
                        coordinator.clone(),
                    ))
                    .with(AccessTokenMiddleware::new(self.session.clone())),
                ClientBuilder::with_arc,
            )
            .build();

        Ok(AuthenticatedClient {
            client,
            base_url: self.base_url,
            session: self.session,
            coordinator,
        })
    }
}
