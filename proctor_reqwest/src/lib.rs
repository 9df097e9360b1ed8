//! An authenticated HTTP client for the proctored test-taking backend
//!
//! Requests pass through an explicit stack of
//! [`reqwest-middleware`](reqwest_middleware) stages:
//!
//! 1. [`RefreshMiddleware`] watches for authorization failures. The first
//!    `401 Unauthorized` starts a token refresh; any others that arrive while it
//!    is in flight wait on that same refresh. Each failed request is then
//!    replayed exactly once. If the refresh fails, the session ends and further
//!    failures are not retried until a refresh succeeds again.
//! 2. [`AccessTokenMiddleware`] attaches `Authorization: <type> <token>` from
//!    the current [`Session`](proctor_tokens::Session), unless the endpoint is
//!    public.
//! 3. `reqwest` dispatches the request.
//!
//! [`AuthenticatedClient`] assembles this stack against a base URL.
//!
//! ```no_run
//! use proctor_reqwest::{AuthenticatedClient, ClientConfig};
//! use proctor_tokens::NoRedirect;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env()?;
//! let client = AuthenticatedClient::connect(&config, NoRedirect).await?;
//!
//! let resp = client.get("/tests").send().await?;
//! tracing::info!(status = %resp.status(), "listed tests");
//! # Ok(())
//! # }
//! ```
//!
//! The stages can also be assembled by hand. A request that already carries an
//! `Authorization` header keeps it.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use proctor_reqwest::{AccessTokenMiddleware, RefreshCoordinator, RefreshMiddleware};
//! use proctor_tokens::{HttpAuthority, InMemoryTokenStore, Session};
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! # fn main() -> Result<(), url::ParseError> {
//! let base_url = reqwest::Url::parse("http://localhost:8080")?;
//! let session = Arc::new(Session::new(
//!     Arc::new(HttpAuthority::new(Client::new(), &base_url)),
//!     Arc::new(InMemoryTokenStore::new()),
//! ));
//!
//! let client = ClientBuilder::new(Client::new())
//!     .with(RefreshMiddleware::new(session.clone(), Arc::new(RefreshCoordinator::new())))
//!     .with(AccessTokenMiddleware::new(session))
//!     .build();
//! # let _ = client;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{fmt, sync::Arc};

use predicates::{prelude::*, reflection};
use proctor_tokens::Session;
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next, Result};

mod client;
mod config;
pub mod envelope;
mod refresh;

pub use client::{AuthenticatedClient, AuthenticatedClientBuilder, ConnectError};
pub use config::{ClientConfig, ConfigError, API_URL_VAR, DEFAULT_API_URL, TOKEN_FILE_VAR};
pub use envelope::Paged;
pub use refresh::{AlreadyRetried, RefreshCoordinator, RefreshMiddleware};

/// A middleware that injects the session's access token into outgoing requests
#[derive(Clone, Debug)]
pub struct AccessTokenMiddleware<P> {
    session: Arc<Session>,
    predicate: P,
}

impl AccessTokenMiddleware<ProtectedEndpoint> {
    /// Construct a new middleware from a session
    ///
    /// By default, this middleware attaches the token to every request except
    /// those bound for the public authentication endpoints. To change this
    /// behavior, provide a custom predicate with
    /// [`with_predicate()`][Self::with_predicate()].
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            predicate: ProtectedEndpoint::default(),
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> AccessTokenMiddleware<P> {
        AccessTokenMiddleware {
            session: self.session,
            predicate,
        }
    }
}

#[async_trait::async_trait]
impl<P> Middleware for AccessTokenMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) {
            if let header::Entry::Vacant(entry) = req.headers_mut().entry(header::AUTHORIZATION) {
                match self.session.authorization() {
                    Some(value) => {
                        entry.insert(value);
                    }
                    None => tracing::debug!("no access token, sending request without authorization"),
                }
            }
        }

        next.run(req, extensions).await
    }
}

/// Matches requests bound for endpoints that must never carry a token
///
/// A request matches if its URL path ends with one of the configured suffixes,
/// by default `/auth/login`, `/auth/register`, and `/auth/refresh`. Public
/// requests are also never refreshed and retried.
#[derive(Clone, Debug)]
pub struct PublicEndpoints {
    suffixes: Vec<String>,
}

impl Default for PublicEndpoints {
    fn default() -> Self {
        Self::new(["/auth/login", "/auth/register", "/auth/refresh"])
    }
}

impl PublicEndpoints {
    /// Construct a predicate matching paths ending with any of `suffixes`
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self {
            suffixes: suffixes.into_iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Adds another public path suffix
    pub fn with_suffix<S: ToString>(mut self, suffix: S) -> Self {
        self.suffixes.push(suffix.to_string());
        self
    }
}

impl Predicate<Request> for PublicEndpoints {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        let path = req.url().path().trim_end_matches('/');
        self.suffixes.iter().any(|s| path.ends_with(s.as_str()))
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "path",
                    req.url().path().to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for PublicEndpoints {}
impl fmt::Display for PublicEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("path ends with one of [")?;
        f.write_str(&self.suffixes.join(", "))?;
        f.write_str("]")
    }
}

/// Matches every request not bound for a [public endpoint][PublicEndpoints]
#[derive(Clone, Debug, Default)]
pub struct ProtectedEndpoint {
    public: PublicEndpoints,
}

impl ProtectedEndpoint {
    /// Construct a predicate matching everything outside of `public`
    pub fn new(public: PublicEndpoints) -> Self {
        Self { public }
    }
}

impl Predicate<Request> for ProtectedEndpoint {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        !self.public.eval(req)
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "path",
                    req.url().path().to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for ProtectedEndpoint {}
impl fmt::Display for ProtectedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("not (")?;
        fmt::Display::fmt(&self.public, f)?;
        f.write_str(")")
    }
}
