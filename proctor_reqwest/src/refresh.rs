//! Refresh-and-retry for requests rejected with `401 Unauthorized`

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use futures::future::{BoxFuture, FutureExt, Shared};
use predicates::Predicate;
use proctor_tokens::{AuthError, Session, TokenPair};
use reqwest::{Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next, Result};

use crate::PublicEndpoints;

type SharedRefresh = Shared<BoxFuture<'static, std::result::Result<TokenPair, AuthError>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ensures that at most one token refresh is in flight at a time
///
/// Every caller that asks for a refresh while one is running receives a handle
/// to that same refresh and observes the same outcome. Once a refresh fails,
/// the coordinator considers refresh _broken_ and starts no further refreshes
/// until it is [reset](Self::reset).
#[derive(Default)]
pub struct RefreshCoordinator {
    pending: Mutex<Option<SharedRefresh>>,
    /// Only written while `pending` is locked
    broken: AtomicBool,
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refreshing", &self.is_refreshing())
            .field("broken", &self.is_broken())
            .finish()
    }
}

impl RefreshCoordinator {
    /// Constructs a coordinator with no refresh in flight
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a refresh of `session`, or joins the one already in flight
    ///
    /// Returns `None` without starting anything if refresh is broken.
    ///
    /// The refresh runs as long as any handle to it is being polled. When it
    /// finishes, it records whether refresh is now broken and clears itself
    /// from the coordinator in one step, so a caller arriving afterwards never
    /// sees the refresh gone without also seeing its outcome.
    pub fn refresh(self: &Arc<Self>, session: &Arc<Session>) -> Option<SharedRefresh> {
        let mut pending = lock(&self.pending);

        if let Some(refresh) = pending.as_ref() {
            tracing::debug!("joining token refresh already in flight");
            return Some(refresh.clone());
        }

        if self.broken.load(Ordering::Acquire) {
            return None;
        }

        tracing::debug!("starting token refresh");

        let coordinator = Arc::clone(self);
        let session = Arc::clone(session);
        let refresh = async move {
            let outcome = session.refresh().await;

            let mut pending = lock(&coordinator.pending);
            coordinator.broken.store(outcome.is_err(), Ordering::Release);
            *pending = None;
            drop(pending);

            outcome
        }
        .boxed()
        .shared();

        *pending = Some(refresh.clone());
        Some(refresh)
    }

    /// Allows refreshes again after a failure
    ///
    /// Call this once the user has signed in again.
    pub fn reset(&self) {
        let _pending = lock(&self.pending);
        self.broken.store(false, Ordering::Release);
    }

    /// Whether the most recent refresh failed
    #[inline]
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    /// Whether a refresh is currently in flight
    pub fn is_refreshing(&self) -> bool {
        lock(&self.pending).is_some()
    }
}

/// Marks a request that has already been replayed after a refresh
#[derive(Clone, Copy, Debug, Default)]
pub struct AlreadyRetried;

/// A middleware that refreshes the session and replays requests rejected with
/// `401 Unauthorized`
///
/// Place this stage outside of the [`AccessTokenMiddleware`](crate::AccessTokenMiddleware)
/// so that replayed requests pick up the refreshed token.
#[derive(Clone, Debug)]
pub struct RefreshMiddleware {
    session: Arc<Session>,
    coordinator: Arc<RefreshCoordinator>,
    public: PublicEndpoints,
}

impl RefreshMiddleware {
    /// Construct a new middleware refreshing `session` through `coordinator`
    pub fn new(session: Arc<Session>, coordinator: Arc<RefreshCoordinator>) -> Self {
        Self {
            session,
            coordinator,
            public: PublicEndpoints::default(),
        }
    }

    /// Replaces the set of endpoints that are never refreshed and retried
    pub fn with_public_endpoints(mut self, public: PublicEndpoints) -> Self {
        self.public = public;
        self
    }

    async fn end_session_after_failed_refresh(&self, error: &AuthError) {
        if self.session.tokens().refresh_token.is_none() {
            tracing::debug!(%error, "session already ended by the failed refresh");
            return;
        }

        if error.implicates_refresh_token() {
            tracing::warn!(%error, "refresh token rejected, ending session");
            self.session.logout().await;
        }
    }
}

#[async_trait::async_trait]
impl Middleware for RefreshMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.public.eval(&req) {
            tracing::debug!(url.path = req.url().path(), "public endpoint, not retrying");
            return next.run(req, extensions).await;
        }

        if extensions.get::<AlreadyRetried>().is_some() {
            return next.run(req, extensions).await;
        }

        let Some(replay) = req.try_clone() else {
            tracing::debug!("request body cannot be replayed, sending without retry");
            return next.run(req, extensions).await;
        };

        let resp = next.clone().run(req, extensions).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        tracing::debug!(url.path = resp.url().path(), "request was not authorized");

        let Some(refresh) = self.coordinator.refresh(&self.session) else {
            tracing::warn!("token refresh is broken, ending session instead of refreshing");
            self.session.logout().await;
            return Ok(resp);
        };

        match refresh.await {
            Ok(_) => {
                tracing::debug!("replaying request with refreshed access token");
                extensions.insert(AlreadyRetried);
                next.run(replay, extensions).await
            }
            Err(error) => {
                self.end_session_after_failed_refresh(&error).await;
                Err(reqwest_middleware::Error::middleware(error))
            }
        }
    }
}
