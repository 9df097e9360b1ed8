//! Scripted doubles for exercising sessions without a backend

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::{
    authority::{AuthError, Authority, Credentials, Registration, TokenResponse},
    session::LoginRedirect,
    RefreshToken, RefreshTokenRef,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An authority that answers from a script and counts its calls
///
/// Refresh answers are consumed in order; once the script runs dry every
/// refresh is rejected as unauthorized.
#[derive(Debug)]
pub struct ScriptedAuthority {
    login: Mutex<Result<TokenResponse, AuthError>>,
    register: Mutex<Result<(), AuthError>>,
    refresh: Mutex<VecDeque<Result<TokenResponse, AuthError>>>,
    logout: Mutex<Result<(), AuthError>>,
    refresh_delay: Duration,
    last_refresh_token: Mutex<Option<RefreshToken>>,
    login_calls: AtomicUsize,
    register_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
}

impl Default for ScriptedAuthority {
    fn default() -> Self {
        Self {
            login: Mutex::new(Err(AuthError::rejected(
                StatusCode::UNAUTHORIZED,
                "login failed",
            ))),
            register: Mutex::new(Ok(())),
            refresh: Mutex::new(VecDeque::new()),
            logout: Mutex::new(Ok(())),
            refresh_delay: Duration::ZERO,
            last_refresh_token: Mutex::new(None),
            login_calls: AtomicUsize::new(0),
            register_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedAuthority {
    /// Constructs an authority that rejects logins and refreshes
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the answer to every login
    pub fn on_login(self, answer: Result<TokenResponse, AuthError>) -> Self {
        *lock(&self.login) = answer;
        self
    }

    /// Sets the answer to every registration
    pub fn on_register(self, answer: Result<(), AuthError>) -> Self {
        *lock(&self.register) = answer;
        self
    }

    /// Queues the answer to the next unanswered refresh
    pub fn push_refresh(self, answer: Result<TokenResponse, AuthError>) -> Self {
        lock(&self.refresh).push_back(answer);
        self
    }

    /// Sets the answer to every logout
    pub fn on_logout(self, answer: Result<(), AuthError>) -> Self {
        *lock(&self.logout) = answer;
        self
    }

    /// Holds each refresh open for `delay` before answering
    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    /// Queues another refresh answer on an authority already in use
    pub fn queue_refresh(&self, answer: Result<TokenResponse, AuthError>) {
        lock(&self.refresh).push_back(answer);
    }

    /// Number of logins attempted
    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::Acquire)
    }

    /// Number of registrations attempted
    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::Acquire)
    }

    /// Number of refreshes attempted
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::Acquire)
    }

    /// Number of logouts attempted
    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::Acquire)
    }

    /// The refresh token presented on the most recent refresh
    pub fn last_refresh_token(&self) -> Option<RefreshToken> {
        lock(&self.last_refresh_token).clone()
    }
}

#[async_trait]
impl Authority for ScriptedAuthority {
    async fn login(&self, _: &Credentials) -> Result<TokenResponse, AuthError> {
        self.login_calls.fetch_add(1, Ordering::AcqRel);
        lock(&self.login).clone()
    }

    async fn register(&self, _: &Registration) -> Result<(), AuthError> {
        self.register_calls.fetch_add(1, Ordering::AcqRel);
        lock(&self.register).clone()
    }

    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenResponse, AuthError> {
        self.refresh_calls.fetch_add(1, Ordering::AcqRel);
        *lock(&self.last_refresh_token) = Some(refresh_token.to_owned());

        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }

        lock(&self.refresh).pop_front().unwrap_or_else(|| {
            Err(AuthError::rejected(
                StatusCode::UNAUTHORIZED,
                "refresh token expired",
            ))
        })
    }

    async fn logout(&self, _: &RefreshTokenRef) -> Result<(), AuthError> {
        self.logout_calls.fetch_add(1, Ordering::AcqRel);
        lock(&self.logout).clone()
    }
}

/// A redirect hook that counts how often it fired
#[derive(Debug, Default)]
pub struct RecordingRedirect {
    redirects: AtomicUsize,
}

impl RecordingRedirect {
    /// Number of redirects to the login view
    pub fn redirects(&self) -> usize {
        self.redirects.load(Ordering::Acquire)
    }
}

impl LoginRedirect for RecordingRedirect {
    fn redirect_to_login(&self) {
        self.redirects.fetch_add(1, Ordering::AcqRel);
    }
}
