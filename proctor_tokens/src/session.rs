use std::{error, fmt, sync::Arc};

use bytes::{BufMut, BytesMut};
use reqwest::header::HeaderValue;
use tokio::sync::watch;

use crate::{
    authority::{AuthError, Authority, Credentials, Registration},
    claims,
    store::{TokenRecord, TokenStore},
    AccessToken, RefreshToken, TokenType,
};

/// The in-memory view of the current session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionTokens {
    /// The current access token
    pub access_token: Option<AccessToken>,
    /// The current refresh token
    pub refresh_token: Option<RefreshToken>,
    /// The scheme used when presenting the access token
    pub token_type: TokenType,
}

impl SessionTokens {
    /// Whether the session currently holds an access token
    #[inline]
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }
}

/// The tokens produced by a successful refresh
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenPair {
    /// The new access token
    pub access_token: AccessToken,
    /// The new refresh token, or the previous one if it was not rotated
    pub refresh_token: RefreshToken,
    /// The token type, or the previous one if none was returned
    pub token_type: TokenType,
}

impl From<TokenPair> for SessionTokens {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: Some(pair.access_token),
            refresh_token: Some(pair.refresh_token),
            token_type: pair.token_type,
        }
    }
}

/// A hook invoked whenever the session ends and the user must sign in again
pub trait LoginRedirect: Send + Sync {
    /// Sends the user to the login view
    fn redirect_to_login(&self);
}

impl<T: LoginRedirect + ?Sized> LoginRedirect for Arc<T> {
    fn redirect_to_login(&self) {
        (**self).redirect_to_login()
    }
}

/// A redirect hook that only records the event in the logs
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRedirect;

impl LoginRedirect for NoRedirect {
    fn redirect_to_login(&self) {
        tracing::debug!("login redirect requested, but no redirect is configured");
    }
}

/// The authoritative session state
///
/// Holds the current tokens in memory, mirrors every change into a
/// [`TokenStore`], and publishes each transition to any [`SessionWatcher`].
pub struct Session {
    authority: Arc<dyn Authority>,
    store: Arc<dyn TokenStore>,
    redirect: Arc<dyn LoginRedirect>,
    tokens: watch::Sender<Arc<SessionTokens>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session")
            .field("tokens", &**self.tokens.borrow())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Constructs an empty session
    ///
    /// Call [`initialize()`][Self::initialize()] to pick up a session persisted by an
    /// earlier run.
    pub fn new(authority: Arc<dyn Authority>, store: Arc<dyn TokenStore>) -> Self {
        let (tokens, _) = watch::channel(Arc::new(SessionTokens::default()));
        Self {
            authority,
            store,
            redirect: Arc::new(NoRedirect),
            tokens,
        }
    }

    /// Constructs a session and hydrates it from the token store
    pub async fn restore(
        authority: Arc<dyn Authority>,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self, AuthError> {
        let session = Self::new(authority, store);
        session.initialize().await?;
        Ok(session)
    }

    /// Replaces the hook invoked when the session ends
    pub fn with_login_redirect(mut self, redirect: impl LoginRedirect + 'static) -> Self {
        self.redirect = Arc::new(redirect);
        self
    }

    /// Hydrates the session from the token store
    ///
    /// The stored session is only used if it holds both an access token and a
    /// refresh token. Calling this more than once is harmless.
    pub async fn initialize(&self) -> Result<(), AuthError> {
        let record = self.store.load().await.map_err(|error| {
            tracing::error!(
                error = (&error as &dyn error::Error),
                "unable to read token store"
            );
            AuthError::from(error)
        })?;

        if record.has_tokens() {
            self.publish(SessionTokens {
                access_token: record.access_token,
                refresh_token: record.refresh_token,
                token_type: record.token_type.unwrap_or_default(),
            });
            tracing::info!("restored session from token store");
        } else {
            tracing::debug!("no complete session in token store");
        }

        Ok(())
    }

    /// Signs in, storing the issued tokens
    ///
    /// A rejection carries the authority's message, or a generic one if the
    /// authority did not provide any.
    #[tracing::instrument(skip_all, fields(user = %credentials.name))]
    pub async fn login(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let resp = self.authority.login(credentials).await.map_err(|error| {
            tracing::warn!(error = %error, "login rejected");
            error
        })?;

        if resp.refresh_token.is_none() {
            tracing::warn!("authority issued no refresh token on login");
        }

        self.set_tokens(SessionTokens {
            access_token: Some(resp.access_token),
            refresh_token: resp.refresh_token,
            token_type: resp.token_type.unwrap_or_default(),
        })
        .await?;

        tracing::info!("logged in");
        Ok(())
    }

    /// Creates a new account without touching the current session
    #[tracing::instrument(skip_all, fields(user = %registration.username))]
    pub async fn register(&self, registration: &Registration) -> Result<(), AuthError> {
        self.authority.register(registration).await.map_err(|error| {
            tracing::warn!(error = %error, "registration rejected");
            error
        })?;

        tracing::info!("registered new account");
        Ok(())
    }

    /// Exchanges the current refresh token for a new access token
    ///
    /// Fails immediately, without contacting the authority, if there is no
    /// refresh token. Any failure ends the session before it is returned.
    pub async fn refresh(&self) -> Result<TokenPair, AuthError> {
        let current = self.tokens();
        let Some(refresh_token) = current.refresh_token.clone() else {
            tracing::warn!("token refresh requested without a refresh token, ending session");
            self.logout().await;
            return Err(AuthError::MissingRefreshToken);
        };

        tracing::debug!("refreshing access token");
        let resp = match self.authority.refresh(&refresh_token).await {
            Ok(resp) => resp,
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "token refresh failed, ending session"
                );
                self.logout().await;
                return Err(error);
            }
        };

        let pair = TokenPair {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token.unwrap_or(refresh_token),
            token_type: resp
                .token_type
                .unwrap_or_else(|| current.token_type.clone()),
        };

        if let Err(error) = self.set_tokens(pair.clone().into()).await {
            tracing::warn!("refreshed tokens could not be persisted, ending session");
            self.logout().await;
            return Err(error);
        }

        tracing::info!("access token refreshed");
        Ok(pair)
    }

    /// Ends the session
    ///
    /// The authority is asked to invalidate the refresh token, if there is one,
    /// but its answer never prevents the local session from being cleared.
    pub async fn logout(&self) {
        if let Some(refresh_token) = self.tokens().refresh_token.clone() {
            if let Err(error) = self.authority.logout(&refresh_token).await {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "authority logout failed, clearing local session anyway"
                );
            }
        }

        self.publish(SessionTokens::default());

        if let Err(error) = self.store.clear().await {
            tracing::error!(
                error = (&error as &dyn error::Error),
                "unable to clear token store"
            );
        }

        tracing::info!("session ended");
        self.redirect.redirect_to_login();
    }

    /// A snapshot of the current tokens
    pub fn tokens(&self) -> Arc<SessionTokens> {
        self.tokens.borrow().clone()
    }

    /// Whether the session currently holds an access token
    pub fn is_authenticated(&self) -> bool {
        self.tokens.borrow().is_authenticated()
    }

    /// The `Authorization` header value for the current access token
    ///
    /// `None` if there is no access token, or if the token cannot be carried
    /// in a header.
    pub fn authorization(&self) -> Option<HeaderValue> {
        let tokens = self.tokens();
        let access_token = tokens.access_token.as_ref()?;
        let token_type = tokens.token_type.as_str();

        let mut header_value =
            BytesMut::with_capacity(token_type.len() + access_token.as_str().len() + 1);
        header_value.put_slice(token_type.as_bytes());
        header_value.put_u8(b' ');
        header_value.put_slice(access_token.as_str().as_bytes());

        match HeaderValue::from_maybe_shared(header_value.freeze()) {
            Ok(mut value) => {
                value.set_sensitive(true);
                Some(value)
            }
            Err(_) => {
                tracing::warn!("access token contains bytes not valid in a header value");
                None
            }
        }
    }

    /// The user name carried in the current access token, if any
    pub fn username(&self) -> Option<String> {
        let tokens = self.tokens();
        let access_token = tokens.access_token.as_ref()?;
        claims::username_from_token(access_token.as_str())
    }

    /// Subscribes to session changes
    pub fn subscribe(&self) -> SessionWatcher {
        SessionWatcher {
            watcher: self.tokens.subscribe(),
        }
    }

    async fn set_tokens(&self, tokens: SessionTokens) -> Result<(), AuthError> {
        let record = TokenRecord {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            token_type: Some(tokens.token_type.clone()),
        };

        if let Err(error) = self.store.save(&record).await {
            tracing::error!(
                error = (&error as &dyn error::Error),
                "unable to persist tokens"
            );
            return Err(error.into());
        }

        self.publish(tokens);
        Ok(())
    }

    fn publish(&self, tokens: SessionTokens) {
        self.tokens.send_replace(Arc::new(tokens));
    }
}

/// A handle that observes session changes
#[derive(Clone, Debug)]
pub struct SessionWatcher {
    watcher: watch::Receiver<Arc<SessionTokens>>,
}

/// The session that was being watched has been dropped
#[derive(Clone, Copy, Debug, thiserror::Error)]
#[error("session dropped; no further changes will be published")]
pub struct SessionDropped {
    _p: (),
}

impl SessionWatcher {
    /// A snapshot of the most recently published tokens
    pub fn tokens(&self) -> Arc<SessionTokens> {
        self.watcher.borrow().clone()
    }

    /// Waits until the session changes
    pub async fn changed(&mut self) -> Result<(), SessionDropped> {
        self.watcher
            .changed()
            .await
            .map_err(|_| SessionDropped { _p: () })
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::{
        store::InMemoryTokenStore,
        testing::{RecordingRedirect, ScriptedAuthority},
        Password,
    };
    use reqwest::StatusCode;
    use tracing_test::traced_test;

    fn credentials() -> Credentials {
        Credentials {
            name: "ada".into(),
            password: Password::from_static("secret"),
        }
    }

    fn issued(access: &'static str, refresh: Option<&'static str>) -> crate::TokenResponse {
        crate::TokenResponse {
            access_token: AccessToken::from_static(access),
            refresh_token: refresh.map(RefreshToken::from_static),
            token_type: None,
        }
    }

    fn stored(access: &'static str, refresh: &'static str) -> TokenRecord {
        TokenRecord::new(
            AccessToken::from_static(access),
            RefreshToken::from_static(refresh),
            TokenType::from_static("Bearer"),
        )
    }

    struct Fixture {
        authority: Arc<ScriptedAuthority>,
        store: Arc<InMemoryTokenStore>,
        redirect: Arc<RecordingRedirect>,
        session: Session,
    }

    fn fixture(authority: ScriptedAuthority, store: InMemoryTokenStore) -> Fixture {
        let authority = Arc::new(authority);
        let store = Arc::new(store);
        let redirect = Arc::new(RecordingRedirect::default());
        let session = Session::new(authority.clone(), store.clone())
            .with_login_redirect(redirect.clone());
        Fixture {
            authority,
            store,
            redirect,
            session,
        }
    }

    mod when_logging_in {
        use super::*;

        #[tokio::test]
        async fn successful_login_stores_exactly_the_issued_tokens() {
            let f = fixture(
                ScriptedAuthority::new().on_login(Ok(crate::TokenResponse {
                    token_type: Some(TokenType::from_static("Bearer")),
                    ..issued("A1", Some("R1"))
                })),
                InMemoryTokenStore::new(),
            );

            f.session.login(&credentials()).await.unwrap();

            assert!(f.session.is_authenticated());
            assert_eq!(f.store.load().await.unwrap(), stored("A1", "R1"));
        }

        #[tokio::test]
        async fn rejected_login_reports_message_and_leaves_session_alone() {
            let f = fixture(
                ScriptedAuthority::new().on_login(Err(AuthError::rejected(
                    StatusCode::UNAUTHORIZED,
                    "Invalid username or password",
                ))),
                InMemoryTokenStore::new(),
            );

            let error = f.session.login(&credentials()).await.unwrap_err();

            assert_eq!(error.message(), "Invalid username or password");
            assert!(!f.session.is_authenticated());
            assert_eq!(f.store.load().await.unwrap(), TokenRecord::default());
        }

        #[tokio::test]
        async fn watchers_observe_the_new_session() {
            let f = fixture(
                ScriptedAuthority::new().on_login(Ok(issued("A1", Some("R1")))),
                InMemoryTokenStore::new(),
            );
            let mut watcher = f.session.subscribe();

            f.session.login(&credentials()).await.unwrap();

            watcher.changed().await.unwrap();
            assert!(watcher.tokens().is_authenticated());
        }
    }

    mod when_registering {
        use super::*;

        #[tokio::test]
        async fn successful_registration_does_not_sign_in() {
            let f = fixture(ScriptedAuthority::new(), InMemoryTokenStore::new());
            let registration = Registration {
                username: "ada".into(),
                password: Password::from_static("pw"),
                confirm_password: Password::from_static("pw"),
            };

            f.session.register(&registration).await.unwrap();

            assert_eq!(f.authority.register_calls(), 1);
            assert!(!f.session.is_authenticated());
        }
    }

    mod when_initializing {
        use super::*;

        #[tokio::test]
        async fn complete_stored_session_is_restored() {
            let f = fixture(ScriptedAuthority::new(), InMemoryTokenStore::with_record(stored("A1", "R1")));

            f.session.initialize().await.unwrap();
            f.session.initialize().await.unwrap();

            let tokens = f.session.tokens();
            assert_eq!(tokens.access_token, Some(AccessToken::from_static("A1")));
            assert_eq!(tokens.refresh_token, Some(RefreshToken::from_static("R1")));
        }

        #[tokio::test]
        async fn access_token_alone_is_not_a_session() {
            let record = TokenRecord {
                access_token: Some(AccessToken::from_static("A1")),
                ..TokenRecord::default()
            };
            let f = fixture(ScriptedAuthority::new(), InMemoryTokenStore::with_record(record));

            f.session.initialize().await.unwrap();

            assert!(!f.session.is_authenticated());
        }

        #[tokio::test]
        async fn refresh_token_alone_is_not_a_session() {
            let record = TokenRecord {
                refresh_token: Some(RefreshToken::from_static("R1")),
                ..TokenRecord::default()
            };
            let f = fixture(ScriptedAuthority::new(), InMemoryTokenStore::with_record(record));

            f.session.initialize().await.unwrap();

            assert!(!f.session.is_authenticated());
            assert!(f.session.tokens().refresh_token.is_none());
        }

        #[tokio::test]
        async fn missing_token_type_defaults_to_bearer() {
            let record = TokenRecord {
                token_type: None,
                ..stored("A1", "R1")
            };
            let f = fixture(ScriptedAuthority::new(), InMemoryTokenStore::with_record(record));

            f.session.initialize().await.unwrap();

            assert_eq!(f.session.tokens().token_type.as_str(), "Bearer");
        }
    }

    mod when_refreshing {
        use super::*;

        #[tokio::test]
        async fn missing_refresh_token_fails_fast_and_logs_out() {
            let f = fixture(ScriptedAuthority::new(), InMemoryTokenStore::new());

            let error = f.session.refresh().await.unwrap_err();

            assert!(matches!(error, AuthError::MissingRefreshToken));
            assert_eq!(f.authority.refresh_calls(), 0);
            assert_eq!(f.authority.logout_calls(), 0);
            assert_eq!(f.redirect.redirects(), 1);
        }

        #[tokio::test]
        async fn unrotated_refresh_token_is_retained() {
            let f = fixture(
                ScriptedAuthority::new().push_refresh(Ok(issued("A2", None))),
                InMemoryTokenStore::with_record(stored("A1", "R1")),
            );
            f.session.initialize().await.unwrap();

            let pair = f.session.refresh().await.unwrap();

            assert_eq!(pair.access_token, AccessToken::from_static("A2"));
            assert_eq!(pair.refresh_token, RefreshToken::from_static("R1"));
            assert_eq!(pair.token_type.as_str(), "Bearer");
            assert_eq!(f.store.load().await.unwrap(), stored("A2", "R1"));
            assert_eq!(
                f.authority.last_refresh_token(),
                Some(RefreshToken::from_static("R1"))
            );
        }

        #[tokio::test]
        async fn rotated_refresh_token_replaces_the_old_one() {
            let f = fixture(
                ScriptedAuthority::new().push_refresh(Ok(issued("A2", Some("R2")))),
                InMemoryTokenStore::with_record(stored("A1", "R1")),
            );
            f.session.initialize().await.unwrap();

            f.session.refresh().await.unwrap();

            assert_eq!(f.store.load().await.unwrap(), stored("A2", "R2"));
        }

        #[tokio::test]
        async fn rejected_refresh_ends_the_session() {
            let f = fixture(
                ScriptedAuthority::new().push_refresh(Err(AuthError::rejected(
                    StatusCode::UNAUTHORIZED,
                    "refresh token expired",
                ))),
                InMemoryTokenStore::with_record(stored("A1", "R1")),
            );
            f.session.initialize().await.unwrap();

            let error = f.session.refresh().await.unwrap_err();

            assert_eq!(error.status(), Some(StatusCode::UNAUTHORIZED));
            assert!(!f.session.is_authenticated());
            assert_eq!(f.store.load().await.unwrap(), TokenRecord::default());
            assert_eq!(f.redirect.redirects(), 1);
        }
    }

    /// Reads and clears like any store, but refuses every write
    #[derive(Default)]
    struct ReadOnlyStore {
        inner: InMemoryTokenStore,
    }

    #[async_trait::async_trait]
    impl TokenStore for ReadOnlyStore {
        async fn load(&self) -> io::Result<TokenRecord> {
            self.inner.load().await
        }

        async fn save(&self, _: &TokenRecord) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        }

        async fn clear(&self) -> io::Result<()> {
            self.inner.clear().await
        }
    }

    mod when_tokens_cannot_be_persisted {
        use super::*;

        #[tokio::test]
        async fn login_fails_without_signing_in() {
            let redirect = Arc::new(RecordingRedirect::default());
            let session = Session::new(
                Arc::new(ScriptedAuthority::new().on_login(Ok(issued("A1", Some("R1"))))),
                Arc::new(ReadOnlyStore::default()),
            )
            .with_login_redirect(redirect.clone());

            let error = session.login(&credentials()).await.unwrap_err();

            assert!(matches!(error, AuthError::Storage(_)));
            assert!(!session.is_authenticated());
            assert_eq!(redirect.redirects(), 0);
        }

        #[tokio::test]
        #[traced_test]
        async fn refresh_fails_and_ends_the_session() {
            let authority =
                Arc::new(ScriptedAuthority::new().push_refresh(Ok(issued("A2", None))));
            let store = Arc::new(ReadOnlyStore {
                inner: InMemoryTokenStore::with_record(stored("A1", "R1")),
            });
            let redirect = Arc::new(RecordingRedirect::default());
            let session = Session::new(authority.clone(), store.clone())
                .with_login_redirect(redirect.clone());
            session.initialize().await.unwrap();

            let error = session.refresh().await.unwrap_err();

            assert!(matches!(error, AuthError::Storage(_)));
            assert!(!session.is_authenticated());
            assert!(session.tokens().refresh_token.is_none());
            assert_eq!(store.load().await.unwrap(), TokenRecord::default());
            assert_eq!(authority.logout_calls(), 1);
            assert_eq!(redirect.redirects(), 1);
            assert!(logs_contain("unable to persist tokens"));
        }
    }

    mod when_logging_out {
        use super::*;

        #[tokio::test]
        #[traced_test]
        async fn failed_backend_logout_still_clears_the_session() {
            let f = fixture(
                ScriptedAuthority::new().on_logout(Err(AuthError::rejected(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "logout failed",
                ))),
                InMemoryTokenStore::with_record(stored("A1", "R1")),
            );
            f.session.initialize().await.unwrap();

            f.session.logout().await;

            assert_eq!(f.authority.logout_calls(), 1);
            assert!(!f.session.is_authenticated());
            assert_eq!(f.store.load().await.unwrap(), TokenRecord::default());
            assert_eq!(f.redirect.redirects(), 1);
            assert!(logs_contain("authority logout failed"));
        }

        #[tokio::test]
        async fn logout_without_refresh_token_skips_the_backend() {
            let f = fixture(ScriptedAuthority::new(), InMemoryTokenStore::new());

            f.session.logout().await;

            assert_eq!(f.authority.logout_calls(), 0);
            assert_eq!(f.redirect.redirects(), 1);
        }
    }

    #[tokio::test]
    async fn restored_session_presents_its_token_type() {
        let record = TokenRecord::new(
            AccessToken::from_static("A1"),
            RefreshToken::from_static("R1"),
            TokenType::from_static("Token"),
        );
        let session = Session::restore(
            Arc::new(ScriptedAuthority::new()),
            Arc::new(InMemoryTokenStore::with_record(record)),
        )
        .await
        .unwrap();

        let value = session.authorization().unwrap();
        assert_eq!(value.to_str().unwrap(), "Token A1");
        assert!(value.is_sensitive());
    }

    #[tokio::test]
    async fn no_authorization_without_an_access_token() {
        let f = fixture(ScriptedAuthority::new(), InMemoryTokenStore::new());
        assert!(f.session.authorization().is_none());
    }

    #[tokio::test]
    async fn username_is_read_from_the_access_token() {
        // {"sub":"ada"}
        let token = "eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiJhZGEifQ.c2ln";
        let f = fixture(
            ScriptedAuthority::new().on_login(Ok(crate::TokenResponse {
                access_token: AccessToken::from_static(token),
                refresh_token: Some(RefreshToken::from_static("R1")),
                token_type: None,
            })),
            InMemoryTokenStore::new(),
        );

        f.session.login(&credentials()).await.unwrap();

        assert_eq!(f.session.username().as_deref(), Some("ada"));
    }
}
