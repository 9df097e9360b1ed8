//! Session state and durable token storage for a proctored test-taking client
//!
//! A [`Session`] is the authoritative, in-memory copy of the current access
//! and refresh tokens. Every change is mirrored into a [`TokenStore`] so that
//! a later run can pick up where this one left off, and published to any
//! [`SessionWatcher`] that cares to observe it.
//!
//! Tokens are issued, renewed, and revoked by an [`Authority`]. The
//! [`HttpAuthority`] talks to the backend's `/auth/*` endpoints.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use proctor_tokens::{Credentials, FileTokenStore, HttpAuthority, Password, Session};
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let base_url = reqwest::Url::parse("http://localhost:8080")?;
//! let authority = HttpAuthority::new(reqwest::Client::new(), &base_url);
//! let store = FileTokenStore::new("tokens.json");
//!
//! let session = Session::restore(Arc::new(authority), Arc::new(store)).await?;
//!
//! if !session.is_authenticated() {
//!     session
//!         .login(&Credentials {
//!             name: "ada".into(),
//!             password: Password::new("correct horse".into()),
//!         })
//!         .await?;
//! }
//!
//! tracing::info!(user = ?session.username(), "signed in");
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! * `file` (default): Provides [`FileTokenStore`], which keeps the session in a
//!   JSON document on the local filesystem.
//! * `test-util`: Provides scripted doubles in [`testing`] for exercising
//!   sessions without a backend.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod authority;
mod braids;
pub mod claims;
mod session;
pub mod store;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use authority::{AuthError, Authority, Credentials, HttpAuthority, Registration, TokenResponse};
pub use braids::*;
pub use claims::{decode_claims, username_from_token, Claims, MalformedToken};
pub use session::{
    LoginRedirect, NoRedirect, Session, SessionDropped, SessionTokens, SessionWatcher, TokenPair,
};
#[cfg(feature = "file")]
pub use store::FileTokenStore;
pub use store::{InMemoryTokenStore, TokenRecord, TokenStore};
