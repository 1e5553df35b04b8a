//! Request interceptors
//!
//! Authentication is injected into the API client through the
//! `RequestInterceptor` trait instead of ambient global state:
//! - `bearer_token` supplies the `Authorization` header for each request
//! - `on_unauthorized` reacts to a 401 answer (session invalidation)
//!
//! # Example
//!
//! ```
//! use kumo_uploadr::api::{RequestInterceptor, SessionInterceptor};
//!
//! let session = SessionInterceptor::new(Some("token-123".to_string()));
//! assert_eq!(session.bearer_token().as_deref(), Some("token-123"));
//!
//! session.on_unauthorized("/images");
//! assert!(session.bearer_token().is_none());
//! ```

use parking_lot::RwLock;

/// Hook points around every API request
pub trait RequestInterceptor: Send + Sync {
    /// Token to send as `Authorization: Bearer <token>`, if any
    fn bearer_token(&self) -> Option<String>;

    /// Called when the backend answers 401 for `path`
    fn on_unauthorized(&self, path: &str);
}

/// Interceptor for unauthenticated clients
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuth;

impl RequestInterceptor for NoAuth {
    fn bearer_token(&self) -> Option<String> {
        None
    }

    fn on_unauthorized(&self, path: &str) {
        tracing::debug!(path = path, "Unauthorized response without a session");
    }
}

/// Holds the session token and drops it once the backend rejects it.
///
/// A 401 on the login endpoint is a credential error for the caller, not an
/// expired session, so the token is kept in that case.
#[derive(Debug, Default)]
pub struct SessionInterceptor {
    token: RwLock<Option<String>>,
}

impl SessionInterceptor {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    /// Replace the session token (e.g. after a fresh login)
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// Forget the session token
    pub fn clear(&self) {
        self.token.write().take();
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }
}

impl RequestInterceptor for SessionInterceptor {
    fn bearer_token(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn on_unauthorized(&self, path: &str) {
        if path.contains("/auth/login") {
            return;
        }
        if self.token.write().take().is_some() {
            tracing::warn!(path = path, "Session token rejected, session invalidated");
        }
    }
}
