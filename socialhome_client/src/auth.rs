//! The session collaborator seen from the synchronization core.

use std::sync::{Arc, PoisonError, RwLock};

use crate::models::Profile;

/// Identity and session hooks supplied by the host application.
pub trait AuthContext: Send + Sync {
    fn is_authenticated(&self) -> bool;

    fn current_user(&self) -> Option<Profile>;

    /// Token sent as `X-CSRFToken` on every request.
    fn csrf_token(&self) -> Option<String>;

    /// Called when the server rejects a session that was believed valid.
    fn on_session_expired(&self);
}

#[derive(Debug, Default)]
struct SessionInner {
    user: Option<Profile>,
    csrf_token: Option<String>,
    expired: bool,
}

/// In-memory session shared between the gateway and the host.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    inner: Arc<RwLock<SessionInner>>,
}

impl SessionState {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(user: Profile, csrf_token: Option<String>) -> Self {
        let state = Self::default();
        state.sign_in(user);
        state.set_csrf_token(csrf_token);
        state
    }

    pub fn sign_in(&self, user: Profile) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.user = Some(user);
        inner.expired = false;
    }

    pub fn sign_out(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.user = None;
    }

    pub fn set_csrf_token(&self, token: Option<String>) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.csrf_token = token;
    }

    /// True once the server forced a sign-out, until the next `sign_in`.
    pub fn was_expired(&self) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).expired
    }
}

impl AuthContext for SessionState {
    fn is_authenticated(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .user
            .is_some()
    }

    fn current_user(&self) -> Option<Profile> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .user
            .clone()
    }

    fn csrf_token(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .csrf_token
            .clone()
    }

    fn on_session_expired(&self) {
        tracing::info!("session expired, signing out");
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.user = None;
        inner.expired = true;
    }
}
