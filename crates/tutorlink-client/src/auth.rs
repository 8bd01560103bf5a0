//! Folding auth platform notifications into the identity dashboards use.
//!
//! Every path out of a sign-in attempt lands in an explicit [`AuthState`]:
//! a session without a usable role claim and a failed social sign-in both
//! become `Error`, so the view always has something defined to show.
//!
//! [`AuthTracker::restore`] seeds the state once; [`AuthTracker::next_event`]
//! then follows the platform's [`AuthPlatform::auth_events`] feed.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tutorlink_types::{AuthEvent, AuthSession, Identity};

use crate::platform::{AuthPlatform, PlatformError};

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    SignedOut,
    SignedIn(Identity),
    Error(String),
}

impl AuthState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            AuthState::SignedIn(identity) => Some(identity),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct AuthTracker {
    state: AuthState,
}

impl AuthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    /// Seed from the platform's current session, if any.
    pub async fn restore(&mut self, auth: &dyn AuthPlatform) -> &AuthState {
        match auth.current_session().await {
            Ok(Some(session)) => self.adopt(&session),
            Ok(None) => self.state = AuthState::SignedOut,
            Err(e) => {
                warn!("session lookup failed: {e}");
                self.state = AuthState::Error(e.to_string());
            }
        }
        &self.state
    }

    pub fn apply(&mut self, event: &AuthEvent) -> &AuthState {
        match event {
            AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) => {
                self.adopt(session)
            }
            AuthEvent::SignedOut => {
                info!("signed out");
                self.state = AuthState::SignedOut;
            }
        }
        &self.state
    }

    /// Wait for the next notification on `events` and fold it in.
    ///
    /// Returns `None` once the platform drops its sender. Falling behind only
    /// skips intermediate events; the next one received still applies.
    pub async fn next_event(
        &mut self,
        events: &mut broadcast::Receiver<AuthEvent>,
    ) -> Option<&AuthState> {
        loop {
            match events.recv().await {
                Ok(event) => return Some(self.apply(&event)),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "auth events lagged, skipping ahead");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Start a social sign-in; a failure is recorded, never left undefined.
    pub async fn sign_in_with_provider(
        &mut self,
        auth: &dyn AuthPlatform,
        provider: &str,
    ) -> Result<(), PlatformError> {
        auth.sign_in_with_provider(provider).await.inspect_err(|e| {
            warn!(provider, "social sign-in failed: {e}");
            self.state = AuthState::Error(e.to_string());
        })
    }

    fn adopt(&mut self, session: &AuthSession) {
        self.state = match session.identity() {
            Ok(identity) => {
                info!(user = %identity.user_id, role = %identity.role, "signed in");
                AuthState::SignedIn(identity)
            }
            Err(e) => {
                warn!("rejecting session: {e}");
                AuthState::Error(e.to_string())
            }
        };
    }
}
