//! Who is looking at a dashboard.
//!
//! The auth platform owns credentials and sessions. All the sync core needs
//! from it is an [`Identity`]: the user's id plus the role claim embedded in
//! their session metadata.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::ids::UserId;

/// Marketplace role, read from the `role` claim in the user's metadata.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Tutor,
    Student,
}

/// The `{ user_id, role }` pair every channel filter and bulk fetch is scoped by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn tutor(user_id: UserId) -> Self {
        Self::new(user_id, Role::Tutor)
    }

    pub fn student(user_id: UserId) -> Self {
        Self::new(user_id, Role::Student)
    }

    pub fn is_tutor(&self) -> bool {
        self.role == Role::Tutor
    }
}

/// Session object as delivered by the auth platform's callbacks.
///
/// Only `user_id` and the `role` key inside `user_metadata` are interpreted;
/// everything else rides along untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub user_id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

/// Why an [`AuthSession`] could not be turned into an [`Identity`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoleClaimError {
    #[error("session for {0} carries no role claim")]
    Missing(UserId),
    #[error("unknown role claim '{claim}' for {user_id}")]
    Unknown { user_id: UserId, claim: String },
}

impl AuthSession {
    /// The raw role claim, if the metadata carries one as a string.
    pub fn role_claim(&self) -> Option<&str> {
        self.user_metadata.get("role").and_then(|v| v.as_str())
    }

    /// Derive the identity the sync core consumes.
    pub fn identity(&self) -> Result<Identity, RoleClaimError> {
        let claim = self
            .role_claim()
            .ok_or(RoleClaimError::Missing(self.user_id))?;
        let role = claim.parse::<Role>().map_err(|_| RoleClaimError::Unknown {
            user_id: self.user_id,
            claim: claim.to_string(),
        })?;
        Ok(Identity::new(self.user_id, role))
    }
}

/// Change notifications from the auth platform.
#[derive(Clone, Debug, PartialEq)]
pub enum AuthEvent {
    SignedIn(AuthSession),
    TokenRefreshed(AuthSession),
    SignedOut,
}
