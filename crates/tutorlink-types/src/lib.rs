//! Shared entity and identity types for tutorlink.
//!
//! Leaf crate: typed IDs, the two mirrored entities (sessions and resources),
//! roles, and the auth payloads the sync core reads its identity from. No
//! internal tutorlink dependencies.
//!
//! |-------------------|------------------------------------------------|
//! | Type              | Purpose                                        |
//! |-------------------|------------------------------------------------|
//! | [`Entity`]        | Anything mirrored client-side by identifier    |
//! | [`Session`]       | A booked tutoring session                      |
//! | [`Resource`]      | A shared file, public or scoped to students    |
//! | [`Identity`]      | `{ user_id, role }` scoping fetches & channels |
//! | [`AuthSession`]   | Auth platform session carrying the role claim  |
//! |-------------------|------------------------------------------------|

use std::fmt;
use std::hash::Hash;

pub mod identity;
pub mod ids;
pub mod resource;
pub mod session;

pub use identity::{AuthEvent, AuthSession, Identity, Role, RoleClaimError};
pub use ids::{ResourceId, SessionId, UserId};
pub use resource::{NewResource, Resource};
pub use session::{ParticipantSummary, Session, SessionStatus};

/// A uniquely identified record mirrored from server state.
///
/// Equality on the whole value is what lets the merge step recognise a no-op
/// update; identity (`id()`) is what it merges by.
pub trait Entity: Clone + PartialEq {
    type Id: Copy + Eq + Hash + fmt::Debug;

    fn id(&self) -> Self::Id;
}
