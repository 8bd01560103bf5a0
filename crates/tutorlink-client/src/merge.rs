//! Insert-or-replace merging of incoming entity snapshots.
//!
//! Collections are shared `Arc<Vec<E>>` snapshots so that view layers can
//! detect change by pointer identity:
//!
//! - a merge that changes anything returns a **fresh** `Arc`;
//! - a merge whose incoming entity equals the entry already held returns the
//!   **identical** `Arc` (`Arc::ptr_eq` holds), so a duplicate delivery costs
//!   no re-render.
//!
//! Replacement always keeps the entry's position; new identifiers are appended.

use std::sync::Arc;

use tutorlink_types::Entity;

/// Fold one incoming entity into `collection`.
pub fn merge<E: Entity>(collection: &Arc<Vec<E>>, incoming: E) -> Arc<Vec<E>> {
    let id = incoming.id();
    match collection.iter().position(|e| e.id() == id) {
        Some(pos) if collection[pos] == incoming => Arc::clone(collection),
        Some(pos) => {
            let mut next = Vec::clone(collection);
            next[pos] = incoming;
            Arc::new(next)
        }
        None => {
            let mut next = Vec::with_capacity(collection.len() + 1);
            next.extend(collection.iter().cloned());
            next.push(incoming);
            Arc::new(next)
        }
    }
}

/// Drop the entity with `id`, if present. Absent ids return the identical `Arc`.
pub fn remove<E: Entity>(collection: &Arc<Vec<E>>, id: E::Id) -> Arc<Vec<E>> {
    if !collection.iter().any(|e| e.id() == id) {
        return Arc::clone(collection);
    }
    let kept: Vec<E> = collection.iter().filter(|e| e.id() != id).cloned().collect();
    Arc::new(kept)
}

/// Whether a collection upholds the one-entry-per-identifier invariant.
pub fn has_unique_ids<E: Entity>(collection: &[E]) -> bool {
    let mut seen = std::collections::HashSet::with_capacity(collection.len());
    collection.iter().all(|e| seen.insert(e.id()))
}
