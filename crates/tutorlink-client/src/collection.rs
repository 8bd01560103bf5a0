//! A mirrored entity list plus its load/buffer state.
//!
//! [`SyncedCollection`] is what a dashboard holds per entity kind. It hides
//! the ordering problem between the one-shot bulk fetch and the live channel:
//! updates that arrive while the fetch is still in flight are buffered and
//! folded in after the base list is installed, never dropped.
//!
//! # State Machine
//!
//! ```text
//! +---------+  begin_load()  +-----------+  complete_load(base)  +-------+
//! |  Idle   | ─────────────▶ |  Loading  | ───────────────────▶ | Ready |
//! +---------+                | (buffers) |                      +-------+
//!      ▲                     +-----------+                          │
//!      │      fail_load()          │                                │
//!      └───────────────────────────┘◀──────── begin_load() ─────────┘
//!
//!  reset() from any live state ──▶ Idle, empty (the viewer changed)
//!  tear_down() from any state ──▶ TornDown (absorbing: everything discarded)
//! ```
//!
//! The buffer is itself folded through [`merge`], so it holds at most one
//! pending snapshot per identifier and replaying it gives the same result as
//! replaying every update in arrival order.

use std::sync::Arc;

use tracing::{debug, trace};
use tutorlink_types::Entity;

use crate::merge::{merge, remove};

/// What happened to an update handed to [`SyncedCollection::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Folded into the live list; `changed` is false for a no-op duplicate.
    Merged { changed: bool },
    /// Held until the bulk fetch resolves.
    Buffered,
    /// The collection was torn down.
    Discarded,
}

/// Result of installing the bulk fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Base list installed and `replayed` buffered updates folded on top.
    Installed { len: usize, replayed: usize },
    /// Torn down while the fetch was in flight; the result was dropped.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Ready,
    TornDown,
}

#[derive(Debug)]
pub struct SyncedCollection<E: Entity> {
    items: Arc<Vec<E>>,
    buffered: Arc<Vec<E>>,
    phase: Phase,
    /// Bumped whenever `items` is replaced by a different list.
    version: u64,
}

impl<E: Entity> Default for SyncedCollection<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> SyncedCollection<E> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Vec::new()),
            buffered: Arc::new(Vec::new()),
            phase: Phase::Idle,
            version: 0,
        }
    }

    /// Current snapshot. Pointer identity changes only when content does.
    pub fn items(&self) -> Arc<Vec<E>> {
        Arc::clone(&self.items)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of distinct entities waiting for the bulk fetch.
    pub fn buffered_count(&self) -> usize {
        self.buffered.len()
    }

    pub fn is_torn_down(&self) -> bool {
        self.phase == Phase::TornDown
    }

    /// Enter `Loading`: subsequent updates buffer until [`complete_load`](Self::complete_load).
    ///
    /// Returns false (and does nothing) once torn down.
    pub fn begin_load(&mut self) -> bool {
        if self.is_torn_down() {
            return false;
        }
        self.phase = Phase::Loading;
        self.buffered = Arc::new(Vec::new());
        true
    }

    /// Install the fetched base list, then replay buffered updates over it.
    pub fn complete_load(&mut self, base: Vec<E>) -> LoadOutcome {
        if self.is_torn_down() {
            debug!("discarding bulk fetch of {} rows for torn-down collection", base.len());
            return LoadOutcome::Discarded;
        }

        let pending = std::mem::take(&mut self.buffered);
        let mut items = Arc::new(base);
        for entity in pending.iter().cloned() {
            items = merge(&items, entity);
        }
        let replayed = pending.len();
        if replayed > 0 {
            debug!("replayed {replayed} buffered updates over bulk fetch");
        }

        let len = items.len();
        self.replace(items);
        self.phase = Phase::Ready;
        LoadOutcome::Installed { len, replayed }
    }

    /// The bulk fetch failed: drop buffered updates and go back to `Idle`.
    /// Items from an earlier successful load are kept.
    pub fn fail_load(&mut self) {
        if self.is_torn_down() {
            return;
        }
        self.buffered = Arc::new(Vec::new());
        self.phase = Phase::Idle;
    }

    /// Fold one incoming entity according to the current phase.
    pub fn apply(&mut self, entity: E) -> ApplyOutcome {
        match self.phase {
            Phase::TornDown => {
                trace!("update for {:?} after teardown, discarding", entity.id());
                ApplyOutcome::Discarded
            }
            Phase::Loading => {
                trace!("buffering update for {:?} until bulk fetch resolves", entity.id());
                self.buffered = merge(&self.buffered, entity);
                ApplyOutcome::Buffered
            }
            Phase::Idle | Phase::Ready => {
                let next = merge(&self.items, entity);
                ApplyOutcome::Merged {
                    changed: self.replace(next),
                }
            }
        }
    }

    /// Drop an entity by id from the live list (and from the buffer).
    pub fn remove(&mut self, id: E::Id) -> bool {
        if self.is_torn_down() {
            return false;
        }
        self.buffered = remove(&self.buffered, id);
        let next = remove(&self.items, id);
        self.replace(next)
    }

    /// Look up an entity by id in the live list.
    pub fn get(&self, id: E::Id) -> Option<E> {
        self.items.iter().find(|e| e.id() == id).cloned()
    }

    /// Drop the list and any buffered updates and go back to `Idle`.
    ///
    /// Used when the collection is about to be reloaded for someone else, so
    /// nothing from the previous owner survives a failed reload.
    pub fn reset(&mut self) -> bool {
        if self.is_torn_down() {
            return false;
        }
        self.phase = Phase::Idle;
        self.buffered = Arc::new(Vec::new());
        if !self.items.is_empty() {
            self.replace(Arc::new(Vec::new()));
        }
        true
    }

    /// Absorbing: clears everything and ignores all further input.
    pub fn tear_down(&mut self) {
        self.phase = Phase::TornDown;
        self.buffered = Arc::new(Vec::new());
        self.replace(Arc::new(Vec::new()));
    }

    fn replace(&mut self, next: Arc<Vec<E>>) -> bool {
        if Arc::ptr_eq(&self.items, &next) {
            return false;
        }
        self.items = next;
        self.version = self.version.wrapping_add(1);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Row {
        id: char,
        rev: u32,
    }

    impl Entity for Row {
        type Id = char;

        fn id(&self) -> char {
            self.id
        }
    }

    fn row(id: char, rev: u32) -> Row {
        Row { id, rev }
    }

    #[test]
    fn test_update_mid_fetch_is_replayed_once() {
        let mut c = SyncedCollection::new();
        c.begin_load();
        assert_eq!(c.apply(row('B', 2)), ApplyOutcome::Buffered);

        let outcome = c.complete_load(vec![row('A', 1), row('B', 1)]);
        assert_eq!(
            outcome,
            LoadOutcome::Installed {
                len: 2,
                replayed: 1,
            }
        );
        assert_eq!(*c.items(), vec![row('A', 1), row('B', 2)]);
        assert_eq!(c.phase(), Phase::Ready);
        assert_eq!(c.buffered_count(), 0);
    }

    #[test]
    fn test_buffer_coalesces_by_id() {
        let mut c = SyncedCollection::new();
        c.begin_load();
        c.apply(row('C', 1));
        c.apply(row('B', 5));
        c.apply(row('C', 2));
        assert_eq!(c.buffered_count(), 2);

        c.complete_load(vec![row('A', 1), row('B', 1)]);
        assert_eq!(*c.items(), vec![row('A', 1), row('B', 5), row('C', 2)]);
    }

    #[test]
    fn test_ready_merges_directly() {
        let mut c = SyncedCollection::new();
        c.begin_load();
        c.complete_load(vec![row('A', 1)]);
        let v = c.version();

        assert_eq!(c.apply(row('A', 2)), ApplyOutcome::Merged { changed: true });
        assert_eq!(c.version(), v + 1);
        assert_eq!(c.apply(row('A', 2)), ApplyOutcome::Merged { changed: false });
        assert_eq!(c.version(), v + 1);
    }

    #[test]
    fn test_teardown_during_load_discards_fetch() {
        let mut c = SyncedCollection::new();
        c.begin_load();
        c.apply(row('B', 2));
        c.tear_down();

        let fetched = vec![row('A', 1), row('B', 1)];
        assert_eq!(c.complete_load(fetched), LoadOutcome::Discarded);
        assert!(c.items().is_empty());
        assert_eq!(c.apply(row('C', 1)), ApplyOutcome::Discarded);
        assert!(!c.begin_load());
        assert!(c.items().is_empty());
    }

    #[test]
    fn test_fail_load_drops_buffer_keeps_previous_items() {
        let mut c = SyncedCollection::new();
        c.begin_load();
        c.complete_load(vec![row('A', 1)]);

        c.begin_load();
        c.apply(row('Z', 1));
        c.fail_load();
        assert_eq!(c.phase(), Phase::Idle);
        assert_eq!(c.buffered_count(), 0);
        assert_eq!(*c.items(), vec![row('A', 1)]);
    }

    #[test]
    fn test_reset_clears_items_and_buffer() {
        let mut c = SyncedCollection::new();
        c.begin_load();
        c.complete_load(vec![row('A', 1), row('B', 1)]);
        c.begin_load();
        c.apply(row('C', 1));
        let v = c.version();

        assert!(c.reset());
        assert_eq!(c.phase(), Phase::Idle);
        assert!(c.items().is_empty());
        assert_eq!(c.buffered_count(), 0);
        assert_eq!(c.version(), v + 1);

        // a failed reload after reset shows nothing old
        c.begin_load();
        c.fail_load();
        assert!(c.items().is_empty());

        // empty already: no version bump
        assert!(c.reset());
        assert_eq!(c.version(), v + 1);

        c.tear_down();
        assert!(!c.reset());
    }

    #[test]
    fn test_remove() {
        let mut c = SyncedCollection::new();
        c.begin_load();
        c.complete_load(vec![row('A', 1), row('B', 1)]);
        assert!(c.remove('A'));
        assert!(!c.remove('A'));
        assert_eq!(*c.items(), vec![row('B', 1)]);
        assert_eq!(c.get('B'), Some(row('B', 1)));
        assert_eq!(c.get('A'), None);
    }

    #[test]
    fn test_items_snapshot_is_stable() {
        let mut c = SyncedCollection::new();
        c.begin_load();
        c.complete_load(vec![row('A', 1)]);
        let before = c.items();
        c.apply(row('A', 2));
        assert_eq!(*before, vec![row('A', 1)]);
        assert_eq!(*c.items(), vec![row('A', 2)]);
    }
}
