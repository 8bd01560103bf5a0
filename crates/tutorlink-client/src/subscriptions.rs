//! Channel subscription management.
//!
//! [`SubscriptionManager`] bridges the push transport to typed callbacks. It
//! opens one named channel per [`ChannelKey`] (kind, owner, role), registers
//! the ownership filter for it, and runs one pump task per channel that
//! decodes insert/update events and hands each entity to the caller's
//! callback, in the order the transport delivered them.
//!
//! # State Machine (per key)
//!
//! ```text
//!            subscribe()                open ok
//!  Closed ───────────────▶ Subscribing ─────────▶ Open
//!    ▲                        │    │                │
//!    │      open failed       │    │ unsubscribe()  │ unsubscribe() /
//!    ├────────────────────────┘    │ (cancels open) │ transport ended stream
//!    └─────────────────────────────┴────────────────┘
//! ```
//!
//! `subscribe` on a key that is already subscribing or open returns the
//! existing handle; the new callback is not registered. `unsubscribe` is
//! idempotent and synchronous. A `subscribe` future dropped before the open
//! lands (a caller-side timeout, say) returns its key to `Closed`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use strum::{AsRefStr, Display};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use tutorlink_types::{Identity, Role, UserId};

use crate::config::ChannelNames;
use crate::constants::{RESOURCES_TABLE, SESSIONS_TABLE};
use crate::transport::{
    ChangeEvent, ChangeFilter, ChangeKind, ChannelStream, RealtimeTransport, RowPredicate,
    TransportError,
};

// ============================================================================
// Keys and handles
// ============================================================================

/// Which entity feed a channel carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ChannelKind {
    Sessions,
    Resources,
}

impl ChannelKind {
    pub fn table(&self) -> &'static str {
        match self {
            ChannelKind::Sessions => SESSIONS_TABLE,
            ChannelKind::Resources => RESOURCES_TABLE,
        }
    }
}

/// Identifies one logical channel: at most one is open per key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub kind: ChannelKind,
    pub owner: UserId,
    pub role: Role,
}

impl ChannelKey {
    pub fn new(kind: ChannelKind, identity: &Identity) -> Self {
        Self {
            kind,
            owner: identity.user_id,
            role: identity.role,
        }
    }

    /// The server-side ownership filter for this key.
    ///
    /// | kind      | tutor               | student                               |
    /// |-----------|---------------------|---------------------------------------|
    /// | sessions  | `tutor_id = owner`  | `student_id = owner`                  |
    /// | resources | `tutor_id = owner`  | `is_public OR owner ∈ student_ids`    |
    pub fn filter(&self) -> ChangeFilter {
        let owner = self.owner.to_string();
        let predicate = match (self.kind, self.role) {
            (_, Role::Tutor) => RowPredicate::ColumnEq {
                column: "tutor_id".into(),
                value: owner,
            },
            (ChannelKind::Sessions, Role::Student) => RowPredicate::ColumnEq {
                column: "student_id".into(),
                value: owner,
            },
            (ChannelKind::Resources, Role::Student) => {
                RowPredicate::VisibleToStudent { student_id: owner }
            }
        };
        ChangeFilter {
            table: self.kind.table().to_string(),
            predicate,
        }
    }
}

/// Opaque reference to an open (or opening) channel. Only good for closing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionHandle {
    key: ChannelKey,
    name: String,
    id: u64,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Observable lifecycle phase of a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelPhase {
    Closed,
    Subscribing,
    Open,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// `unsubscribe` ran while the open was still in flight.
    #[error("subscription to '{0}' was cancelled before it opened")]
    Cancelled(String),
}

// ============================================================================
// Manager
// ============================================================================

enum ChannelState {
    Subscribing {
        handle: SubscriptionHandle,
        cancel: CancellationToken,
    },
    Open {
        handle: SubscriptionHandle,
        cancel: CancellationToken,
    },
}

impl ChannelState {
    fn handle(&self) -> &SubscriptionHandle {
        match self {
            ChannelState::Subscribing { handle, .. } | ChannelState::Open { handle, .. } => handle,
        }
    }

    fn cancel(&self) -> &CancellationToken {
        match self {
            ChannelState::Subscribing { cancel, .. } | ChannelState::Open { cancel, .. } => cancel,
        }
    }
}

type ChannelMap = HashMap<ChannelKey, ChannelState>;
type ChannelTable = Arc<Mutex<ChannelMap>>;

/// Drop the entry for `key` if it still belongs to the subscription `id`.
fn forget(channels: &Mutex<ChannelMap>, key: &ChannelKey, id: u64) -> bool {
    let mut channels = channels.lock();
    if channels.get(key).is_some_and(|s| s.handle().id == id) {
        channels.remove(key);
        return true;
    }
    false
}

/// Armed while `subscribe` waits on the transport. If the future is dropped
/// there, the `Subscribing` entry it inserted is removed.
struct PendingOpen<'a> {
    channels: &'a ChannelTable,
    key: ChannelKey,
    id: u64,
}

impl PendingOpen<'_> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for PendingOpen<'_> {
    fn drop(&mut self) {
        if forget(self.channels, &self.key, self.id) {
            debug!(key = ?self.key, "subscribe abandoned before the channel opened");
        }
    }
}

pub struct SubscriptionManager {
    transport: Arc<dyn RealtimeTransport>,
    names: ChannelNames,
    channels: ChannelTable,
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(transport: Arc<dyn RealtimeTransport>, names: ChannelNames) -> Self {
        Self {
            transport,
            names,
            channels: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Channel name on the wire: `<prefix>:<role>:<owner>`.
    pub fn channel_name(&self, key: &ChannelKey) -> String {
        let prefix = match key.kind {
            ChannelKind::Sessions => &self.names.sessions,
            ChannelKind::Resources => &self.names.resources,
        };
        format!("{prefix}:{}:{}", key.role, key.owner)
    }

    pub fn phase(&self, key: &ChannelKey) -> ChannelPhase {
        match self.channels.lock().get(key) {
            None => ChannelPhase::Closed,
            Some(ChannelState::Subscribing { .. }) => ChannelPhase::Subscribing,
            Some(ChannelState::Open { .. }) => ChannelPhase::Open,
        }
    }

    /// Number of keys currently subscribing or open.
    pub fn active_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Open the channel for `key` and deliver every matching insert/update to
    /// `on_change`, decoded as `E`.
    ///
    /// Suspends while the transport opens the channel. Open failures are
    /// returned as-is; nothing is retried. Dropping the future while it is
    /// suspended leaves the key `Closed`, so a later call opens it afresh.
    pub async fn subscribe<E, F>(
        &self,
        key: ChannelKey,
        on_change: F,
    ) -> Result<SubscriptionHandle, SubscriptionError>
    where
        E: DeserializeOwned + Send + 'static,
        F: Fn(E) + Send + 'static,
    {
        let name = self.channel_name(&key);

        let (handle, cancel) = {
            let mut channels = self.channels.lock();
            if let Some(existing) = channels.get(&key) {
                debug!(channel = %name, "already subscribed, reusing handle");
                return Ok(existing.handle().clone());
            }
            let handle = SubscriptionHandle {
                key,
                name: name.clone(),
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
            };
            let cancel = CancellationToken::new();
            channels.insert(
                key,
                ChannelState::Subscribing {
                    handle: handle.clone(),
                    cancel: cancel.clone(),
                },
            );
            (handle, cancel)
        };
        let pending = PendingOpen {
            channels: &self.channels,
            key,
            id: handle.id,
        };

        let filter = key.filter();
        debug!(channel = %name, ?filter, "opening channel");
        let stream = match self.transport.open_channel(&name, filter.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(channel = %name, "channel open failed: {e}");
                return Err(e.into());
            }
        };

        // unsubscribe() may have run while we were suspended
        {
            let mut channels = self.channels.lock();
            let still_ours = matches!(
                channels.get(&key),
                Some(ChannelState::Subscribing { handle: h, .. }) if h.id == handle.id
            );
            if !still_ours {
                let reopened = channels.contains_key(&key);
                drop(channels);
                if !reopened {
                    if let Err(e) = self.transport.close_channel(&name) {
                        warn!(channel = %name, "closing cancelled channel failed: {e}");
                    }
                }
                debug!(channel = %name, "subscribe cancelled while opening");
                return Err(SubscriptionError::Cancelled(name));
            }
            channels.insert(
                key,
                ChannelState::Open {
                    handle: handle.clone(),
                    cancel: cancel.clone(),
                },
            );
        }
        pending.disarm();

        tokio::spawn(pump(
            stream,
            filter,
            on_change,
            cancel,
            Arc::clone(&self.channels),
            handle.clone(),
        ));
        info!(channel = %name, "channel open");
        Ok(handle)
    }

    /// Close the channel for `key`. A no-op when it is not open.
    ///
    /// During `Subscribing` this cancels the in-flight open. When the manager
    /// has no record of the key but the transport still lists a channel of
    /// that name, the transport channel is closed.
    pub fn unsubscribe(&self, key: &ChannelKey) -> Result<(), SubscriptionError> {
        let name = self.channel_name(key);
        let removed = self.channels.lock().remove(key);
        match removed {
            Some(ChannelState::Subscribing { cancel, .. }) => {
                cancel.cancel();
                debug!(channel = %name, "cancelled in-flight subscribe");
            }
            Some(ChannelState::Open { cancel, .. }) => {
                cancel.cancel();
                self.transport.close_channel(&name)?;
                info!(channel = %name, "channel closed");
            }
            None => {
                if self.transport.open_channels().iter().any(|n| *n == name) {
                    debug!(channel = %name, "closing untracked transport channel");
                    self.transport.close_channel(&name)?;
                } else {
                    trace!(channel = %name, "unsubscribe on closed channel");
                }
            }
        }
        Ok(())
    }

    /// Close every channel this manager holds. Returns the first failure, if any,
    /// after attempting all of them.
    pub fn unsubscribe_all(&self) -> Result<(), SubscriptionError> {
        let keys: Vec<ChannelKey> = self.channels.lock().keys().copied().collect();
        let mut first_err = None;
        for key in keys {
            if let Err(e) = self.unsubscribe(&key) {
                warn!("unsubscribe {key:?} failed: {e}");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        let leftover: Vec<(ChannelKey, ChannelState)> = self.channels.lock().drain().collect();
        for (key, state) in leftover {
            warn!("subscription manager dropped with {key:?} still active");
            state.cancel().cancel();
            if matches!(state, ChannelState::Open { .. }) {
                let _ = self.transport.close_channel(state.handle().name());
            }
        }
    }
}

// ============================================================================
// Pump
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
enum Dispatch {
    Delivered,
    Deleted,
    OutsideFilter,
    Undecodable,
}

/// Route one raw event to the callback.
fn dispatch<E, F>(
    filter: &ChangeFilter,
    on_change: &F,
    channel: &str,
    event: ChangeEvent,
) -> Dispatch
where
    E: DeserializeOwned,
    F: Fn(E),
{
    if event.kind == ChangeKind::Delete {
        trace!(channel, "ignoring delete event");
        return Dispatch::Deleted;
    }
    if !filter.matches(&event) {
        debug!(channel, table = %event.table, "dropping event outside channel filter");
        return Dispatch::OutsideFilter;
    }
    match serde_json::from_value::<E>(event.record) {
        Ok(entity) => {
            on_change(entity);
            Dispatch::Delivered
        }
        Err(e) => {
            warn!(channel, "undecodable {:?} payload: {e}", event.kind);
            Dispatch::Undecodable
        }
    }
}

/// One per open channel: FIFO from transport to callback until cancelled.
async fn pump<E, F>(
    mut stream: ChannelStream,
    filter: ChangeFilter,
    on_change: F,
    cancel: CancellationToken,
    channels: ChannelTable,
    handle: SubscriptionHandle,
) where
    E: DeserializeOwned + Send + 'static,
    F: Fn(E) + Send + 'static,
{
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = stream.recv() => event,
        };
        let Some(event) = event else {
            warn!(channel = %handle.name, "transport ended channel stream");
            forget(&channels, &handle.key, handle.id);
            break;
        };
        dispatch::<E, F>(&filter, &on_change, &handle.name, event);
    }
    trace!(channel = %handle.name, "pump finished");
}
