//! In-memory stand-in for the hosted platform.
//!
//! [`MemoryPlatform`] implements all four platform traits against plain
//! vectors. Its own writes publish change events to every open channel whose
//! filter matches, the way the real platform's change feed does. Tests and
//! the replay binary drive it through the hooks below:
//!
//! - `upsert_session` / `upsert_resource` / `delete_resource_externally`:
//!   mutate a row as "the other party" and publish the change
//! - `hold_fetches` / `hold_opens`: suspend bulk fetches or channel opens
//!   until the returned [`Gate`] is released (or dropped)
//! - `fail_next_*`: inject one failure into the next call of that kind
//! - `*_calls`: count how often each boundary was crossed

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, trace};
use tutorlink_types::{
    AuthEvent, AuthSession, Identity, NewResource, Resource, ResourceId, Role, Session, SessionId,
    SessionStatus,
};

use crate::constants::{RESOURCES_TABLE, SESSIONS_TABLE};
use crate::platform::{
    AuthPlatform, DataPlatform, PlatformClient, PlatformError, StoragePlatform, StoredObject,
};
use crate::transport::{ChangeEvent, ChangeFilter, ChannelStream, RealtimeTransport, TransportError};

/// Holds suspended calls until released. Dropping it releases too.
pub struct Gate {
    tx: watch::Sender<bool>,
}

impl Gate {
    pub fn release(self) {}
}

impl Drop for Gate {
    fn drop(&mut self) {
        let _ = self.tx.send(true);
    }
}

struct OpenChannel {
    filter: ChangeFilter,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct MemoryState {
    sessions: Vec<Session>,
    resources: Vec<Resource>,
    channels: HashMap<String, OpenChannel>,
    objects: HashMap<String, Vec<u8>>,
    current_session: Option<AuthSession>,
    fail_next_open: Option<String>,
    fail_next_close: Option<String>,
    fail_next_fetch: Option<String>,
    fail_next_write: Option<String>,
    fail_sign_in: Option<String>,
}

#[derive(Default)]
struct Counters {
    fetches: AtomicUsize,
    opens: AtomicUsize,
    closes: AtomicUsize,
    uploads: AtomicUsize,
}

pub struct MemoryPlatform {
    state: Mutex<MemoryState>,
    auth_tx: broadcast::Sender<AuthEvent>,
    fetch_gate: Mutex<Option<watch::Receiver<bool>>>,
    open_gate: Mutex<Option<watch::Receiver<bool>>>,
    counters: Counters,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    pub fn new() -> Self {
        let (auth_tx, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(MemoryState::default()),
            auth_tx,
            fetch_gate: Mutex::new(None),
            open_gate: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    /// A [`PlatformClient`] whose every handle is this platform.
    pub fn client(self: &Arc<Self>) -> PlatformClient {
        PlatformClient::from_backend(Arc::clone(self))
    }

    // ── Seeding and external mutation ────────────────────────────────────

    /// Add a row without publishing a change (pre-existing data).
    pub fn seed_session(&self, session: Session) {
        self.state.lock().sessions.push(session);
    }

    pub fn seed_resource(&self, resource: Resource) {
        self.state.lock().resources.push(resource);
    }

    /// Insert or replace a session row and publish the change.
    pub fn upsert_session(&self, session: Session) {
        let mut state = self.state.lock();
        let event = match state.sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => {
                *existing = session.clone();
                ChangeEvent::update(SESSIONS_TABLE, row_json(&session))
            }
            None => {
                state.sessions.push(session.clone());
                ChangeEvent::insert(SESSIONS_TABLE, row_json(&session))
            }
        };
        publish(&state, event);
    }

    pub fn upsert_resource(&self, resource: Resource) {
        let mut state = self.state.lock();
        let event = match state.resources.iter_mut().find(|r| r.id == resource.id) {
            Some(existing) => {
                *existing = resource.clone();
                ChangeEvent::update(RESOURCES_TABLE, row_json(&resource))
            }
            None => {
                state.resources.push(resource.clone());
                ChangeEvent::insert(RESOURCES_TABLE, row_json(&resource))
            }
        };
        publish(&state, event);
    }

    pub fn delete_resource_externally(&self, id: ResourceId) -> bool {
        let mut state = self.state.lock();
        let Some(pos) = state.resources.iter().position(|r| r.id == id) else {
            return false;
        };
        let old = state.resources.remove(pos);
        publish(&state, ChangeEvent::delete(RESOURCES_TABLE, row_json(&old)));
        true
    }

    /// Deliver `event` on one channel, bypassing its server-side filter.
    pub fn push_raw(&self, channel: &str, event: ChangeEvent) -> bool {
        self.state
            .lock()
            .channels
            .get(channel)
            .is_some_and(|ch| ch.tx.send(event).is_ok())
    }

    /// Drop the server side of a channel's stream, as a transport disconnect would.
    pub fn end_channel(&self, channel: &str) -> bool {
        self.state.lock().channels.remove(channel).is_some()
    }

    // ── Auth ─────────────────────────────────────────────────────────────

    pub fn sign_in(&self, session: AuthSession) {
        self.state.lock().current_session = Some(session.clone());
        let _ = self.auth_tx.send(AuthEvent::SignedIn(session));
    }

    // ── Suspension and failure injection ─────────────────────────────────

    pub fn hold_fetches(&self) -> Gate {
        let (tx, rx) = watch::channel(false);
        *self.fetch_gate.lock() = Some(rx);
        Gate { tx }
    }

    pub fn hold_opens(&self) -> Gate {
        let (tx, rx) = watch::channel(false);
        *self.open_gate.lock() = Some(rx);
        Gate { tx }
    }

    pub fn fail_next_open(&self, reason: &str) {
        self.state.lock().fail_next_open = Some(reason.to_string());
    }

    /// The next close reports failure and leaves the channel open.
    pub fn fail_next_close(&self, reason: &str) {
        self.state.lock().fail_next_close = Some(reason.to_string());
    }

    pub fn fail_next_fetch(&self, reason: &str) {
        self.state.lock().fail_next_fetch = Some(reason.to_string());
    }

    pub fn fail_next_write(&self, reason: &str) {
        self.state.lock().fail_next_write = Some(reason.to_string());
    }

    pub fn fail_sign_in(&self, reason: &str) {
        self.state.lock().fail_sign_in = Some(reason.to_string());
    }

    // ── Inspection ───────────────────────────────────────────────────────

    pub fn fetch_calls(&self) -> usize {
        self.counters.fetches.load(Ordering::SeqCst)
    }

    pub fn open_calls(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    pub fn upload_calls(&self) -> usize {
        self.counters.uploads.load(Ordering::SeqCst)
    }

    pub fn stored_object(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().objects.get(path).cloned()
    }

    pub fn session_rows(&self) -> Vec<Session> {
        self.state.lock().sessions.clone()
    }

    pub fn resource_rows(&self) -> Vec<Resource> {
        self.state.lock().resources.clone()
    }

    fn take_write_failure(&self) -> Result<(), PlatformError> {
        match self.state.lock().fail_next_write.take() {
            Some(reason) => Err(PlatformError::Request(reason)),
            None => Ok(()),
        }
    }
}

fn row_json<T: Serialize>(row: &T) -> serde_json::Value {
    serde_json::to_value(row).unwrap_or(serde_json::Value::Null)
}

/// Fan an event out to every channel whose filter accepts it.
fn publish(state: &MemoryState, event: ChangeEvent) {
    for (name, channel) in &state.channels {
        if channel.filter.matches(&event) {
            trace!(channel = %name, kind = ?event.kind, "publishing change");
            let _ = channel.tx.send(event.clone());
        }
    }
}

async fn pass(gate: &Mutex<Option<watch::Receiver<bool>>>) {
    let rx = gate.lock().clone();
    if let Some(mut rx) = rx {
        let _ = rx.wait_for(|released| *released).await;
    }
}

// ============================================================================
// Platform trait impls
// ============================================================================

#[async_trait]
impl AuthPlatform for MemoryPlatform {
    async fn current_session(&self) -> Result<Option<AuthSession>, PlatformError> {
        Ok(self.state.lock().current_session.clone())
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_tx.subscribe()
    }

    async fn sign_in_with_provider(&self, provider: &str) -> Result<(), PlatformError> {
        match self.state.lock().fail_sign_in.take() {
            Some(reason) => Err(PlatformError::SignIn {
                provider: provider.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    async fn sign_out(&self) -> Result<(), PlatformError> {
        self.state.lock().current_session = None;
        let _ = self.auth_tx.send(AuthEvent::SignedOut);
        Ok(())
    }
}

#[async_trait]
impl DataPlatform for MemoryPlatform {
    async fn fetch_sessions(&self, identity: &Identity) -> Result<Vec<Session>, PlatformError> {
        self.counters.fetches.fetch_add(1, Ordering::SeqCst);
        pass(&self.fetch_gate).await;

        let mut state = self.state.lock();
        if let Some(reason) = state.fail_next_fetch.take() {
            return Err(PlatformError::Request(reason));
        }
        let mut rows: Vec<Session> = state
            .sessions
            .iter()
            .filter(|s| match identity.role {
                Role::Tutor => s.tutor_id == identity.user_id,
                Role::Student => s.student_id == identity.user_id,
            })
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.schedule_key());
        debug!(user = %identity.user_id, rows = rows.len(), "fetched sessions");
        Ok(rows)
    }

    async fn fetch_resources(&self, identity: &Identity) -> Result<Vec<Resource>, PlatformError> {
        self.counters.fetches.fetch_add(1, Ordering::SeqCst);
        pass(&self.fetch_gate).await;

        let mut state = self.state.lock();
        if let Some(reason) = state.fail_next_fetch.take() {
            return Err(PlatformError::Request(reason));
        }
        let mut rows: Vec<Resource> = state
            .resources
            .iter()
            .filter(|r| match identity.role {
                Role::Tutor => r.tutor_id == identity.user_id,
                Role::Student => r.visible_to(identity.user_id),
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        debug!(user = %identity.user_id, rows = rows.len(), "fetched resources");
        Ok(rows)
    }

    async fn update_session_status(
        &self,
        id: SessionId,
        status: SessionStatus,
    ) -> Result<Session, PlatformError> {
        self.take_write_failure()?;
        let mut state = self.state.lock();
        let row = state
            .sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| PlatformError::NotFound {
                entity: "session",
                id: id.to_string(),
            })?;
        row.status = status;
        let updated = row.clone();
        let event = ChangeEvent::update(SESSIONS_TABLE, row_json(&updated));
        publish(&state, event);
        Ok(updated)
    }

    async fn insert_resource(&self, resource: NewResource) -> Result<Resource, PlatformError> {
        self.take_write_failure()?;
        let row = resource.into_resource(ResourceId::new(), Utc::now());
        let mut state = self.state.lock();
        state.resources.push(row.clone());
        publish(&state, ChangeEvent::insert(RESOURCES_TABLE, row_json(&row)));
        Ok(row)
    }

    async fn delete_resource(&self, id: ResourceId) -> Result<(), PlatformError> {
        self.take_write_failure()?;
        let mut state = self.state.lock();
        let pos = state
            .resources
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| PlatformError::NotFound {
                entity: "resource",
                id: id.to_string(),
            })?;
        let old = state.resources.remove(pos);
        publish(&state, ChangeEvent::delete(RESOURCES_TABLE, row_json(&old)));
        Ok(())
    }
}

#[async_trait]
impl StoragePlatform for MemoryPlatform {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, PlatformError> {
        self.counters.uploads.fetch_add(1, Ordering::SeqCst);
        self.take_write_failure()?;
        debug!(bucket, path, content_type, size = bytes.len(), "stored object");
        self.state.lock().objects.insert(path.to_string(), bytes);
        Ok(StoredObject {
            path: path.to_string(),
            public_url: format!("memory://{bucket}/{path}"),
        })
    }
}

#[async_trait]
impl RealtimeTransport for MemoryPlatform {
    async fn open_channel(
        &self,
        name: &str,
        filter: ChangeFilter,
    ) -> Result<ChannelStream, TransportError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        pass(&self.open_gate).await;

        let mut state = self.state.lock();
        if let Some(reason) = state.fail_next_open.take() {
            return Err(TransportError::Open {
                name: name.to_string(),
                reason,
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.channels.insert(name.to_string(), OpenChannel { filter, tx });
        Ok(rx)
    }

    fn close_channel(&self, name: &str) -> Result<(), TransportError> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(reason) = state.fail_next_close.take() {
            return Err(TransportError::Close {
                name: name.to_string(),
                reason,
            });
        }
        match state.channels.remove(name) {
            Some(_) => Ok(()),
            None => Err(TransportError::NotOpen(name.to_string())),
        }
    }

    fn open_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().channels.keys().cloned().collect();
        names.sort();
        names
    }
}
