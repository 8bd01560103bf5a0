//! Dashboard controller: one view's sessions and resources, kept live.
//!
//! [`DashboardController`] owns a [`SyncedCollection`] per entity kind and the
//! two channels feeding them. `initialize` runs the bulk fetch and the
//! channel opens concurrently; updates that land before the fetch resolves
//! are buffered by the collection and replayed over the base list.
//!
//! # Status
//!
//! ```text
//!          initialize()          fetch ok, channels open
//!  Idle ───────────────▶ Loading ─────────────────────────▶ Live
//!                          │   │
//!                          │   └── fetch ok, open failed ──▶ Stale(reason)
//!                          └────── fetch failed ──────────▶ Failed(reason)
//!
//!  teardown() from anywhere ──▶ TornDown (absorbing)
//! ```
//!
//! `Failed` and `Stale` are retried by calling `initialize` again. A retry
//! for the same identity keeps the lists it already had; one for a different
//! identity starts from empty lists.
//!
//! Observers watch [`DashboardController::status_changes`] for the status
//! and [`DashboardController::changes`] for a [`SyncGeneration`] bumped on
//! every visible change to either collection.
//!
//! No lock is held across a suspension point; the platform calls run with
//! only owned data in hand.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tutorlink_types::{
    Entity, Identity, NewResource, Resource, ResourceId, Role, Session, SessionId, SessionStatus,
};

use crate::collection::{ApplyOutcome, LoadOutcome, SyncedCollection};
use crate::config::ClientConfig;
use crate::platform::{PlatformClient, PlatformError};
use crate::subscriptions::{
    ChannelKey, ChannelKind, ChannelPhase, SubscriptionError, SubscriptionManager,
};
use crate::upload::{ResourceUpload, ValidationError, storage_path, validate_upload};

/// Lifecycle of a dashboard as the view should render it.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum DashboardStatus {
    #[default]
    Idle,
    Loading,
    /// Base lists installed and both channels open.
    Live,
    /// Base lists installed but live updates are not flowing.
    Stale(String),
    /// The bulk fetch failed.
    Failed(String),
    TornDown,
}

impl fmt::Display for DashboardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DashboardStatus::Idle => write!(f, "Idle"),
            DashboardStatus::Loading => write!(f, "Loading"),
            DashboardStatus::Live => write!(f, "Live"),
            DashboardStatus::Stale(reason) => write!(f, "Stale: {reason}"),
            DashboardStatus::Failed(reason) => write!(f, "Failed: {reason}"),
            DashboardStatus::TornDown => write!(f, "TornDown"),
        }
    }
}

/// Monotonic counter, bumped whenever either collection's snapshot changes.
///
/// Consumers compare generations to decide whether to re-read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct SyncGeneration(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DashboardError {
    #[error("dashboard has been torn down")]
    TornDown,
    #[error("dashboard has not been initialized")]
    NotInitialized,
    #[error("a {role} may not {action}")]
    NotPermitted { role: Role, action: &'static str },
    #[error("fetch failed: {0}")]
    Fetch(#[source] PlatformError),
    #[error("write failed: {0}")]
    Write(#[source] PlatformError),
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("session cannot move from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
    #[error("session {0} is not on this dashboard")]
    UnknownSession(SessionId),
    #[error("resource {0} is not on this dashboard")]
    UnknownResource(ResourceId),
}

type Shared<E> = Arc<Mutex<SyncedCollection<E>>>;

pub struct DashboardController {
    platform: PlatformClient,
    config: ClientConfig,
    subscriptions: SubscriptionManager,
    sessions: Shared<Session>,
    resources: Shared<Resource>,
    identity: Mutex<Option<Identity>>,
    /// Every key this controller has asked to open, for teardown.
    opened: Mutex<Vec<ChannelKey>>,
    torn_down: AtomicBool,
    status: watch::Sender<DashboardStatus>,
    generation: Arc<watch::Sender<SyncGeneration>>,
}

impl DashboardController {
    pub fn new(platform: PlatformClient, config: ClientConfig) -> Self {
        let subscriptions =
            SubscriptionManager::new(Arc::clone(&platform.realtime), config.channels.clone());
        let (status, _) = watch::channel(DashboardStatus::Idle);
        let (generation, _) = watch::channel(SyncGeneration::default());
        Self {
            platform,
            config,
            subscriptions,
            sessions: Arc::new(Mutex::new(SyncedCollection::new())),
            resources: Arc::new(Mutex::new(SyncedCollection::new())),
            identity: Mutex::new(None),
            opened: Mutex::new(Vec::new()),
            torn_down: AtomicBool::new(false),
            status,
            generation: Arc::new(generation),
        }
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn sessions(&self) -> Arc<Vec<Session>> {
        self.sessions.lock().items()
    }

    pub fn resources(&self) -> Arc<Vec<Resource>> {
        self.resources.lock().items()
    }

    /// Updates held back until the in-flight bulk fetch resolves.
    pub fn buffered_updates(&self) -> usize {
        self.sessions.lock().buffered_count() + self.resources.lock().buffered_count()
    }

    pub fn status(&self) -> DashboardStatus {
        self.status.borrow().clone()
    }

    pub fn status_changes(&self) -> watch::Receiver<DashboardStatus> {
        self.status.subscribe()
    }

    pub fn generation(&self) -> SyncGeneration {
        *self.generation.borrow()
    }

    pub fn changes(&self) -> watch::Receiver<SyncGeneration> {
        self.generation.subscribe()
    }

    pub fn identity(&self) -> Option<Identity> {
        *self.identity.lock()
    }

    pub fn channel_phase(&self, kind: ChannelKind) -> ChannelPhase {
        match self.identity() {
            Some(identity) => self.subscriptions.phase(&ChannelKey::new(kind, &identity)),
            None => ChannelPhase::Closed,
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Fetch both collections for `identity` and subscribe to their channels.
    ///
    /// Calling it again after `Failed` or `Stale` retries. Calling it with a
    /// different identity first closes the previous identity's channels and
    /// empties both lists.
    pub async fn initialize(&self, identity: Identity) -> Result<(), DashboardError> {
        if self.is_torn_down() {
            return Err(DashboardError::TornDown);
        }
        self.switch_identity(identity);

        if !self.sessions.lock().begin_load() || !self.resources.lock().begin_load() {
            return Err(DashboardError::TornDown);
        }
        self.set_status(DashboardStatus::Loading);
        info!(user = %identity.user_id, role = %identity.role, "initializing dashboard");

        let data = &self.platform.data;
        let fetch = async {
            tokio::try_join!(
                data.fetch_sessions(&identity),
                data.fetch_resources(&identity)
            )
        };
        // join rather than try_join: an open must never be dropped mid-flight
        let subscribe = async {
            let (sessions, resources) = tokio::join!(
                self.subscriptions.subscribe::<Session, _>(
                    ChannelKey::new(ChannelKind::Sessions, &identity),
                    fold(Arc::clone(&self.sessions), Arc::clone(&self.generation)),
                ),
                self.subscriptions.subscribe::<Resource, _>(
                    ChannelKey::new(ChannelKind::Resources, &identity),
                    fold(Arc::clone(&self.resources), Arc::clone(&self.generation)),
                ),
            );
            sessions.and(resources)
        };
        let (fetched, subscribed) = tokio::join!(fetch, subscribe);

        if self.is_torn_down() {
            debug!("dashboard torn down while initializing, discarding results");
            return Err(DashboardError::TornDown);
        }

        let (sessions, resources) = match fetched {
            Ok(rows) => rows,
            Err(e) => {
                warn!("bulk fetch failed: {e}");
                self.sessions.lock().fail_load();
                self.resources.lock().fail_load();
                if let Err(close) = self.close_channels() {
                    warn!("closing channels after failed fetch: {close}");
                }
                self.set_status(DashboardStatus::Failed(e.to_string()));
                return Err(DashboardError::Fetch(e));
            }
        };

        let installed_sessions = self.sessions.lock().complete_load(sessions);
        let installed_resources = self.resources.lock().complete_load(resources);
        if installed_sessions == LoadOutcome::Discarded
            || installed_resources == LoadOutcome::Discarded
        {
            return Err(DashboardError::TornDown);
        }
        debug!(?installed_sessions, ?installed_resources, "bulk fetch installed");
        bump(&self.generation);

        if let Err(e) = subscribed {
            warn!("live updates unavailable: {e}");
            if let Err(close) = self.close_channels() {
                warn!("closing channels after failed subscribe: {close}");
            }
            self.set_status(DashboardStatus::Stale(e.to_string()));
            return Err(e.into());
        }

        self.set_status(DashboardStatus::Live);
        info!(
            sessions = self.sessions.lock().items().len(),
            resources = self.resources.lock().items().len(),
            "dashboard live"
        );
        Ok(())
    }

    /// Close every channel this controller opened and discard both lists.
    ///
    /// Idempotent. Every key is attempted even if one fails; the first
    /// failure is returned.
    pub fn teardown(&self) -> Result<(), DashboardError> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.sessions.lock().tear_down();
        self.resources.lock().tear_down();
        bump(&self.generation);

        let result = self.close_channels();
        self.status.send_replace(DashboardStatus::TornDown);
        info!("dashboard torn down");
        result.map_err(DashboardError::from)
    }

    // ========================================================================
    // Updates
    // ========================================================================

    /// Fold one session snapshot into the view.
    pub fn apply_session(&self, session: Session) -> ApplyOutcome {
        fold_one(&self.sessions, &self.generation, session)
    }

    /// Fold one resource snapshot into the view.
    pub fn apply_resource(&self, resource: Resource) -> ApplyOutcome {
        fold_one(&self.resources, &self.generation, resource)
    }

    /// Move a session to `next` after checking the step is legal locally.
    pub async fn update_session_status(
        &self,
        id: SessionId,
        next: SessionStatus,
    ) -> Result<Session, DashboardError> {
        self.require_identity()?;
        let current = self
            .sessions
            .lock()
            .get(id)
            .ok_or(DashboardError::UnknownSession(id))?;
        if !current.status.can_transition_to(next) {
            return Err(DashboardError::InvalidTransition {
                from: current.status,
                to: next,
            });
        }

        let updated = self
            .platform
            .data
            .update_session_status(id, next)
            .await
            .map_err(DashboardError::Write)?;
        info!(session = %id, from = %current.status, to = %next, "session status updated");
        self.apply_session(updated.clone());
        Ok(updated)
    }

    /// Validate, store, and publish a file as a new resource.
    ///
    /// Validation runs before any platform call.
    pub async fn upload_resource(
        &self,
        upload: ResourceUpload,
    ) -> Result<Resource, DashboardError> {
        let identity = self.require_tutor("upload resources")?;
        validate_upload(&self.config.upload, &upload)?;

        let size_bytes = upload.size();
        let path = storage_path(identity.user_id, &upload.file_name, Utc::now());
        let stored = self
            .platform
            .storage
            .upload(
                &self.config.storage_bucket,
                &path,
                upload.bytes,
                &upload.content_type,
            )
            .await
            .map_err(DashboardError::Write)?;
        debug!(path = %stored.path, "resource file stored");

        let row = NewResource {
            tutor_id: identity.user_id,
            title: upload.title,
            description: upload.description,
            subject: upload.subject,
            is_public: upload.is_public,
            student_ids: upload.student_ids,
            file_url: stored.public_url,
            file_name: upload.file_name,
            content_type: upload.content_type,
            size_bytes,
        };
        let resource = self
            .platform
            .data
            .insert_resource(row)
            .await
            .map_err(DashboardError::Write)?;
        info!(resource = %resource.id, title = %resource.title, "resource published");
        self.apply_resource(resource.clone());
        Ok(resource)
    }

    /// Delete a resource on the platform, then drop it from the view.
    pub async fn delete_resource(&self, id: ResourceId) -> Result<(), DashboardError> {
        self.require_tutor("delete resources")?;
        if self.resources.lock().get(id).is_none() {
            return Err(DashboardError::UnknownResource(id));
        }
        self.platform
            .data
            .delete_resource(id)
            .await
            .map_err(DashboardError::Write)?;
        if self.resources.lock().remove(id) {
            bump(&self.generation);
        }
        info!(resource = %id, "resource deleted");
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn require_identity(&self) -> Result<Identity, DashboardError> {
        if self.is_torn_down() {
            return Err(DashboardError::TornDown);
        }
        self.identity().ok_or(DashboardError::NotInitialized)
    }

    fn require_tutor(&self, action: &'static str) -> Result<Identity, DashboardError> {
        let identity = self.require_identity()?;
        if !identity.is_tutor() {
            return Err(DashboardError::NotPermitted {
                role: identity.role,
                action,
            });
        }
        Ok(identity)
    }

    /// Record `identity` and its keys, closing channels left from another
    /// identity. A different identity also empties both lists.
    fn switch_identity(&self, identity: Identity) {
        let keys = [
            ChannelKey::new(ChannelKind::Sessions, &identity),
            ChannelKey::new(ChannelKind::Resources, &identity),
        ];
        let stale: Vec<ChannelKey> = {
            let mut opened = self.opened.lock();
            let (keep, stale) = opened.drain(..).partition(|k| keys.contains(k));
            *opened = keep;
            for key in keys {
                if !opened.contains(&key) {
                    opened.push(key);
                }
            }
            stale
        };
        for key in stale {
            if let Err(e) = self.subscriptions.unsubscribe(&key) {
                warn!("closing previous identity's channel failed: {e}");
            }
        }

        let previous = self.identity.lock().replace(identity);
        if previous.is_some_and(|p| p != identity) {
            let cleared_sessions = self.sessions.lock().reset();
            let cleared_resources = self.resources.lock().reset();
            if cleared_sessions || cleared_resources {
                bump(&self.generation);
            }
            debug!(user = %identity.user_id, "viewer changed, previous lists cleared");
        }
    }

    fn close_channels(&self) -> Result<(), SubscriptionError> {
        let keys = self.opened.lock().clone();
        let mut first_err = None;
        for key in keys {
            if let Err(e) = self.subscriptions.unsubscribe(&key) {
                warn!("unsubscribe {key:?} failed: {e}");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Publish `next` unless the dashboard has already been torn down.
    fn set_status(&self, next: DashboardStatus) {
        self.status.send_if_modified(|current| {
            if *current == DashboardStatus::TornDown || *current == next {
                return false;
            }
            debug!(from = %current, to = %next, "dashboard status");
            *current = next;
            true
        });
    }
}

impl Drop for DashboardController {
    fn drop(&mut self) {
        if !self.is_torn_down() {
            debug!("dashboard dropped without teardown, tearing down");
            if let Err(e) = self.teardown() {
                warn!("teardown on drop failed: {e}");
            }
        }
    }
}

fn bump(generation: &watch::Sender<SyncGeneration>) {
    generation.send_modify(|g| g.0 += 1);
}

fn fold_one<E: Entity>(
    collection: &Mutex<SyncedCollection<E>>,
    generation: &watch::Sender<SyncGeneration>,
    entity: E,
) -> ApplyOutcome {
    let outcome = collection.lock().apply(entity);
    if outcome == (ApplyOutcome::Merged { changed: true }) {
        bump(generation);
    }
    outcome
}

/// Channel callback folding into the live collection behind its lock.
fn fold<E>(
    collection: Shared<E>,
    generation: Arc<watch::Sender<SyncGeneration>>,
) -> impl Fn(E) + Send + 'static
where
    E: Entity + Send + Sync + 'static,
{
    move |entity| {
        fold_one(&collection, &generation, entity);
    }
}
