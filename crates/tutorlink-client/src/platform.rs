//! The hosted platform, as the sync core sees it.
//!
//! Auth, relational data, and object storage are external collaborators; each
//! is a trait here so the in-memory platform (and any real HTTP client) can
//! stand in. [`PlatformClient`] bundles the four handles, realtime included,
//! into the one shared connection the rest of the crate takes explicitly.
//!
//! A process-wide client can be installed once with [`install_global`].
//! Library code never reaches for it; it exists for binaries that want a
//! single connection for their whole lifetime.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tutorlink_types::{
    AuthEvent, AuthSession, Identity, NewResource, Resource, ResourceId, Session, SessionId,
    SessionStatus,
};

use crate::transport::RealtimeTransport;

/// Failures reported by the auth, data, or storage platforms.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("sign-in with {provider} failed: {reason}")]
    SignIn { provider: String, reason: String },
}

/// Public location of an uploaded object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub path: String,
    pub public_url: String,
}

#[async_trait]
pub trait AuthPlatform: Send + Sync {
    /// The session currently signed in on this client, if any.
    async fn current_session(&self) -> Result<Option<AuthSession>, PlatformError>;

    /// Auth state change notifications.
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;

    /// Start a social sign-in. Completion arrives as an [`AuthEvent`].
    async fn sign_in_with_provider(&self, provider: &str) -> Result<(), PlatformError>;

    async fn sign_out(&self) -> Result<(), PlatformError>;
}

#[async_trait]
pub trait DataPlatform: Send + Sync {
    /// All sessions `identity` is a party to, ordered by date then start time.
    async fn fetch_sessions(&self, identity: &Identity) -> Result<Vec<Session>, PlatformError>;

    /// Resources `identity` may see: a tutor's own, or a student's visible ones.
    /// Newest first.
    async fn fetch_resources(&self, identity: &Identity) -> Result<Vec<Resource>, PlatformError>;

    async fn update_session_status(
        &self,
        id: SessionId,
        status: SessionStatus,
    ) -> Result<Session, PlatformError>;

    async fn insert_resource(&self, resource: NewResource) -> Result<Resource, PlatformError>;

    async fn delete_resource(&self, id: ResourceId) -> Result<(), PlatformError>;
}

#[async_trait]
pub trait StoragePlatform: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, PlatformError>;
}

/// The shared connection to the hosted platform. Cheap to clone.
#[derive(Clone)]
pub struct PlatformClient {
    pub auth: Arc<dyn AuthPlatform>,
    pub data: Arc<dyn DataPlatform>,
    pub storage: Arc<dyn StoragePlatform>,
    pub realtime: Arc<dyn RealtimeTransport>,
}

impl PlatformClient {
    pub fn new(
        auth: Arc<dyn AuthPlatform>,
        data: Arc<dyn DataPlatform>,
        storage: Arc<dyn StoragePlatform>,
        realtime: Arc<dyn RealtimeTransport>,
    ) -> Self {
        Self {
            auth,
            data,
            storage,
            realtime,
        }
    }

    /// Build a client whose four handles are all the same backend.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: AuthPlatform + DataPlatform + StoragePlatform + RealtimeTransport + 'static,
    {
        Self {
            auth: backend.clone(),
            data: backend.clone(),
            storage: backend.clone(),
            realtime: backend,
        }
    }
}

static GLOBAL_CLIENT: OnceLock<PlatformClient> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
#[error("a global platform client is already installed")]
pub struct AlreadyInstalled;

/// Install the process-wide client. Succeeds exactly once.
pub fn install_global(
    client: PlatformClient,
) -> Result<&'static PlatformClient, AlreadyInstalled> {
    GLOBAL_CLIENT.set(client).map_err(|_| AlreadyInstalled)?;
    tracing::debug!("installed global platform client");
    GLOBAL_CLIENT.get().ok_or(AlreadyInstalled)
}

/// The process-wide client, if one was installed.
pub fn global() -> Option<&'static PlatformClient> {
    GLOBAL_CLIENT.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::memory::MemoryPlatform;

    // The only test in this crate that touches the process-wide client.
    #[test]
    fn test_global_client_installs_once() {
        assert!(global().is_none());

        let platform = Arc::new(MemoryPlatform::new());
        let installed = install_global(platform.client()).unwrap();
        let fetched = global().unwrap();
        assert!(std::ptr::eq(installed, fetched));
        assert!(Arc::ptr_eq(&fetched.data, &installed.data));

        assert!(install_global(platform.client()).is_err());
    }
}
