//! Real-time dashboard sync core for tutorlink.
//!
//! Keeps a dashboard's in-memory lists of sessions and resources consistent
//! with the hosted platform: a one-shot bulk fetch, live change channels, and
//! a merge step that folds row snapshots in by identifier. The platform
//! itself (auth, data, storage, realtime) sits behind traits in
//! [`platform`] and [`transport`]; [`memory::MemoryPlatform`] implements all
//! of them in-process.

pub mod auth;
pub mod collection;
pub mod config;
pub mod constants;
pub mod dashboard;
pub mod memory;
pub mod merge;
pub mod platform;
pub mod subscriptions;
pub mod transport;
pub mod upload;

pub use auth::{AuthState, AuthTracker};
pub use collection::{ApplyOutcome, LoadOutcome, Phase, SyncedCollection};
pub use config::{ChannelNames, ClientConfig, ConfigError, UploadLimits};
pub use dashboard::{DashboardController, DashboardError, DashboardStatus, SyncGeneration};
pub use memory::{Gate, MemoryPlatform};
pub use merge::{merge, remove};
pub use platform::{
    AlreadyInstalled, AuthPlatform, DataPlatform, PlatformClient, PlatformError, StoragePlatform,
    StoredObject, global, install_global,
};
pub use subscriptions::{
    ChannelKey, ChannelKind, ChannelPhase, SubscriptionError, SubscriptionHandle,
    SubscriptionManager,
};
pub use transport::{
    ChangeEvent, ChangeFilter, ChangeKind, ChannelStream, RealtimeTransport, RowPredicate,
    TransportError,
};
pub use upload::{ResourceUpload, ValidationError, storage_path, validate_file, validate_upload};
