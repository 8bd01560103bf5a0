//! The real-time transport boundary.
//!
//! The hosted platform pushes row-level change events over named channels.
//! [`RealtimeTransport`] is the event-source abstraction the subscription
//! manager consumes: opening a channel hands back an owned receiver of
//! [`ChangeEvent`]s, closing it by name tears the server side down.
//!
//! Filters are evaluated server-side; [`ChangeFilter::matches`] is the same
//! predicate in Rust so fakes can apply it and the manager can re-check rows.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Row-level change kinds the platform publishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One raw change as pushed by the transport.
///
/// `record` is the new row (empty object for deletes); `old_record` carries
/// the previous row when the platform includes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub record: serde_json::Value,
    #[serde(default)]
    pub old_record: Option<serde_json::Value>,
}

impl ChangeEvent {
    pub fn insert(table: &str, record: serde_json::Value) -> Self {
        Self {
            table: table.to_string(),
            kind: ChangeKind::Insert,
            record,
            old_record: None,
        }
    }

    pub fn update(table: &str, record: serde_json::Value) -> Self {
        Self {
            table: table.to_string(),
            kind: ChangeKind::Update,
            record,
            old_record: None,
        }
    }

    pub fn delete(table: &str, old_record: serde_json::Value) -> Self {
        Self {
            table: table.to_string(),
            kind: ChangeKind::Delete,
            record: serde_json::Value::Object(Default::default()),
            old_record: Some(old_record),
        }
    }
}

/// Row predicate registered alongside a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowPredicate {
    /// `column = value` on a string column.
    ColumnEq { column: String, value: String },
    /// `is_public OR value ∈ student_ids`.
    VisibleToStudent { student_id: String },
}

impl RowPredicate {
    pub fn matches(&self, row: &serde_json::Value) -> bool {
        match self {
            RowPredicate::ColumnEq { column, value } => {
                row.get(column).and_then(|v| v.as_str()) == Some(value.as_str())
            }
            RowPredicate::VisibleToStudent { student_id } => {
                let public = row
                    .get("is_public")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let listed = |ids: &Vec<serde_json::Value>| {
                    ids.iter().any(|id| id.as_str() == Some(student_id.as_str()))
                };
                public
                    || row
                        .get("student_ids")
                        .and_then(|v| v.as_array())
                        .is_some_and(listed)
            }
        }
    }
}

/// Server-side filter for one channel: which table, which rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFilter {
    pub table: String,
    pub predicate: RowPredicate,
}

impl ChangeFilter {
    /// Whether `event` belongs on a channel with this filter.
    ///
    /// Deletes are judged by their old row, everything else by the new row.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        let row = match event.kind {
            ChangeKind::Delete => event.old_record.as_ref(),
            ChangeKind::Insert | ChangeKind::Update => Some(&event.record),
        };
        row.is_some_and(|r| self.predicate.matches(r))
    }
}

/// Receiving end of an open channel. Dropping it stops local delivery only;
/// the server side stays open until [`RealtimeTransport::close_channel`].
pub type ChannelStream = mpsc::UnboundedReceiver<ChangeEvent>;

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open channel '{name}': {reason}")]
    Open { name: String, reason: String },
    #[error("failed to close channel '{name}': {reason}")]
    Close { name: String, reason: String },
    #[error("channel '{0}' is not open")]
    NotOpen(String),
}

/// Push-notification transport owned by the hosted platform.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open `name` with a server-side `filter` and start receiving events.
    ///
    /// Suspends until the platform acknowledges the subscription.
    async fn open_channel(
        &self,
        name: &str,
        filter: ChangeFilter,
    ) -> Result<ChannelStream, TransportError>;

    /// Close a channel by name.
    fn close_channel(&self, name: &str) -> Result<(), TransportError>;

    /// Names of all channels currently open on this connection.
    fn open_channels(&self) -> Vec<String>;
}
