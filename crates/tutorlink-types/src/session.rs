//! Tutoring session rows.
//!
//! A session is created by a booking action on the platform and then mutated
//! by either party. The sync core only ever sees whole-row snapshots.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::Entity;
use crate::ids::{SessionId, UserId};

/// Lifecycle status of a session.
///
/// ```text
/// Pending ──▶ Scheduled ──▶ Confirmed ──▶ Completed
///    │            │             │
///    └────────────┴─────────────┴──────▶ Cancelled
/// Pending ──▶ Confirmed
/// ```
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Pending,
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
}

impl SessionStatus {
    /// Completed and cancelled sessions never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether a status write from `self` to `next` is a legal step.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (*self, next) {
            (Pending, Scheduled | Confirmed | Cancelled) => true,
            (Scheduled, Confirmed | Cancelled) => true,
            (Confirmed, Completed | Cancelled) => true,
            _ => false,
        }
    }
}

/// Denormalized display data for the other party of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub full_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// One booked tutoring session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub tutor_id: UserId,
    pub student_id: UserId,
    #[serde(default)]
    pub subject: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    #[serde(default = "default_duration")]
    pub duration_minutes: u32,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub tutor: Option<ParticipantSummary>,
    #[serde(default)]
    pub student: Option<ParticipantSummary>,
}

fn default_duration() -> u32 {
    60
}

impl Session {
    /// A new pending session with no denormalized display data.
    pub fn new(
        tutor_id: UserId,
        student_id: UserId,
        subject: impl Into<String>,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> Self {
        Self {
            id: SessionId::new(),
            tutor_id,
            student_id,
            subject: subject.into(),
            date,
            start_time,
            duration_minutes: default_duration(),
            status: SessionStatus::Pending,
            notes: None,
            tutor: None,
            student: None,
        }
    }

    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = status;
        self
    }

    /// Sort key used by bulk fetches: date, then start time, ascending.
    pub fn schedule_key(&self) -> (NaiveDate, NaiveTime) {
        (self.date, self.start_time)
    }

    /// Whether `user` is either party of this session.
    pub fn involves(&self, user: UserId) -> bool {
        self.tutor_id == user || self.student_id == user
    }
}

impl Entity for Session {
    type Id = SessionId;

    fn id(&self) -> SessionId {
        self.id
    }
}
