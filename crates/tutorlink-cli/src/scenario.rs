//! Replay scenarios, written in RON.
//!
//! People are referred to by name; each name gets a fresh [`UserId`] when
//! the scenario is seeded. Sessions and resources get names too so later
//! steps can point at them.
//!
//! ```ron
//! (
//!     viewer: "ada",
//!     users: { "ada": tutor, "ben": student },
//!     sessions: [
//!         (name: "intro", tutor: "ada", student: "ben", subject: "Algebra",
//!          date: "2026-10-20", start_time: "16:00:00"),
//!     ],
//!     during_load: [ SetStatus(session: "intro", status: confirmed) ],
//!     steps: [ ViewerSetStatus(session: "intro", status: completed) ],
//! )
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use tutorlink_types::{Role, SessionStatus};

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("unknown user '{0}'")]
    UnknownUser(String),
    #[error("unknown session '{0}'")]
    UnknownSession(String),
    #[error("unknown resource '{0}'")]
    UnknownResource(String),
    #[error("'{name}' is a {actual}, expected a {expected}")]
    WrongRole {
        name: String,
        expected: Role,
        actual: Role,
    },
}

#[derive(Clone, Debug, Deserialize)]
pub struct Scenario {
    /// Who signs in and watches the dashboard.
    pub viewer: String,
    pub users: BTreeMap<String, Role>,
    #[serde(default)]
    pub sessions: Vec<SessionSeed>,
    #[serde(default)]
    pub resources: Vec<ResourceSeed>,
    /// Run while the bulk fetch is held, so their updates are buffered.
    #[serde(default)]
    pub during_load: Vec<Step>,
    /// Run once the dashboard is live.
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SessionSeed {
    pub name: String,
    pub tutor: String,
    pub student: String,
    #[serde(default)]
    pub subject: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    #[serde(default)]
    pub status: SessionStatus,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ResourceSeed {
    pub name: String,
    pub tutor: String,
    pub title: String,
    #[serde(default)]
    pub public: bool,
    /// Named students a private resource is shared with.
    #[serde(default)]
    pub students: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub enum Step {
    /// Another party changes a session's status on the platform.
    SetStatus {
        session: String,
        status: SessionStatus,
    },
    /// The viewer changes a session's status through the dashboard.
    ViewerSetStatus {
        session: String,
        status: SessionStatus,
    },
    /// A tutor shares a resource without going through this dashboard.
    Share(ResourceSeed),
    /// The viewer uploads a file of `size` bytes.
    Upload {
        name: String,
        title: String,
        file_name: String,
        content_type: String,
        size: usize,
        #[serde(default)]
        public: bool,
    },
    /// The viewer deletes one of their resources.
    Delete { resource: String },
}

impl Scenario {
    pub fn from_ron(text: &str) -> Result<Self, ScenarioError> {
        Ok(ron::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_ron(&text)
    }

    pub fn role_of(&self, name: &str) -> Result<Role, ScenarioError> {
        self.users
            .get(name)
            .copied()
            .ok_or_else(|| ScenarioError::UnknownUser(name.to_string()))
    }
}
