//! Shared file resources.
//!
//! A tutor uploads a file and publishes it either to everyone or to a set of
//! their students. The sync core mirrors these rows; it never edits them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Entity;
use crate::ids::{ResourceId, UserId};

/// A file a tutor has shared.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub tutor_id: UserId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub is_public: bool,
    /// Students allowed to see a non-public resource.
    #[serde(default)]
    pub student_ids: Vec<UserId>,
    pub file_url: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl Resource {
    /// Whether `student` may see this resource on their dashboard.
    pub fn visible_to(&self, student: UserId) -> bool {
        self.is_public || self.student_ids.contains(&student)
    }
}

impl Entity for Resource {
    type Id = ResourceId;

    fn id(&self) -> ResourceId {
        self.id
    }
}

/// Everything needed to insert a resource row after its file is stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResource {
    pub tutor_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub subject: String,
    pub is_public: bool,
    pub student_ids: Vec<UserId>,
    pub file_url: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: u64,
}

impl NewResource {
    /// Materialize the row the data platform would return for this insert.
    pub fn into_resource(self, id: ResourceId, created_at: DateTime<Utc>) -> Resource {
        Resource {
            id,
            tutor_id: self.tutor_id,
            title: self.title,
            description: self.description,
            subject: self.subject,
            is_public: self.is_public,
            student_ids: self.student_ids,
            file_url: self.file_url,
            file_name: self.file_name,
            content_type: self.content_type,
            size_bytes: self.size_bytes,
            created_at,
        }
    }
}
