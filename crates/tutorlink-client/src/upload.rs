//! Resource upload validation.
//!
//! Oversized or disallowed files are rejected here, before anything touches
//! object storage, with a message naming the violated constraint.

use chrono::{DateTime, Utc};
use tutorlink_types::UserId;

use crate::config::UploadLimits;
use crate::constants::ALLOWED_UPLOAD_LABEL;

/// A file a tutor wants to publish, plus its metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceUpload {
    pub title: String,
    pub description: Option<String>,
    pub subject: String,
    pub is_public: bool,
    pub student_ids: Vec<UserId>,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ResourceUpload {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("File size must be at most {} (got {})", format_mb(.max), format_mb(.size))]
    FileTooLarge { size: u64, max: u64 },
    #[error("Invalid file type '{content_type}'. Allowed: {}", ALLOWED_UPLOAD_LABEL)]
    UnsupportedType { content_type: String },
    #[error("File is empty")]
    EmptyFile,
    #[error("A title is required")]
    MissingTitle,
}

fn format_mb(bytes: &u64) -> String {
    format!("{:.1}MB", *bytes as f64 / (1024.0 * 1024.0))
}

/// Check size and content type against `limits`.
pub fn validate_file(
    limits: &UploadLimits,
    content_type: &str,
    size: u64,
) -> Result<(), ValidationError> {
    if size == 0 {
        return Err(ValidationError::EmptyFile);
    }
    if size > limits.max_bytes {
        return Err(ValidationError::FileTooLarge {
            size,
            max: limits.max_bytes,
        });
    }
    if !limits.allows(content_type) {
        return Err(ValidationError::UnsupportedType {
            content_type: content_type.to_string(),
        });
    }
    Ok(())
}

/// Validate an entire upload request.
pub fn validate_upload(
    limits: &UploadLimits,
    upload: &ResourceUpload,
) -> Result<(), ValidationError> {
    if upload.title.trim().is_empty() {
        return Err(ValidationError::MissingTitle);
    }
    validate_file(limits, &upload.content_type, upload.size())
}

/// Object path for an upload: `<tutor>/<millis>-<sanitized file name>`.
pub fn storage_path(tutor: UserId, file_name: &str, at: DateTime<Utc>) -> String {
    let keep = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_');
    let clean: String = file_name
        .chars()
        .map(|c| if keep(c) { c } else { '_' })
        .collect();
    format!("{tutor}/{}-{clean}", at.timestamp_millis())
}
