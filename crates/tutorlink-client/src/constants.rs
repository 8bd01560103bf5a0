//! Client configuration constants.
//!
//! Centralizes hardcoded values; every one of them can be overridden through
//! [`ClientConfig`](crate::ClientConfig).

/// Largest file a tutor may upload as a resource (10 MiB).
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Content types accepted for resource uploads:
/// pdf, doc, docx, ppt, pptx, xls, xlsx, zip.
pub const ALLOWED_UPLOAD_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/zip",
    "application/x-zip-compressed",
];

/// Human-readable list matching [`ALLOWED_UPLOAD_TYPES`], used in error messages.
pub const ALLOWED_UPLOAD_LABEL: &str = "PDF, DOC, DOCX, PPT, PPTX, XLS, XLSX, ZIP";

/// Channel name prefix for session change feeds.
pub const SESSION_CHANNEL: &str = "session-updates";

/// Channel name prefix for resource change feeds.
pub const RESOURCE_CHANNEL: &str = "resource-updates";

/// Table the session change feed watches.
pub const SESSIONS_TABLE: &str = "sessions";

/// Table the resource change feed watches.
pub const RESOURCES_TABLE: &str = "resources";

/// Storage bucket uploaded resource files land in.
pub const DEFAULT_STORAGE_BUCKET: &str = "resources";

/// Platform endpoint used when no config file says otherwise.
pub const DEFAULT_PLATFORM_URL: &str = "http://localhost:54321";
