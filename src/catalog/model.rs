use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `uploadStatus` as a sum type rather than a class hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Compressing,
    Uploading,
    Complete,
    FailedCompression,
    FailedUpload,
}

impl UploadStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Compressing => "compressing",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Complete => "complete",
            UploadStatus::FailedCompression => "failed_compression",
            UploadStatus::FailedUpload => "failed_upload",
        }
    }

    pub fn from_db_str(s: &str) -> crate::error::Result<Self> {
        Ok(match s {
            "pending" => UploadStatus::Pending,
            "compressing" => UploadStatus::Compressing,
            "uploading" => UploadStatus::Uploading,
            "complete" => UploadStatus::Complete,
            "failed_compression" => UploadStatus::FailedCompression,
            "failed_upload" => UploadStatus::FailedUpload,
            other => {
                return Err(crate::error::Error::ConstraintViolation(format!(
                    "unknown upload_status {other:?}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub title: String,
    pub event_date: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub source_folder_path: String,
    pub local_folder_path: String,
    pub total_images: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub needs_sync: bool,
    pub is_orphaned: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: i64,
    pub album_id: String,
    pub server_id: Option<i64>,
    pub original_filename: String,
    pub local_file_path: String,
    pub file_size: i64,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub mtime: Option<DateTime<Utc>>,
    pub source_file_hash: Option<String>,
    pub upload_status: UploadStatus,
    pub upload_order: i64,
}

/// New-image fields the Reconciler has on hand before a row exists.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub original_filename: String,
    pub local_file_path: String,
    pub file_size: i64,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub mtime: Option<DateTime<Utc>>,
    pub source_file_hash: Option<String>,
    pub upload_order: i64,
}

/// `getImageStats(albumId)` aggregate.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ImageStats {
    pub pending: i64,
    pub compressing: i64,
    pub uploading: i64,
    pub complete: i64,
    pub failed_compression: i64,
    pub failed_upload: i64,
}

impl ImageStats {
    pub fn total(&self) -> i64 {
        self.pending
            + self.compressing
            + self.uploading
            + self.complete
            + self.failed_compression
            + self.failed_upload
    }
}
