use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct CreateAlbumRequest {
    pub title: String,
    #[serde(rename = "eventDate", skip_serializing_if = "Option::is_none")]
    pub event_date: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAlbumResponse {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadUrlRequestFile {
    pub filename: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadUrlRequest {
    pub files: Vec<UploadUrlRequestFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadUrlResponseEntry {
    pub filename: String,
    #[serde(rename = "uploadUrl")]
    pub upload_url: String,
    #[serde(rename = "thumbnailUploadUrl")]
    pub thumbnail_upload_url: Option<String>,
    pub key: String,
    #[serde(rename = "thumbnailKey")]
    pub thumbnail_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmUploadImage {
    pub filename: String,
    pub key: String,
    #[serde(rename = "thumbnailKey", skip_serializing_if = "Option::is_none")]
    pub thumbnail_key: Option<String>,
    #[serde(rename = "sourceImageHash")]
    pub source_image_hash: String,
    #[serde(rename = "fileSize")]
    pub file_size: i64,
    pub width: i64,
    pub height: i64,
    #[serde(rename = "uploadOrder")]
    pub upload_order: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmUploadRequest {
    pub images: Vec<ConfirmUploadImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmUploadResponseEntry {
    pub id: i64,
    #[serde(rename = "originalFilename")]
    pub original_filename: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateImageEntry {
    #[serde(rename = "imageId")]
    pub image_id: i64,
    #[serde(rename = "sourceImageHash")]
    pub source_image_hash: String,
    pub key: String,
    #[serde(rename = "fileSize")]
    pub file_size: i64,
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateImagesRequest {
    pub updates: Vec<UpdateImageEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteImagesRequest {
    #[serde(rename = "imageIds")]
    pub image_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteImagesResponse {
    #[serde(rename = "deletedCount")]
    pub deleted_count: i64,
    #[serde(rename = "failedCount")]
    pub failed_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    #[serde(rename = "imageLimit")]
    pub image_limit: i64,
    #[serde(rename = "totalImages")]
    pub total_images: i64,
}
