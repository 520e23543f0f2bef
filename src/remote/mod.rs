mod types;

pub use types::*;

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::reconciler::ProfileSource;

/// Typed facade over the remote album/upload/confirm/update/delete endpoints plus the
/// object-store PUT. Stays on `reqwest::blocking` rather than an async client,
/// matching the rest of this crate's thread-based concurrency model.
pub struct Client {
    http: reqwest::blocking::Client,
    base_url: String,
    token_provider: Arc<dyn Fn() -> Option<String> + Send + Sync>,
}

impl Client {
    pub fn new(base_url: impl Into<String>, token_provider: Arc<dyn Fn() -> Option<String> + Send + Sync>) -> Self {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            base_url: base_url.into(),
            token_provider,
        }
    }

    fn token(&self) -> Result<String> {
        (self.token_provider)().ok_or(Error::Unauthenticated)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    fn request_json<B: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<R> {
        let token = self.token()?;
        let mut req = self.http.request(method, self.url(path)).bearer_auth(token);
        if let Some(body) = body {
            req = req.json(body);
        }
        let response = req.send().map_err(|err| Error::UploadHttp(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            response
                .json::<R>()
                .map_err(|err| Error::RemoteApi(format!("bad response body: {err}")))
        } else if status == reqwest::StatusCode::UNAUTHORIZED {
            Err(Error::Unauthenticated)
        } else if status.is_server_error() {
            Err(Error::UploadHttp(format!("{status}")))
        } else {
            Err(Error::RemoteApi(format!("{status}")))
        }
    }

    pub fn create_album(&self, title: &str, event_date: Option<chrono::DateTime<chrono::Utc>>) -> Result<CreateAlbumResponse> {
        let body = CreateAlbumRequest {
            title: title.to_string(),
            event_date,
        };
        self.request_json(reqwest::Method::POST, "/albums", Some(&body))
    }

    pub fn delete_album(&self, album_id: &str) -> Result<()> {
        let token = self.token()?;
        let response = self
            .http
            .delete(self.url(&format!("/albums/{album_id}")))
            .bearer_auth(token)
            .send()
            .map_err(|err| Error::UploadHttp(err.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::RemoteApi(format!("{}", response.status())))
        }
    }

    pub fn request_upload_urls(&self, album_id: &str, filenames: &[String]) -> Result<Vec<UploadUrlResponseEntry>> {
        let body = UploadUrlRequest {
            files: filenames
                .iter()
                .map(|filename| UploadUrlRequestFile {
                    filename: filename.clone(),
                })
                .collect(),
        };
        self.request_json(
            reqwest::Method::POST,
            &format!("/albums/{album_id}/upload"),
            Some(&body),
        )
    }

    pub fn confirm_upload(&self, album_id: &str, images: Vec<ConfirmUploadImage>) -> Result<Vec<ConfirmUploadResponseEntry>> {
        let body = ConfirmUploadRequest { images };
        self.request_json(
            reqwest::Method::POST,
            &format!("/albums/{album_id}/confirm-upload"),
            Some(&body),
        )
    }

    pub fn update_images(&self, album_id: &str, updates: Vec<UpdateImageEntry>) -> Result<()> {
        let body = UpdateImagesRequest { updates };
        let token = self.token()?;
        let response = self
            .http
            .patch(self.url(&format!("/albums/{album_id}/images")))
            .bearer_auth(token)
            .json(&body)
            .send()
            .map_err(|err| Error::UploadHttp(err.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::RemoteApi(format!("{}", response.status())))
        }
    }

    pub fn delete_images(&self, album_id: &str, image_ids: Vec<i64>) -> Result<DeleteImagesResponse> {
        let token = self.token()?;
        let response = self
            .http
            .delete(self.url(&format!("/albums/{album_id}/images")))
            .bearer_auth(token)
            .json(&DeleteImagesRequest { image_ids })
            .send()
            .map_err(|err| Error::UploadHttp(err.to_string()))?;
        if response.status().is_success() {
            response
                .json()
                .map_err(|err| Error::RemoteApi(format!("bad response body: {err}")))
        } else {
            Err(Error::RemoteApi(format!("{}", response.status())))
        }
    }

    pub fn get_profile(&self) -> Result<Profile> {
        self.request_json::<(), Profile>(reqwest::Method::GET, "/profile", None)
    }

    /// Object-store PUT: not one of the typed album-API endpoints, it's a direct PUT
    /// against the presigned URL. The object id comes from a vendor-specific header when present,
    /// falling back to a de-quoted `ETag`.
    pub fn put_object(&self, presigned_url: &str, bytes: &[u8]) -> Result<String> {
        let response = self
            .http
            .put(presigned_url)
            .header("Content-Type", "image/webp")
            .body(bytes.to_vec())
            .send()
            .map_err(|err| Error::UploadHttp(err.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::UploadHttp(format!("{}", response.status())));
        }
        let headers = response.headers();
        if let Some(value) = headers.get("x-object-id") {
            if let Ok(value) = value.to_str() {
                return Ok(value.to_string());
            }
        }
        let etag = headers
            .get(reqwest::header::ETAG)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        Ok(etag.trim_matches('"').to_string())
    }
}

impl ProfileSource for Client {
    fn remaining_image_quota(&self) -> Result<Option<i64>> {
        let profile = self.get_profile()?;
        Ok(Some((profile.image_limit - profile.total_images).max(0)))
    }
}

impl crate::reconciler::RemoteImageDeleter for Client {
    fn delete_images(&self, album_id: &str, image_ids: &[i64]) -> Result<()> {
        self.delete_images(album_id, image_ids.to_vec()).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_missing_is_unauthenticated() {
        let client = Client::new("https://example.invalid", Arc::new(|| None));
        let err = client.token().unwrap_err();
        assert!(matches!(err, Error::Unauthenticated));
    }

    #[test]
    fn test_url_joins_base_and_path() {
        let client = Client::new("https://example.invalid/", Arc::new(|| Some("t".into())));
        assert_eq!(client.url("/albums"), "https://example.invalid/albums");
    }
}
