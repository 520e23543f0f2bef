use serde::Serialize;

/// The one-directional core→UI event stream.
/// A single typed enum replaces the original's per-event callback registration; the UI drains
/// these off an ordered channel instead of subscribing to named callbacks.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "upload:progress")]
    UploadProgress(Progress),
    #[serde(rename = "upload:batch-start")]
    UploadBatchStart { album_id: String, batch_size: usize },
    #[serde(rename = "upload:complete")]
    UploadComplete { album_id: String },
    #[serde(rename = "upload:error")]
    UploadError { album_id: String, message: String },
    #[serde(rename = "upload:paused")]
    UploadPaused { album_id: String },
    #[serde(rename = "upload:resumed")]
    UploadResumed { album_id: String },
    #[serde(rename = "album:status-changed")]
    AlbumStatusChanged { album_id: String, needs_sync: bool },
    #[serde(rename = "albums:refresh")]
    AlbumsRefresh,
    #[serde(rename = "network:status-changed")]
    NetworkStatusChanged { online: bool },
}

#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub album_id: String,
    pub total: i64,
    pub pending: i64,
    pub compressing: i64,
    pub uploading: i64,
    pub complete: i64,
    pub failed_compression: i64,
    pub failed_upload: i64,
}

impl Progress {
    pub fn from_stats(album_id: impl Into<String>, stats: &crate::catalog::ImageStats) -> Self {
        Self {
            album_id: album_id.into(),
            total: stats.total(),
            pending: stats.pending,
            compressing: stats.compressing,
            uploading: stats.uploading,
            complete: stats.complete,
            failed_compression: stats.failed_compression,
            failed_upload: stats.failed_upload,
        }
    }
}

/// Sink the rest of the core pushes events through. A thin wrapper over a bounded
/// `crossbeam_channel` sender so publishing never blocks indefinitely on a slow UI.
#[derive(Clone)]
pub struct EventSink {
    tx: crossbeam_channel::Sender<Event>,
}

impl EventSink {
    pub fn new() -> (Self, crossbeam_channel::Receiver<Event>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: Event) {
        if self.tx.send(event).is_err() {
            tracing::debug!("event sink has no remaining receiver");
        }
    }
}
