use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender};
use rayon::prelude::*;

use crate::catalog::{self, Album, Catalog, Image, UploadStatus};
use crate::compression::{CompressionOptions, CompressionRequest, WorkerPool};
use crate::error::{Error, Result};
use crate::events::{Event, EventSink, Progress};
use crate::remote::{self, ConfirmUploadImage, UpdateImageEntry};
use crate::sidecar::{self, Sidecar};

const QUEUE_CAPACITY: usize = 200;
const UPLOAD_BATCH_SIZE: usize = 100;
const UPLOAD_CONCURRENCY: usize = 5;
const COMPRESSION_TIMEOUT: Duration = Duration::from_secs(60);
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-album pipeline run state: `idle → running → (paused ↔ running) → done | aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Done,
    Aborted,
}

struct GlobalState {
    active_album: Option<String>,
    queued_albums: VecDeque<String>,
}

/// A successfully compressed image on its way from the producer to the consumer.
#[derive(Debug, Clone)]
struct CompressedDescriptor {
    image: Image,
    compressed_path: PathBuf,
    thumbnail_path: PathBuf,
    width: i64,
    height: i64,
    file_size: i64,
    hash: String,
}

fn webp_sibling_path(folder: &Path, original_filename: &str) -> PathBuf {
    let stem = Path::new(original_filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(original_filename);
    folder.join(format!("{stem}.webp"))
}

/// Drives compression + upload for one album at a time across the whole process. Enforces the
/// single-active-pipeline invariant with a FIFO queue of the remaining albums; everything else —
/// batching, backpressure, pause/resume, retry — lives in `run_album`.
pub struct Pipeline {
    catalog: Arc<Catalog>,
    pool: Arc<WorkerPool>,
    remote: Arc<remote::Client>,
    events: EventSink,
    compression_options: Arc<CompressionOptions>,
    upload_pool: rayon::ThreadPool,
    paused: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
    global: Mutex<GlobalState>,
}

impl Pipeline {
    pub fn new(
        catalog: Arc<Catalog>,
        pool: Arc<WorkerPool>,
        remote: Arc<remote::Client>,
        events: EventSink,
        compression_options: Arc<CompressionOptions>,
    ) -> Self {
        let upload_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(UPLOAD_CONCURRENCY)
            .thread_name(|i| format!("pipeline-upload-{i}"))
            .build()
            .expect("failed to build upload thread pool");
        Self {
            catalog,
            pool,
            remote,
            events,
            compression_options,
            upload_pool,
            paused: Arc::new(AtomicBool::new(false)),
            abort: Arc::new(AtomicBool::new(false)),
            global: Mutex::new(GlobalState {
                active_album: None,
                queued_albums: VecDeque::new(),
            }),
        }
    }

    /// The Network Monitor drives these. Pause blocks producer and consumer at their next
    /// checkpoint; resume wakes them. No in-flight upload is cancelled.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        if let Some(album_id) = self.global.lock().expect("pipeline global state poisoned").active_album.clone() {
            self.events.emit(Event::UploadPaused { album_id });
        }
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        if let Some(album_id) = self.global.lock().expect("pipeline global state poisoned").active_album.clone() {
            self.events.emit(Event::UploadResumed { album_id });
        }
    }

    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    /// Request a run for `album_id`. Returns `true` if it became the active run immediately,
    /// `false` if it was enqueued behind the currently active album.
    pub fn request_run(&self, album_id: String) -> bool {
        let mut global = self.global.lock().expect("pipeline global state poisoned");
        if global.active_album.is_none() {
            global.active_album = Some(album_id);
            true
        } else {
            global.queued_albums.push_back(album_id);
            false
        }
    }

    /// Pop the next queued album (if any) as the new active run. Called after `run_album`
    /// finishes so the FIFO queue drains one at a time.
    fn advance_queue(&self) -> Option<String> {
        let mut global = self.global.lock().expect("pipeline global state poisoned");
        global.active_album = global.queued_albums.pop_front();
        global.active_album.clone()
    }

    pub fn active_album(&self) -> Option<String> {
        self.global.lock().expect("pipeline global state poisoned").active_album.clone()
    }

    /// State of the run currently occupying (or queued behind) `album_id`, for the UI layer.
    pub fn run_state(&self, album_id: &str) -> RunState {
        let global = self.global.lock().expect("pipeline global state poisoned");
        if global.active_album.as_deref() != Some(album_id) {
            return RunState::Idle;
        }
        drop(global);
        if self.abort.load(Ordering::SeqCst) {
            RunState::Aborted
        } else if self.paused.load(Ordering::SeqCst) {
            RunState::Paused
        } else {
            RunState::Running
        }
    }

    fn publish_progress(&self, album_id: &str) -> Result<()> {
        let stats = self.catalog.with_conn(|conn| catalog::get_image_stats(conn, album_id))?;
        self.events.emit(Event::UploadProgress(Progress::from_stats(album_id, &stats)));
        Ok(())
    }

    /// Run one album end-to-end: producer (compression) feeds a bounded queue that the consumer
    /// (upload) drains in batches, then a single end-of-run retry pass for anything still
    /// `failed_upload`. Blocking — the caller runs this on its own thread.
    pub fn run_album(&self, album: &Album) -> Result<()> {
        tracing::info!(album_id = %album.id, "pipeline run starting");
        let local_folder = PathBuf::from(&album.local_folder_path);
        let thumbnail_folder = local_folder.join(".thumbnail");
        std::fs::create_dir_all(&thumbnail_folder)?;

        let pending = self.catalog.with_conn(|conn| {
            let mut images = catalog::get_images_by_status(conn, &album.id, UploadStatus::Pending)?;
            images.extend(catalog::get_images_by_status(conn, &album.id, UploadStatus::FailedCompression)?);
            images.extend(catalog::get_images_by_status(conn, &album.id, UploadStatus::FailedUpload)?);
            Ok(images)
        })?;

        let (queue_tx, queue_rx) = bounded::<CompressedDescriptor>(QUEUE_CAPACITY);

        let producer_handle = {
            let this_catalog = self.catalog.clone();
            let this_pool = self.pool.clone();
            let this_options = self.compression_options.clone();
            let this_paused = self.paused.clone();
            let this_abort = self.abort.clone();
            let album = album.clone();
            let local_folder = local_folder.clone();
            let thumbnail_folder = thumbnail_folder.clone();
            let events = self.events.clone();
            thread::Builder::new()
                .name(format!("pipeline-producer-{}", album.id))
                .spawn(move || {
                    run_producer(
                        &this_catalog,
                        &this_pool,
                        &this_options,
                        &this_paused,
                        &this_abort,
                        &album,
                        &local_folder,
                        &thumbnail_folder,
                        pending,
                        queue_tx,
                        &events,
                    )
                })
                .expect("failed to spawn pipeline producer thread")
        };

        run_consumer(
            &self.catalog,
            &self.remote,
            &self.upload_pool,
            &self.paused,
            &self.abort,
            album,
            queue_rx,
            &self.events,
        )?;
        let _ = producer_handle.join();

        self.publish_progress(&album.id)?;

        if !self.abort.load(Ordering::SeqCst) {
            retry_failed_uploads(
                &self.catalog,
                &self.remote,
                &self.upload_pool,
                &self.paused,
                &self.abort,
                album,
                &self.events,
            )?;
            self.publish_progress(&album.id)?;

            let total_images = self
                .catalog
                .with_conn(|conn| catalog::list_images_for_album(conn, &album.id))?
                .len() as i64;
            let now = Utc::now();
            self.catalog
                .with_conn(|conn| catalog::mark_album_synced(conn, &album.id, total_images, now))?;

            if let Some(mut existing_sidecar) = sidecar::read_sidecar(Path::new(&album.source_folder_path)) {
                existing_sidecar.last_synced_at = Some(now);
                let _ = sidecar::write_sidecar(Path::new(&album.source_folder_path), &existing_sidecar);
            } else {
                let mut fresh = Sidecar::new(album.id.clone());
                fresh.last_synced_at = Some(now);
                let _ = sidecar::write_sidecar(Path::new(&album.source_folder_path), &fresh);
            }
        }

        self.events.emit(Event::UploadComplete { album_id: album.id.clone() });
        tracing::info!(album_id = %album.id, "pipeline run complete");

        self.advance_queue();
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn run_producer(
    catalog: &Catalog,
    pool: &WorkerPool,
    options: &Arc<CompressionOptions>,
    paused: &AtomicBool,
    abort: &AtomicBool,
    album: &Album,
    local_folder: &Path,
    thumbnail_folder: &Path,
    pending: Vec<Image>,
    queue_tx: Sender<CompressedDescriptor>,
    events: &EventSink,
) {
    for image in pending {
        if abort.load(Ordering::SeqCst) {
            break;
        }
        while paused.load(Ordering::SeqCst) {
            if abort.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(PAUSE_POLL_INTERVAL);
        }

        let source_path = Path::new(&album.source_folder_path).join(&image.original_filename);
        let compressed_output_path = webp_sibling_path(local_folder, &image.original_filename);
        let thumbnail_output_path = webp_sibling_path(thumbnail_folder, &image.original_filename);

        let _ = catalog.with_conn(|conn| catalog::update_image_status(conn, image.id, UploadStatus::Compressing));

        let request = CompressionRequest {
            source_path,
            compressed_output_path,
            thumbnail_output_path,
            known_source_hash: image.source_file_hash.clone(),
        };

        let future = pool.submit(request, options.clone());
        let outcome = future.wait(COMPRESSION_TIMEOUT);

        match outcome {
            Ok(result) => {
                let _ = catalog.with_conn(|conn| {
                    catalog::record_compression_result(
                        conn,
                        image.id,
                        &result.compressed_path.to_string_lossy(),
                        result.file_size as i64,
                        result.width as i64,
                        result.height as i64,
                        &result.hash,
                    )
                });
                let descriptor = CompressedDescriptor {
                    image: image.clone(),
                    compressed_path: result.compressed_path,
                    thumbnail_path: result.thumbnail_path,
                    width: result.width as i64,
                    height: result.height as i64,
                    file_size: result.file_size as i64,
                    hash: result.hash,
                };
                // A full queue blocks here, applying backpressure to this loop.
                if queue_tx.send(descriptor).is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(image_id = image.id, ?err, "compression failed");
                let _ = catalog.with_conn(|conn| {
                    catalog::update_image_status(conn, image.id, UploadStatus::FailedCompression)
                });
                events.emit(Event::UploadError {
                    album_id: album.id.clone(),
                    message: err.to_string(),
                });
            }
        }
    }
    drop(queue_tx);
}

fn drain_batch(queue_rx: &Receiver<CompressedDescriptor>, max: usize) -> Vec<CompressedDescriptor> {
    let mut batch = Vec::with_capacity(max);
    // Block for the first item so the consumer doesn't busy-spin while the producer is slow.
    match queue_rx.recv() {
        Ok(first) => batch.push(first),
        Err(_) => return batch,
    }
    while batch.len() < max {
        match queue_rx.try_recv() {
            Ok(descriptor) => batch.push(descriptor),
            Err(_) => break,
        }
    }
    batch
}

#[allow(clippy::too_many_arguments)]
fn run_consumer(
    catalog: &Catalog,
    remote: &remote::Client,
    upload_pool: &rayon::ThreadPool,
    paused: &AtomicBool,
    abort: &AtomicBool,
    album: &Album,
    queue_rx: Receiver<CompressedDescriptor>,
    events: &EventSink,
) -> Result<()> {
    loop {
        if abort.load(Ordering::SeqCst) {
            return Ok(());
        }
        while paused.load(Ordering::SeqCst) {
            if abort.load(Ordering::SeqCst) {
                return Ok(());
            }
            thread::sleep(PAUSE_POLL_INTERVAL);
        }

        let batch = drain_batch(&queue_rx, UPLOAD_BATCH_SIZE);
        if batch.is_empty() {
            return Ok(());
        }

        events.emit(Event::UploadBatchStart {
            album_id: album.id.clone(),
            batch_size: batch.len(),
        });
        upload_batch(catalog, remote, upload_pool, album, batch, events)?;
    }
}

/// One upload URL request, one confirm/update request; the uploads of individual objects in
/// between run on a dedicated rayon pool sized to the upload concurrency cap.
fn upload_batch(
    catalog: &Catalog,
    remote: &remote::Client,
    upload_pool: &rayon::ThreadPool,
    album: &Album,
    batch: Vec<CompressedDescriptor>,
    events: &EventSink,
) -> Result<()> {
    let filenames: Vec<String> = batch.iter().map(|d| d.image.original_filename.clone()).collect();
    let upload_urls = match remote.request_upload_urls(&album.id, &filenames) {
        Ok(urls) => urls,
        Err(err) => {
            fail_batch(catalog, &batch, &err, events, &album.id);
            return Ok(());
        }
    };
    let urls_by_filename: std::collections::HashMap<&str, _> =
        upload_urls.iter().map(|u| (u.filename.as_str(), u)).collect();

    let results: Vec<(CompressedDescriptor, Result<(String, Option<String>)>)> = upload_pool.install(|| {
        batch
            .into_par_iter()
            .map(|descriptor| {
                let outcome = (|| -> Result<(String, Option<String>)> {
                    let entry = urls_by_filename.get(descriptor.image.original_filename.as_str()).ok_or_else(|| {
                        Error::RemoteApi(format!("no upload url returned for {}", descriptor.image.original_filename))
                    })?;
                    let bytes = std::fs::read(&descriptor.compressed_path)?;
                    remote.put_object(&entry.upload_url, &bytes)?;
                    if let Some(thumb_url) = &entry.thumbnail_upload_url {
                        let thumb_bytes = std::fs::read(&descriptor.thumbnail_path)?;
                        remote.put_object(thumb_url, &thumb_bytes)?;
                    }
                    Ok((entry.key.clone(), entry.thumbnail_key.clone()))
                })();
                (descriptor, outcome)
            })
            .collect()
    });

    let mut uploaded = Vec::new();
    let mut failed = Vec::new();
    for (descriptor, outcome) in results {
        match outcome {
            Ok((key, thumbnail_key)) => uploaded.push((descriptor, key, thumbnail_key)),
            Err(err) => failed.push((descriptor, err)),
        }
    }

    for (descriptor, err) in &failed {
        tracing::warn!(image_id = descriptor.image.id, ?err, "upload failed");
        let _ = catalog.with_conn(|conn| catalog::update_image_status(conn, descriptor.image.id, UploadStatus::FailedUpload));
        events.emit(Event::UploadError {
            album_id: album.id.clone(),
            message: err.to_string(),
        });
    }

    if uploaded.is_empty() {
        return Ok(());
    }

    let (new_images, existing_images): (Vec<_>, Vec<_>) =
        uploaded.into_iter().partition(|(descriptor, _, _)| descriptor.image.server_id.is_none());

    if !new_images.is_empty() {
        let confirm_images: Vec<ConfirmUploadImage> = new_images
            .iter()
            .map(|(descriptor, key, thumbnail_key)| ConfirmUploadImage {
                filename: descriptor.image.original_filename.clone(),
                key: key.clone(),
                thumbnail_key: thumbnail_key.clone(),
                source_image_hash: descriptor.hash.clone(),
                file_size: descriptor.file_size,
                width: descriptor.width,
                height: descriptor.height,
                upload_order: descriptor.image.upload_order,
            })
            .collect();
        match remote.confirm_upload(&album.id, confirm_images) {
            Ok(confirmed) => {
                let confirmed_by_filename: std::collections::HashMap<&str, i64> =
                    confirmed.iter().map(|c| (c.original_filename.as_str(), c.id)).collect();
                let requested_filenames: std::collections::HashSet<&str> =
                    new_images.iter().map(|(descriptor, _, _)| descriptor.image.original_filename.as_str()).collect();
                for confirmed_image in &confirmed {
                    if !requested_filenames.contains(confirmed_image.original_filename.as_str()) {
                        let mismatch = Error::ConfirmMismatch(confirmed_image.original_filename.clone());
                        tracing::warn!(album_id = %album.id, %mismatch, "ignoring confirmation, image stays uploading candidate");
                    }
                }
                for (descriptor, _, _) in &new_images {
                    match confirmed_by_filename.get(descriptor.image.original_filename.as_str()) {
                        Some(server_id) => {
                            let _ = catalog.with_conn(|conn| catalog::set_image_server_id(conn, descriptor.image.id, *server_id));
                        }
                        None => {
                            tracing::warn!(
                                image_id = descriptor.image.id,
                                "server did not confirm an image we uploaded"
                            );
                            let _ = catalog.with_conn(|conn| {
                                catalog::update_image_status(conn, descriptor.image.id, UploadStatus::FailedUpload)
                            });
                        }
                    }
                }
            }
            Err(err) => fail_descriptors(catalog, &new_images.iter().map(|(d, _, _)| d.clone()).collect::<Vec<_>>(), &err, events, &album.id),
        }
    }

    if !existing_images.is_empty() {
        let updates: Vec<UpdateImageEntry> = existing_images
            .iter()
            .map(|(descriptor, key, _)| UpdateImageEntry {
                image_id: descriptor.image.server_id.expect("partitioned on server_id presence"),
                source_image_hash: descriptor.hash.clone(),
                key: key.clone(),
                file_size: descriptor.file_size,
                width: descriptor.width,
                height: descriptor.height,
            })
            .collect();
        match remote.update_images(&album.id, updates) {
            Ok(()) => {
                for (descriptor, _, _) in &existing_images {
                    let _ = catalog.with_conn(|conn| catalog::update_image_status(conn, descriptor.image.id, UploadStatus::Complete));
                }
            }
            Err(err) => fail_descriptors(catalog, &existing_images.iter().map(|(d, _, _)| d.clone()).collect::<Vec<_>>(), &err, events, &album.id),
        }
    }

    Ok(())
}

fn fail_batch(catalog: &Catalog, batch: &[CompressedDescriptor], err: &Error, events: &EventSink, album_id: &str) {
    fail_descriptors(catalog, batch, err, events, album_id);
}

fn fail_descriptors(catalog: &Catalog, descriptors: &[CompressedDescriptor], err: &Error, events: &EventSink, album_id: &str) {
    tracing::warn!(?err, "batch-level upload step failed");
    for descriptor in descriptors {
        let _ = catalog.with_conn(|conn| catalog::update_image_status(conn, descriptor.image.id, UploadStatus::FailedUpload));
    }
    events.emit(Event::UploadError {
        album_id: album_id.to_string(),
        message: err.to_string(),
    });
}

/// Single end-of-run retry pass — not a loop. Rebuilds descriptors from the Catalog for anything
/// still `failed_upload` whose compressed file still exists and whose hash still matches, then
/// runs one more upload pass with freshly-issued presigned URLs.
#[allow(clippy::too_many_arguments)]
fn retry_failed_uploads(
    catalog: &Catalog,
    remote: &remote::Client,
    upload_pool: &rayon::ThreadPool,
    paused: &AtomicBool,
    abort: &AtomicBool,
    album: &Album,
    events: &EventSink,
) -> Result<()> {
    let failed = catalog.with_conn(|conn| catalog::get_images_by_status(conn, &album.id, UploadStatus::FailedUpload))?;
    if failed.is_empty() || abort.load(Ordering::SeqCst) {
        return Ok(());
    }
    while paused.load(Ordering::SeqCst) {
        if abort.load(Ordering::SeqCst) {
            return Ok(());
        }
        thread::sleep(PAUSE_POLL_INTERVAL);
    }

    tracing::info!(album_id = %album.id, count = failed.len(), "retrying failed uploads");
    let mut descriptors = Vec::new();
    for image in failed {
        let compressed_path = PathBuf::from(&image.local_file_path);
        if !compressed_path.exists() {
            continue;
        }
        let Some(known_hash) = &image.source_file_hash else {
            continue;
        };
        let current_hash = match crate::hashing::hash_file(Path::new(&album.source_folder_path).join(&image.original_filename).as_path()) {
            Ok(hash) => hash,
            Err(_) => continue,
        };
        if &current_hash != known_hash {
            continue;
        }
        let thumbnail_path = webp_sibling_path(&PathBuf::from(&album.local_folder_path).join(".thumbnail"), &image.original_filename);
        descriptors.push(CompressedDescriptor {
            width: image.width.unwrap_or(0),
            height: image.height.unwrap_or(0),
            file_size: image.file_size,
            hash: known_hash.clone(),
            image,
            compressed_path,
            thumbnail_path,
        });
    }

    if descriptors.is_empty() {
        return Ok(());
    }

    upload_batch(catalog, remote, upload_pool, album, descriptors, events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webp_sibling_path_replaces_extension() {
        let path = webp_sibling_path(Path::new("/local/wedding"), "a.jpg");
        assert_eq!(path, PathBuf::from("/local/wedding/a.webp"));
    }

    #[test]
    fn test_request_run_first_caller_runs_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Arc::new(Catalog::open(&tmp.path().join("c.db")).unwrap());
        let pool = Arc::new(WorkerPool::new(1));
        let client = Arc::new(remote::Client::new("https://example.invalid", Arc::new(|| None)));
        let (sink, _rx) = crate::events::EventSink::new();
        let pipeline = Pipeline::new(catalog, pool.clone(), client, sink, Arc::new(CompressionOptions::default()));

        assert!(pipeline.request_run("a1".into()));
        assert!(!pipeline.request_run("a2".into()));
        assert_eq!(pipeline.active_album(), Some("a1".into()));
        pool.shutdown();
    }

    #[test]
    fn test_advance_queue_pops_next_album() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Arc::new(Catalog::open(&tmp.path().join("c.db")).unwrap());
        let pool = Arc::new(WorkerPool::new(1));
        let client = Arc::new(remote::Client::new("https://example.invalid", Arc::new(|| None)));
        let (sink, _rx) = crate::events::EventSink::new();
        let pipeline = Pipeline::new(catalog, pool.clone(), client, sink, Arc::new(CompressionOptions::default()));

        pipeline.request_run("a1".into());
        pipeline.request_run("a2".into());
        let next = pipeline.advance_queue();
        assert_eq!(next, Some("a2".into()));
        pool.shutdown();
    }
}
