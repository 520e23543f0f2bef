use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;

use crate::auth;
use crate::catalog::{self, Album, Catalog};
use crate::compression::{CompressionOptions, WorkerPool};
use crate::error::{Error, Result};
use crate::events::{Event, EventSink};
use crate::fsutil::{self, ScanCache};
use crate::network::NetworkMonitor;
use crate::pipeline::Pipeline;
use crate::reconciler::{self, ProfileSource};
use crate::remote;
use crate::sidecar::{self, Sidecar};
use crate::watcher::{MasterFolderEvent, MasterFolderWatcher, WatcherRegistry};

/// Directories and files the catalog DB doesn't own directly, all rooted under `home`
///: the auth fallback file lives next to the catalog DB.
fn auth_fallback_path(home: &Path) -> PathBuf {
    home.join("auth.json")
}

fn default_worker_count() -> usize {
    4
}

/// The single top-level owning struct: every process-wide service —
/// Catalog, Worker Pool, Pipeline, Watcher registry, Network Monitor, Remote Adapter — is a
/// value this struct owns and hands out by reference, rather than a hidden global. Watchers and
/// the Network Monitor hold only a `Weak<App>` in their callbacks, so there is no long-lived
/// back-reference cycle.
pub struct App {
    pub home: PathBuf,
    pub artifact_root: PathBuf,
    pub catalog: Arc<Catalog>,
    pub scan_cache: Arc<ScanCache>,
    pub pool: Arc<WorkerPool>,
    pub remote: Arc<remote::Client>,
    pub pipeline: Arc<Pipeline>,
    pub events: EventSink,
    pub watchers: Arc<WatcherRegistry>,
    network: Mutex<Option<NetworkMonitor>>,
    master_watcher: Mutex<Option<MasterFolderWatcher>>,
}

impl App {
    /// Open (or create) every durable resource under `home`, build the in-process services, and
    /// wire the Watcher's debounce/master-folder callbacks back to `App` methods through a weak
    /// reference. Returns the event receiver the UI layer drains.
    pub fn new(
        home: PathBuf,
        artifact_root: PathBuf,
        remote_base_url: String,
    ) -> Result<(Arc<Self>, crossbeam_channel::Receiver<Event>)> {
        std::fs::create_dir_all(&home)?;
        std::fs::create_dir_all(&artifact_root)?;

        let catalog = Arc::new(Catalog::open(&home.join("catalog.db"))?);
        let scan_cache = Arc::new(ScanCache::new());
        let pool = Arc::new(WorkerPool::new(default_worker_count()));

        let home_for_token = home.clone();
        let token_provider: Arc<dyn Fn() -> Option<String> + Send + Sync> = Arc::new(move || {
            auth::load(&auth_fallback_path(&home_for_token)).map(|state| state.token)
        });
        let remote = Arc::new(remote::Client::new(remote_base_url, token_provider));

        let (events, event_rx) = EventSink::new();
        let compression_options = Arc::new(CompressionOptions::default());
        let pipeline = Arc::new(Pipeline::new(
            catalog.clone(),
            pool.clone(),
            remote.clone(),
            events.clone(),
            compression_options,
        ));

        let app = Arc::new_cyclic(|weak: &Weak<App>| {
            let debounce_weak = weak.clone();
            let watchers = WatcherRegistry::new(move |album_id: &str| {
                if let Some(app) = debounce_weak.upgrade() {
                    app.handle_debounce_fire(album_id);
                }
            });
            Self {
                home,
                artifact_root,
                catalog,
                scan_cache,
                pool,
                remote,
                pipeline,
                events,
                watchers: Arc::new(watchers),
                network: Mutex::new(None),
                master_watcher: Mutex::new(None),
            }
        });

        Ok((app, event_rx))
    }

    fn album_local_folder(&self, album_id: &str) -> PathBuf {
        self.artifact_root.join(album_id)
    }

    /// Re-attach watchers and Network Monitor for every Album already in the Catalog, and kick
    /// off a pipeline run for any that still have non-terminal images so the process resumes
    /// where it left off after a restart.
    pub fn resume_on_startup(self: &Arc<Self>) -> Result<()> {
        let albums = self.catalog.with_conn(|conn| catalog::list_albums(conn))?;
        for album in albums {
            let source_folder = Path::new(&album.source_folder_path);
            if !source_folder.exists() {
                if !album.is_orphaned {
                    self.catalog.with_conn(|conn| catalog::set_album_orphaned(conn, &album.id, true))?;
                }
                continue;
            }
            if album.is_orphaned {
                self.catalog.with_conn(|conn| catalog::set_album_orphaned(conn, &album.id, false))?;
            }
            self.watchers.watch_album(album.id.clone(), source_folder)?;

            let stats = self.catalog.with_conn(|conn| catalog::get_image_stats(conn, &album.id))?;
            if stats.pending > 0 || stats.compressing > 0 || stats.uploading > 0 || stats.failed_compression > 0 || stats.failed_upload > 0 {
                self.queue_pipeline_run(album);
            }
        }
        Ok(())
    }

    /// Start the single master-folder observer. Only one may run at a time; a
    /// second call replaces the first (the prior watcher is torn down on drop).
    pub fn start_master_watch(self: &Arc<Self>, master_folder: PathBuf) -> Result<()> {
        let weak = Arc::downgrade(self);
        let watcher = MasterFolderWatcher::new(&master_folder, move |event| {
            if let Some(app) = weak.upgrade() {
                app.handle_master_folder_event(event);
            }
        })?;
        *self.master_watcher.lock().expect("master watcher mutex poisoned") = Some(watcher);
        Ok(())
    }

    pub fn start_network_monitor(self: &Arc<Self>, health_url: String) {
        let monitor = NetworkMonitor::start(health_url, self.pipeline.clone(), self.events.clone());
        *self.network.lock().expect("network monitor mutex poisoned") = Some(monitor);
    }

    pub fn is_online(&self) -> bool {
        self.network
            .lock()
            .expect("network monitor mutex poisoned")
            .as_ref()
            .map(|monitor| monitor.is_online())
            .unwrap_or(true)
    }

    // ------------------------------------------------------------------------------------------
    // Master-folder events
    // ------------------------------------------------------------------------------------------

    fn handle_master_folder_event(self: &Arc<Self>, event: MasterFolderEvent) {
        match event {
            MasterFolderEvent::DirAdded(path) => {
                if let Err(err) = self.handle_dir_added(&path) {
                    tracing::warn!(?err, path = %path.display(), "failed to handle new master-folder directory");
                }
            }
            MasterFolderEvent::DirRemoved(path) => {
                if let Err(err) = self.handle_dir_removed(&path) {
                    tracing::warn!(?err, path = %path.display(), "failed to handle removed master-folder directory");
                }
            }
        }
    }

    fn handle_dir_added(self: &Arc<Self>, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy().to_string();
        if self.catalog.with_conn(|conn| catalog::album_by_source_folder(conn, &path_str))?.is_some() {
            return Ok(());
        }

        if let Some(sidecar) = sidecar::read_sidecar(path) {
            if let Some(existing) = self.catalog.with_conn(|conn| catalog::get_album(conn, &sidecar.album_id))? {
                let existing_folder_missing = !Path::new(&existing.source_folder_path).exists();
                if existing_folder_missing || existing.source_folder_path != path_str {
                    self.catalog
                        .with_conn(|conn| catalog::rebind_album_folder(conn, &existing.id, &path_str))?;
                    self.watchers.unwatch_album(&existing.id);
                    self.watchers.watch_album(existing.id.clone(), path)?;
                    self.events.emit(Event::AlbumsRefresh);
                    tracing::info!(album_id = %existing.id, new_path = %path_str, "album rebound to moved folder");
                    return Ok(());
                }
            }
        }

        self.auto_create_album(path)
    }

    fn auto_create_album(self: &Arc<Self>, path: &Path) -> Result<()> {
        let title = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("Untitled")
            .to_string();
        let created = self.remote.create_album(&title, None)?;
        let album = self.insert_new_album(created.id, title, path.to_path_buf())?;

        self.watchers.watch_album(album.id.clone(), path)?;
        let copy_weak = Arc::downgrade(self);
        let album_id_for_detector = album.id.clone();
        self.watchers.copy_detector.start(album.id.clone(), path.to_path_buf(), move |_stable_files| {
            if let Some(app) = copy_weak.upgrade() {
                app.handle_debounce_fire(&album_id_for_detector);
            }
        });
        self.events.emit(Event::AlbumsRefresh);
        Ok(())
    }

    fn handle_dir_removed(&self, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy().to_string();
        if let Some(album) = self.catalog.with_conn(|conn| catalog::album_by_source_folder(conn, &path_str))? {
            self.catalog.with_conn(|conn| catalog::set_album_orphaned(conn, &album.id, true))?;
            self.watchers.unwatch_album(&album.id);
            self.events.emit(Event::AlbumStatusChanged {
                album_id: album.id,
                needs_sync: false,
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------------------------------
    // Explicit user actions
    // ------------------------------------------------------------------------------------------

    /// Designate a folder as an album (explicit user action). Unlike a debounce-fired
    /// reconcile, this always executes immediately and kicks the pipeline — the user just
    /// asked for this folder to be synced.
    pub fn add_album(self: &Arc<Self>, source_folder: PathBuf, title: String) -> Result<Album> {
        if !source_folder.is_dir() {
            return Err(Error::FilesystemMissing(source_folder));
        }
        let path_str = source_folder.to_string_lossy().to_string();
        if self.catalog.with_conn(|conn| catalog::album_by_source_folder(conn, &path_str))?.is_some() {
            return Err(Error::ConstraintViolation(format!("{path_str} is already a watched album")));
        }

        let created = self.remote.create_album(&title, None)?;
        let album = self.insert_new_album(created.id, title, source_folder.clone())?;
        self.watchers.watch_album(album.id.clone(), &source_folder)?;

        self.review_and_sync(&album.id)?;
        Ok(self.catalog.with_conn(|conn| catalog::get_album(conn, &album.id))?.expect("just inserted"))
    }

    fn insert_new_album(&self, id: String, title: String, source_folder: PathBuf) -> Result<Album> {
        let local_folder = self.album_local_folder(&id);
        std::fs::create_dir_all(&local_folder)?;
        let album = Album {
            id,
            title,
            event_date: None,
            start_time: None,
            end_time: None,
            source_folder_path: source_folder.to_string_lossy().to_string(),
            local_folder_path: local_folder.to_string_lossy().to_string(),
            total_images: 0,
            last_synced_at: None,
            needs_sync: false,
            is_orphaned: false,
            created_at: Utc::now(),
        };
        self.catalog.with_conn(|conn| catalog::create_album(conn, &album))?;
        sidecar::write_sidecar(&source_folder, &Sidecar::new(album.id.clone()))?;
        Ok(album)
    }

    /// Detect, admit against the plan limit, and apply whatever changes are currently sitting in
    /// `album_id`'s source folder, then queue a pipeline run. Called both from `add_album` and
    /// from the UI once the photographer has reviewed a `needsSync` album.
    pub fn review_and_sync(self: &Arc<Self>, album_id: &str) -> Result<()> {
        let album = self
            .catalog
            .with_conn(|conn| catalog::get_album(conn, album_id))?
            .ok_or_else(|| Error::NotFound(format!("album {album_id}")))?;

        let mut changes = reconciler::detect(&self.catalog, &self.scan_cache, &album)?;
        if changes.is_empty() {
            return Ok(());
        }
        reconciler::apply_plan_limit(&mut changes, self.remote.as_ref() as &dyn ProfileSource)?;
        reconciler::execute(&self.catalog, &self.scan_cache, self.remote.as_ref(), &album, &changes)?;
        tracing::info!(album_id, changes = %changes.summary(), "reconciliation applied");
        self.events.emit(Event::AlbumStatusChanged {
            album_id: album_id.to_string(),
            needs_sync: false,
        });
        self.events.emit(Event::AlbumsRefresh);

        let refreshed = self
            .catalog
            .with_conn(|conn| catalog::get_album(conn, album_id))?
            .ok_or_else(|| Error::NotFound(format!("album {album_id}")))?;
        self.queue_pipeline_run(refreshed);
        Ok(())
    }

    /// Debounce-fired reconcile: silent changes (rename/duplicate only) apply right
    /// away; anything touching new/modified/deleted images instead flips `needsSync` and waits
    /// for the photographer to call `review_and_sync`.
    fn handle_debounce_fire(self: &Arc<Self>, album_id: &str) {
        if let Err(err) = self.handle_debounce_fire_inner(album_id) {
            tracing::warn!(album_id, ?err, "debounce-triggered reconcile failed");
        }
    }

    fn handle_debounce_fire_inner(self: &Arc<Self>, album_id: &str) -> Result<()> {
        let Some(album) = self.catalog.with_conn(|conn| catalog::get_album(conn, album_id))? else {
            return Ok(());
        };

        let changes = reconciler::detect(&self.catalog, &self.scan_cache, &album)?;
        if changes.is_empty() {
            return Ok(());
        }

        if changes.is_silent() {
            reconciler::execute(&self.catalog, &self.scan_cache, self.remote.as_ref(), &album, &changes)?;
            self.events.emit(Event::AlbumsRefresh);
        } else {
            self.catalog.with_conn(|conn| catalog::set_album_needs_sync(conn, album_id, true))?;
            self.events.emit(Event::AlbumStatusChanged {
                album_id: album_id.to_string(),
                needs_sync: true,
            });
        }
        Ok(())
    }

    /// Enqueue (or immediately start) a pipeline run for `album`, on a dedicated thread since
    /// `run_album` blocks for the whole producer/consumer lifetime.
    fn queue_pipeline_run(self: &Arc<Self>, album: Album) {
        let became_active = self.pipeline.request_run(album.id.clone());
        if !became_active {
            return;
        }
        let this = self.clone();
        std::thread::Builder::new()
            .name(format!("pipeline-run-{}", album.id))
            .spawn(move || this.drive_pipeline(album))
            .expect("failed to spawn pipeline run thread");
    }

    /// Runs one album to completion, then keeps draining the FIFO queue the Pipeline maintains
    /// until it's empty.
    fn drive_pipeline(self: Arc<Self>, mut album: Album) {
        loop {
            if let Err(err) = self.pipeline.run_album(&album) {
                tracing::warn!(album_id = %album.id, ?err, "pipeline run failed");
                self.events.emit(Event::UploadError {
                    album_id: album.id.clone(),
                    message: err.to_string(),
                });
            }
            let Some(next_album_id) = self.pipeline.active_album() else {
                return;
            };
            match self.catalog.with_conn(|conn| catalog::get_album(conn, &next_album_id)) {
                Ok(Some(next_album)) => album = next_album,
                _ => return,
            }
        }
    }

    /// Re-run the pipeline for `album_id`; a no-op if there is nothing pending or failed
    ///, since the producer loop simply finds no images to act on.
    pub fn retry_failed(self: &Arc<Self>, album_id: &str) -> Result<()> {
        let album = self
            .catalog
            .with_conn(|conn| catalog::get_album(conn, album_id))?
            .ok_or_else(|| Error::NotFound(format!("album {album_id}")))?;
        self.queue_pipeline_run(album);
        Ok(())
    }

    /// Destroy an Album: remote delete first, then the local row (cascades to Images),
    /// then stop watching and drop the sidecar so a re-scan of the folder doesn't resurrect it.
    pub fn delete_album(&self, album_id: &str) -> Result<()> {
        let album = self
            .catalog
            .with_conn(|conn| catalog::get_album(conn, album_id))?
            .ok_or_else(|| Error::NotFound(format!("album {album_id}")))?;
        self.remote.delete_album(album_id)?;
        self.watchers.unwatch_album(album_id);
        self.catalog.with_conn(|conn| catalog::delete_album(conn, album_id))?;
        let _ = std::fs::remove_file(Path::new(&album.source_folder_path).join(sidecar::SIDECAR_FILENAME));
        let _ = std::fs::remove_dir_all(&album.local_folder_path);
        self.events.emit(Event::AlbumsRefresh);
        Ok(())
    }

    pub fn image_progress(&self, album_id: &str) -> Result<crate::events::Progress> {
        let stats = self.catalog.with_conn(|conn| catalog::get_image_stats(conn, album_id))?;
        Ok(crate::events::Progress::from_stats(album_id, &stats))
    }

    pub fn low_storage_warning(&self) -> bool {
        fsutil::available_space(&self.artifact_root)
            .map(fsutil::is_low_storage)
            .unwrap_or(false)
    }

    /// Abort every in-flight pipeline work: in-flight compressions are
    /// allowed to finish but discarded, in-flight uploads are allowed to finish. Watchers and the
    /// Network Monitor are torn down on drop once the last `Arc<App>` goes away.
    pub fn shutdown(&self) {
        self.pipeline.abort();
        *self.master_watcher.lock().expect("master watcher mutex poisoned") = None;
        *self.network.lock().expect("network monitor mutex poisoned") = None;
    }
}
