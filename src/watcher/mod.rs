mod copy_detector;
mod debounce;

pub use copy_detector::CopyInProgressDetector;
pub use debounce::Debouncer;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{Error, Result};

pub const ALBUM_DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub enum MasterFolderEvent {
    DirAdded(PathBuf),
    DirRemoved(PathBuf),
}

/// Watches the master folder (depth=0, directory add/remove only). Construction starts the
/// underlying OS watch immediately; dropping this struct tears it down, matching a
/// scoped-acquisition discipline.
pub struct MasterFolderWatcher {
    _inner: RecommendedWatcher,
}

impl MasterFolderWatcher {
    pub fn new(
        master_folder: &Path,
        on_event: impl Fn(MasterFolderEvent) + Send + 'static,
    ) -> Result<Self> {
        let master_folder_owned = master_folder.to_path_buf();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<NotifyEvent>| {
                let Ok(event) = result else { return };
                dispatch_master_event(&master_folder_owned, event, &on_event);
            },
            Config::default(),
        )
        .map_err(|err| Error::ScanError(format!("watch {}: {err}", master_folder.display())))?;
        watcher
            .watch(master_folder, RecursiveMode::NonRecursive)
            .map_err(|err| Error::ScanError(format!("watch {}: {err}", master_folder.display())))?;
        Ok(Self { _inner: watcher })
    }
}

fn dispatch_master_event(
    master_folder: &Path,
    event: NotifyEvent,
    on_event: &impl Fn(MasterFolderEvent),
) {
    for path in event.paths {
        // Only care about direct children of the master folder, and only directories.
        if path.parent() != Some(master_folder) {
            continue;
        }
        match event.kind {
            EventKind::Create(_) if path.is_dir() => on_event(MasterFolderEvent::DirAdded(path)),
            EventKind::Remove(_) => on_event(MasterFolderEvent::DirRemoved(path)),
            _ => {}
        }
    }
}

/// Watches one album's source folder (depth=0, file add/change/unlink). Every event simply
/// touches the shared debouncer under this album's id; the actual reconciliation runs once the
/// debounce window elapses, from wherever the debouncer's callback was wired (the application
/// struct, so no long-lived back-reference between watcher and app needs to exist).
pub struct AlbumWatcher {
    _inner: RecommendedWatcher,
}

impl AlbumWatcher {
    pub fn new(album_folder: &Path, album_id: String, debouncer: Arc<Debouncer>) -> Result<Self> {
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<NotifyEvent>| {
                if result.is_ok() {
                    debouncer.touch(album_id.clone());
                }
            },
            Config::default(),
        )
        .map_err(|err| Error::ScanError(format!("watch {}: {err}", album_folder.display())))?;
        watcher
            .watch(album_folder, RecursiveMode::NonRecursive)
            .map_err(|err| Error::ScanError(format!("watch {}: {err}", album_folder.display())))?;
        Ok(Self { _inner: watcher })
    }
}

/// Owns every live per-album watcher plus the shared debouncer and copy-in-progress registry,
/// so the application struct can add/remove albums without juggling threads directly.
pub struct WatcherRegistry {
    album_watchers: std::sync::Mutex<std::collections::HashMap<String, AlbumWatcher>>,
    debouncer: Arc<Debouncer>,
    pub copy_detector: Arc<CopyInProgressDetector>,
}

impl WatcherRegistry {
    pub fn new(on_debounce_fire: impl Fn(&str) + Send + 'static) -> Self {
        Self {
            album_watchers: std::sync::Mutex::new(std::collections::HashMap::new()),
            debouncer: Arc::new(Debouncer::new(ALBUM_DEBOUNCE_WINDOW, on_debounce_fire)),
            copy_detector: Arc::new(CopyInProgressDetector::new()),
        }
    }

    pub fn watch_album(&self, album_id: String, folder: &Path) -> Result<()> {
        let watcher = AlbumWatcher::new(folder, album_id.clone(), self.debouncer.clone())?;
        self.album_watchers
            .lock()
            .expect("watcher registry poisoned")
            .insert(album_id, watcher);
        Ok(())
    }

    pub fn unwatch_album(&self, album_id: &str) {
        self.album_watchers.lock().expect("watcher registry poisoned").remove(album_id);
    }

    pub fn is_watching(&self, album_id: &str) -> bool {
        self.album_watchers.lock().expect("watcher registry poisoned").contains_key(album_id)
    }
}
