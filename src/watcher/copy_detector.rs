use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::fsutil::{self, ScannedFile};

const HARD_TIMEOUT: Duration = Duration::from_secs(120);
const SILENCE_WINDOW: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy)]
struct FileStamp {
    size: u64,
    mtime_secs: Option<i64>,
}

impl FileStamp {
    fn from_scanned(file: &ScannedFile) -> Self {
        Self {
            size: file.size,
            mtime_secs: file.mtime.map(|t| t.timestamp()),
        }
    }
}

/// A temporary watcher spawned when a freshly-created folder first appears. It
/// polls once a second, tracks each file's (size, mtime) across polls, and only considers a
/// file "stable" once two consecutive polls agree. It self-disposes on a 5 s silence window
/// (no new files observed) or a 2-minute hard timeout, whichever comes first.
pub struct CopyInProgressDetector {
    active: Mutex<HashSet<String>>,
}

impl CopyInProgressDetector {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Returns `false` without starting anything if an album already has a detector running —
    /// the `active` registry exists precisely to prevent duplicates.
    pub fn start(
        self: &Arc<Self>,
        album_id: String,
        folder: PathBuf,
        on_complete: impl FnOnce(Vec<ScannedFile>) + Send + 'static,
    ) -> bool {
        {
            let mut active = self.active.lock().expect("copy detector registry poisoned");
            if !active.insert(album_id.clone()) {
                return false;
            }
        }

        let this = self.clone();
        thread::Builder::new()
            .name(format!("copy-detector-{album_id}"))
            .spawn(move || {
                let stable_files = poll_until_stable(&folder);
                on_complete(stable_files);
                this.active.lock().expect("copy detector registry poisoned").remove(&album_id);
            })
            .expect("failed to spawn copy-in-progress detector thread");
        true
    }

    pub fn is_active(&self, album_id: &str) -> bool {
        self.active.lock().expect("copy detector registry poisoned").contains(album_id)
    }
}

fn poll_until_stable(folder: &PathBuf) -> Vec<ScannedFile> {
    let started_at = Instant::now();
    let mut last_change_at = Instant::now();
    let mut previous_stamps: HashMap<String, FileStamp> = HashMap::new();
    let mut stable: HashMap<String, ScannedFile> = HashMap::new();

    loop {
        let scanned = fsutil::scan_folder_now(folder).unwrap_or_default();
        let current_names: HashSet<&str> = scanned.iter().map(|f| f.basename.as_str()).collect();

        let mut changed_this_round = false;
        for file in &scanned {
            let stamp = FileStamp::from_scanned(file);
            match previous_stamps.get(&file.basename) {
                Some(previous) if previous.size == stamp.size && previous.mtime_secs == stamp.mtime_secs => {
                    stable.insert(file.basename.clone(), file.clone());
                }
                _ => {
                    changed_this_round = true;
                    stable.remove(&file.basename);
                }
            }
            previous_stamps.insert(file.basename.clone(), stamp);
        }

        previous_stamps.retain(|name, _| current_names.contains(name.as_str()));
        stable.retain(|name, _| current_names.contains(name.as_str()));

        if changed_this_round {
            last_change_at = Instant::now();
        }

        if last_change_at.elapsed() >= SILENCE_WINDOW || started_at.elapsed() >= HARD_TIMEOUT {
            break;
        }

        thread::sleep(POLL_INTERVAL);
    }

    stable.into_values().collect()
}
