use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::error::Result;

/// Only these extensions are ever admitted into an album, matched case-insensitively.
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "heic", "heif", "webp"];

/// Advisory-only threshold: the Reconciler surfaces this to the UI, it never blocks on it.
pub const LOW_STORAGE_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024 * 1024;

const SCAN_CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub basename: String,
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

fn has_allowed_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_dotfile(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn read_dimensions(path: &Path) -> Option<(u32, u32)> {
    // Best-effort: a corrupt or unsupported-for-metadata file just yields unknown dimensions,
    // never a scan failure.
    image::image_dimensions(path).ok()
}

fn scan_folder_uncached(dir: &Path) -> Result<Vec<ScannedFile>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !e.path_is_symlink())
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(?err, dir = %dir.display(), "unreadable entry during folder scan");
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        if is_dotfile(path) || !has_allowed_extension(path) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                tracing::warn!(?err, path = %path.display(), "could not stat scanned entry");
                continue;
            }
        };
        let basename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let mtime = metadata.modified().ok().map(DateTime::<Utc>::from);
        let (width, height) = match read_dimensions(path) {
            Some((w, h)) => (Some(w), Some(h)),
            None => (None, None),
        };
        out.push(ScannedFile {
            path: path.to_path_buf(),
            basename,
            size: metadata.len(),
            mtime,
            width,
            height,
        });
    }
    Ok(out)
}

/// Scan without consulting the cache. The copy-in-progress detector polls on its own 1 s
/// cadence and needs every poll to see the true current state.
pub fn scan_folder_now(dir: &Path) -> Result<Vec<ScannedFile>> {
    scan_folder_uncached(dir)
}

/// Per-folder scan cache with a short TTL, so the debounce-by-album-id window and a
/// sidecar quick-dirty check in close succession don't re-walk the same directory
/// twice. Invalidated explicitly by the Reconciler after any mutation.
#[derive(Default)]
pub struct ScanCache {
    entries: Mutex<HashMap<PathBuf, (Instant, Vec<ScannedFile>)>>,
}

impl ScanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan(&self, dir: &Path) -> Result<Vec<ScannedFile>> {
        {
            let entries = self.entries.lock().expect("scan cache mutex poisoned");
            if let Some((stamped_at, files)) = entries.get(dir) {
                if stamped_at.elapsed() < SCAN_CACHE_TTL {
                    return Ok(files.clone());
                }
            }
        }
        let files = scan_folder_uncached(dir)?;
        let mut entries = self.entries.lock().expect("scan cache mutex poisoned");
        entries.insert(dir.to_path_buf(), (Instant::now(), files.clone()));
        Ok(files)
    }

    pub fn invalidate(&self, dir: &Path) {
        self.entries.lock().expect("scan cache mutex poisoned").remove(dir);
    }
}

/// Bytes available to the unprivileged caller on the filesystem containing `path`.
pub fn available_space(path: &Path) -> Result<u64> {
    Ok(fs2::available_space(path)?)
}

pub fn is_low_storage(available_bytes: u64) -> bool {
    available_bytes < LOW_STORAGE_THRESHOLD_BYTES
}
