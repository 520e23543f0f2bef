use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const SIDECAR_FILENAME: &str = ".lumosnap";
const SIDECAR_VERSION: i32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SidecarStats {
    #[serde(rename = "lastFileCount")]
    pub last_file_count: u64,
    #[serde(rename = "lastTotalSize")]
    pub last_total_size: u64,
    #[serde(rename = "totalImages")]
    pub total_images: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sidecar {
    pub version: i32,
    #[serde(rename = "albumId")]
    pub album_id: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "lastSyncedAt")]
    pub last_synced_at: Option<DateTime<Utc>>,
    pub stats: SidecarStats,
}

impl Sidecar {
    pub fn new(album_id: impl Into<String>) -> Self {
        Self {
            version: SIDECAR_VERSION,
            album_id: album_id.into(),
            created_at: Utc::now(),
            last_synced_at: None,
            stats: SidecarStats {
                last_file_count: 0,
                last_total_size: 0,
                total_images: 0,
            },
        }
    }
}

fn sidecar_path(source_folder: &Path) -> PathBuf {
    source_folder.join(SIDECAR_FILENAME)
}

/// Corrupt or unreadable sidecars are treated as absent — fail-soft, never an error the
/// caller has to special-case.
pub fn read_sidecar(source_folder: &Path) -> Option<Sidecar> {
    let path = sidecar_path(source_folder);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(_) => return None,
    };
    match serde_json::from_str(&contents) {
        Ok(sidecar) => Some(sidecar),
        Err(err) => {
            tracing::warn!(?err, path = %path.display(), "sidecar corrupt, treating as absent");
            None
        }
    }
}

/// Write atomically (temp file + rename), the same discipline the teacher's config writer uses,
/// so a crash mid-write never leaves a half-written sidecar behind.
pub fn write_sidecar(source_folder: &Path, sidecar: &Sidecar) -> Result<()> {
    let path = sidecar_path(source_folder);
    let tmp_path = path.with_extension("tmp");
    let json = serde_json::to_string_pretty(sidecar)?;
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// The Reconciler's quick-dirty check: true when the folder's current shape matches
/// what the sidecar last recorded, meaning expensive reconciliation can be skipped entirely.
pub fn matches_current_stats(sidecar: &Sidecar, file_count: u64, total_size: u64) -> bool {
    sidecar.stats.last_file_count == file_count && sidecar.stats.last_total_size == total_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_sidecar_roundtrips() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sidecar = Sidecar::new("a1");
        sidecar.stats.last_file_count = 3;
        sidecar.stats.last_total_size = 1024;
        write_sidecar(tmp.path(), &sidecar).unwrap();
        let read_back = read_sidecar(tmp.path()).unwrap();
        assert_eq!(read_back, sidecar);
    }

    #[test]
    fn test_read_sidecar_missing_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(read_sidecar(tmp.path()).is_none());
    }

    #[test]
    fn test_read_sidecar_corrupt_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(SIDECAR_FILENAME), b"{not json").unwrap();
        assert!(read_sidecar(tmp.path()).is_none());
    }

    #[test]
    fn test_matches_current_stats() {
        let mut sidecar = Sidecar::new("a1");
        sidecar.stats.last_file_count = 3;
        sidecar.stats.last_total_size = 1024;
        assert!(matches_current_stats(&sidecar, 3, 1024));
        assert!(!matches_current_stats(&sidecar, 4, 1024));
    }

    #[test]
    fn test_sidecar_json_field_names() {
        let sidecar = Sidecar::new("a1");
        let json = serde_json::to_string(&sidecar).unwrap();
        assert!(json.contains("\"albumId\""));
        assert!(json.contains("\"lastFileCount\""));
    }
}
