use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::Utc;

use crate::catalog::{self, Album, Catalog, Image, NewImage, UploadStatus};
use crate::error::Result;
use crate::fsutil::{self, ScannedFile};
use crate::sidecar::{self, Sidecar};

/// A trait boundary so tests can stub the plan-limit admission check
/// without a real Remote API Adapter.
pub trait ProfileSource {
    fn remaining_image_quota(&self) -> Result<Option<i64>>;
}

/// A trait boundary so `execute` can issue the remote delete for `deleted` changes
/// without depending on `remote::Client` directly, and so tests can stub it out.
pub trait RemoteImageDeleter {
    fn delete_images(&self, album_id: &str, image_ids: &[i64]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct NewChange {
    pub scanned: ScannedFile,
    pub hash: String,
}

#[derive(Debug, Clone)]
pub struct ModifiedChange {
    pub image_id: i64,
    pub scanned: ScannedFile,
}

#[derive(Debug, Clone)]
pub struct DeletedChange {
    pub image_id: i64,
    pub server_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct RenamedChange {
    pub image_id: i64,
    pub old_filename: String,
    pub new_filename: String,
    pub scanned: ScannedFile,
}

#[derive(Debug, Clone)]
pub struct SkippedChange {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Changes {
    pub new: Vec<NewChange>,
    pub modified: Vec<ModifiedChange>,
    pub deleted: Vec<DeletedChange>,
    pub renamed: Vec<RenamedChange>,
    pub skipped: Vec<SkippedChange>,
    pub limit_warning: bool,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.renamed.is_empty()
            && self.skipped.is_empty()
    }

    /// Silent changes (rename/skip only) are applied without asking the photographer to review;
    /// anything else flips `needsSync`.
    pub fn is_silent(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} new, {} modified, {} deleted, {} renamed, {} skipped",
            self.new.len(),
            self.modified.len(),
            self.deleted.len(),
            self.renamed.len(),
            self.skipped.len()
        )
    }
}

/// Diff `album`'s source folder against the Catalog. Returns an empty `Changes`
/// immediately if the sidecar's quick-dirty stats already match the folder.
pub fn detect(catalog: &Catalog, scan_cache: &fsutil::ScanCache, album: &Album) -> Result<Changes> {
    let source_folder = Path::new(&album.source_folder_path);

    let quick_scan = scan_cache.scan(source_folder)?;
    let current_file_count = quick_scan.len() as u64;
    let current_total_size: u64 = quick_scan.iter().map(|f| f.size).sum();

    if let Some(existing_sidecar) = sidecar::read_sidecar(source_folder) {
        if sidecar::matches_current_stats(&existing_sidecar, current_file_count, current_total_size) {
            return Ok(Changes::default());
        }
    }

    let scanned = quick_scan;
    let existing_images = catalog.with_conn(|conn| catalog::list_images_for_album(conn, &album.id))?;

    let existing_by_filename: HashMap<&str, &Image> = existing_images
        .iter()
        .map(|image| (image.original_filename.as_str(), image))
        .collect();
    let scanned_by_filename: HashMap<&str, &ScannedFile> = scanned
        .iter()
        .map(|file| (file.basename.as_str(), file))
        .collect();

    let mut modified = Vec::new();
    let mut new_candidates: Vec<&ScannedFile> = Vec::new();
    let mut surviving_hashes: HashMap<&str, &str> = HashMap::new();

    for file in &scanned {
        match existing_by_filename.get(file.basename.as_str()) {
            Some(image) => {
                if let Some(hash) = image.source_file_hash.as_deref() {
                    surviving_hashes.insert(hash, image.original_filename.as_str());
                }
                let size_changed = image.file_size != file.size as i64;
                let mtime_changed = file.mtime != image.mtime;
                let mtime_is_newer = match (file.mtime, image.mtime, album.last_synced_at) {
                    (Some(current), _, Some(last_synced)) => current > last_synced,
                    (Some(_), _, None) => true,
                    _ => false,
                };
                if (size_changed || mtime_changed) && mtime_is_newer {
                    modified.push(ModifiedChange {
                        image_id: image.id,
                        scanned: (*file).clone(),
                    });
                }
            }
            None => new_candidates.push(file),
        }
    }

    let mut potentially_deleted: Vec<&Image> = existing_images
        .iter()
        .filter(|image| !scanned_by_filename.contains_key(image.original_filename.as_str()))
        .collect();

    let mut skipped = Vec::new();
    let mut renamed = Vec::new();
    let mut new = Vec::new();

    for file in new_candidates {
        let hash = match crate::hashing::hash_file(&file.path) {
            Ok(hash) => hash,
            Err(err) => {
                tracing::warn!(path = %file.path.display(), ?err, "could not hash candidate file, treating as absent");
                continue;
            }
        };

        if let Some(duplicate_of) = surviving_hashes.get(hash.as_str()) {
            skipped.push(SkippedChange {
                filename: file.basename.clone(),
                reason: format!("duplicate of {duplicate_of}"),
            });
            continue;
        }

        let rename_match = potentially_deleted
            .iter()
            .enumerate()
            .filter(|(_, image)| image.source_file_hash.as_deref() == Some(hash.as_str()))
            .min_by_key(|(_, image)| image.id);

        if let Some((index, _)) = rename_match {
            let old_image = potentially_deleted.remove(index);
            renamed.push(RenamedChange {
                image_id: old_image.id,
                old_filename: old_image.original_filename.clone(),
                new_filename: file.basename.clone(),
                scanned: (*file).clone(),
            });
            continue;
        }

        new.push(NewChange {
            scanned: (*file).clone(),
            hash,
        });
    }

    let deleted = potentially_deleted
        .into_iter()
        .map(|image| DeletedChange {
            image_id: image.id,
            server_id: image.server_id,
        })
        .collect();

    Ok(Changes {
        new,
        modified,
        deleted,
        renamed,
        skipped,
        limit_warning: false,
    })
}

/// Plan-limit admission: truncate `changes.new` to what the remote profile still
/// allows, marking the rest `skipped` with a limit warning. `modified`/`deleted` are untouched.
pub fn apply_plan_limit(changes: &mut Changes, profile: &dyn ProfileSource) -> Result<()> {
    let Some(remaining) = profile.remaining_image_quota()? else {
        return Ok(());
    };
    let remaining = remaining.max(0) as usize;
    if remaining >= changes.new.len() {
        return Ok(());
    }
    if remaining == 0 {
        for change in changes.new.drain(..) {
            changes.skipped.push(SkippedChange {
                filename: change.scanned.basename,
                reason: "limitWarning".into(),
            });
        }
    } else {
        let overflow = changes.new.split_off(remaining);
        for change in overflow {
            changes.skipped.push(SkippedChange {
                filename: change.scanned.basename,
                reason: "limitWarning".into(),
            });
        }
    }
    changes.limit_warning = true;
    Ok(())
}

/// Apply a classified `Changes` record transactionally. Issues the remote delete for
/// `deleted` changes first (best-effort, by `serverId`), then copies files into the album's
/// local folder, updates the Catalog, refreshes the sidecar, and invalidates the scan
/// cache so the next debounce window re-reads a clean state.
pub fn execute(
    catalog: &Catalog,
    scan_cache: &fsutil::ScanCache,
    remote: &dyn RemoteImageDeleter,
    album: &Album,
    changes: &Changes,
) -> Result<()> {
    let local_folder = Path::new(&album.local_folder_path);
    fs::create_dir_all(local_folder)?;

    let remote_ids: Vec<i64> = changes.deleted.iter().filter_map(|d| d.server_id).collect();
    if !remote_ids.is_empty() {
        if let Err(err) = remote.delete_images(&album.id, &remote_ids) {
            tracing::warn!(album_id = %album.id, ?err, "remote delete of removed images failed, local rows still retired");
        }
    }

    let starting_order = catalog.with_conn(|conn| catalog::max_upload_order(conn, &album.id))?;
    let mut next_order = starting_order + 1;

    catalog.with_transaction(|tx| -> Result<()> {
        for deleted in &changes.deleted {
            catalog::delete_images_by_ids(tx, &[deleted.image_id])?;
        }

        for renamed in &changes.renamed {
            let new_local_path = local_folder.join(&renamed.new_filename);
            fs::copy(&renamed.scanned.path, &new_local_path)?;
            catalog::rename_image(tx, renamed.image_id, &renamed.new_filename, &new_local_path.to_string_lossy())?;
        }

        for modified in &changes.modified {
            if let Some(image) = catalog::get_image(tx, modified.image_id)? {
                fs::copy(&modified.scanned.path, &image.local_file_path)?;
            }
            catalog::update_image_source_metadata(
                tx,
                modified.image_id,
                modified.scanned.size as i64,
                modified.scanned.mtime,
            )?;
        }

        for new_change in &changes.new {
            let local_path = local_folder.join(&new_change.scanned.basename);
            fs::copy(&new_change.scanned.path, &local_path)?;
            let new_image = NewImage {
                original_filename: new_change.scanned.basename.clone(),
                local_file_path: local_path.to_string_lossy().to_string(),
                file_size: new_change.scanned.size as i64,
                width: new_change.scanned.width.map(|w| w as i64),
                height: new_change.scanned.height.map(|h| h as i64),
                mtime: new_change.scanned.mtime,
                source_file_hash: Some(new_change.hash.clone()),
                upload_order: next_order,
            };
            next_order += 1;
            catalog::insert_image(tx, &album.id, &new_image)?;
        }

        Ok(())
    })?;

    let total_images = catalog.with_conn(|conn| catalog::list_images_for_album(conn, &album.id))?.len() as i64;
    let now = Utc::now();
    catalog.with_conn(|conn| catalog::mark_album_synced(conn, &album.id, total_images, now))?;

    let mut new_sidecar = sidecar::read_sidecar(Path::new(&album.source_folder_path))
        .unwrap_or_else(|| Sidecar::new(album.id.clone()));
    let rescanned = scan_cache.scan(Path::new(&album.source_folder_path))?;
    new_sidecar.last_synced_at = Some(now);
    new_sidecar.stats.last_file_count = rescanned.len() as u64;
    new_sidecar.stats.last_total_size = rescanned.iter().map(|f| f.size).sum();
    new_sidecar.stats.total_images = total_images as u64;
    sidecar::write_sidecar(Path::new(&album.source_folder_path), &new_sidecar)?;

    scan_cache.invalidate(Path::new(&album.source_folder_path));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Album as CatalogAlbum;
    use std::fs;

    struct UnlimitedProfile;
    impl ProfileSource for UnlimitedProfile {
        fn remaining_image_quota(&self) -> Result<Option<i64>> {
            Ok(None)
        }
    }

    struct FixedProfile(i64);
    impl ProfileSource for FixedProfile {
        fn remaining_image_quota(&self) -> Result<Option<i64>> {
            Ok(Some(self.0))
        }
    }

    struct NoopDeleter;
    impl RemoteImageDeleter for NoopDeleter {
        fn delete_images(&self, _album_id: &str, _image_ids: &[i64]) -> Result<()> {
            Ok(())
        }
    }

    fn make_album(id: &str, source: &Path, local: &Path) -> CatalogAlbum {
        CatalogAlbum {
            id: id.to_string(),
            title: "Test".into(),
            event_date: None,
            start_time: None,
            end_time: None,
            source_folder_path: source.to_string_lossy().to_string(),
            local_folder_path: local.to_string_lossy().to_string(),
            total_images: 0,
            last_synced_at: None,
            needs_sync: false,
            is_orphaned: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_detect_fresh_album_all_new() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("src");
        let local = tmp.path().join("local");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.jpg"), b"aaa").unwrap();
        fs::write(source.join("b.jpg"), b"bbb").unwrap();

        let db_path = tmp.path().join("catalog.db");
        let catalog = Catalog::open(&db_path).unwrap();
        let album = make_album("a1", &source, &local);
        catalog.with_conn(|conn| catalog::create_album(conn, &album)).unwrap();

        let scan_cache = fsutil::ScanCache::new();
        let changes = detect(&catalog, &scan_cache, &album).unwrap();
        assert_eq!(changes.new.len(), 2);
        assert!(changes.modified.is_empty());
        assert!(changes.deleted.is_empty());
    }

    #[test]
    fn test_detect_duplicate_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("src");
        let local = tmp.path().join("local");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.jpg"), b"same-bytes").unwrap();

        let db_path = tmp.path().join("catalog.db");
        let catalog = Catalog::open(&db_path).unwrap();
        let album = make_album("a1", &source, &local);
        catalog.with_conn(|conn| catalog::create_album(conn, &album)).unwrap();
        catalog
            .with_conn(|conn| {
                catalog::insert_image(
                    conn,
                    "a1",
                    &NewImage {
                        original_filename: "a.jpg".into(),
                        local_file_path: local.join("a.jpg").to_string_lossy().to_string(),
                        file_size: 10,
                        width: None,
                        height: None,
                        mtime: None,
                        source_file_hash: Some(crate::hashing::hash_bytes(b"same-bytes")),
                        upload_order: 0,
                    },
                )
            })
            .unwrap();

        fs::write(source.join("a-copy.jpg"), b"same-bytes").unwrap();

        let scan_cache = fsutil::ScanCache::new();
        let changes = detect(&catalog, &scan_cache, &album).unwrap();
        assert_eq!(changes.skipped.len(), 1);
        assert_eq!(changes.skipped[0].reason, "duplicate of a.jpg");
        assert!(changes.new.is_empty());
    }

    #[test]
    fn test_detect_rename_preserves_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("src");
        let local = tmp.path().join("local");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("b2.png"), b"png-bytes").unwrap();

        let db_path = tmp.path().join("catalog.db");
        let catalog = Catalog::open(&db_path).unwrap();
        let album = make_album("a1", &source, &local);
        catalog.with_conn(|conn| catalog::create_album(conn, &album)).unwrap();
        let image_id = catalog
            .with_conn(|conn| {
                catalog::insert_image(
                    conn,
                    "a1",
                    &NewImage {
                        original_filename: "b.png".into(),
                        local_file_path: local.join("b.png").to_string_lossy().to_string(),
                        file_size: 9,
                        width: None,
                        height: None,
                        mtime: None,
                        source_file_hash: Some(crate::hashing::hash_bytes(b"png-bytes")),
                        upload_order: 0,
                    },
                )
            })
            .unwrap();

        let scan_cache = fsutil::ScanCache::new();
        let changes = detect(&catalog, &scan_cache, &album).unwrap();
        assert_eq!(changes.renamed.len(), 1);
        assert_eq!(changes.renamed[0].image_id, image_id);
        assert_eq!(changes.renamed[0].old_filename, "b.png");
        assert_eq!(changes.renamed[0].new_filename, "b2.png");
        assert!(changes.new.is_empty());
        assert!(changes.deleted.is_empty());
    }

    #[test]
    fn test_detect_same_size_newer_mtime_is_modified() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("src");
        let local = tmp.path().join("local");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.jpg"), b"xxxxx").unwrap();

        let db_path = tmp.path().join("catalog.db");
        let catalog = Catalog::open(&db_path).unwrap();
        let album = make_album("a1", &source, &local);
        catalog.with_conn(|conn| catalog::create_album(conn, &album)).unwrap();
        let image_id = catalog
            .with_conn(|conn| {
                catalog::insert_image(
                    conn,
                    "a1",
                    &NewImage {
                        original_filename: "a.jpg".into(),
                        local_file_path: local.join("a.jpg").to_string_lossy().to_string(),
                        file_size: 5,
                        width: None,
                        height: None,
                        mtime: None,
                        source_file_hash: Some(crate::hashing::hash_bytes(b"yyyyy")),
                        upload_order: 0,
                    },
                )
            })
            .unwrap();

        let scan_cache = fsutil::ScanCache::new();
        let changes = detect(&catalog, &scan_cache, &album).unwrap();
        assert_eq!(changes.modified.len(), 1);
        assert_eq!(changes.modified[0].image_id, image_id);
        assert!(changes.new.is_empty());
    }

    #[test]
    fn test_sidecar_quick_check_returns_empty_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("src");
        let local = tmp.path().join("local");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.jpg"), b"aaa").unwrap();

        let mut sidecar = Sidecar::new("a1");
        sidecar.stats.last_file_count = 1;
        sidecar.stats.last_total_size = 3;
        sidecar::write_sidecar(&source, &sidecar).unwrap();

        let db_path = tmp.path().join("catalog.db");
        let catalog = Catalog::open(&db_path).unwrap();
        let album = make_album("a1", &source, &local);
        catalog.with_conn(|conn| catalog::create_album(conn, &album)).unwrap();

        let scan_cache = fsutil::ScanCache::new();
        let changes = detect(&catalog, &scan_cache, &album).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_apply_plan_limit_truncates_new() {
        let tmp = tempfile::tempdir().unwrap();
        let mut changes = Changes::default();
        for i in 0..5 {
            changes.new.push(NewChange {
                scanned: ScannedFile {
                    path: tmp.path().join(format!("{i}.jpg")),
                    basename: format!("{i}.jpg"),
                    size: 10,
                    mtime: None,
                    width: None,
                    height: None,
                },
                hash: format!("hash{i}"),
            });
        }
        apply_plan_limit(&mut changes, &FixedProfile(1)).unwrap();
        assert_eq!(changes.new.len(), 1);
        assert_eq!(changes.skipped.len(), 4);
        assert!(changes.limit_warning);
    }

    #[test]
    fn test_apply_plan_limit_unlimited_leaves_new_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let mut changes = Changes::default();
        changes.new.push(NewChange {
            scanned: ScannedFile {
                path: tmp.path().join("a.jpg"),
                basename: "a.jpg".into(),
                size: 10,
                mtime: None,
                width: None,
                height: None,
            },
            hash: "h".into(),
        });
        apply_plan_limit(&mut changes, &UnlimitedProfile).unwrap();
        assert_eq!(changes.new.len(), 1);
        assert!(!changes.limit_warning);
    }

    #[test]
    fn test_execute_new_images_inserts_rows_and_writes_sidecar() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("src");
        let local = tmp.path().join("local");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.jpg"), b"aaa").unwrap();

        let db_path = tmp.path().join("catalog.db");
        let catalog = Catalog::open(&db_path).unwrap();
        let album = make_album("a1", &source, &local);
        catalog.with_conn(|conn| catalog::create_album(conn, &album)).unwrap();

        let scan_cache = fsutil::ScanCache::new();
        let changes = detect(&catalog, &scan_cache, &album).unwrap();
        execute(&catalog, &scan_cache, &NoopDeleter, &album, &changes).unwrap();

        let images = catalog.with_conn(|conn| catalog::list_images_for_album(conn, "a1")).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].upload_status, UploadStatus::Pending);
        assert!(sidecar::read_sidecar(&source).is_some());
    }

    #[test]
    fn test_execute_deleted_image_calls_remote_delete_by_server_id() {
        use std::sync::Mutex;

        struct RecordingDeleter {
            calls: Mutex<Vec<(String, Vec<i64>)>>,
        }
        impl RemoteImageDeleter for RecordingDeleter {
            fn delete_images(&self, album_id: &str, image_ids: &[i64]) -> Result<()> {
                self.calls.lock().unwrap().push((album_id.to_string(), image_ids.to_vec()));
                Ok(())
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("src");
        let local = tmp.path().join("local");
        fs::create_dir_all(&source).unwrap();

        let db_path = tmp.path().join("catalog.db");
        let catalog = Catalog::open(&db_path).unwrap();
        let album = make_album("a1", &source, &local);
        catalog.with_conn(|conn| catalog::create_album(conn, &album)).unwrap();
        let image_id = catalog
            .with_conn(|conn| {
                catalog::insert_image(
                    conn,
                    "a1",
                    &NewImage {
                        original_filename: "gone.jpg".into(),
                        local_file_path: local.join("gone.jpg").to_string_lossy().to_string(),
                        file_size: 10,
                        width: None,
                        height: None,
                        mtime: None,
                        source_file_hash: Some("hash-gone".into()),
                        upload_order: 0,
                    },
                )
            })
            .unwrap();
        catalog.with_conn(|conn| catalog::set_image_server_id(conn, image_id, 42)).unwrap();

        let scan_cache = fsutil::ScanCache::new();
        let changes = detect(&catalog, &scan_cache, &album).unwrap();
        assert_eq!(changes.deleted.len(), 1);
        assert_eq!(changes.deleted[0].server_id, Some(42));

        let deleter = RecordingDeleter { calls: Mutex::new(Vec::new()) };
        execute(&catalog, &scan_cache, &deleter, &album, &changes).unwrap();

        let calls = deleter.calls.into_inner().unwrap();
        assert_eq!(calls, vec![("a1".to_string(), vec![42])]);
        assert!(catalog.with_conn(|conn| catalog::get_image(conn, image_id)).unwrap().is_none());
    }
}
