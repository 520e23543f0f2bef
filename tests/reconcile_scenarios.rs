//! End-to-end Catalog + Reconciler + Sidecar scenarios,
//! exercised without the Pipeline or Remote API Adapter since those need a live network — the
//! unit tests inside `pipeline`/`remote` already cover their own logic in isolation.

use std::fs;

use chrono::Utc;
use lumosnap_sync::catalog::{self, Album, Catalog};
use lumosnap_sync::fsutil::ScanCache;
use lumosnap_sync::reconciler::{self, ProfileSource};
use lumosnap_sync::sidecar;

struct UnlimitedProfile;

impl ProfileSource for UnlimitedProfile {
    fn remaining_image_quota(&self) -> lumosnap_sync::Result<Option<i64>> {
        Ok(None)
    }
}

struct LimitedProfile(i64);

impl ProfileSource for LimitedProfile {
    fn remaining_image_quota(&self) -> lumosnap_sync::Result<Option<i64>> {
        Ok(Some(self.0))
    }
}

struct NoopDeleter;

impl reconciler::RemoteImageDeleter for NoopDeleter {
    fn delete_images(&self, _album_id: &str, _image_ids: &[i64]) -> lumosnap_sync::Result<()> {
        Ok(())
    }
}

struct Harness {
    _tmp: tempfile::TempDir,
    catalog: Catalog,
    scan_cache: ScanCache,
    source: std::path::PathBuf,
    local: std::path::PathBuf,
}

impl Harness {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&tmp.path().join("catalog.db")).unwrap();
        let source = tmp.path().join("src").join("wedding");
        let local = tmp.path().join("local").join("wedding");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&local).unwrap();
        Self {
            _tmp: tmp,
            catalog,
            scan_cache: ScanCache::new(),
            source,
            local,
        }
    }

    fn create_album(&self, id: &str) -> Album {
        let album = Album {
            id: id.to_string(),
            title: "Wedding".to_string(),
            event_date: None,
            start_time: None,
            end_time: None,
            source_folder_path: self.source.to_string_lossy().to_string(),
            local_folder_path: self.local.to_string_lossy().to_string(),
            total_images: 0,
            last_synced_at: None,
            needs_sync: false,
            is_orphaned: false,
            created_at: Utc::now(),
        };
        self.catalog.with_conn(|conn| catalog::create_album(conn, &album)).unwrap();
        album
    }

    fn reload(&self, id: &str) -> Album {
        self.catalog.with_conn(|conn| catalog::get_album(conn, id)).unwrap().unwrap()
    }

    fn write_file(&self, name: &str, bytes: &[u8]) {
        fs::write(self.source.join(name), bytes).unwrap();
    }
}

fn sync_album(h: &Harness, album: &Album) -> reconciler::Changes {
    let mut changes = reconciler::detect(&h.catalog, &h.scan_cache, album).unwrap();
    reconciler::apply_plan_limit(&mut changes, &UnlimitedProfile).unwrap();
    reconciler::execute(&h.catalog, &h.scan_cache, &NoopDeleter, album, &changes).unwrap();
    changes
}

/// S1. Fresh album, three images: all three become pending rows with distinct upload orders,
/// and a sidecar is written recording the file count.
#[test]
fn scenario_s1_fresh_album_three_images() {
    let h = Harness::new();
    let album = h.create_album("album-1");
    h.write_file("a.jpg", &[0xFF; 2048]);
    h.write_file("b.png", &[0xEE; 4096]);
    h.write_file("c.heic", &[0xDD; 8192]);

    let changes = sync_album(&h, &album);
    assert_eq!(changes.new.len(), 3);
    assert!(changes.modified.is_empty());
    assert!(changes.deleted.is_empty());

    let images = h
        .catalog
        .with_conn(|conn| catalog::list_images_for_album(conn, &album.id))
        .unwrap();
    assert_eq!(images.len(), 3);
    let mut orders: Vec<i64> = images.iter().map(|i| i.upload_order).collect();
    orders.sort();
    assert_eq!(orders, vec![0, 1, 2]);
    for image in &images {
        assert_eq!(image.upload_status, lumosnap_sync::catalog::UploadStatus::Pending);
        assert!(image.server_id.is_none());
    }

    let sidecar = sidecar::read_sidecar(&h.source).expect("sidecar written after sync");
    assert_eq!(sidecar.stats.last_file_count, 3);
}

/// S2. Rename: renaming a file with identical content yields exactly one `renamed` change,
/// preserving the image's id.
#[test]
fn scenario_s2_rename_preserves_identity() {
    let h = Harness::new();
    let album = h.create_album("album-2");
    h.write_file("a.jpg", &[0xAA; 1024]);
    h.write_file("b.png", &[0xBB; 1024]);
    sync_album(&h, &album);

    let before = h
        .catalog
        .with_conn(|conn| catalog::list_images_for_album(conn, &album.id))
        .unwrap();
    let b_before = before.iter().find(|i| i.original_filename == "b.png").unwrap().clone();

    fs::rename(h.source.join("b.png"), h.source.join("b2.png")).unwrap();
    h.scan_cache.invalidate(std::path::Path::new(&album.source_folder_path));
    let changes = sync_album(&h, &album);

    assert_eq!(changes.renamed.len(), 1);
    assert!(changes.new.is_empty());
    assert!(changes.deleted.is_empty());

    let b_after = h
        .catalog
        .with_conn(|conn| catalog::get_image(conn, b_before.id))
        .unwrap()
        .expect("image row preserved across rename");
    assert_eq!(b_after.id, b_before.id);
    assert_eq!(b_after.source_file_hash, b_before.source_file_hash);
    assert_eq!(b_after.original_filename, "b2.png");
}

/// S3 / P4. Duplicate drop-in: a byte-identical copy under a new name is classified `skipped`,
/// never inserted as a new row.
#[test]
fn scenario_s3_duplicate_drop_in_is_skipped() {
    let h = Harness::new();
    let album = h.create_album("album-3");
    h.write_file("a.jpg", &[0x11; 1024]);
    sync_album(&h, &album);

    h.write_file("a-copy.jpg", &[0x11; 1024]);
    h.scan_cache.invalidate(std::path::Path::new(&album.source_folder_path));
    let changes = sync_album(&h, &album);

    assert_eq!(changes.skipped.len(), 1);
    assert!(changes.new.is_empty());
    let images = h
        .catalog
        .with_conn(|conn| catalog::list_images_for_album(conn, &album.id))
        .unwrap();
    assert_eq!(images.len(), 1);
}

/// S4. Moved folder: rebinding the source path keeps the album's identity (same row, same id),
/// clears `isOrphaned`, and requires no re-upload.
#[test]
fn scenario_s4_moved_folder_rebinds_album() {
    let h = Harness::new();
    let album = h.create_album("album-4");
    h.write_file("a.jpg", &[0x22; 1024]);
    sync_album(&h, &album);

    let new_source = h.source.parent().unwrap().join("wedding-2024");
    fs::rename(&h.source, &new_source).unwrap();

    let sidecar = sidecar::read_sidecar(&new_source).expect("sidecar moved with its folder");
    assert_eq!(sidecar.album_id, album.id);

    h.catalog
        .with_conn(|conn| {
            catalog::rebind_album_folder(conn, &album.id, &new_source.to_string_lossy())
        })
        .unwrap();
    h.catalog
        .with_conn(|conn| catalog::set_album_orphaned(conn, &album.id, false))
        .unwrap();

    let rebound = h.reload(&album.id);
    assert_eq!(rebound.source_folder_path, new_source.to_string_lossy());
    assert!(!rebound.is_orphaned);

    let images = h
        .catalog
        .with_conn(|conn| catalog::list_images_for_album(conn, &album.id))
        .unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].upload_status, lumosnap_sync::catalog::UploadStatus::Pending);
}

/// R1. Reconciling twice with no filesystem changes between runs yields an empty change set the
/// second time, via the sidecar quick-check short-circuit.
#[test]
fn r1_repeated_reconcile_with_no_changes_is_idempotent() {
    let h = Harness::new();
    let album = h.create_album("album-5");
    h.write_file("a.jpg", &[0x33; 1024]);
    h.write_file("b.png", &[0x44; 1024]);
    sync_album(&h, &album);

    let second = reconciler::detect(&h.catalog, &h.scan_cache, &h.reload(&album.id)).unwrap();
    assert!(second.is_empty());
}

/// R3. Deleting an album locally removes it (and its images, via cascade) from the listing.
#[test]
fn r3_deleted_album_excluded_from_listing() {
    let h = Harness::new();
    let album = h.create_album("album-6");
    h.write_file("a.jpg", &[0x55; 1024]);
    sync_album(&h, &album);

    h.catalog.with_conn(|conn| catalog::delete_album(conn, &album.id)).unwrap();

    let albums = h.catalog.with_conn(|conn| catalog::list_albums(conn)).unwrap();
    assert!(albums.iter().all(|a| a.id != album.id));
}

/// B1. An empty source folder yields zero images and an empty change set.
#[test]
fn b1_empty_source_folder_yields_no_images() {
    let h = Harness::new();
    let album = h.create_album("album-7");
    let changes = sync_album(&h, &album);
    assert!(changes.is_empty());

    let images = h
        .catalog
        .with_conn(|conn| catalog::list_images_for_album(conn, &album.id))
        .unwrap();
    assert!(images.is_empty());
}

/// S6 / plan limit: with 5 new files and a quota of 1, exactly one is inserted and four are
/// skipped with a limit warning, and no partial rows are left for the skipped files.
#[test]
fn scenario_s6_plan_limit_truncates_new_files() {
    let h = Harness::new();
    let album = h.create_album("album-8");
    for i in 0..5 {
        h.write_file(&format!("img{i}.jpg"), &[i as u8; 512]);
    }

    let mut changes = reconciler::detect(&h.catalog, &h.scan_cache, &album).unwrap();
    assert_eq!(changes.new.len(), 5);
    reconciler::apply_plan_limit(&mut changes, &LimitedProfile(1)).unwrap();
    assert_eq!(changes.new.len(), 1);
    assert_eq!(changes.skipped.len(), 4);
    assert!(changes.limit_warning);
    reconciler::execute(&h.catalog, &h.scan_cache, &NoopDeleter, &album, &changes).unwrap();

    let images = h
        .catalog
        .with_conn(|conn| catalog::list_images_for_album(conn, &album.id))
        .unwrap();
    assert_eq!(images.len(), 1);
}
