mod model;
mod repository;

pub use model::{Album, Image, ImageStats, NewImage, UploadStatus};
pub use repository::*;

use std::path::Path;
use std::sync::Mutex;

use crate::error::Result;

/// The Catalog component (C1): a durable, transactional store of Albums and Images. Owns its
/// connection behind a mutex — a single writer, with SQLite's WAL mode letting readers proceed
/// independently if ever needed.
pub struct Catalog {
    conn: Mutex<rusqlite::Connection>,
}

impl Catalog {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = crate::db::open_connection(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with exclusive access to the connection. Every Catalog operation funnels through
    /// here so lock acquisition stays in one place.
    pub fn with_conn<T>(&self, f: impl FnOnce(&rusqlite::Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().expect("catalog connection mutex poisoned");
        f(&conn)
    }

    /// Run `f` inside a transaction; multi-row reconciliation steps use this so a crash or
    /// error midway can never leave the Catalog half-changed.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock().expect("catalog connection mutex poisoned");
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_open_creates_schema() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&tmp.path().join("catalog.db")).unwrap();
        let albums = catalog.with_conn(|conn| repository::list_albums(conn)).unwrap();
        assert!(albums.is_empty());
    }

    #[test]
    fn test_with_transaction_commits() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&tmp.path().join("catalog.db")).unwrap();
        let album = Album {
            id: "a1".into(),
            title: "Test".into(),
            event_date: None,
            start_time: None,
            end_time: None,
            source_folder_path: "/src".into(),
            local_folder_path: "/local".into(),
            total_images: 0,
            last_synced_at: None,
            needs_sync: false,
            is_orphaned: false,
            created_at: chrono::Utc::now(),
        };
        catalog
            .with_transaction(|tx| repository::create_album(tx, &album))
            .unwrap();
        let fetched = catalog.with_conn(|conn| repository::get_album(conn, "a1")).unwrap();
        assert!(fetched.is_some());
    }
}
