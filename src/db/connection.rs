use std::path::Path;

use crate::error::Result;

/// Open (creating if necessary) the catalog database at `path` with pragmas tuned for a
/// single-writer desktop workload: WAL so readers never block the writer, and a busy
/// timeout so transient lock contention between the control core and a background thread
/// resolves itself instead of surfacing `SQLITE_BUSY`.
pub fn open_connection(path: &Path) -> Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA busy_timeout=5000;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    super::migrations::run_migrations(&conn)?;
    Ok(conn)
}
