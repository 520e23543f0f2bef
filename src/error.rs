use std::path::PathBuf;

/// Crate-wide error taxonomy. Component-local errors convert into this via `#[from]`
/// or explicit mapping at the call site that needs to report across a component boundary.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("database unavailable: {0}")]
    DatabaseUnavailable(rusqlite::Error),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("source folder missing: {0}")]
    FilesystemMissing(PathBuf),

    #[error("scan error: {0}")]
    ScanError(String),

    #[error("hash unavailable for {0}")]
    HashUnavailable(PathBuf),

    #[error("compression timed out for {0}")]
    CompressionTimeout(PathBuf),

    #[error("compression worker crashed")]
    WorkerCrashed,

    #[error("upload failed: {0}")]
    UploadHttp(String),

    #[error("server confirmed an image we didn't upload: {0}")]
    ConfirmMismatch(String),

    #[error("not authenticated")]
    Unauthenticated,

    #[error("plan limit reached")]
    PlanLimitReached,

    #[error("remote API error: {0}")]
    RemoteApi(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// `rusqlite` reports I2 (unique filename per album) and I4 (unique non-null server id per
/// album) the same way every other unique-index failure comes back: `SQLITE_CONSTRAINT`. Split
/// those off as `ConstraintViolation` so a caller can tell "the row already exists" apart from
/// "the database itself is unreachable", rather than collapsing both into one opaque kind.
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ffi_error, _) = &err {
            if ffi_error.code == rusqlite::ErrorCode::ConstraintViolation {
                return Error::ConstraintViolation(err.to_string());
            }
        }
        Error::DatabaseUnavailable(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_constraint_violation_maps_to_constraint_violation() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT UNIQUE);")
            .unwrap();
        conn.execute("INSERT INTO t (name) VALUES ('a')", []).unwrap();
        let err: Error = conn
            .execute("INSERT INTO t (name) VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::ConstraintViolation(_)));
    }

    #[test]
    fn test_other_sqlite_errors_map_to_database_unavailable() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err: Error = conn.query_row("SELECT * FROM missing_table", [], |_| Ok(())).unwrap_err().into();
        assert!(matches!(err, Error::DatabaseUnavailable(_)));
    }
}
