use crate::error::Result;

/// Create the catalog schema if it doesn't exist yet. Idempotent and additive: safe to call
/// unconditionally on every `open_connection`.
///
/// Schema evolution happens by appending `ALTER TABLE ... ADD COLUMN` statements
/// guarded by `PRAGMA table_info` lookups below the initial `CREATE TABLE IF NOT EXISTS` block
/// — there is exactly one column generation so far, so no guarded ALTERs exist yet.
pub fn run_migrations(conn: &rusqlite::Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS albums (
            id                  TEXT PRIMARY KEY,
            title               TEXT NOT NULL,
            event_date          TEXT,
            start_time          TEXT,
            end_time            TEXT,
            source_folder_path  TEXT NOT NULL,
            local_folder_path   TEXT NOT NULL,
            total_images        INTEGER NOT NULL DEFAULT 0,
            last_synced_at      TEXT,
            needs_sync          INTEGER NOT NULL DEFAULT 0,
            is_orphaned         INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS images (
            id                  INTEGER PRIMARY KEY,
            album_id            TEXT NOT NULL REFERENCES albums(id) ON DELETE CASCADE,
            server_id           INTEGER,
            original_filename   TEXT NOT NULL,
            local_file_path     TEXT NOT NULL,
            file_size           INTEGER NOT NULL DEFAULT 0,
            width               INTEGER,
            height              INTEGER,
            mtime               TEXT,
            source_file_hash    TEXT,
            upload_status       TEXT NOT NULL DEFAULT 'pending',
            upload_order        INTEGER NOT NULL,
            UNIQUE(album_id, original_filename),
            UNIQUE(album_id, upload_order)
        );

        -- I4: server_id unique within an album where non-null. SQLite treats every NULL as
        -- distinct in a UNIQUE index, so a partial unique index over non-null rows is exactly
        -- what I4 asks for.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_images_album_server
            ON images(album_id, server_id) WHERE server_id IS NOT NULL;

        CREATE INDEX IF NOT EXISTS idx_images_album        ON images(album_id);
        CREATE INDEX IF NOT EXISTS idx_images_status        ON images(upload_status);
        CREATE INDEX IF NOT EXISTS idx_images_server        ON images(server_id);
        CREATE INDEX IF NOT EXISTS idx_images_hash          ON images(album_id, source_file_hash);

        INSERT INTO schema_version SELECT 0
            WHERE NOT EXISTS (SELECT 1 FROM schema_version);
        UPDATE schema_version SET version = 1 WHERE version < 1;
        ",
    )?;

    Ok(())
}

pub fn schema_version(conn: &rusqlite::Connection) -> Result<u32> {
    let version: u32 = conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
        row.get(0)
    })?;
    Ok(version)
}
