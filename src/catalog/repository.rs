use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};

use super::model::{Album, Image, ImageStats, NewImage, UploadStatus};

fn row_to_album(row: &Row) -> rusqlite::Result<Album> {
    Ok(Album {
        id: row.get("id")?,
        title: row.get("title")?,
        event_date: row.get("event_date")?,
        start_time: row.get("start_time")?,
        end_time: row.get("end_time")?,
        source_folder_path: row.get("source_folder_path")?,
        local_folder_path: row.get("local_folder_path")?,
        total_images: row.get("total_images")?,
        last_synced_at: row.get("last_synced_at")?,
        needs_sync: row.get::<_, i64>("needs_sync")? != 0,
        is_orphaned: row.get::<_, i64>("is_orphaned")? != 0,
        created_at: row.get("created_at")?,
    })
}

fn row_to_image(row: &Row) -> rusqlite::Result<Image> {
    let status_str: String = row.get("upload_status")?;
    let upload_status = UploadStatus::from_db_str(&status_str)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    Ok(Image {
        id: row.get("id")?,
        album_id: row.get("album_id")?,
        server_id: row.get("server_id")?,
        original_filename: row.get("original_filename")?,
        local_file_path: row.get("local_file_path")?,
        file_size: row.get("file_size")?,
        width: row.get("width")?,
        height: row.get("height")?,
        mtime: row.get("mtime")?,
        source_file_hash: row.get("source_file_hash")?,
        upload_status,
        upload_order: row.get("upload_order")?,
    })
}

/// Collect every row a query returns through `f`: one place that turns a prepared statement
/// + row mapper into a `Vec`.
fn collect_rows<T>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    f: impl Fn(&Row) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, f)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn exists_query(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<bool> {
    let count: i64 = conn.query_row(sql, params, |row| row.get(0))?;
    Ok(count > 0)
}

// ---------------------------------------------------------------------------------------------
// Albums
// ---------------------------------------------------------------------------------------------

pub fn create_album(conn: &Connection, album: &Album) -> Result<()> {
    conn.execute(
        "INSERT INTO albums
            (id, title, event_date, start_time, end_time, source_folder_path,
             local_folder_path, total_images, last_synced_at, needs_sync, is_orphaned, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            album.id,
            album.title,
            album.event_date,
            album.start_time,
            album.end_time,
            album.source_folder_path,
            album.local_folder_path,
            album.total_images,
            album.last_synced_at,
            album.needs_sync as i64,
            album.is_orphaned as i64,
            album.created_at,
        ],
    )?;
    Ok(())
}

pub fn get_album(conn: &Connection, album_id: &str) -> Result<Option<Album>> {
    conn.query_row(
        "SELECT * FROM albums WHERE id = ?1",
        params![album_id],
        row_to_album,
    )
    .optional()
    .map_err(Error::from)
}

pub fn list_albums(conn: &Connection) -> Result<Vec<Album>> {
    collect_rows(
        conn,
        "SELECT * FROM albums ORDER BY created_at ASC",
        [],
        row_to_album,
    )
}

pub fn album_by_source_folder(conn: &Connection, source_folder_path: &str) -> Result<Option<Album>> {
    conn.query_row(
        "SELECT * FROM albums WHERE source_folder_path = ?1",
        params![source_folder_path],
        row_to_album,
    )
    .optional()
    .map_err(Error::from)
}

pub fn rebind_album_folder(conn: &Connection, album_id: &str, new_source_folder_path: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE albums SET source_folder_path = ?1, is_orphaned = 0 WHERE id = ?2",
        params![new_source_folder_path, album_id],
    )?;
    if changed == 0 {
        return Err(Error::NotFound(format!("album {album_id}")));
    }
    Ok(())
}

pub fn set_album_orphaned(conn: &Connection, album_id: &str, orphaned: bool) -> Result<()> {
    conn.execute(
        "UPDATE albums SET is_orphaned = ?1 WHERE id = ?2",
        params![orphaned as i64, album_id],
    )?;
    Ok(())
}

pub fn set_album_needs_sync(conn: &Connection, album_id: &str, needs_sync: bool) -> Result<()> {
    conn.execute(
        "UPDATE albums SET needs_sync = ?1 WHERE id = ?2",
        params![needs_sync as i64, album_id],
    )?;
    Ok(())
}

pub fn mark_album_synced(conn: &Connection, album_id: &str, total_images: i64, synced_at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE albums
         SET total_images = ?1, needs_sync = 0, last_synced_at = ?2
         WHERE id = ?3",
        params![total_images, synced_at, album_id],
    )?;
    Ok(())
}

pub fn delete_album(conn: &Connection, album_id: &str) -> Result<()> {
    // ON DELETE CASCADE takes care of the images; foreign_keys is enabled at connection open.
    let changed = conn.execute("DELETE FROM albums WHERE id = ?1", params![album_id])?;
    if changed == 0 {
        return Err(Error::NotFound(format!("album {album_id}")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------------------------

pub fn max_upload_order(conn: &Connection, album_id: &str) -> Result<i64> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(upload_order) FROM images WHERE album_id = ?1",
        params![album_id],
        |row| row.get(0),
    )?;
    Ok(max.unwrap_or(-1))
}

pub fn filename_exists(conn: &Connection, album_id: &str, filename: &str) -> Result<bool> {
    exists_query(
        conn,
        "SELECT COUNT(*) FROM images WHERE album_id = ?1 AND original_filename = ?2",
        params![album_id, filename],
    )
}

pub fn insert_image(conn: &Connection, album_id: &str, new_image: &NewImage) -> Result<i64> {
    conn.execute(
        "INSERT INTO images
            (album_id, original_filename, local_file_path, file_size, width, height,
             mtime, source_file_hash, upload_status, upload_order)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9)",
        params![
            album_id,
            new_image.original_filename,
            new_image.local_file_path,
            new_image.file_size,
            new_image.width,
            new_image.height,
            new_image.mtime,
            new_image.source_file_hash,
            new_image.upload_order,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_image(conn: &Connection, image_id: i64) -> Result<Option<Image>> {
    conn.query_row(
        "SELECT * FROM images WHERE id = ?1",
        params![image_id],
        row_to_image,
    )
    .optional()
    .map_err(Error::from)
}

pub fn list_images_for_album(conn: &Connection, album_id: &str) -> Result<Vec<Image>> {
    collect_rows(
        conn,
        "SELECT * FROM images WHERE album_id = ?1 ORDER BY upload_order ASC",
        params![album_id],
        row_to_image,
    )
}

pub fn get_images_by_status(conn: &Connection, album_id: &str, status: UploadStatus) -> Result<Vec<Image>> {
    collect_rows(
        conn,
        "SELECT * FROM images WHERE album_id = ?1 AND upload_status = ?2 ORDER BY upload_order ASC",
        params![album_id, status.as_db_str()],
        row_to_image,
    )
}

pub fn get_image_by_hash(conn: &Connection, album_id: &str, hash: &str) -> Result<Option<Image>> {
    conn.query_row(
        "SELECT * FROM images WHERE album_id = ?1 AND source_file_hash = ?2 LIMIT 1",
        params![album_id, hash],
        row_to_image,
    )
    .optional()
    .map_err(Error::from)
}

pub fn get_image_stats(conn: &Connection, album_id: &str) -> Result<ImageStats> {
    let rows = collect_rows(
        conn,
        "SELECT upload_status, COUNT(*) FROM images WHERE album_id = ?1 GROUP BY upload_status",
        params![album_id],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
    )?;
    let mut stats = ImageStats::default();
    for (status, count) in rows {
        match UploadStatus::from_db_str(&status)? {
            UploadStatus::Pending => stats.pending = count,
            UploadStatus::Compressing => stats.compressing = count,
            UploadStatus::Uploading => stats.uploading = count,
            UploadStatus::Complete => stats.complete = count,
            UploadStatus::FailedCompression => stats.failed_compression = count,
            UploadStatus::FailedUpload => stats.failed_upload = count,
        }
    }
    Ok(stats)
}

pub fn update_image_status(conn: &Connection, image_id: i64, status: UploadStatus) -> Result<()> {
    conn.execute(
        "UPDATE images SET upload_status = ?1 WHERE id = ?2",
        params![status.as_db_str(), image_id],
    )?;
    Ok(())
}

/// Apply the Worker Pool's result: the compressed artifact's path/size/dimensions, and the
/// source hash the worker computed along the way.
pub fn record_compression_result(
    conn: &Connection,
    image_id: i64,
    local_file_path: &str,
    file_size: i64,
    width: i64,
    height: i64,
    source_hash: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE images
         SET local_file_path = ?1, file_size = ?2, width = ?3, height = ?4,
             source_file_hash = ?5, upload_status = 'uploading'
         WHERE id = ?6",
        params![local_file_path, file_size, width, height, source_hash, image_id],
    )?;
    Ok(())
}

pub fn set_image_server_id(conn: &Connection, image_id: i64, server_id: i64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE images SET server_id = ?1, upload_status = 'complete' WHERE id = ?2",
        params![server_id, image_id],
    )?;
    if changed == 0 {
        return Err(Error::NotFound(format!("image {image_id}")));
    }
    Ok(())
}

/// Rename an image in place: `id`, `serverId`, `uploadStatus` and `sourceFileHash`
/// are untouched, only filename + local path change.
pub fn rename_image(
    conn: &Connection,
    image_id: i64,
    new_filename: &str,
    new_local_file_path: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE images SET original_filename = ?1, local_file_path = ?2 WHERE id = ?3",
        params![new_filename, new_local_file_path, image_id],
    )?;
    Ok(())
}

pub fn update_image_source_metadata(
    conn: &Connection,
    image_id: i64,
    file_size: i64,
    mtime: Option<DateTime<Utc>>,
) -> Result<()> {
    conn.execute(
        "UPDATE images
         SET file_size = ?1, mtime = ?2, upload_status = 'pending'
         WHERE id = ?3",
        params![file_size, mtime, image_id],
    )?;
    Ok(())
}

pub fn delete_images_by_ids(conn: &Connection, image_ids: &[i64]) -> Result<()> {
    if image_ids.is_empty() {
        return Ok(());
    }
    // rusqlite has no native array binding, so build the `IN (...)` placeholder list by hand.
    let placeholders = image_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!("DELETE FROM images WHERE id IN ({placeholders})");
    let params: Vec<&dyn rusqlite::ToSql> = image_ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
    conn.execute(&sql, params.as_slice())?;
    Ok(())
}
