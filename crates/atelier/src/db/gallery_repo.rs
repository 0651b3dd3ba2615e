//! CRUD for the `gallery_items` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw gallery row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryRow {
    pub id: String,
    pub kind: String,
    /// JSON-encoded media source.
    pub media: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub prompt: String,
    pub aspect_ratio: String,
    /// JSON-encoded generation metadata.
    pub metadata: String,
    pub is_hidden: bool,
}

impl GalleryRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            kind: row.get("kind")?,
            media: row.get("media")?,
            timestamp: row.get("timestamp")?,
            prompt: row.get("prompt")?,
            aspect_ratio: row.get("aspect_ratio")?,
            metadata: row.get("metadata")?,
            is_hidden: row.get("is_hidden")?,
        })
    }
}

/// Inserts the row, or overwrites every column of the row with the same id.
pub fn upsert(db: &Database, item: &GalleryRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO gallery_items (id, kind, media, timestamp, prompt, aspect_ratio, metadata, is_hidden)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                kind=excluded.kind, media=excluded.media, timestamp=excluded.timestamp,
                prompt=excluded.prompt, aspect_ratio=excluded.aspect_ratio,
                metadata=excluded.metadata, is_hidden=excluded.is_hidden",
            params![
                item.id,
                item.kind,
                item.media,
                item.timestamp,
                item.prompt,
                item.aspect_ratio,
                item.metadata,
                item.is_hidden,
            ],
        )?;
        Ok(())
    })
}

/// Lists all rows, newest first. Equal timestamps keep insertion order.
pub fn list(db: &Database) -> Result<Vec<GalleryRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM gallery_items ORDER BY timestamp DESC, rowid ASC")?;
        let rows = stmt
            .query_map([], GalleryRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes a row. Deleting a missing id is not an error.
pub fn delete(db: &Database, id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM gallery_items WHERE id = ?1", params![id])?;
        Ok(())
    })
}
