//! CRUD for the `pending_operations` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw pending operation row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRow {
    pub id: String,
    pub operation_name: String,
    pub kind: String,
    /// JSON-encoded request parameters.
    pub params: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl PendingRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            operation_name: row.get("operation_name")?,
            kind: row.get("kind")?,
            params: row.get("params")?,
            timestamp: row.get("timestamp")?,
        })
    }
}

/// Inserts the row, or overwrites the row with the same id.
pub fn upsert(db: &Database, op: &PendingRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO pending_operations (id, operation_name, kind, params, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                operation_name=excluded.operation_name, kind=excluded.kind,
                params=excluded.params, timestamp=excluded.timestamp",
            params![op.id, op.operation_name, op.kind, op.params, op.timestamp],
        )?;
        Ok(())
    })
}

/// Lists all rows, oldest first.
pub fn list(db: &Database) -> Result<Vec<PendingRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM pending_operations ORDER BY timestamp ASC, rowid ASC")?;
        let rows = stmt
            .query_map([], PendingRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes a row. Deleting a missing id is not an error.
pub fn delete(db: &Database, id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM pending_operations WHERE id = ?1", params![id])?;
        Ok(())
    })
}
