//! Additive schema upgrades.
//!
//! The applied version is kept in `PRAGMA user_version`. Each upgrade runs in
//! its own transaction together with the version bump, so an interrupted
//! upgrade leaves the archive at the previous version. Upgrades only add
//! tables, indexes or columns; nothing is ever dropped.

use rusqlite::Connection;

use super::error::DatabaseError;

/// Version reached once every upgrade below has been applied.
pub const SCHEMA_VERSION: u32 = 3;

enum Change {
    Script(&'static str),
    /// Adds a column unless a previous build already created it.
    Column {
        table: &'static str,
        name: &'static str,
        definition: &'static str,
    },
}

struct Upgrade {
    to: u32,
    label: &'static str,
    change: Change,
}

const UPGRADES: &[Upgrade] = &[
    Upgrade {
        to: 1,
        label: "gallery items",
        change: Change::Script(include_str!("sql/001_create_gallery_items.sql")),
    },
    Upgrade {
        to: 2,
        label: "pending operations",
        change: Change::Script(include_str!("sql/002_create_pending_operations.sql")),
    },
    Upgrade {
        to: 3,
        label: "gallery hidden flag",
        change: Change::Column {
            table: "gallery_items",
            name: "is_hidden",
            definition: "INTEGER NOT NULL DEFAULT 0",
        },
    },
];

/// Brings the archive up to [`SCHEMA_VERSION`].
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    let start = current_version(conn)?;
    if start > SCHEMA_VERSION {
        log::warn!(
            "Archive schema v{} is newer than this build (v{}); unknown columns are ignored",
            start,
            SCHEMA_VERSION
        );
        return Ok(());
    }

    for upgrade in UPGRADES.iter().filter(|u| u.to > start) {
        apply(conn, upgrade).map_err(|e| DatabaseError::Migration {
            version: upgrade.to,
            reason: e.to_string(),
        })?;
        log::info!("Archive schema upgraded to v{} ({})", upgrade.to, upgrade.label);
    }
    Ok(())
}

fn apply(conn: &Connection, upgrade: &Upgrade) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    match upgrade.change {
        Change::Script(sql) => tx.execute_batch(sql)?,
        Change::Column {
            table,
            name,
            definition,
        } => {
            if has_column(&tx, table, name)? {
                log::debug!("{}.{} already present", table, name);
            } else {
                tx.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {};",
                    table, name, definition
                ))?;
            }
        }
    }
    tx.pragma_update(None, "user_version", upgrade.to)?;
    tx.commit()
}

/// Applied schema version; 0 for a fresh file.
pub fn current_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.pragma_query_value(None, "user_version", |r| r.get(0))?)
}

fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2")?;
    stmt.exists(rusqlite::params![table, column])
}
