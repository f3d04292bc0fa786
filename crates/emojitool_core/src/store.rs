use std::collections::BTreeSet;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::Serialize;

use crate::runtime::normalize_for_display;

const EMOJI_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS custom_emojis (
    name TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    alt_text TEXT,
    category TEXT NOT NULL DEFAULT 'custom',
    addedAt INTEGER NOT NULL
);
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmojiRecord {
    pub name: String,
    pub filename: String,
    pub alt_text: Option<String>,
    pub category: String,
    pub added_at: i64,
}

/// Open the application database without ever creating it.
///
/// The web app owns the database file; a missing file means the tool is
/// pointed at the wrong place, so nothing is written.
pub fn open_existing(db_path: &Path) -> Result<Connection> {
    if !db_path.is_file() {
        bail!("Database not found at {}", normalize_for_display(db_path));
    }
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    connection
        .busy_timeout(Duration::from_secs(5))
        .context("failed to set sqlite busy timeout")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys pragma")?;
    initialize_schema(&connection)?;
    Ok(connection)
}

/// Read-only handle for reports. Leaves a database without the table untouched.
pub fn open_read_only(db_path: &Path) -> Result<Connection> {
    if !db_path.is_file() {
        bail!("Database not found at {}", normalize_for_display(db_path));
    }
    let connection = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open {} read-only", db_path.display()))?;
    connection
        .busy_timeout(Duration::from_secs(5))
        .context("failed to set sqlite busy timeout")?;
    Ok(connection)
}

fn emoji_table_exists(connection: &Connection) -> Result<bool> {
    let found = connection
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'custom_emojis'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .context("failed to inspect sqlite_master")?;
    Ok(found.is_some())
}

fn initialize_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(EMOJI_SCHEMA_SQL)
        .context("failed to initialize custom_emojis schema")
}

pub fn registered_names(connection: &Connection) -> Result<BTreeSet<String>> {
    let mut statement = connection
        .prepare("SELECT name FROM custom_emojis")
        .context("failed to prepare custom_emojis name query")?;
    let rows = statement
        .query_map([], |row| row.get::<_, String>(0))
        .context("failed to query custom_emojis names")?;

    let mut names = BTreeSet::new();
    for row in rows {
        names.insert(row.context("failed to decode custom_emojis name")?);
    }
    Ok(names)
}

pub fn name_exists(connection: &Connection, name: &str) -> Result<bool> {
    let found = connection
        .query_row(
            "SELECT 1 FROM custom_emojis WHERE name = ?1 LIMIT 1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .with_context(|| format!("failed to look up emoji {name}"))?;
    Ok(found.is_some())
}

/// Insert `record` unless its name is already taken. Returns whether a row was written.
pub fn insert_if_absent(connection: &Connection, record: &EmojiRecord) -> Result<bool> {
    let affected = connection
        .execute(
            "INSERT OR IGNORE INTO custom_emojis (name, filename, alt_text, category, addedAt)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.name,
                record.filename,
                record.alt_text,
                record.category,
                record.added_at,
            ],
        )
        .with_context(|| format!("failed to insert emoji {}", record.name))?;
    Ok(affected > 0)
}

pub fn count_records(connection: &Connection) -> Result<usize> {
    if !emoji_table_exists(connection)? {
        return Ok(0);
    }
    let count: i64 = connection
        .query_row("SELECT COUNT(*) FROM custom_emojis", [], |row| row.get(0))
        .context("failed to count custom_emojis")?;
    usize::try_from(count).context("custom_emojis count does not fit into usize")
}

pub fn list_records(connection: &Connection) -> Result<Vec<EmojiRecord>> {
    if !emoji_table_exists(connection)? {
        return Ok(Vec::new());
    }
    let mut statement = connection
        .prepare(
            "SELECT name, filename, alt_text, category, addedAt
             FROM custom_emojis
             ORDER BY name",
        )
        .context("failed to prepare custom_emojis listing")?;
    let rows = statement
        .query_map([], |row| {
            Ok(EmojiRecord {
                name: row.get(0)?,
                filename: row.get(1)?,
                alt_text: row.get(2)?,
                category: row.get(3)?,
                added_at: row.get(4)?,
            })
        })
        .context("failed to query custom_emojis")?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row.context("failed to decode custom_emojis row")?);
    }
    Ok(records)
}

pub fn unix_timestamp() -> Result<i64> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before UNIX_EPOCH")?
        .as_secs();
    i64::try_from(seconds).context("timestamp does not fit into i64")
}

#[cfg(test)]
pub(crate) fn create_empty_database(db_path: &Path) {
    // A zero-byte file is a valid, empty SQLite database.
    std::fs::File::create(db_path).expect("create sqlite database");
}
