use std::{path::Path, sync::Mutex};

use rusqlite::{
    params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value, ValueRef},
    Connection, OptionalExtension, ToSql,
};
use tracing::debug;

use super::{CacheDb, ItemKey, ProcessedState};
use crate::{
    result::{Error, Result, ResultExt},
    utils::MutexUtils,
};

#[derive(Debug)]
pub struct Sqlite {
    conn: Mutex<Connection>,
}

impl CacheDb for Sqlite {
    fn read_or_create(p: &Path) -> Result<Self> {
        let conn = Connection::open(p)
            .with_context(|| format!("Could not open the history file {}", p.display()))?;
        Self::with_connection(conn)
    }

    fn check_item(&self, source_id: &str, destination: &str) -> Result<(ItemKey, ProcessedState)> {
        self.conn.with_lock(|conn| {
            // Try to get the corresponding row
            let row = conn
                .query_row(
                    "SELECT id, status, work_len FROM items
                    WHERE source_id = ? AND destination = ?",
                    [source_id, destination],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .context("Could not query the item row")?;

            if let Some((id, status, work_len)) = row {
                let status: SqliteProcessedState = status;
                let work_len: Option<i64> = work_len;

                // Simple case: no need to check more of the database
                if status.0 == ProcessedState::Completed || work_len.is_none() {
                    return Ok((id, status.0));
                }

                // Harder case: check the work left
                let mut stmt = conn.prepare("SELECT idx FROM work WHERE item_id = ? ORDER BY idx")?;
                let remaining = stmt
                    .query_map([id], |row| row.get::<_, i64>(0))
                    .context("Could not query the work rows")?
                    .flatten()
                    .flat_map(|idx| usize::try_from(idx).ok())
                    .collect();
                return Ok((id, ProcessedState::RemainingArtifacts(remaining)));
            }

            // Item not in the table, insert it and get back the id
            debug!("Item {source_id} not in the history, inserting it");
            let start_state = ProcessedState::NotProcessed;
            let id = conn
                .query_row(
                    "INSERT INTO items (status, source_id, destination)
                    VALUES (?, ?, ?)
                    RETURNING id",
                    params![SqliteProcessedState(start_state.clone()), source_id, destination],
                    |row| row.get(0),
                )
                .context("Could not insert the item row")?;

            Ok((id, start_state))
        })
    }

    fn assign_work(&self, item: ItemKey, count: usize) -> Result<()> {
        let count = i64::try_from(count)
            .map_err(|_| Error::Invariant(format!("too many artifacts: {count}")))?;

        self.conn.with_lock(|mut conn| {
            let tx = conn.transaction()?;

            debug!("Deleting all old work of item {item}");
            tx.execute("DELETE FROM work WHERE item_id = ?", [item])
                .context("Could not delete the previous work rows")?;

            debug!("Assigning {count} artifacts to item {item}");
            {
                let mut insert = tx.prepare("INSERT INTO work (item_id, idx) VALUES (?, ?)")?;
                for idx in 0..count {
                    insert
                        .execute([item, idx])
                        .context("Could not insert the assigned work rows")?;
                }
            }

            tx.execute(
                "UPDATE items SET work_len = ?, status = ? WHERE id = ?",
                params![
                    count,
                    SqliteProcessedState(ProcessedState::NotProcessed),
                    item
                ],
            )
            .context("Could not update the item work length")?;

            tx.commit()?;
            Ok(())
        })
    }

    fn complete_work(&self, item: ItemKey, index: usize) -> Result<()> {
        let index = i64::try_from(index)
            .map_err(|_| Error::Invariant(format!("artifact index out of range: {index}")))?;

        self.conn.with_lock(|conn| {
            debug!("Complete work {index} of item {item}");
            conn.execute(
                "DELETE FROM work WHERE item_id = ? AND idx = ?",
                [item, index],
            )?;
            Ok(())
        })
    }

    fn set_item_as_completed(&self, item: ItemKey) -> Result<()> {
        self.conn.with_lock(|conn| {
            debug!("Set item {item} as completed");
            conn.execute(
                "UPDATE items SET status = ? WHERE id = ?",
                params![SqliteProcessedState(ProcessedState::Completed), item],
            )
            .context("Could not set the item as completed")?;

            // Delete any potential remaining work
            conn.execute("DELETE FROM work WHERE item_id = ?", [item])
                .context("Could not delete the remaining work")?;
            Ok(())
        })
    }

    fn count_items(&self, filter: Option<ProcessedState>) -> Result<usize> {
        let count: i64 = self.conn.with_lock(|conn| match filter {
            Some(filter) => conn.query_row(
                "SELECT COUNT(id) FROM items WHERE status = ?",
                [SqliteProcessedState(filter)],
                |row| row.get(0),
            ),
            None => conn.query_row("SELECT COUNT(id) FROM items", [], |row| row.get(0)),
        })?;

        Ok(usize::try_from(count).unwrap_or_default())
    }
}

impl Sqlite {
    /// A history kept only for the lifetime of the process
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_tables().context("Could not create the tables")?;
        Ok(db)
    }

    /// Create the tables if they do not already exist
    fn create_tables(&self) -> Result<()> {
        self.conn.with_lock(|conn| {
            conn.execute_batch(
                "BEGIN;
                CREATE TABLE IF NOT EXISTS items (
                    id          INTEGER PRIMARY KEY,
                    status      INTEGER,
                    source_id   TEXT NOT NULL,
                    destination TEXT NOT NULL,
                    work_len    INTEGER,

                    UNIQUE (source_id, destination)
                );
                CREATE TABLE IF NOT EXISTS work (
                    item_id     INTEGER,
                    idx         INTEGER,

                    PRIMARY KEY (item_id, idx),

                    FOREIGN KEY (item_id)
                        REFERENCES items (id)
                        ON DELETE CASCADE
                        ON UPDATE NO ACTION
                );
                COMMIT;",
            )?;
            Ok(())
        })
    }
}

/// Wrapper around [ProcessedState] so that it can be read from/written to sqlite
#[derive(Debug)]
struct SqliteProcessedState(ProcessedState);

impl FromSql for SqliteProcessedState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let state = match value.as_i64()? {
            // Only whether the item is fully completed is stored,
            // the other states come from the work table
            0 => ProcessedState::NotProcessed,
            1 => ProcessedState::Completed,
            n => return Err(FromSqlError::OutOfRange(n)),
        };

        Ok(SqliteProcessedState(state))
    }
}

impl ToSql for SqliteProcessedState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let val = match self.0 {
            ProcessedState::Completed => 1,
            ProcessedState::NotProcessed | ProcessedState::RemainingArtifacts(_) => 0,
        };

        Ok(ToSqlOutput::Owned(Value::Integer(val)))
    }
}
