use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Context};
use rusqlite::{
    params, types::Value, Connection, ErrorCode, OpenFlags, OptionalExtension,
    TransactionBehavior,
};
use tracing::{debug, trace, warn};

use crate::{
    error::{MalformedRecord, Unavailable},
    lease::{
        Condition, LeaseRecord, ATTR_LAST_UPDATE, ATTR_LEADER_NAME, ATTR_LOCK_NAME, LOCK_NAME,
    },
    Error, Result,
};

use super::{LeaseStore, WriteOutcome};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Lease store backed by a SQLite table.
///
/// Nodes sharing a database file contend on one row keyed by
/// [`LOCK_NAME`]. Each conditional write runs in an `IMMEDIATE`
/// transaction, which serializes writers on the database lock.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    table: Arc<str>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P, table: &str) -> Result<SqliteStore> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("opening lease database {}", path.display()))?;
        SqliteStore::from_connection(conn, table)
    }

    /// Open a lease database that must already exist and hold `table`.
    /// Nothing is created.
    pub fn open_existing<P: AsRef<Path>>(path: P, table: &str) -> Result<SqliteStore> {
        let path = path.as_ref();
        validate_table_name(table)?;
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("opening lease database {}", path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        if found.is_none() {
            return Err(anyhow!(
                "lease table {} not found in {}",
                table,
                path.display()
            ));
        }
        Ok(SqliteStore::new(conn, table))
    }

    pub fn open_in_memory(table: &str) -> Result<SqliteStore> {
        SqliteStore::from_connection(Connection::open_in_memory()?, table)
    }

    fn from_connection(conn: Connection, table: &str) -> Result<SqliteStore> {
        validate_table_name(table)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // LastUpdate is left untyped so that foreign writers' values are
        // read back as stored and can be reported as malformed.
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                {ATTR_LOCK_NAME} TEXT PRIMARY KEY NOT NULL,
                {ATTR_LEADER_NAME} TEXT,
                {ATTR_LAST_UPDATE}
            )"
        ))
        .with_context(|| format!("creating lease table {}", table))?;
        debug!(table, "lease table ready");
        Ok(SqliteStore::new(conn, table))
    }

    fn new(conn: Connection, table: &str) -> SqliteStore {
        SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
            table: Arc::from(table),
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        let table = self.table.clone();
        let res = tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| Unavailable::new("connection lock poisoned"))?;
            f(&mut conn, &table)
        })
        .await
        .context(Unavailable::new("store task did not complete"))?;
        res.map_err(tag_transient)
    }
}

/// Mark SQLite faults that a later attempt may not hit as [`Unavailable`].
fn tag_transient(err: Error) -> Error {
    let transient = err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(failure, _))
                if matches!(
                    failure.code,
                    ErrorCode::DatabaseBusy
                        | ErrorCode::DatabaseLocked
                        | ErrorCode::SystemIoFailure
                        | ErrorCode::CannotOpen
                )
        )
    });
    if transient {
        err.context(Unavailable::new("sqlite"))
    } else {
        err
    }
}

fn validate_table_name(table: &str) -> Result<()> {
    let valid = !table.is_empty()
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !table.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(anyhow!("invalid table name {:?}", table))
    }
}

type RawRow = (Option<String>, Value);

fn fetch_row(conn: &Connection, table: &str) -> rusqlite::Result<Option<RawRow>> {
    conn.query_row(
        &format!(
            "SELECT {ATTR_LEADER_NAME}, {ATTR_LAST_UPDATE} FROM {table} WHERE {ATTR_LOCK_NAME} = ?1"
        ),
        params![LOCK_NAME],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
}

fn decode(row: Option<RawRow>) -> std::result::Result<LeaseRecord, MalformedRecord> {
    let Some((owner, last_update)) = row else {
        return Ok(LeaseRecord::unset());
    };
    let last_renewal = match last_update {
        Value::Null => return Ok(LeaseRecord::unset()),
        Value::Integer(secs) => secs,
        Value::Text(text) => text.trim().parse::<i64>().map_err(|_| {
            MalformedRecord::new(&format!("{} = {:?}", ATTR_LAST_UPDATE, text))
        })?,
        other => {
            return Err(MalformedRecord::new(&format!(
                "{} has type {}",
                ATTR_LAST_UPDATE,
                other.data_type()
            )))
        }
    };
    Ok(match owner {
        Some(owner) => LeaseRecord {
            owner: Some(owner),
            last_renewal,
        },
        None => LeaseRecord::unset(),
    })
}

impl LeaseStore for SqliteStore {
    async fn read(&mut self) -> Result<LeaseRecord> {
        self.blocking(|conn, table| {
            let row = fetch_row(conn, table).context("reading lease")?;
            decode(row).map_err(Error::new)
        })
        .await
    }

    async fn conditional_write(
        &mut self,
        record: &LeaseRecord,
        condition: &Condition,
    ) -> Result<WriteOutcome> {
        let record = record.clone();
        let condition = condition.clone();
        self.blocking(move |conn, table| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current = decode(fetch_row(&tx, table)?).unwrap_or_else(|err| {
                warn!(%err, "evaluating condition against malformed lease as unset");
                LeaseRecord::unset()
            });
            if !condition.holds(&current) {
                trace!(%current, %condition, "condition failed");
                return Ok(WriteOutcome::ConditionFailed);
            }
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO {table} ({ATTR_LOCK_NAME}, {ATTR_LEADER_NAME}, {ATTR_LAST_UPDATE})
                    VALUES (?1, ?2, ?3)"
                ),
                params![LOCK_NAME, record.owner, record.last_renewal],
            )?;
            tx.commit()?;
            Ok(WriteOutcome::Written)
        })
        .await
        .context("conditional write")
    }
}
