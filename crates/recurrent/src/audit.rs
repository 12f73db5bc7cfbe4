//! Execution audit log store.
//!
//! One row per (job key, trigger key) pair holding the most recent outcome.
//! Writers go through an [`AuditTransaction`]: look up the pair's row id,
//! then update it or insert a new row, then commit or roll back.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::{AuditError, AuditStoreConfig, ExecState, ExecutionAuditRecord};

/// Values written for one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub state: ExecState,
    pub error_message: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// A store holding the latest execution outcome per (job, trigger) pair.
pub trait AuditStore: Send + Sync {
    /// Open a transaction covering only audit writes.
    fn begin(&self) -> Result<Box<dyn AuditTransaction + '_>, AuditError>;

    /// Latest record for a pair.
    fn latest(
        &self,
        job_key: &str,
        trigger_key: &str,
    ) -> Result<Option<ExecutionAuditRecord>, AuditError>;

    /// All records, most recently executed first.
    fn list(&self) -> Result<Vec<ExecutionAuditRecord>, AuditError>;
}

/// Write side of the store. Dropping without commit rolls back.
pub trait AuditTransaction {
    /// Id of the existing row for a pair, if any.
    fn find_record_id(&mut self, job_key: &str, trigger_key: &str)
    -> Result<Option<i64>, AuditError>;

    /// Overwrite state, message and time of a row. Returns affected rows.
    fn update_record(&mut self, id: i64, entry: &AuditEntry) -> Result<usize, AuditError>;

    /// Insert a row for a pair. Returns affected rows.
    fn insert_record(
        &mut self,
        job_key: &str,
        trigger_key: &str,
        entry: &AuditEntry,
    ) -> Result<usize, AuditError>;

    fn commit(self: Box<Self>) -> Result<(), AuditError>;

    fn rollback(self: Box<Self>) -> Result<(), AuditError>;
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS task_execution_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_key TEXT NOT NULL,
        trigger_key TEXT NOT NULL,
        exec_state INTEGER NOT NULL,
        error_message TEXT,
        execute_time TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_task_execution_log_pair
        ON task_execution_log(job_key, trigger_key);
";

const SELECT_ID_SQL: &str =
    "SELECT id FROM task_execution_log WHERE job_key = ?1 AND trigger_key = ?2";
const UPDATE_SQL: &str = "UPDATE task_execution_log
     SET exec_state = ?1, error_message = ?2, execute_time = ?3 WHERE id = ?4";
const INSERT_SQL: &str = "INSERT INTO task_execution_log
     (job_key, trigger_key, exec_state, error_message, execute_time)
     VALUES (?1, ?2, ?3, ?4, ?5)";
const SELECT_RECORD_SQL: &str = "SELECT id, job_key, trigger_key, exec_state, error_message, execute_time
     FROM task_execution_log";

/// SQLite-backed audit log.
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

impl SqliteAuditStore {
    /// Open or create the database described by `config`.
    pub fn open(config: &AuditStoreConfig) -> Result<Self, AuditError> {
        let conn = Connection::open(&config.database_path)?;
        conn.busy_timeout(config.busy_timeout())?;
        if config.wal {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        }
        let store = Self::with_connection(conn)?;
        info!(path = %config.database_path.display(), "audit log initialized");
        Ok(store)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, AuditError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AuditError> {
        self.conn.lock().map_err(|_| AuditError::LockPoisoned)
    }
}

impl AuditStore for SqliteAuditStore {
    fn begin(&self) -> Result<Box<dyn AuditTransaction + '_>, AuditError> {
        let conn = self.lock()?;
        // Write lock up front; no read-to-write upgrade later.
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTransaction {
            conn,
            finished: false,
        }))
    }

    fn latest(
        &self,
        job_key: &str,
        trigger_key: &str,
    ) -> Result<Option<ExecutionAuditRecord>, AuditError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!(
                    "{SELECT_RECORD_SQL} WHERE job_key = ?1 AND trigger_key = ?2 ORDER BY id DESC LIMIT 1"
                ),
                params![job_key, trigger_key],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(RawRecord::into_record).transpose()
    }

    fn list(&self) -> Result<Vec<ExecutionAuditRecord>, AuditError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_RECORD_SQL} ORDER BY execute_time DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map([], RawRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawRecord::into_record).collect()
    }
}

struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl AuditTransaction for SqliteTransaction<'_> {
    fn find_record_id(
        &mut self,
        job_key: &str,
        trigger_key: &str,
    ) -> Result<Option<i64>, AuditError> {
        let id = self
            .conn
            .query_row(SELECT_ID_SQL, params![job_key, trigger_key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(id)
    }

    fn update_record(&mut self, id: i64, entry: &AuditEntry) -> Result<usize, AuditError> {
        let rows = self.conn.execute(
            UPDATE_SQL,
            params![
                entry.state.code(),
                entry.error_message,
                format_time(&entry.executed_at),
                id,
            ],
        )?;
        Ok(rows)
    }

    fn insert_record(
        &mut self,
        job_key: &str,
        trigger_key: &str,
        entry: &AuditEntry,
    ) -> Result<usize, AuditError> {
        let rows = self.conn.execute(
            INSERT_SQL,
            params![
                job_key,
                trigger_key,
                entry.state.code(),
                entry.error_message,
                format_time(&entry.executed_at),
            ],
        )?;
        Ok(rows)
    }

    fn commit(mut self: Box<Self>) -> Result<(), AuditError> {
        // On failure the drop below rolls back.
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), AuditError> {
        // On failure the drop below retries.
        self.conn.execute_batch("ROLLBACK")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "failed to roll back abandoned audit transaction");
            }
        }
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn format_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

struct RawRecord {
    id: i64,
    job_key: String,
    trigger_key: String,
    exec_state: i64,
    error_message: Option<String>,
    execute_time: String,
}

impl RawRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            job_key: row.get(1)?,
            trigger_key: row.get(2)?,
            exec_state: row.get(3)?,
            error_message: row.get(4)?,
            execute_time: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<ExecutionAuditRecord, AuditError> {
        let executed_at = DateTime::parse_from_rfc3339(&self.execute_time)
            .map_err(|_| AuditError::InvalidTimestamp(self.execute_time.clone()))?
            .with_timezone(&Utc);
        Ok(ExecutionAuditRecord {
            id: self.id,
            job_key: self.job_key,
            trigger_key: self.trigger_key,
            state: ExecState::from_code(self.exec_state)?,
            error_message: self.error_message,
            executed_at,
        })
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryLog {
    rows: Vec<ExecutionAuditRecord>,
    next_id: i64,
}

/// Audit log kept in process memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    log: Mutex<MemoryLog>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryLog>, AuditError> {
        self.log.lock().map_err(|_| AuditError::LockPoisoned)
    }
}

impl AuditStore for MemoryAuditStore {
    fn begin(&self) -> Result<Box<dyn AuditTransaction + '_>, AuditError> {
        let guard = self.lock()?;
        let staged = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, staged }))
    }

    fn latest(
        &self,
        job_key: &str,
        trigger_key: &str,
    ) -> Result<Option<ExecutionAuditRecord>, AuditError> {
        Ok(self
            .lock()?
            .rows
            .iter()
            .find(|r| r.job_key == job_key && r.trigger_key == trigger_key)
            .cloned())
    }

    fn list(&self) -> Result<Vec<ExecutionAuditRecord>, AuditError> {
        let mut rows = self.lock()?.rows.clone();
        rows.sort_by(|a, b| b.executed_at.cmp(&a.executed_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }
}

struct MemoryTransaction<'a> {
    guard: MutexGuard<'a, MemoryLog>,
    staged: MemoryLog,
}

impl AuditTransaction for MemoryTransaction<'_> {
    fn find_record_id(
        &mut self,
        job_key: &str,
        trigger_key: &str,
    ) -> Result<Option<i64>, AuditError> {
        Ok(self
            .staged
            .rows
            .iter()
            .find(|r| r.job_key == job_key && r.trigger_key == trigger_key)
            .map(|r| r.id))
    }

    fn update_record(&mut self, id: i64, entry: &AuditEntry) -> Result<usize, AuditError> {
        let mut rows = 0;
        for record in self.staged.rows.iter_mut().filter(|r| r.id == id) {
            record.state = entry.state;
            record.error_message = entry.error_message.clone();
            record.executed_at = entry.executed_at;
            rows += 1;
        }
        Ok(rows)
    }

    fn insert_record(
        &mut self,
        job_key: &str,
        trigger_key: &str,
        entry: &AuditEntry,
    ) -> Result<usize, AuditError> {
        self.staged.next_id += 1;
        self.staged.rows.push(ExecutionAuditRecord {
            id: self.staged.next_id,
            job_key: job_key.to_string(),
            trigger_key: trigger_key.to_string(),
            state: entry.state,
            error_message: entry.error_message.clone(),
            executed_at: entry.executed_at,
        });
        Ok(1)
    }

    fn commit(self: Box<Self>) -> Result<(), AuditError> {
        let MemoryTransaction { mut guard, staged } = *self;
        *guard = staged;
        debug!(rows = guard.rows.len(), "memory audit transaction committed");
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), AuditError> {
        Ok(())
    }
}
