//! Durable score ledger backed by SQLite.
//!
//! The `action_records` primary key on `action_id` is the replay-prevention
//! guarantee: a constraint violation on insert means the logical action was
//! already applied, and the transaction rolls back without touching the
//! aggregate. The aggregate upsert rides in the same immediate transaction,
//! so two distinct actions for one principal can never lose an update.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags, TransactionBehavior, params};
use thiserror::Error;

use crate::core::{ActionRecord, ApplyOutcome, PrincipalId, ScoreAggregate};
use crate::error::Transience;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Lock-wait timeout or writer contention; retry may succeed.
    #[error("ledger busy: {0}")]
    Busy(rusqlite::Error),
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),
    #[error("ledger connection lock poisoned")]
    Poisoned,
    #[error("ledger corrupt: {reason}")]
    Corrupt { reason: String },
}

impl LedgerError {
    pub fn transience(&self) -> Transience {
        match self {
            LedgerError::Busy(_) => Transience::Retryable,
            LedgerError::Sqlite(_) => Transience::Unknown,
            LedgerError::Poisoned | LedgerError::Corrupt { .. } => Transience::Permanent,
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        if is_busy(&err) {
            LedgerError::Busy(err)
        } else {
            LedgerError::Sqlite(err)
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ConstraintViolation)
    )
}

pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    pub fn open(path: &Path, busy_timeout_ms: u64) -> Result<Self, LedgerError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::bootstrap(conn, busy_timeout_ms)
    }

    pub fn open_in_memory(busy_timeout_ms: u64) -> Result<Self, LedgerError> {
        Self::bootstrap(Connection::open_in_memory()?, busy_timeout_ms)
    }

    fn bootstrap(conn: Connection, busy_timeout_ms: u64) -> Result<Self, LedgerError> {
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", busy_timeout_ms as i64)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS action_records (
                action_id TEXT PRIMARY KEY,
                principal_id TEXT NOT NULL,
                action_type TEXT NOT NULL,
                value INTEGER NOT NULL,
                occurred_at_ms INTEGER NOT NULL,
                applied_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS action_records_principal
                ON action_records(principal_id);
            CREATE TABLE IF NOT EXISTS score_aggregates (
                principal_id TEXT PRIMARY KEY,
                current_score INTEGER NOT NULL,
                total_actions INTEGER NOT NULL,
                last_action_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS score_aggregates_by_score
                ON score_aggregates(current_score DESC, principal_id ASC);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Apply one action exactly once.
    ///
    /// Insert and aggregate update commit atomically; a duplicate action id
    /// rolls the transaction back and reports `Duplicate` without error.
    pub fn apply(&self, record: &ActionRecord) -> Result<ApplyOutcome, LedgerError> {
        let mut conn = self.conn.lock().map_err(|_| LedgerError::Poisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = tx.execute(
            "INSERT INTO action_records
                (action_id, principal_id, action_type, value, occurred_at_ms, applied_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.action_id.as_str(),
                record.principal_id.as_str(),
                record.action_type.as_str(),
                record.value,
                record.occurred_at_ms as i64,
                record.applied_at_ms as i64,
            ],
        );
        if let Err(err) = inserted {
            if is_unique_violation(&err) {
                tx.rollback()?;
                return Ok(ApplyOutcome::Duplicate);
            }
            return Err(err.into());
        }

        tx.execute(
            "INSERT INTO score_aggregates
                (principal_id, current_score, total_actions, last_action_at_ms)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(principal_id) DO UPDATE SET
                current_score = current_score + excluded.current_score,
                total_actions = total_actions + 1,
                last_action_at_ms = excluded.last_action_at_ms",
            params![
                record.principal_id.as_str(),
                record.value,
                record.applied_at_ms as i64,
            ],
        )?;
        let new_score: i64 = tx.query_row(
            "SELECT current_score FROM score_aggregates WHERE principal_id = ?1",
            params![record.principal_id.as_str()],
            |row| row.get(0),
        )?;

        tx.commit()?;
        Ok(ApplyOutcome::Committed { new_score })
    }

    pub fn aggregate(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<Option<ScoreAggregate>, LedgerError> {
        let conn = self.conn.lock().map_err(|_| LedgerError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT current_score, total_actions, last_action_at_ms
             FROM score_aggregates WHERE principal_id = ?1",
        )?;
        let mut rows = stmt.query(params![principal_id.as_str()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(ScoreAggregate {
            principal_id: principal_id.clone(),
            current_score: row.get(0)?,
            total_actions: row.get::<_, i64>(1)? as u64,
            last_action_at_ms: row.get::<_, i64>(2)? as u64,
        }))
    }

    /// Top `k` aggregates, score descending, ties broken by ascending
    /// principal id so repeated reads are reproducible.
    pub fn top(&self, k: usize) -> Result<Vec<(PrincipalId, i64)>, LedgerError> {
        let conn = self.conn.lock().map_err(|_| LedgerError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT principal_id, current_score FROM score_aggregates
             ORDER BY current_score DESC, principal_id ASC
             LIMIT ?1",
        )?;
        let mut rows = stmt.query(params![k as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            let principal_id = PrincipalId::new(raw).map_err(|err| LedgerError::Corrupt {
                reason: format!("stored principal id rejected: {err}"),
            })?;
            out.push((principal_id, row.get(1)?));
        }
        Ok(out)
    }

    /// Sum of committed values for one principal; the aggregate invariant
    /// check used by tests and audits.
    pub fn committed_value_sum(&self, principal_id: &PrincipalId) -> Result<i64, LedgerError> {
        let conn = self.conn.lock().map_err(|_| LedgerError::Poisoned)?;
        let sum: i64 = conn.query_row(
            "SELECT COALESCE(SUM(value), 0) FROM action_records WHERE principal_id = ?1",
            params![principal_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(sum)
    }

    pub fn action_count(&self) -> Result<u64, LedgerError> {
        let conn = self.conn.lock().map_err(|_| LedgerError::Poisoned)?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM action_records", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
