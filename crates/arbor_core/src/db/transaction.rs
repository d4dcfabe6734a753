//! Explicit unit-of-work scoping over SQLite transactions.
//!
//! # Invariants
//! - Every attempt runs in its own `BEGIN IMMEDIATE` transaction, so the
//!   write lock is taken before any read that a mutation depends on.
//! - A failed attempt is rolled back before the next one starts.
//! - Only errors reporting `is_retryable() == true` are retried.

use super::DbError;
use log::{debug, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Deserialize;
use std::time::Duration;

/// Retry bounds applied at the transaction boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `0` is treated as `1`.
    pub max_attempts: u32,
    /// Linear backoff between attempts.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 25,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }
}

/// Error types that can tell transient storage contention apart.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for DbError {
    fn is_retryable(&self) -> bool {
        DbError::is_retryable(self)
    }
}

/// Runs `work` inside an immediate transaction and commits on success.
///
/// `label` only feeds log lines. `work` may be invoked more than once, so it
/// must not keep side effects outside the transaction.
pub fn with_transaction<T, E, F>(
    conn: &Connection,
    policy: &RetryPolicy,
    label: &str,
    mut work: F,
) -> Result<T, E>
where
    E: From<DbError> + Retryable + std::fmt::Display,
    F: FnMut(&Transaction<'_>) -> Result<T, E>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match run_once(conn, &mut work) {
            Ok(value) => {
                debug!("event=tx_commit module=db status=ok op={label} attempt={attempt}");
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                warn!(
                    "event=tx_retry module=db status=error op={label} attempt={attempt} error={err}"
                );
                std::thread::sleep(Duration::from_millis(
                    policy.backoff_ms.saturating_mul(u64::from(attempt)),
                ));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn run_once<T, E, F>(conn: &Connection, work: &mut F) -> Result<T, E>
where
    E: From<DbError>,
    F: FnMut(&Transaction<'_>) -> Result<T, E>,
{
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(|err| E::from(DbError::Sqlite(err)))?;
    // Dropping `tx` on the error path rolls the attempt back.
    let value = work(&tx)?;
    tx.commit().map_err(|err| E::from(DbError::Sqlite(err)))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::{with_transaction, RetryPolicy};
    use crate::db::{open_db_in_memory, DbError};
    use std::cell::Cell;

    fn busy() -> DbError {
        DbError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ))
    }

    #[test]
    fn retries_busy_errors_until_success() {
        let conn = open_db_in_memory().unwrap();
        let attempts = Cell::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_ms: 0,
        };

        let value = with_transaction(&conn, &policy, "test", |_tx| {
            attempts.set(attempts.get() + 1);
            if attempts.get() < 3 {
                return Err(busy());
            }
            Ok::<_, DbError>(7)
        })
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn failed_attempt_is_rolled_back() {
        let conn = open_db_in_memory().unwrap();
        let result = with_transaction(&conn, &RetryPolicy::no_retry(), "test", |tx| {
            tx.execute(
                "INSERT INTO recycled_items (item_id, item_path) VALUES ('x', 'x');",
                [],
            )?;
            Err::<(), _>(busy())
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM recycled_items;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
