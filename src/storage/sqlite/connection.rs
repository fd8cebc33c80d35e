//! Connection handling for the `SQLite` store.

use crate::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

/// Acquires the connection mutex, recovering from poisoning.
///
/// A panic inside a transaction rolls the transaction back when it unwinds,
/// so the connection itself stays usable.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("SQLite mutex was poisoned, recovering");
        metrics::counter!("sqlite_mutex_poison_recovery_total").increment(1);
        poisoned.into_inner()
    })
}

/// Opens a database file (or an in-memory database for `None`) and applies pragmas.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the database cannot be opened.
pub fn open(path: Option<&Path>) -> Result<Connection> {
    let conn = match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::operation("create_database_dir", e))?;
            }
            Connection::open(path)
        },
        None => Connection::open_in_memory(),
    }
    .map_err(|e| Error::operation("open_database", e))?;

    // journal_mode returns a row, so pragma_update is used instead of execute_batch.
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| Error::operation("enable_foreign_keys", e))?;
    Ok(conn)
}

/// Records the count and latency of a store operation.
pub fn record_operation(operation: &'static str, start: Instant, ok: bool) {
    let status = if ok { "success" } else { "error" };
    metrics::counter!(
        "storage_operations_total",
        "backend" => "sqlite",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "storage_operation_duration_ms",
        "backend" => "sqlite",
        "operation" => operation
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}
