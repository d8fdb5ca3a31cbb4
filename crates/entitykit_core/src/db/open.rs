//! Connection bootstrap utilities for SQLite-backed stores.
//!
//! # Responsibility
//! - Open store files, creating the parent directory when missing.
//! - Configure connection pragmas shared by every context connection.
//! - Bring the schema up to date before returning a usable connection.
//!
//! # Invariants
//! - Returned connections use the WAL journal so two contexts can read while
//!   the other writes.
//! - Loading is synchronous: the call returns only once the store is ready or
//!   has failed.

use super::migrations::{apply_migrations, pending_migration_count};
use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Flags controlling how a store is brought up on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootFlags {
    /// Apply pending schema migrations automatically.
    pub auto_migrate: bool,
}

impl Default for BootFlags {
    fn default() -> Self {
        Self { auto_migrate: true }
    }
}

/// Opens a store file and brings its schema up to date.
///
/// # Side effects
/// - Creates the parent directory of `path` when it does not exist.
/// - Emits `db_open` logging events with duration and status.
///
/// # Errors
/// - `DbError::MigrationRequired` when migrations are pending and
///   `flags.auto_migrate` is off.
/// - `DbError::UnsupportedSchemaVersion` when the file was written by a newer
///   schema.
pub fn open_db(path: impl AsRef<Path>, flags: BootFlags) -> DbResult<Connection> {
    let path = path.as_ref();
    let started_at = Instant::now();
    info!(
        "event=db_open module=db status=start auto_migrate={}",
        flags.auto_migrate
    );

    let mut conn = match connect(path) {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error duration_ms={} error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err);
        }
    };

    match bootstrap_connection(&mut conn, flags) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error duration_ms={} error_code=db_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn connect(path: &Path) -> DbResult<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(Connection::open(path)?)
}

fn bootstrap_connection(conn: &mut Connection, flags: BootFlags) -> DbResult<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    // journal_mode returns a row, so it cannot go through execute_batch.
    conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    if !flags.auto_migrate {
        let (db_version, pending) = pending_migration_count(conn)?;
        if pending > 0 {
            return Err(DbError::MigrationRequired {
                db_version,
                latest_supported: super::migrations::latest_version(),
            });
        }
    }
    apply_migrations(conn)?;
    Ok(())
}
