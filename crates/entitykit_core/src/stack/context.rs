//! Execution contexts: serialized units of work against one store.
//!
//! # Responsibility
//! - Own one store connection, one executor thread and the pending change set
//!   of a main or background context.
//! - Make a context's own unsaved changes visible to its reads.
//! - Persist pending changes transactionally on save.
//!
//! # Invariants
//! - Pending changes are staged per entity id; the last staged change wins.
//! - A failed save keeps every pending change for a later retry.
//! - Both contexts share one WAL store file, so a commit made by one becomes
//!   visible to the other on its next read.

use super::config::ErrorReporter;
use super::executor::{ExecutorHandle, Task};
use crate::db::{open_db, BootFlags, DbError};
use crate::error::{StoreError, StoreResult};
use crate::model::entity::EntityId;
use log::{error, info};
use rusqlite::{params, Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

const UPSERT_OVERWRITE_SQL: &str = "INSERT INTO entities (id, kind, attributes, created_at, updated_at)
VALUES (?1, ?2, ?3, strftime('%s', 'now') * 1000, strftime('%s', 'now') * 1000)
ON CONFLICT (id) DO UPDATE SET
    attributes = excluded.attributes,
    updated_at = excluded.updated_at;";

const DELETE_SQL: &str = "DELETE FROM entities WHERE id = ?1;";

/// Selects which context of a stack an operation runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// Foreground context intended for UI-affine callers.
    Main,
    /// Independent context for work off the foreground.
    Background,
}

impl ContextKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Background => "background",
        }
    }
}

impl Display for ContextKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Conflict resolution applied when pending changes reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// The saving context's attributes replace stored ones (last write wins).
    Overwrite,
}

/// Snapshot of per-context operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    pub fetch_requests: u64,
    pub rows_materialized: u64,
    pub saves: u64,
}

#[derive(Debug, Default)]
struct ContextCounters {
    fetch_requests: AtomicU64,
    rows_materialized: AtomicU64,
    saves: AtomicU64,
}

#[derive(Debug, Clone)]
enum PendingChange {
    Upsert {
        kind: &'static str,
        attributes: String,
    },
    Delete {
        kind: &'static str,
    },
}

impl PendingChange {
    fn kind(&self) -> &'static str {
        match self {
            Self::Upsert { kind, .. } | Self::Delete { kind } => *kind,
        }
    }
}

/// Unsaved changes of one context, applied in first-staged order.
#[derive(Debug, Default)]
struct ChangeSet {
    order: Vec<EntityId>,
    changes: HashMap<EntityId, PendingChange>,
}

impl ChangeSet {
    fn stage(&mut self, id: EntityId, change: PendingChange) {
        if self.changes.insert(id, change).is_none() {
            self.order.push(id);
        }
    }

    fn discard_kind(&mut self, kind: &str) -> usize {
        let before = self.changes.len();
        self.changes.retain(|_, change| change.kind() != kind);
        self.order.retain(|id| self.changes.contains_key(id));
        before - self.changes.len()
    }

    fn len(&self) -> usize {
        self.changes.len()
    }

    fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.changes.clear();
    }

    fn apply(&self, conn: &Connection, policy: MergePolicy) -> rusqlite::Result<()> {
        let upsert_sql = match policy {
            MergePolicy::Overwrite => UPSERT_OVERWRITE_SQL,
        };
        let mut upsert = conn.prepare_cached(upsert_sql)?;
        let mut delete = conn.prepare_cached(DELETE_SQL)?;

        for id in &self.order {
            match self.changes.get(id) {
                Some(PendingChange::Upsert { kind, attributes }) => {
                    upsert.execute(params![id.to_string(), kind, attributes])?;
                }
                Some(PendingChange::Delete { .. }) => {
                    delete.execute([id.to_string()])?;
                }
                None => {}
            }
        }
        Ok(())
    }
}

struct ContextState {
    conn: Connection,
    pending: ChangeSet,
}

/// One serialized unit-of-work boundary against a store.
pub struct Context {
    kind: ContextKind,
    store: String,
    merge_policy: MergePolicy,
    executor: ExecutorHandle,
    reporter: ErrorReporter,
    state: Mutex<ContextState>,
    counters: ContextCounters,
}

impl Context {
    pub(crate) fn open(
        kind: ContextKind,
        store: &str,
        path: &Path,
        flags: BootFlags,
        reporter: ErrorReporter,
    ) -> StoreResult<Self> {
        let conn = open_db(path, flags)?;
        let executor = ExecutorHandle::spawn(format!("entitykit-{store}-{kind}"), kind)?;
        info!("event=context_open module=stack status=ok store={store} context={kind}");

        Ok(Self {
            kind,
            store: store.to_string(),
            merge_policy: MergePolicy::Overwrite,
            executor,
            reporter,
            state: Mutex::new(ContextState {
                conn,
                pending: ChangeSet::default(),
            }),
            counters: ContextCounters::default(),
        })
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    /// Whether this context holds changes that have not been saved yet.
    pub fn has_changes(&self) -> bool {
        !self.lock_state().pending.is_empty()
    }

    pub fn pending_change_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            fetch_requests: self.counters.fetch_requests.load(Ordering::Relaxed),
            rows_materialized: self.counters.rows_materialized.load(Ordering::Relaxed),
            saves: self.counters.saves.load(Ordering::Relaxed),
        }
    }

    /// Submits `work` to this context's executor.
    pub fn perform<T, F>(&self, work: F) -> Task<T>
    where
        T: Send + 'static,
        F: FnOnce() -> StoreResult<T> + Send + 'static,
    {
        Task::submit(&self.executor, self.reporter.clone(), work)
    }

    /// Submits `work` and blocks the calling thread until it has run.
    pub fn perform_and_wait<T, F>(&self, work: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> StoreResult<T> + Send + 'static,
    {
        self.perform(work).wait()
    }

    pub(crate) fn stage_upsert(&self, id: EntityId, kind: &'static str, attributes: String) {
        self.lock_state()
            .pending
            .stage(id, PendingChange::Upsert { kind, attributes });
    }

    pub(crate) fn stage_delete(&self, id: EntityId, kind: &'static str) {
        self.lock_state()
            .pending
            .stage(id, PendingChange::Delete { kind });
    }

    /// Drops every pending change without touching the store.
    ///
    /// Returns how many changes were dropped.
    pub fn discard_changes(&self) -> usize {
        let mut state = self.lock_state();
        let discarded = state.pending.len();
        state.pending.clear();
        info!(
            "event=context_discard module=stack status=ok store={} context={} discarded={}",
            self.store, self.kind, discarded
        );
        discarded
    }

    /// Runs a read against the store as seen by this context, pending
    /// changes included.
    ///
    /// # Errors
    /// - `PersistFailed` when the pending changes cannot be applied. Every
    ///   read on this context fails this way until they are saved or
    ///   discarded.
    pub(crate) fn read<R>(
        &self,
        query: impl FnOnce(&Connection) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut state = self.lock_state();
        let ContextState { conn, pending } = &mut *state;
        if pending.is_empty() {
            return query(conn);
        }

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Err(err) = pending.apply(&tx, self.merge_policy) {
            error!(
                "event=context_read module=stack status=error store={} context={} changes={} error={}",
                self.store,
                self.kind,
                pending.len(),
                err
            );
            return Err(StoreError::PersistFailed {
                context: self.kind,
                source: DbError::Sqlite(err),
            });
        }
        let outcome = query(&tx);
        tx.rollback()?;
        outcome
    }

    pub(crate) fn record_fetch(&self, rows: usize) {
        self.counters.fetch_requests.fetch_add(1, Ordering::Relaxed);
        self.counters
            .rows_materialized
            .fetch_add(rows as u64, Ordering::Relaxed);
    }

    /// Deletes every stored entity of `kind`, bypassing pending changes.
    ///
    /// Pending changes of the same kind are discarded so a following save
    /// cannot resurrect them.
    pub(crate) fn batch_delete(&self, kind: &str) -> StoreResult<usize> {
        let mut state = self.lock_state();
        let discarded = state.pending.discard_kind(kind);
        let removed = state
            .conn
            .execute("DELETE FROM entities WHERE kind = ?1;", [kind])?;
        info!(
            "event=batch_delete module=stack status=ok store={} context={} kind={} removed={} discarded={}",
            self.store, self.kind, kind, removed, discarded
        );
        Ok(removed)
    }

    /// Persists pending changes in one transaction.
    ///
    /// Returns `Ok(false)` when there was nothing to save.
    pub(crate) fn save(&self) -> StoreResult<bool> {
        let started_at = Instant::now();
        let mut state = self.lock_state();
        let ContextState { conn, pending } = &mut *state;
        if pending.is_empty() {
            return Ok(false);
        }

        let changes = pending.len();
        match commit(conn, pending, self.merge_policy) {
            Ok(()) => {
                pending.clear();
                self.counters.saves.fetch_add(1, Ordering::Relaxed);
                info!(
                    "event=context_save module=stack status=ok store={} context={} changes={} duration_ms={}",
                    self.store,
                    self.kind,
                    changes,
                    started_at.elapsed().as_millis()
                );
                Ok(true)
            }
            Err(err) => {
                error!(
                    "event=context_save module=stack status=error store={} context={} changes={} duration_ms={} error={}",
                    self.store,
                    self.kind,
                    changes,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(StoreError::PersistFailed {
                    context: self.kind,
                    source: DbError::Sqlite(err),
                })
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn commit(conn: &mut Connection, pending: &ChangeSet, policy: MergePolicy) -> rusqlite::Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    pending.apply(&tx, policy)?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::{ChangeSet, PendingChange};
    use uuid::Uuid;

    #[test]
    fn last_staged_change_wins_and_keeps_first_position() {
        let mut changes = ChangeSet::default();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        changes.stage(
            first,
            PendingChange::Upsert {
                kind: "Book",
                attributes: "{}".to_string(),
            },
        );
        changes.stage(second, PendingChange::Delete { kind: "Book" });
        changes.stage(first, PendingChange::Delete { kind: "Book" });

        assert_eq!(changes.len(), 2);
        assert_eq!(changes.order, vec![first, second]);
        assert!(matches!(
            changes.changes.get(&first),
            Some(PendingChange::Delete { .. })
        ));
    }

    #[test]
    fn discard_kind_only_drops_that_kind() {
        let mut changes = ChangeSet::default();
        let book = Uuid::new_v4();
        let author = Uuid::new_v4();
        changes.stage(book, PendingChange::Delete { kind: "Book" });
        changes.stage(author, PendingChange::Delete { kind: "Author" });

        assert_eq!(changes.discard_kind("Book"), 1);
        assert_eq!(changes.order, vec![author]);
    }
}
