//! One persistence stack per store identity.
//!
//! # Responsibility
//! - Open the store once with the configured boot flags and record the outcome
//!   as an explicit state.
//! - Create the main and background contexts on first access and reuse them.
//! - Offer a swallowing save for flushes and a propagating save for callers.
//!
//! # Invariants
//! - A failed open is never retried implicitly; only `reopen` retries.
//! - Each context is created at most once per stack.

use super::config::{ErrorReporter, StoreConfiguration, StoreIdentity};
use super::context::{Context, ContextKind};
use super::executor::Task;
use crate::db::{open_db, BootFlags};
use crate::error::{StoreError, StoreResult};
use log::info;
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Lifecycle of the underlying store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackState {
    Uninitialized,
    Ready,
    /// Open or migration failed with the recorded reason.
    Failed(String),
}

/// Store connection bundle: resolved location plus main and background contexts.
pub struct Stack {
    configuration: StoreConfiguration,
    store_path: PathBuf,
    state: Mutex<StackState>,
    reporter: ErrorReporter,
    main: OnceCell<Arc<Context>>,
    background: OnceCell<Arc<Context>>,
}

impl Stack {
    pub(crate) fn new(configuration: StoreConfiguration) -> Self {
        let store_path = configuration.identity().resolved_path();
        let reporter = ErrorReporter::new(
            configuration.identity().name(),
            configuration.error_handler(),
        );
        Self {
            configuration,
            store_path,
            state: Mutex::new(StackState::Uninitialized),
            reporter,
            main: OnceCell::new(),
            background: OnceCell::new(),
        }
    }

    pub fn identity(&self) -> &StoreIdentity {
        self.configuration.identity()
    }

    pub fn configuration(&self) -> &StoreConfiguration {
        &self.configuration
    }

    pub fn name(&self) -> &str {
        self.identity().name()
    }

    /// Resolved store file path.
    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn state(&self) -> StackState {
        self.lock_state().clone()
    }

    /// Opens the store unless that already happened.
    ///
    /// # Errors
    /// - `StoreOpenFailed` when this or an earlier open failed. A failed
    ///   stack stays failed until [`Stack::reopen`] succeeds.
    pub fn ensure_initialized(&self) -> StoreResult<()> {
        let mut state = self.lock_state();
        match &*state {
            StackState::Ready => return Ok(()),
            StackState::Failed(reason) => {
                return Err(StoreError::StoreOpenFailed {
                    store: self.name().to_string(),
                    reason: reason.clone(),
                })
            }
            StackState::Uninitialized => {}
        }
        self.open_locked(&mut state)
    }

    /// Retries opening a store that is not ready.
    pub fn reopen(&self) -> StoreResult<()> {
        let mut state = self.lock_state();
        if *state == StackState::Ready {
            return Ok(());
        }
        self.open_locked(&mut state)
    }

    /// Returns the context of `kind`, creating it on first access.
    ///
    /// # Errors
    /// - `StoreOpenFailed` when the store is not ready.
    pub fn context(&self, kind: ContextKind) -> StoreResult<Arc<Context>> {
        self.ensure_initialized()?;
        let cell = match kind {
            ContextKind::Main => &self.main,
            ContextKind::Background => &self.background,
        };
        cell.get_or_try_init(|| {
            Context::open(
                kind,
                self.name(),
                &self.store_path,
                self.boot_flags(),
                self.reporter.clone(),
            )
            .map(Arc::new)
        })
        .map(Arc::clone)
    }

    pub fn main_context(&self) -> StoreResult<Arc<Context>> {
        self.context(ContextKind::Main)
    }

    pub fn background_context(&self) -> StoreResult<Arc<Context>> {
        self.context(ContextKind::Background)
    }

    /// Returns the context of `kind` only if it was already created.
    pub fn existing_context(&self, kind: ContextKind) -> Option<Arc<Context>> {
        match kind {
            ContextKind::Main => self.main.get().cloned(),
            ContextKind::Background => self.background.get().cloned(),
        }
    }

    /// Persists pending changes of `kind` on its executor, reporting failure
    /// to the error handler instead of the caller.
    pub fn save(&self, kind: ContextKind) {
        let Some(context) = self.existing_context(kind) else {
            return;
        };
        let worker = Arc::clone(&context);
        if let Err(err) = context.perform_and_wait(move || worker.save()) {
            self.reporter.report(&err);
        }
    }

    /// Persists pending changes of `kind` on its executor.
    ///
    /// # Errors
    /// - `PersistFailed` when the commit fails; pending changes are kept.
    pub fn save_changes(&self, kind: ContextKind) -> StoreResult<()> {
        let context = self.context(kind)?;
        let worker = Arc::clone(&context);
        context.perform_and_wait(move || worker.save()).map(|_| ())
    }

    /// Saves main, then background.
    pub fn flush(&self) {
        self.save(ContextKind::Main);
        self.save(ContextKind::Background);
    }

    /// Task already completed with `err`, for work that never reached a
    /// context.
    pub(crate) fn failed_task<T: Send + 'static>(
        &self,
        kind: ContextKind,
        err: StoreError,
    ) -> Task<T> {
        Task::ready(kind, self.reporter.clone(), Err(err))
    }

    fn boot_flags(&self) -> BootFlags {
        BootFlags {
            auto_migrate: self.configuration.auto_migrate(),
        }
    }

    fn open_locked(&self, state: &mut StackState) -> StoreResult<()> {
        let started_at = Instant::now();
        match open_db(&self.store_path, self.boot_flags()) {
            Ok(_conn) => {
                *state = StackState::Ready;
                info!(
                    "event=store_open module=stack status=ok store={} path={} duration_ms={}",
                    self.name(),
                    self.store_path.display(),
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                *state = StackState::Failed(reason.clone());
                let err = StoreError::StoreOpenFailed {
                    store: self.name().to_string(),
                    reason,
                };
                self.reporter.report(&err);
                Err(err)
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, StackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
