//! Generic data-access layer over an embedded SQLite entity store.
//! Stores are deduplicated by identity; each exposes a main and a background
//! context that repositories and managers read from and write through.

pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod predicate;
pub mod repo;
pub mod service;
pub mod stack;

pub use error::{StoreError, StoreResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::entity::{Entity, EntityId, Managed};
pub use predicate::{
    FilterSyntaxError, LogicalOperator, Predicate, PredicateBuilder, PredicateError,
    PredicateOperator, PredicateValue,
};
pub use repo::entity_repo::Repository;
pub use repo::query::{Pagination, QueryDescriptor, SortSpec};
pub use service::entity_manager::EntityManager;
pub use stack::{
    default_store_directory, Context, ContextKind, ContextStats, ErrorHandler, MergePolicy, Stack,
    StackState, StoreConfiguration, StoreIdentity, StoreRegistry, Task, STORE_DIR_ENV,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
