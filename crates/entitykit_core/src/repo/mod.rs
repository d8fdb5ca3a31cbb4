//! Repository layer: query descriptors and the generic entity repository.
//!
//! # Responsibility
//! - Turn sort, pagination and predicate inputs into one store query.
//! - Keep SQL details out of the manager layer.
//!
//! # Invariants
//! - Reads through a context see that context's unsaved changes.
//! - Sort keys and attribute paths are validated before they reach SQL.

pub mod entity_repo;
pub mod query;
