//! Store registry, persistence stacks and execution contexts.
//!
//! # Responsibility
//! - Keep exactly one persistence stack per store identity.
//! - Expose main and background contexts, each a serialized executor with
//!   its own unit of work.
//! - Route failures nobody awaits to the configured error handler.
//!
//! # Invariants
//! - Find-or-create of a stack is one atomic step under the registry lock.
//! - Work on one context runs in submission order; the two contexts of a
//!   stack run independently and resolve conflicts with `MergePolicy`.

mod config;
mod context;
mod executor;
mod registry;
#[allow(clippy::module_inception)]
mod stack;

pub use config::{
    default_store_directory, ErrorHandler, StoreConfiguration, StoreIdentity, STORE_DIR_ENV,
};
pub use context::{Context, ContextKind, ContextStats, MergePolicy};
pub use executor::Task;
pub use registry::StoreRegistry;
pub use stack::{Stack, StackState};
