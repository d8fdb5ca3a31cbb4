//! Entity model contracts shared by repositories and managers.
//!
//! # Responsibility
//! - Define the trait entity kinds implement and the handle that binds an
//!   entity to its owning context.
//!
//! # Invariants
//! - Entity schema is owned by the caller; the store only sees serde output.

pub mod entity;
