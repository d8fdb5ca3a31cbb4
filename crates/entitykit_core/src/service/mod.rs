//! Manager services scheduling repository work on context executors.
//!
//! # Responsibility
//! - Offer blocking, completion and success-only forms of every operation
//!   through one task handle.
//! - Keep callers decoupled from executor and SQL details.

pub mod entity_manager;
