//! Predicate construction for entity filters.
//!
//! # Responsibility
//! - Build boolean filter expressions with bound parameters, either fluently
//!   through `PredicateBuilder` or from raw filter text.
//! - Render validated expressions into SQL over stored entity attributes.
//!
//! # Invariants
//! - Only well-formed expressions ever become a `Predicate`.
//! - Values are always bound as parameters, never spliced into SQL text.

mod builder;
mod operator;
mod parser;
mod value;

pub(crate) use builder::attribute_sql;
pub use builder::{is_valid_attribute_path, Predicate, PredicateBuilder, PredicateError};
pub use operator::{LogicalOperator, PredicateOperator};
pub use parser::FilterSyntaxError;
pub use value::PredicateValue;
