//! Entity contract and context-bound entity handle.
//!
//! # Responsibility
//! - Define what a storable entity kind must provide.
//! - Bind each loaded or created entity to the context that owns it.
//!
//! # Invariants
//! - `EntityId` is stable for the entity lifetime and never reused.
//! - A `Managed` value belongs to exactly one context at a time.

use crate::stack::ContextKind;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::ops::{Deref, DerefMut};
use uuid::Uuid;

/// Stable identifier of one stored entity.
pub type EntityId = Uuid;

/// A storable entity kind.
///
/// Attributes are persisted as the serde JSON form of the value, which must be
/// a JSON object. Attribute names used in predicates and sort keys refer to
/// the fields of that object.
pub trait Entity: Serialize + DeserializeOwned + Send + 'static {
    /// Kind name scoping every query issued for this type.
    const ENTITY_NAME: &'static str;
}

/// Entity value bound to the context it was created in or fetched from.
#[derive(Debug, Clone, PartialEq)]
pub struct Managed<T> {
    id: EntityId,
    context: ContextKind,
    value: T,
}

impl<T> Managed<T> {
    pub(crate) fn new(id: EntityId, context: ContextKind, value: T) -> Self {
        Self { id, context, value }
    }

    pub(crate) fn allocate(context: ContextKind, value: T) -> Self {
        Self::new(Uuid::new_v4(), context, value)
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Context owning this entity; deletes and updates persist through it.
    pub fn context(&self) -> ContextKind {
        self.context
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

impl<T> Deref for Managed<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Managed<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}
