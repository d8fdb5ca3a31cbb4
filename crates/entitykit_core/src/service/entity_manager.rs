//! Entity manager: repository operations scheduled on context executors.
//!
//! # Responsibility
//! - Expose every repository operation as one [`Task`]-returning method.
//! - Run each operation on the executor of the context it targets.
//!
//! # Invariants
//! - Work on one context completes in submission order.
//! - A task whose context cannot be resolved completes with that error.

use crate::error::StoreResult;
use crate::model::entity::{Entity, Managed};
use crate::predicate::Predicate;
use crate::repo::entity_repo::Repository;
use crate::repo::query::{Pagination, SortSpec};
use crate::stack::{ContextKind, Stack, StoreConfiguration, StoreRegistry, Task};
use std::sync::Arc;

/// Asynchronous facade over [`Repository`] for one entity kind.
pub struct EntityManager<T: Entity> {
    repository: Arc<Repository<T>>,
}

impl<T: Entity> Clone for EntityManager<T> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<T: Entity> EntityManager<T> {
    pub fn new(
        registry: &StoreRegistry,
        configuration: StoreConfiguration,
        default_sort: SortSpec,
    ) -> Self {
        Self::from_repository(Repository::new(registry, configuration, default_sort))
    }

    pub fn from_repository(repository: Repository<T>) -> Self {
        Self {
            repository: Arc::new(repository),
        }
    }

    pub fn repository(&self) -> &Repository<T> {
        &self.repository
    }

    pub fn stack(&self) -> &Arc<Stack> {
        self.repository.stack()
    }

    pub fn save_changes(&self, kind: ContextKind) -> Task<()> {
        self.schedule(kind, move |repository| repository.save_changes(kind))
    }

    pub fn create(&self, kind: ContextKind) -> Task<Managed<T>>
    where
        T: Default,
    {
        self.schedule(kind, move |repository| repository.create(kind))
    }

    pub fn insert(&self, kind: ContextKind, value: T) -> Task<Managed<T>> {
        self.schedule(kind, move |repository| repository.insert(kind, value))
    }

    /// Stages `entity` on its owning context.
    pub fn update(&self, entity: Managed<T>) -> Task<()> {
        self.schedule(entity.context(), move |repository| {
            repository.update(&entity)
        })
    }

    pub fn fetch_all(
        &self,
        kind: ContextKind,
        sort: Option<SortSpec>,
        pagination: Option<Pagination>,
    ) -> Task<Vec<Managed<T>>> {
        self.schedule(kind, move |repository| {
            repository.fetch_all(kind, sort, pagination)
        })
    }

    pub fn count(&self, kind: ContextKind, sort: Option<SortSpec>) -> Task<u64> {
        self.schedule(kind, move |repository| repository.count(kind, sort))
    }

    pub fn search_query(
        &self,
        kind: ContextKind,
        query: impl Into<String>,
        sort: Option<SortSpec>,
        pagination: Option<Pagination>,
    ) -> Task<Vec<Managed<T>>> {
        let query = query.into();
        self.schedule(kind, move |repository| {
            repository.search_query(kind, &query, sort, pagination)
        })
    }

    pub fn search(
        &self,
        kind: ContextKind,
        predicate: Predicate,
        sort: Option<SortSpec>,
        pagination: Option<Pagination>,
    ) -> Task<Vec<Managed<T>>> {
        self.schedule(kind, move |repository| {
            repository.search(kind, &predicate, sort, pagination)
        })
    }

    pub fn exists(&self, kind: ContextKind, predicate: Predicate) -> Task<bool> {
        self.schedule(kind, move |repository| repository.exists(kind, &predicate))
    }

    /// Deletes `entity` on its owning context and saves that context.
    pub fn delete(&self, entity: Managed<T>) -> Task<()> {
        self.schedule(entity.context(), move |repository| {
            repository.delete(&entity)
        })
    }

    pub fn delete_all(&self, kind: ContextKind) -> Task<usize> {
        self.schedule(kind, move |repository| repository.delete_all(kind))
    }

    fn schedule<R, F>(&self, kind: ContextKind, work: F) -> Task<R>
    where
        R: Send + 'static,
        F: FnOnce(&Repository<T>) -> StoreResult<R> + Send + 'static,
    {
        let context = match self.repository.context(kind) {
            Ok(context) => context,
            Err(err) => return self.stack().failed_task(kind, err),
        };
        let repository = Arc::clone(&self.repository);
        context.perform(move || work(&repository))
    }
}
