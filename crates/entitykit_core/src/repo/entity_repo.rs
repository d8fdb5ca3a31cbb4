//! Generic repository over one entity kind.
//!
//! # Responsibility
//! - Build one query descriptor per call from the repository defaults and the
//!   caller's sort, pagination and predicate.
//! - Execute reads against the selected context, including its unsaved
//!   changes, and stage writes into it.
//!
//! # Invariants
//! - Every query is scoped to `T::ENTITY_NAME`.
//! - Stored attributes are always a JSON object.
//! - `delete`/`update` act on the context that owns the entity.

use super::query::{Pagination, QueryDescriptor, SortSpec};
use crate::error::{StoreError, StoreResult};
use crate::model::entity::{Entity, EntityId, Managed};
use crate::predicate::Predicate;
use crate::stack::{Context, ContextKind, Stack, StoreConfiguration, StoreRegistry};
use log::debug;
use rusqlite::params_from_iter;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Synchronous data access for entities of kind `T`.
///
/// Operations run on the calling thread. Use
/// [`crate::service::entity_manager::EntityManager`] to run them on the
/// context executor instead.
pub struct Repository<T: Entity> {
    stack: Arc<Stack>,
    default_sort: SortSpec,
    marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Repository<T> {
    /// Resolves the stack for `configuration` through `registry`.
    ///
    /// Construction never fails; a store that could not be opened surfaces
    /// as `StoreOpenFailed` on the first operation.
    pub fn new(
        registry: &StoreRegistry,
        configuration: StoreConfiguration,
        default_sort: SortSpec,
    ) -> Self {
        Self {
            stack: registry.get(configuration),
            default_sort,
            marker: PhantomData,
        }
    }

    pub fn stack(&self) -> &Arc<Stack> {
        &self.stack
    }

    pub fn entity_name(&self) -> &'static str {
        T::ENTITY_NAME
    }

    pub fn default_sort(&self) -> &SortSpec {
        &self.default_sort
    }

    pub fn context(&self, kind: ContextKind) -> StoreResult<Arc<Context>> {
        self.stack.context(kind)
    }

    /// Persists every pending change of the selected context.
    pub fn save_changes(&self, kind: ContextKind) -> StoreResult<()> {
        self.context(kind)?.save().map(|_| ())
    }

    /// Creates a default-valued entity staged for insert in `kind`.
    pub fn create(&self, kind: ContextKind) -> StoreResult<Managed<T>>
    where
        T: Default,
    {
        self.insert(kind, T::default())
    }

    /// Stages `value` as a new entity in `kind`.
    pub fn insert(&self, kind: ContextKind, value: T) -> StoreResult<Managed<T>> {
        let context = self.context(kind)?;
        let entity = Managed::allocate(kind, value);
        context.stage_upsert(entity.id(), T::ENTITY_NAME, encode_attributes(entity.value())?);
        Ok(entity)
    }

    /// Stages the current attributes of `entity` in its owning context.
    ///
    /// Nothing is written until that context saves.
    pub fn update(&self, entity: &Managed<T>) -> StoreResult<()> {
        let context = self.context(entity.context())?;
        context.stage_upsert(entity.id(), T::ENTITY_NAME, encode_attributes(entity.value())?);
        Ok(())
    }

    pub fn fetch_all(
        &self,
        kind: ContextKind,
        sort: Option<SortSpec>,
        pagination: Option<Pagination>,
    ) -> StoreResult<Vec<Managed<T>>> {
        self.fetch(kind, None, sort, pagination)
    }

    /// Counts entities visible to `kind`; nothing is materialized.
    pub fn count(&self, kind: ContextKind, sort: Option<SortSpec>) -> StoreResult<u64> {
        let descriptor = self.descriptor(None, sort, None);
        let (sql, bind_values) = descriptor.count_sql();
        let context = self.context(kind)?;
        let total = context.read(|conn| {
            let total: i64 =
                conn.query_row(&sql, params_from_iter(bind_values), |row| row.get(0))?;
            Ok(total)
        })?;
        context.record_fetch(0);
        Ok(u64::try_from(total).unwrap_or(0))
    }

    /// Parses the raw filter `query` and searches with it.
    ///
    /// # Errors
    /// - `MalformedQuery` when `query` cannot be parsed.
    pub fn search_query(
        &self,
        kind: ContextKind,
        query: &str,
        sort: Option<SortSpec>,
        pagination: Option<Pagination>,
    ) -> StoreResult<Vec<Managed<T>>> {
        let predicate = Predicate::parse(query).map_err(|err| StoreError::MalformedQuery {
            query: query.to_string(),
            message: err.to_string(),
        })?;
        self.search(kind, &predicate, sort, pagination)
    }

    pub fn search(
        &self,
        kind: ContextKind,
        predicate: &Predicate,
        sort: Option<SortSpec>,
        pagination: Option<Pagination>,
    ) -> StoreResult<Vec<Managed<T>>> {
        self.fetch(kind, Some(predicate.clone()), sort, pagination)
    }

    /// Whether any entity matches `predicate`. Reads at most one row.
    pub fn exists(&self, kind: ContextKind, predicate: &Predicate) -> StoreResult<bool> {
        let descriptor =
            QueryDescriptor::probe(T::ENTITY_NAME, predicate.clone(), self.default_sort.clone());
        let context = self.context(kind)?;
        let rows = run_select(&context, &descriptor)?;
        Ok(!rows.is_empty())
    }

    /// Deletes `entity` through its owning context and saves that context.
    ///
    /// # Errors
    /// - `PersistFailed` when the save fails; the deletion stays pending.
    pub fn delete(&self, entity: &Managed<T>) -> StoreResult<()> {
        let context = self.context(entity.context())?;
        context.stage_delete(entity.id(), T::ENTITY_NAME);
        context.save().map(|_| ())
    }

    /// Deletes every stored entity of this kind and saves the context.
    ///
    /// Entities fetched before the call are stale afterwards.
    pub fn delete_all(&self, kind: ContextKind) -> StoreResult<usize> {
        let context = self.context(kind)?;
        let removed = context.batch_delete(T::ENTITY_NAME)?;
        context.save()?;
        Ok(removed)
    }

    fn descriptor(
        &self,
        predicate: Option<Predicate>,
        sort: Option<SortSpec>,
        pagination: Option<Pagination>,
    ) -> QueryDescriptor {
        QueryDescriptor::new(
            T::ENTITY_NAME,
            predicate,
            sort.unwrap_or_else(|| self.default_sort.clone()),
            pagination,
        )
    }

    fn fetch(
        &self,
        kind: ContextKind,
        predicate: Option<Predicate>,
        sort: Option<SortSpec>,
        pagination: Option<Pagination>,
    ) -> StoreResult<Vec<Managed<T>>> {
        let context = self.context(kind)?;
        if pagination.is_some_and(|page| page.is_empty_page()) {
            return Ok(Vec::new());
        }

        let descriptor = self.descriptor(predicate, sort, pagination);
        run_select(&context, &descriptor)?
            .into_iter()
            .map(|(id, attributes)| decode_entity(kind, &id, &attributes))
            .collect()
    }
}

fn run_select(
    context: &Context,
    descriptor: &QueryDescriptor,
) -> StoreResult<Vec<(String, String)>> {
    let started_at = Instant::now();
    let (sql, bind_values) = descriptor.select_sql()?;
    let rows = context.read(|conn| {
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut raw = Vec::new();
        while let Some(row) = rows.next()? {
            raw.push((row.get::<_, String>(0)?, row.get::<_, String>(1)?));
        }
        Ok(raw)
    })?;

    context.record_fetch(rows.len());
    debug!(
        "event=query_fetch module=repo status=ok context={} kind={} rows={} limit={} offset={} duration_ms={}",
        context.kind(),
        descriptor.entity_kind(),
        rows.len(),
        descriptor.limit(),
        descriptor.offset(),
        started_at.elapsed().as_millis()
    );
    Ok(rows)
}

fn encode_attributes<T: Entity>(value: &T) -> StoreResult<String> {
    let json = serde_json::to_value(value)?;
    if !json.is_object() {
        return Err(StoreError::InvalidData(format!(
            "{} attributes must serialize to a JSON object",
            T::ENTITY_NAME
        )));
    }
    Ok(json.to_string())
}

fn decode_entity<T: Entity>(
    context: ContextKind,
    id_text: &str,
    attributes: &str,
) -> StoreResult<Managed<T>> {
    let id: EntityId = Uuid::parse_str(id_text).map_err(|_| {
        StoreError::InvalidData(format!("invalid uuid value `{id_text}` in entities.id"))
    })?;
    let value = serde_json::from_str(attributes).map_err(|err| {
        StoreError::InvalidData(format!(
            "invalid {} attributes for `{id_text}`: {err}",
            T::ENTITY_NAME
        ))
    })?;
    Ok(Managed::new(id, context, value))
}
