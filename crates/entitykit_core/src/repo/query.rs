//! Sort, pagination and per-call query descriptors.

use crate::error::{StoreError, StoreResult};
use crate::predicate::{attribute_sql, is_valid_attribute_path, Predicate};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

const ENTITY_SELECT_SQL: &str = "SELECT id, attributes FROM entities WHERE kind = ?";
const ENTITY_COUNT_SQL: &str = "SELECT COUNT(*) FROM entities WHERE kind = ?";

/// Ordering applied to fetched entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    /// Attribute path to sort by.
    pub key: String,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

fn default_ascending() -> bool {
    true
}

impl SortSpec {
    pub fn ascending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: true,
        }
    }

    pub fn descending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: false,
        }
    }
}

/// Page window. Absent limit means unbounded, absent offset means zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl Pagination {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }

    pub fn limit(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            offset: None,
        }
    }

    pub fn offset(offset: u32) -> Self {
        Self {
            limit: None,
            offset: Some(offset),
        }
    }

    /// Whether this window can never contain a row.
    pub fn is_empty_page(&self) -> bool {
        self.limit == Some(0)
    }
}

/// Fully resolved fetch request for one entity kind.
///
/// `limit == 0` means no limit.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    entity_kind: &'static str,
    predicate: Option<Predicate>,
    sort: SortSpec,
    limit: u32,
    offset: u32,
}

impl QueryDescriptor {
    pub fn new(
        entity_kind: &'static str,
        predicate: Option<Predicate>,
        sort: SortSpec,
        pagination: Option<Pagination>,
    ) -> Self {
        let pagination = pagination.unwrap_or_default();
        Self {
            entity_kind,
            predicate,
            sort,
            limit: pagination.limit.unwrap_or(0),
            offset: pagination.offset.unwrap_or(0),
        }
    }

    /// Descriptor for an existence probe: at most one row.
    pub fn probe(entity_kind: &'static str, predicate: Predicate, sort: SortSpec) -> Self {
        Self {
            entity_kind,
            predicate: Some(predicate),
            sort,
            limit: 1,
            offset: 0,
        }
    }

    pub fn entity_kind(&self) -> &'static str {
        self.entity_kind
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn sort(&self) -> &SortSpec {
        &self.sort
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Renders the row query and its bind values.
    ///
    /// # Errors
    /// - `InvalidAttribute` when the sort key is not an attribute path.
    pub fn select_sql(&self) -> StoreResult<(String, Vec<Value>)> {
        if !is_valid_attribute_path(&self.sort.key) {
            return Err(StoreError::InvalidAttribute(self.sort.key.clone()));
        }

        let (mut sql, mut bind_values) = self.filtered(ENTITY_SELECT_SQL);
        sql.push_str(&format!(
            " ORDER BY {} {}, rowid ASC",
            attribute_sql(&self.sort.key),
            if self.sort.ascending { "ASC" } else { "DESC" }
        ));

        if self.limit > 0 {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(self.limit)));
            if self.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(self.offset)));
            }
        } else if self.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(self.offset)));
        }

        Ok((sql, bind_values))
    }

    /// Renders the count query; sort and pagination do not apply.
    pub fn count_sql(&self) -> (String, Vec<Value>) {
        self.filtered(ENTITY_COUNT_SQL)
    }

    fn filtered(&self, base: &str) -> (String, Vec<Value>) {
        let mut sql = base.to_string();
        let mut bind_values = vec![Value::Text(self.entity_kind.to_string())];
        if let Some(predicate) = &self.predicate {
            let (clause, arguments) = predicate.to_sql();
            sql.push_str(&format!(" AND ({clause})"));
            bind_values.extend(arguments);
        }
        (sql, bind_values)
    }
}
