//! The high-level store facade.
//!
//! A [`Store`] binds one registered connection to one dialect and walks
//! every operation through the same pipeline: codec → statement builder →
//! executor → row scan. It owns no state beyond that pair, so cloning is
//! cheap and stores can be created per request.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::entity::Entity;
use crate::error::Result;
use crate::key::{Key, decode_cursor};
use crate::model::Model;
use crate::query::{Direction, Operator, Query};
use crate::registry::{self, Executor};
use crate::row::{Page, page_from};
use crate::stmt::{
    Dialect, TableInfo, build_alter_table, build_create_table, build_delete, build_insert,
    build_select, build_soft_delete, build_update, build_update_map,
};
use crate::value::Value;

#[derive(Clone)]
pub struct Store {
    executor: Arc<dyn Executor>,
    dialect: Dialect,
}

impl Store {
    /// Wrap an executor directly, without going through the registry.
    pub fn new(executor: Arc<dyn Executor>, dialect: Dialect) -> Self {
        Self { executor, dialect }
    }

    /// Resolve a named connection from the registry.
    pub fn open(connection: &str, dialect: Dialect) -> Result<Self> {
        Ok(Self::new(registry::connection(connection)?, dialect))
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Create the table for a record type, indexes included.
    pub fn create_table<T: Model>(&self) -> Result<()> {
        let entity = Entity::of::<T>()?;
        for stmt in build_create_table(&entity, self.dialect)? {
            self.executor.execute(&stmt)?;
        }
        Ok(())
    }

    /// Converge an existing table to the declared schema. Additive only:
    /// never drops a column.
    pub fn migrate<T: Model>(&self, info: &TableInfo) -> Result<()> {
        let entity = Entity::of::<T>()?;
        for stmt in build_alter_table(&entity, info, self.dialect)? {
            self.executor.execute(&stmt)?;
        }
        Ok(())
    }

    /// Run a query and decode every matching record.
    pub fn get<T: Model>(&self, query: &Query) -> Result<Vec<T>> {
        let entity = Entity::of::<T>()?;
        let stmt = build_select(&entity, query, self.dialect)?;
        let rows = self.executor.fetch(&stmt)?;
        Ok(rows
            .scan_all::<T>(&entity)?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    /// First matching record, if any.
    pub fn first<T: Model>(&self, query: &Query) -> Result<Option<T>> {
        Ok(self.get::<T>(&query.limit(1))?.into_iter().next())
    }

    /// Look up one record by its complete key.
    pub fn find<T: Model>(&self, key: &Key) -> Result<Option<T>> {
        let query = Query::new("").where_key(Operator::Eq, key.clone());
        self.first::<T>(&query)
    }

    /// One page of an identity-ordered walk. Pass the previous page's
    /// cursor to resume; a `None` cursor on the returned page means the
    /// walk is done.
    pub fn paginate<T: Model>(
        &self,
        query: &Query,
        limit: u64,
        cursor: Option<&str>,
    ) -> Result<Page<T>> {
        let entity = Entity::of::<T>()?;
        // One row past the page size: its presence is what tells a full
        // page apart from an exactly-exhausted result set.
        let mut query = query
            .order_by(crate::model::KEY_TAG, Direction::Asc)
            .limit(limit + 1);
        if let Some(cursor) = cursor {
            query = query.where_key(Operator::Gt, decode_cursor(cursor)?);
        }
        let stmt = build_select(&entity, &query, self.dialect)?;
        let rows = self.executor.fetch(&stmt)?;
        let records = rows.scan_all::<T>(&entity)?;
        debug!(table = %entity.table, count = records.len(), "paginated");
        Ok(page_from(records, limit as usize))
    }

    /// Insert records, generating ids for incomplete keys. Returns the
    /// stored keys in input order.
    pub fn insert<T: Model>(&self, records: &[T]) -> Result<Vec<Key>> {
        let entity = Entity::of::<T>()?;
        let values: Vec<Value> = records.iter().map(Model::to_value).collect();
        let (stmt, keys) = build_insert(&entity, &values, self.dialect)?;
        self.executor.execute(&stmt)?;
        Ok(keys)
    }

    /// Full-record update addressed by the record's own key. Columns in
    /// `omits` keep their stored value.
    pub fn update<T: Model>(&self, record: &T, omits: &[String]) -> Result<u64> {
        let entity = Entity::of::<T>()?;
        let stmt = build_update(&entity, &record.to_value(), omits, self.dialect)?;
        self.executor.execute(&stmt)
    }

    /// Partial update: only the named columns change.
    pub fn update_map<T: Model>(
        &self,
        key: &Key,
        changes: &HashMap<String, Value>,
    ) -> Result<u64> {
        let entity = Entity::of::<T>()?;
        let stmt = build_update_map(&entity, key, changes, self.dialect)?;
        self.executor.execute(&stmt)
    }

    /// Hard delete by key membership.
    pub fn delete<T: Model>(&self, keys: &[Key]) -> Result<u64> {
        let entity = Entity::of::<T>()?;
        let stmt = build_delete(&entity, keys, self.dialect)?;
        self.executor.execute(&stmt)
    }

    /// Soft delete: stamps the delete marker, leaving the rows in place.
    pub fn soft_delete<T: Model>(&self, keys: &[Key]) -> Result<u64> {
        let entity = Entity::of::<T>()?;
        let stmt = build_soft_delete(&entity, keys, Utc::now().naive_utc(), self.dialect)?;
        self.executor.execute(&stmt)
    }

    /// Run `f` against this store as one unit of work.
    ///
    /// Transaction demarcation lives with the driver adapter; this seam
    /// only scopes the closure to one connection. TODO: thread BEGIN/COMMIT
    /// through [`Executor`] once an adapter needs rollback.
    pub fn transaction<R>(&self, f: impl FnOnce(&Store) -> Result<R>) -> Result<R> {
        f(self)
    }
}
