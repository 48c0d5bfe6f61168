//! SELECT / INSERT / UPDATE / DELETE builders.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDateTime;
use rand::Rng;
use tracing::debug;

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::key::{Id, Key};
use crate::model::codec::value_at;
use crate::model::{DELETED_COLUMN, KEY_COLUMN, KEY_TAG, PARENT_COLUMN};
use crate::normalize::{DATETIME_FORMAT, Property, normalize_field, normalize_record,
    storable_from_value};
use crate::query::{Direction, Filter, Operator, Query};
use crate::stmt::dialect::{Dialect, SqlGenerator};
use crate::stmt::{SqlBuilder, Statement, check_key, key_concat_expr};
use crate::value::{Storable, Value};

/// Build a SELECT from the query scope. Accumulated query errors surface
/// here, before anything reaches the driver.
pub fn build_select(entity: &Entity, query: &Query, dialect: Dialect) -> Result<Statement> {
    query.check()?;
    let generator = dialect.generator();
    let generator = generator.as_ref();
    let table = if query.table.is_empty() {
        &entity.table
    } else {
        &query.table
    };

    let mut b = SqlBuilder::new();
    b.push("SELECT ");
    let projection = render_projection(entity, query, generator)?;
    b.push(&projection);
    b.push(" FROM ");
    b.push(&generator.quote(table));

    render_where(&mut b, generator, entity, query, table)?;

    if !query.orders.is_empty() {
        b.push(" ORDER BY ");
        let known = known_columns(entity);
        for (i, order) in query.orders.iter().enumerate() {
            if i > 0 {
                b.push(", ");
            }
            // Identity order follows the hierarchical order of the full
            // parent-path + leaf-id concatenation.
            if order.column == KEY_TAG {
                b.push(&key_concat_expr(generator, table));
            } else {
                check_column(&known, &order.column)?;
                b.push(&generator.quote(&order.column));
            }
            b.push(match order.direction {
                Direction::Asc => " ASC",
                Direction::Desc => " DESC",
            });
        }
    }

    if let Some(limit) = query.limit {
        b.push(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = query.offset {
        b.push(&format!(" OFFSET {offset}"));
    }
    b.push(generator.lock_clause(query.lock));

    let stmt = b.render(generator);
    debug!(sql = %stmt.sql, args = stmt.args.len(), "built select");
    Ok(stmt)
}

/// Multi-row INSERT. Each record lacking an identifier is assigned a
/// freshly generated numeric one; the assigned keys are returned in row
/// order.
pub fn build_insert(
    entity: &Entity,
    records: &[Value],
    dialect: Dialect,
) -> Result<(Statement, Vec<Key>)> {
    if records.is_empty() {
        return Err(Error::InvalidQuery("no records to insert".to_string()));
    }
    let generator = dialect.generator();
    let generator = generator.as_ref();
    let key_field = entity.codec.key_field()?;

    let mut keys = Vec::with_capacity(records.len());
    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        let mut key = match value_at(record, &key_field.path).unwrap_or(&Value::Null) {
            Value::Key(k) => k.clone(),
            Value::Null => Key::incomplete(&entity.table),
            _ => {
                return Err(Error::ValueMismatch {
                    column: KEY_TAG.to_string(),
                    expected: "key",
                });
            }
        };
        if key.kind() != entity.table {
            return Err(Error::InvalidQuery(format!(
                "key kind '{}' does not match table '{}'",
                key.kind(),
                entity.table
            )));
        }
        if let Some(parent) = key.parent()
            && !parent.is_complete()
        {
            return Err(Error::IncompleteKey(key.encode()));
        }
        if !key.id().is_set() {
            key.set_id(Id::Int(generate_id()));
        }
        rows.push(normalize_record(&entity.codec, record)?);
        keys.push(key);
    }

    // Union of property names across rows, first-seen order: flattened
    // lists make the column set value-dependent.
    let mut columns: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for props in &rows {
        for p in props {
            if seen.insert(p.name.clone()) {
                columns.push(p.name.clone());
            }
        }
    }

    let mut b = SqlBuilder::new();
    b.push("INSERT INTO ");
    b.push(&generator.quote(&entity.table));
    b.push(" (");
    b.push(&generator.quote(KEY_COLUMN));
    b.push(", ");
    b.push(&generator.quote(PARENT_COLUMN));
    for col in &columns {
        b.push(", ");
        b.push(&generator.quote(col));
    }
    b.push(") VALUES ");

    for (i, (key, props)) in keys.iter().zip(&rows).enumerate() {
        if i > 0 {
            b.push(", ");
        }
        b.push("(");
        b.bind(Storable::Text(key.id().literal()));
        b.push(", ");
        b.bind(Storable::Text(key.parent_path()));
        let by_name: HashMap<&str, &Storable> =
            props.iter().map(|p| (p.name.as_str(), &p.value)).collect();
        for col in &columns {
            b.push(", ");
            b.bind(by_name.get(col.as_str()).cloned().cloned().unwrap_or(Storable::Null));
        }
        b.push(")");
    }

    let stmt = b.render(generator);
    debug!(sql = %stmt.sql, rows = records.len(), "built insert");
    Ok((stmt, keys))
}

/// Full-record UPDATE: touches every column the record normalizes to,
/// minus the omit list. The omit set is built first and the column list
/// filtered in a single pass.
pub fn build_update(
    entity: &Entity,
    record: &Value,
    omits: &[String],
    dialect: Dialect,
) -> Result<Statement> {
    let generator = dialect.generator();
    let generator = generator.as_ref();
    let key_field = entity.codec.key_field()?;
    let key = match value_at(record, &key_field.path).unwrap_or(&Value::Null) {
        Value::Key(k) => k.clone(),
        _ => return Err(Error::IncompleteKey(String::new())),
    };
    check_key(&key, &entity.table)?;

    let omit: HashSet<&str> = omits.iter().map(String::as_str).collect();
    let props: Vec<Property> = normalize_record(&entity.codec, record)?
        .into_iter()
        .filter(|p| !omit.contains(p.name.as_str()))
        .collect();
    if props.is_empty() {
        return Err(Error::InvalidQuery("nothing to update".to_string()));
    }

    let stmt = render_update(entity, &key, &props, generator);
    debug!(sql = %stmt.sql, "built update");
    Ok(stmt)
}

/// Partial UPDATE from a flat column → value map. Reserved columns are
/// refused: the identity pair is immutable and the soft-delete marker is
/// owned by the delete path.
pub fn build_update_map(
    entity: &Entity,
    key: &Key,
    changes: &HashMap<String, Value>,
    dialect: Dialect,
) -> Result<Statement> {
    let generator = dialect.generator();
    let generator = generator.as_ref();
    check_key(key, &entity.table)?;
    if changes.is_empty() {
        return Err(Error::InvalidQuery("nothing to update".to_string()));
    }

    let mut names: Vec<&String> = changes.keys().collect();
    names.sort();

    let mut props = Vec::new();
    for name in names {
        if name == KEY_COLUMN || name == PARENT_COLUMN || name == KEY_TAG {
            return Err(Error::InvalidQuery(
                "identity columns cannot be regenerated".to_string(),
            ));
        }
        if name == DELETED_COLUMN {
            return Err(Error::InvalidQuery(
                "soft-delete column is managed by the delete path".to_string(),
            ));
        }
        let field = entity
            .codec
            .field(name)
            .ok_or_else(|| Error::InvalidQuery(format!("unknown column '{name}'")))?;
        normalize_field(field, name, &changes[name.as_str()], &mut props)?;
    }

    let stmt = render_update(entity, key, &props, generator);
    debug!(sql = %stmt.sql, "built map update");
    Ok(stmt)
}

fn render_update(
    entity: &Entity,
    key: &Key,
    props: &[Property],
    generator: &dyn SqlGenerator,
) -> Statement {
    let mut b = SqlBuilder::new();
    b.push("UPDATE ");
    b.push(&generator.quote(&entity.table));
    b.push(" SET ");
    for (i, p) in props.iter().enumerate() {
        if i > 0 {
            b.push(", ");
        }
        b.push(&generator.quote(&p.name));
        b.push(" = ");
        b.bind(p.value.clone());
    }
    b.push(" WHERE ");
    b.push(&generator.quote(PARENT_COLUMN));
    b.push(" = ");
    b.bind(Storable::Text(key.parent_path()));
    b.push(" AND ");
    b.push(&generator.quote(KEY_COLUMN));
    b.push(" = ");
    b.bind(Storable::Text(key.id().literal()));
    b.render(generator)
}

/// DELETE by concatenated-key membership.
pub fn build_delete(entity: &Entity, keys: &[Key], dialect: Dialect) -> Result<Statement> {
    let generator = dialect.generator();
    let generator = generator.as_ref();
    let mut b = SqlBuilder::new();
    b.push("DELETE FROM ");
    b.push(&generator.quote(&entity.table));
    render_key_membership(&mut b, generator, entity, keys)?;
    let stmt = b.render(generator);
    debug!(sql = %stmt.sql, keys = keys.len(), "built delete");
    Ok(stmt)
}

/// Soft delete: stamp the reserved marker column instead of removing rows.
pub fn build_soft_delete(
    entity: &Entity,
    keys: &[Key],
    at: NaiveDateTime,
    dialect: Dialect,
) -> Result<Statement> {
    if entity.codec.soft_delete_field.is_none() {
        return Err(Error::InvalidQuery(format!(
            "{} has no soft-delete field",
            entity.codec.type_name
        )));
    }
    let generator = dialect.generator();
    let generator = generator.as_ref();
    let mut b = SqlBuilder::new();
    b.push("UPDATE ");
    b.push(&generator.quote(&entity.table));
    b.push(" SET ");
    b.push(&generator.quote(DELETED_COLUMN));
    b.push(" = ");
    b.bind(Storable::Text(at.format(DATETIME_FORMAT).to_string()));
    render_key_membership(&mut b, generator, entity, keys)?;
    let stmt = b.render(generator);
    debug!(sql = %stmt.sql, keys = keys.len(), "built soft delete");
    Ok(stmt)
}

fn render_key_membership(
    b: &mut SqlBuilder,
    generator: &dyn SqlGenerator,
    entity: &Entity,
    keys: &[Key],
) -> Result<()> {
    if keys.is_empty() {
        return Err(Error::InvalidQuery("no keys given".to_string()));
    }
    for key in keys {
        check_key(key, &entity.table)?;
    }
    b.push(" WHERE ");
    b.push(&key_concat_expr(generator, &entity.table));
    b.push(" IN (");
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            b.push(", ");
        }
        b.bind(Storable::Text(key.concatenated()));
    }
    b.push(")");
    Ok(())
}

/// Fresh positive 64-bit identifier for inserts without one.
fn generate_id() -> i64 {
    rand::rng().random_range(1..=i64::MAX)
}

/// Column names filters, orders, projections and omits may refer to.
fn known_columns(entity: &Entity) -> HashSet<String> {
    let mut known: HashSet<String> = entity
        .codec
        .column_plan()
        .into_iter()
        .map(|c| c.name)
        .collect();
    known.insert(KEY_COLUMN.to_string());
    known.insert(PARENT_COLUMN.to_string());
    known
}

fn check_column(known: &HashSet<String>, column: &str) -> Result<()> {
    if known.contains(column) {
        Ok(())
    } else {
        Err(Error::InvalidQuery(format!("unknown column '{column}'")))
    }
}

fn render_projection(
    entity: &Entity,
    query: &Query,
    generator: &dyn SqlGenerator,
) -> Result<String> {
    let known = known_columns(entity);
    for omitted in &query.omits {
        if omitted != KEY_TAG {
            check_column(&known, omitted)?;
        }
    }
    if query.projection.is_empty() && query.omits.is_empty() {
        // Flattened list columns are value-dependent; only `*` sees them
        // all.
        return Ok("*".to_string());
    }
    let mut columns = Vec::new();
    if query.projection.is_empty() {
        if !query.omits.contains(&KEY_TAG.to_string()) {
            columns.push(KEY_COLUMN.to_string());
            columns.push(PARENT_COLUMN.to_string());
        }
        for col in entity.codec.column_plan() {
            if !query.omits.contains(&col.name) {
                columns.push(col.name);
            }
        }
    } else {
        for name in &query.projection {
            if name == KEY_TAG {
                columns.push(KEY_COLUMN.to_string());
                columns.push(PARENT_COLUMN.to_string());
            } else {
                check_column(&known, name)?;
                if !query.omits.contains(name) {
                    columns.push(name.clone());
                }
            }
        }
    }
    if columns.is_empty() {
        return Err(Error::InvalidQuery("empty projection".to_string()));
    }
    Ok(columns
        .iter()
        .map(|c| generator.quote(c))
        .collect::<Vec<_>>()
        .join(", "))
}

fn render_where(
    b: &mut SqlBuilder,
    generator: &dyn SqlGenerator,
    entity: &Entity,
    query: &Query,
    kind: &str,
) -> Result<()> {
    let known = known_columns(entity);
    let mut wrote = false;
    let mut sep = |b: &mut SqlBuilder| {
        b.push(if wrote { " AND " } else { " WHERE " });
        wrote = true;
    };

    for ancestor in &query.ancestors {
        sep(b);
        render_ancestor(b, generator, ancestor, kind);
    }

    for filter in &query.filters {
        sep(b);
        render_filter(b, generator, &known, filter, kind)?;
    }

    // Soft-deleted rows are invisible unless the query is unscoped.
    if entity.codec.soft_delete_field.is_some() && !query.unscoped {
        sep(b);
        b.push(&generator.quote(DELETED_COLUMN));
        b.push(" IS NULL");
    }
    Ok(())
}

/// Ancestor constraint: the key itself (when it lives in this table), any
/// row whose parent chain is exactly the key, or any deeper descendant.
/// The LIKE pattern anchors on the `/` separator so `User,1` never
/// matches `User,10`.
fn render_ancestor(b: &mut SqlBuilder, generator: &dyn SqlGenerator, ancestor: &Key, kind: &str) {
    let canonical = ancestor.encode();
    b.push("(");
    if ancestor.kind() == kind {
        b.push("(");
        b.push(&generator.quote(PARENT_COLUMN));
        b.push(" = ");
        b.bind(Storable::Text(ancestor.parent_path()));
        b.push(" AND ");
        b.push(&generator.quote(KEY_COLUMN));
        b.push(" = ");
        b.bind(Storable::Text(ancestor.id().literal()));
        b.push(") OR ");
    }
    b.push(&generator.quote(PARENT_COLUMN));
    b.push(" = ");
    b.bind(Storable::Text(canonical.clone()));
    b.push(" OR ");
    b.push(&generator.quote(PARENT_COLUMN));
    b.push(" LIKE ");
    b.bind(Storable::Text(format!("{canonical}/%")));
    b.push(")");
}

fn render_filter(
    b: &mut SqlBuilder,
    generator: &dyn SqlGenerator,
    known: &HashSet<String>,
    filter: &Filter,
    kind: &str,
) -> Result<()> {
    if filter.column == KEY_TAG {
        return render_key_filter(b, generator, filter, kind);
    }
    check_column(known, &filter.column)?;
    let column = generator.quote(&filter.column);

    match (&filter.op, &filter.value) {
        // Nil equality rewrites to IS [NOT] NULL with zero parameters.
        (Operator::Eq, Value::Null) => {
            b.push(&column);
            b.push(" IS NULL");
        }
        (Operator::Ne, Value::Null) => {
            b.push(&column);
            b.push(" IS NOT NULL");
        }
        (Operator::In | Operator::NotIn, Value::List(items)) => {
            if items.is_empty() {
                return Err(Error::InvalidQuery(format!(
                    "empty IN set for column '{}'",
                    filter.column
                )));
            }
            b.push(&column);
            b.push(" ");
            b.push(filter.op.sql_symbol());
            b.push(" (");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    b.push(", ");
                }
                b.bind(storable_from_value(item));
            }
            b.push(")");
        }
        (Operator::In | Operator::NotIn, _) => {
            return Err(Error::InvalidQuery(format!(
                "IN filter on '{}' requires a list value",
                filter.column
            )));
        }
        (_, value) => {
            b.push(&column);
            b.push(" ");
            b.push(filter.op.sql_symbol());
            b.push(" ");
            b.bind(storable_from_value(value));
        }
    }
    Ok(())
}

/// Identity filters address the `$Parent`/`$Key` pair. Equality uses the
/// indexed pair directly; range operators compare the concatenated form.
fn render_key_filter(
    b: &mut SqlBuilder,
    generator: &dyn SqlGenerator,
    filter: &Filter,
    kind: &str,
) -> Result<()> {
    let key_of = |value: &Value| -> Result<Key> {
        match value {
            Value::Key(k) => {
                if !k.is_complete() {
                    return Err(Error::IncompleteKey(k.encode()));
                }
                // Same kind discipline as the write paths: a foreign-kind
                // key must never collapse to a bare ($Parent, $Key) match.
                if k.kind() != kind {
                    return Err(Error::InvalidQuery(format!(
                        "key kind '{}' does not match table '{kind}'",
                        k.kind()
                    )));
                }
                Ok(k.clone())
            }
            _ => Err(Error::InvalidQuery(
                "identity filter requires a key value".to_string(),
            )),
        }
    };

    match filter.op {
        Operator::Eq | Operator::Ne => {
            let key = key_of(&filter.value)?;
            if filter.op == Operator::Ne {
                b.push("NOT ");
            }
            b.push("(");
            b.push(&generator.quote(PARENT_COLUMN));
            b.push(" = ");
            b.bind(Storable::Text(key.parent_path()));
            b.push(" AND ");
            b.push(&generator.quote(KEY_COLUMN));
            b.push(" = ");
            b.bind(Storable::Text(key.id().literal()));
            b.push(")");
        }
        Operator::Gt | Operator::Ge | Operator::Lt | Operator::Le => {
            let key = key_of(&filter.value)?;
            b.push(&key_concat_expr(generator, kind));
            b.push(" ");
            b.push(filter.op.sql_symbol());
            b.push(" ");
            b.bind(Storable::Text(key.concatenated()));
        }
        Operator::In | Operator::NotIn => {
            let Value::List(items) = &filter.value else {
                return Err(Error::InvalidQuery(
                    "identity IN filter requires a list of keys".to_string(),
                ));
            };
            if items.is_empty() {
                return Err(Error::InvalidQuery("empty IN set for identity".to_string()));
            }
            b.push(&key_concat_expr(generator, kind));
            b.push(" ");
            b.push(filter.op.sql_symbol());
            b.push(" (");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    b.push(", ");
                }
                b.bind(Storable::Text(key_of(item)?.concatenated()));
            }
            b.push(")");
        }
        Operator::Like | Operator::NotLike => {
            return Err(Error::InvalidQuery(
                "LIKE is not supported on the identity field".to_string(),
            ));
        }
    }
    Ok(())
}
