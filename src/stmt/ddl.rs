//! Schema creation and additive alteration.
//!
//! The alter path diffs the declared column/index set against an
//! introspected [`TableInfo`] and emits only additive column changes plus
//! drops of indexes no longer declared. Column drops are deliberately
//! never generated.

use std::collections::HashSet;

use tracing::debug;

use crate::entity::Entity;
use crate::error::Result;
use crate::model::codec::ColumnPlan;
use crate::model::{FieldType, KEY_COLUMN, PARENT_COLUMN};
use crate::stmt::Statement;
use crate::stmt::dialect::{ColumnDef, Dialect, SqlGenerator};

/// Introspected state of an existing table: column and index name sets.
#[derive(Debug, Clone, Default)]
pub struct TableInfo {
    pub columns: HashSet<String>,
    pub indexes: HashSet<String>,
}

/// Declared column definitions: the reserved identity pair first, then
/// the codec's column plan.
fn column_defs(entity: &Entity) -> Vec<ColumnDef> {
    let mut defs = Vec::new();

    let mut key = ColumnDef::new(KEY_COLUMN, FieldType::Text);
    key.raw_type = Some("VARCHAR(191)".to_string());
    defs.push(key);

    // The composite primary key ($Parent, $Key) already serves ancestor
    // scans, so neither reserved column gets a standalone index.
    let mut parent = ColumnDef::new(PARENT_COLUMN, FieldType::Text);
    parent.raw_type = Some("VARCHAR(767)".to_string());
    defs.push(parent);

    for plan in entity.codec.column_plan() {
        defs.push(def_from_plan(&plan));
    }
    defs
}

fn def_from_plan(plan: &ColumnPlan) -> ColumnDef {
    let mut def = ColumnDef::new(plan.name.clone(), plan.ty.clone());
    def.nullable = plan.nullable;
    def.unsigned = plan.options.unsigned;
    def.charset = plan.options.charset.clone();
    def.collation = plan.options.collate.clone();
    def.long_text = plan.options.long_text;
    def.raw_type = plan.options.datatype.clone();
    def.indexed = !plan.options.no_index && plan.ty.is_base();
    def
}

fn index_name(table: &str, column: &str) -> String {
    let sanitized: String = column
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("ix_{table}_{sanitized}")
}

/// CREATE TABLE plus one CREATE INDEX per indexed column.
pub fn build_create_table(entity: &Entity, dialect: Dialect) -> Result<Vec<Statement>> {
    let generator = dialect.generator();
    let generator = generator.as_ref();
    let defs = column_defs(entity);

    let mut lines: Vec<String> = defs
        .iter()
        .map(|def| format!("  {}", generator.column_sql(def)))
        .collect();
    lines.push(format!(
        "  PRIMARY KEY ({}, {})",
        generator.quote(PARENT_COLUMN),
        generator.quote(KEY_COLUMN)
    ));

    let mut statements = vec![Statement {
        sql: format!(
            "CREATE TABLE {} (\n{}\n)",
            generator.quote(&entity.table),
            lines.join(",\n")
        ),
        args: Vec::new(),
    }];

    statements.extend(index_statements(entity, &defs, None, generator));
    debug!(table = %entity.table, statements = statements.len(), "built create table");
    Ok(statements)
}

/// Additive alteration against an introspected table: ADD for missing
/// columns, MODIFY/ALTER for existing ones, CREATE INDEX for missing
/// indexes, DROP INDEX for undeclared ones. Never drops a column.
pub fn build_alter_table(
    entity: &Entity,
    info: &TableInfo,
    dialect: Dialect,
) -> Result<Vec<Statement>> {
    let generator = dialect.generator();
    let generator = generator.as_ref();
    let defs = column_defs(entity);

    let mut clauses = Vec::new();
    for def in &defs {
        if info.columns.contains(&def.name) {
            clauses.push(generator.modify_column_clause(def));
        } else {
            clauses.push(format!("ADD COLUMN {}", generator.column_sql(def)));
        }
    }

    let mut statements = Vec::new();
    if !clauses.is_empty() {
        statements.push(Statement {
            sql: format!(
                "ALTER TABLE {} {}",
                generator.quote(&entity.table),
                clauses.join(", ")
            ),
            args: Vec::new(),
        });
    }

    statements.extend(index_statements(entity, &defs, Some(info), generator));

    let declared: HashSet<String> = defs
        .iter()
        .filter(|d| d.indexed)
        .map(|d| index_name(&entity.table, &d.name))
        .collect();
    for index in &info.indexes {
        if !declared.contains(index) {
            statements.push(Statement {
                sql: generator.drop_index_sql(&entity.table, index),
                args: Vec::new(),
            });
        }
    }

    debug!(table = %entity.table, statements = statements.len(), "built alter table");
    Ok(statements)
}

fn index_statements(
    entity: &Entity,
    defs: &[ColumnDef],
    info: Option<&TableInfo>,
    generator: &dyn SqlGenerator,
) -> Vec<Statement> {
    defs.iter()
        .filter(|def| def.indexed)
        .filter_map(|def| {
            let name = index_name(&entity.table, &def.name);
            if info.is_some_and(|i| i.indexes.contains(&name)) {
                return None;
            }
            Some(Statement {
                sql: format!(
                    "CREATE INDEX {} ON {} ({})",
                    generator.quote(&name),
                    generator.quote(&entity.table),
                    generator.quote(&def.name)
                ),
                args: Vec::new(),
            })
        })
        .collect()
}
