//! Statement building: query scope + entity codec → SQL text + arguments.
//!
//! Assembly is dialect-agnostic: fragments are written against one
//! internal parameter marker, and a final render pass substitutes the
//! dialect's placeholder style (`?` vs `$n`). No value is ever spliced
//! into SQL text; everything rides in the argument list.

pub mod ddl;
pub mod dialect;
pub mod dml;

#[cfg(test)]
mod tests;

use crate::error::{Error, Result};
use crate::key::Key;
use crate::model::{KEY_COLUMN, PARENT_COLUMN};
use crate::value::Storable;

pub use ddl::{TableInfo, build_alter_table, build_create_table};
pub use dialect::{ColumnDef, DefaultValue, Dialect, SqlGenerator};
pub use dml::{build_delete, build_insert, build_select, build_soft_delete, build_update,
    build_update_map};

/// Internal parameter marker, substituted at render time.
pub(crate) const PARAM_MARKER: char = '\u{1}';

/// An executable statement: SQL text plus positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Storable>,
}

/// Accumulates SQL fragments and bound arguments against the abstract
/// marker; [`SqlBuilder::render`] resolves the marker per dialect.
#[derive(Debug, Default)]
pub(crate) struct SqlBuilder {
    sql: String,
    args: Vec<Storable>,
}

impl SqlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    /// Bind one argument, writing the marker into the SQL stream.
    pub fn bind(&mut self, value: Storable) {
        self.sql.push(PARAM_MARKER);
        self.args.push(value);
    }

    /// Substitute each marker occurrence with the dialect's placeholder,
    /// numbering left to right.
    pub fn render(self, generator: &dyn SqlGenerator) -> Statement {
        let mut sql = String::with_capacity(self.sql.len());
        let mut n = 0usize;
        for c in self.sql.chars() {
            if c == PARAM_MARKER {
                n += 1;
                sql.push_str(&generator.placeholder(n));
            } else {
                sql.push(c);
            }
        }
        debug_assert_eq!(n, self.args.len());
        Statement {
            sql,
            args: self.args,
        }
    }
}

/// The SQL expression reconstructing a row's concatenated canonical key,
/// `$Parent || '/kind,' || $Key`. Used for identity ordering, cursors,
/// and delete membership; compares consistently with
/// [`Key::concatenated`].
pub(crate) fn key_concat_expr(generator: &dyn SqlGenerator, kind: &str) -> String {
    generator.concat(&[
        generator.quote(PARENT_COLUMN),
        format!("'/{kind},'"),
        generator.quote(KEY_COLUMN),
    ])
}

/// Require a complete key whose kind matches the entity's table.
pub(crate) fn check_key(key: &Key, table: &str) -> Result<()> {
    if !key.is_complete() {
        return Err(Error::IncompleteKey(key.encode()));
    }
    if key.kind() != table {
        return Err(Error::InvalidQuery(format!(
            "key kind '{}' does not match table '{}'",
            key.kind(),
            table
        )));
    }
    Ok(())
}
