//! SQL dialects.
//!
//! The statement builder assembles SQL against an abstract parameter
//! marker and a [`SqlGenerator`]; the generator owns everything
//! vendor-specific: placeholder style, identifier quoting, string
//! concatenation, column type mapping, and lock clause wording.

use crate::model::FieldType;
use crate::query::LockMode;
use crate::value::Storable;

/// Column default: a distinguished "no default" marker vs a concrete value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DefaultValue {
    #[default]
    None,
    Value(Storable),
}

/// The schema description contract: one physical column as the dialect
/// sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: FieldType,
    pub nullable: bool,
    pub default: DefaultValue,
    pub unsigned: bool,
    pub charset: Option<String>,
    pub collation: Option<String>,
    pub indexed: bool,
    /// `longtext` tag: widest text type.
    pub long_text: bool,
    /// `datatype=` tag: raw SQL type override, bypassing the mapping.
    pub raw_type: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            default: DefaultValue::None,
            unsigned: false,
            charset: None,
            collation: None,
            indexed: false,
            long_text: false,
            raw_type: None,
        }
    }
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    MySql,
    Postgres,
}

impl Dialect {
    pub fn generator(&self) -> Box<dyn SqlGenerator> {
        match self {
            Dialect::MySql => Box::new(MySqlGenerator),
            Dialect::Postgres => Box::new(PostgresGenerator),
        }
    }
}

/// Everything vendor-specific the statement builder defers to.
pub trait SqlGenerator {
    /// Positional placeholder for 1-based parameter `n` (`?` or `$n`).
    fn placeholder(&self, n: usize) -> String;

    /// Quote an identifier.
    fn quote(&self, ident: &str) -> String;

    /// String concatenation over already-rendered SQL expressions.
    fn concat(&self, parts: &[String]) -> String;

    /// Map a column description to its SQL type string.
    fn column_type(&self, col: &ColumnDef) -> String;

    /// Full column definition line for CREATE/ALTER.
    fn column_sql(&self, col: &ColumnDef) -> String {
        let mut sql = format!("{} {}", self.quote(&col.name), self.column_type(col));
        if !col.nullable {
            sql.push_str(" NOT NULL");
        }
        if let DefaultValue::Value(v) = &col.default {
            sql.push_str(&format!(" DEFAULT {v}"));
        }
        sql
    }

    /// ALTER TABLE clause converging an existing column to `col`.
    fn modify_column_clause(&self, col: &ColumnDef) -> String;

    /// Statement dropping a secondary index.
    fn drop_index_sql(&self, table: &str, index: &str) -> String;

    /// Row lock clause, empty for [`LockMode::None`].
    fn lock_clause(&self, mode: LockMode) -> &'static str;
}

/// MySQL flavored SQL.
pub struct MySqlGenerator;

impl SqlGenerator for MySqlGenerator {
    fn placeholder(&self, _n: usize) -> String {
        "?".to_string()
    }

    fn quote(&self, ident: &str) -> String {
        format!("`{ident}`")
    }

    fn concat(&self, parts: &[String]) -> String {
        format!("CONCAT({})", parts.join(", "))
    }

    fn column_type(&self, col: &ColumnDef) -> String {
        if let Some(raw) = &col.raw_type {
            return raw.clone();
        }
        let unsigned = |base: &str, on: bool| {
            if on {
                format!("{base} UNSIGNED")
            } else {
                base.to_string()
            }
        };
        let mut ty = match &col.ty {
            FieldType::Bool => "TINYINT(1)".to_string(),
            FieldType::Int8 => unsigned("TINYINT", col.unsigned),
            FieldType::Int16 => unsigned("SMALLINT", col.unsigned),
            FieldType::Int32 => unsigned("INT", col.unsigned),
            FieldType::Int64 => unsigned("BIGINT", col.unsigned),
            FieldType::Uint8 => "TINYINT UNSIGNED".to_string(),
            FieldType::Uint16 => "SMALLINT UNSIGNED".to_string(),
            FieldType::Uint32 => "INT UNSIGNED".to_string(),
            FieldType::Uint64 => "BIGINT UNSIGNED".to_string(),
            FieldType::Float32 => "FLOAT".to_string(),
            FieldType::Float64 => "DOUBLE".to_string(),
            FieldType::Text => {
                if col.long_text {
                    "LONGTEXT".to_string()
                } else {
                    "VARCHAR(191)".to_string()
                }
            }
            FieldType::Bytes => "LONGTEXT".to_string(),
            FieldType::DateTime | FieldType::SoftDelete => "DATETIME".to_string(),
            FieldType::Date => "DATE".to_string(),
            FieldType::Key => "VARCHAR(512)".to_string(),
            FieldType::GeoPoint | FieldType::Struct(_) | FieldType::List(_) => "JSON".to_string(),
        };
        if let Some(charset) = &col.charset {
            ty.push_str(&format!(" CHARACTER SET {charset}"));
        }
        if let Some(collation) = &col.collation {
            ty.push_str(&format!(" COLLATE {collation}"));
        }
        ty
    }

    fn modify_column_clause(&self, col: &ColumnDef) -> String {
        format!("MODIFY COLUMN {}", self.column_sql(col))
    }

    fn drop_index_sql(&self, table: &str, index: &str) -> String {
        format!("ALTER TABLE {} DROP INDEX {}", self.quote(table), self.quote(index))
    }

    fn lock_clause(&self, mode: LockMode) -> &'static str {
        match mode {
            LockMode::None => "",
            LockMode::ForUpdate => " FOR UPDATE",
            LockMode::ForShare => " LOCK IN SHARE MODE",
        }
    }
}

/// PostgreSQL flavored SQL. No unsigned integers: unsigned widths map one
/// size up.
pub struct PostgresGenerator;

impl SqlGenerator for PostgresGenerator {
    fn placeholder(&self, n: usize) -> String {
        format!("${n}")
    }

    fn quote(&self, ident: &str) -> String {
        format!("\"{ident}\"")
    }

    fn concat(&self, parts: &[String]) -> String {
        format!("({})", parts.join(" || "))
    }

    fn column_type(&self, col: &ColumnDef) -> String {
        if let Some(raw) = &col.raw_type {
            return raw.clone();
        }
        match &col.ty {
            FieldType::Bool => "BOOLEAN".to_string(),
            FieldType::Int8 | FieldType::Int16 => "SMALLINT".to_string(),
            FieldType::Int32 => "INTEGER".to_string(),
            FieldType::Int64 => "BIGINT".to_string(),
            FieldType::Uint8 | FieldType::Uint16 => "INTEGER".to_string(),
            FieldType::Uint32 => "BIGINT".to_string(),
            FieldType::Uint64 => "NUMERIC(20)".to_string(),
            FieldType::Float32 => "REAL".to_string(),
            FieldType::Float64 => "DOUBLE PRECISION".to_string(),
            FieldType::Text => {
                if col.long_text {
                    "TEXT".to_string()
                } else {
                    "VARCHAR(191)".to_string()
                }
            }
            FieldType::Bytes => "TEXT".to_string(),
            FieldType::DateTime | FieldType::SoftDelete => "TIMESTAMP".to_string(),
            FieldType::Date => "DATE".to_string(),
            FieldType::Key => "VARCHAR(512)".to_string(),
            FieldType::GeoPoint | FieldType::Struct(_) | FieldType::List(_) => "JSONB".to_string(),
        }
    }

    fn modify_column_clause(&self, col: &ColumnDef) -> String {
        format!(
            "ALTER COLUMN {} TYPE {}",
            self.quote(&col.name),
            self.column_type(col)
        )
    }

    fn drop_index_sql(&self, _table: &str, index: &str) -> String {
        format!("DROP INDEX {}", self.quote(index))
    }

    fn lock_clause(&self, mode: LockMode) -> &'static str {
        match mode {
            LockMode::None => "",
            LockMode::ForUpdate => " FOR UPDATE",
            LockMode::ForShare => " FOR SHARE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::MySql.generator().placeholder(3), "?");
        assert_eq!(Dialect::Postgres.generator().placeholder(3), "$3");
    }

    #[test]
    fn test_quoting_and_concat() {
        let my = Dialect::MySql.generator();
        let pg = Dialect::Postgres.generator();
        assert_eq!(my.quote("Name"), "`Name`");
        assert_eq!(pg.quote("Name"), "\"Name\"");
        let parts = vec!["a".to_string(), "'x'".to_string()];
        assert_eq!(my.concat(&parts), "CONCAT(a, 'x')");
        assert_eq!(pg.concat(&parts), "(a || 'x')");
    }

    #[test]
    fn test_column_types() {
        let my = Dialect::MySql.generator();
        let pg = Dialect::Postgres.generator();
        let mut col = ColumnDef::new("Age", FieldType::Uint8);
        assert_eq!(my.column_type(&col), "TINYINT UNSIGNED");
        assert_eq!(pg.column_type(&col), "INTEGER");
        col.raw_type = Some("DECIMAL(10,2)".to_string());
        assert_eq!(my.column_type(&col), "DECIMAL(10,2)");
    }

    #[test]
    fn test_charset_applies_to_mysql_text() {
        let my = Dialect::MySql.generator();
        let mut col = ColumnDef::new("Name", FieldType::Text);
        col.charset = Some("utf8mb4".to_string());
        col.collation = Some("utf8mb4_bin".to_string());
        assert_eq!(
            my.column_type(&col),
            "VARCHAR(191) CHARACTER SET utf8mb4 COLLATE utf8mb4_bin"
        );
    }
}
