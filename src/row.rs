//! Result rows and record scanning.
//!
//! Drivers hand rows back as column-name → optional raw bytes; scanning
//! rebuilds the canonical key from the reserved columns and the native
//! record from the declared fields, then hands the assembled value to the
//! record type's decoder.

use std::collections::HashMap;

use tracing::debug;

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::key::{Id, Key, encode_cursor};
use crate::model::{
    FieldType, KEY_COLUMN, KEY_TAG, Model, PARENT_COLUMN, StructDescriptor,
};
use crate::normalize::denormalize_field;
use crate::value::Value;

/// One result row: column name to raw column bytes, `None` for SQL NULL.
pub type Row = HashMap<String, Option<Vec<u8>>>;

/// A buffered result set with a forward read position.
#[derive(Debug, Default)]
pub struct Rows {
    rows: Vec<Row>,
    pos: usize,
}

impl Rows {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows, pos: 0 }
    }

    /// Advance the forward cursor and return the next row.
    pub fn advance(&mut self) -> Option<&Row> {
        let row = self.rows.get(self.pos)?;
        self.pos += 1;
        Some(row)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn last(&self) -> Option<&Row> {
        self.rows.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    /// Decode every row into `(key, record)` pairs.
    pub fn scan_all<T: Model>(&self, entity: &Entity) -> Result<Vec<(Key, T)>> {
        let mut records = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            records.push(scan::<T>(entity, row)?);
        }
        debug!(table = %entity.table, count = records.len(), "scanned rows");
        Ok(records)
    }
}

impl IntoIterator for Rows {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// One page of records plus the cursor resuming after it. The cursor is
/// cleared when the page came back short, meaning the result set is
/// exhausted.
#[derive(Debug)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub cursor: Option<String>,
}

/// Assemble a page from records fetched with one extra row past the page
/// size. The extra row's presence is the only proof more data follows:
/// only then is it dropped and the last kept record's key issued as the
/// cursor. An exactly-full fetch ends the walk with no cursor.
pub fn page_from<T>(mut records: Vec<(Key, T)>, limit: usize) -> Page<T> {
    let cursor = if records.len() > limit {
        records.truncate(limit);
        records.last().map(|(key, _)| encode_cursor(key))
    } else {
        None
    };
    Page {
        records: records.into_iter().map(|(_, record)| record).collect(),
        cursor,
    }
}

/// Rebuild the canonical key of a row from `$Parent` and `$Key`.
pub fn row_key(table: &str, row: &Row) -> Result<Key> {
    let id = match column_text(row, KEY_COLUMN)? {
        Some(text) => parse_id_literal(&text)?,
        None => return Err(Error::corrupt(KEY_COLUMN, "missing key column")),
    };
    let parent = match column_text(row, PARENT_COLUMN)? {
        Some(text) if !text.is_empty() => Key::decode(&text)?,
        _ => None,
    };

    let mut key = Key::incomplete(table);
    key.set_id(id);
    match parent {
        Some(parent) => Ok(key.with_parent(parent)),
        None => Ok(key),
    }
}

/// Decode one row into its key and native record.
pub fn scan<T: Model>(entity: &Entity, row: &Row) -> Result<(Key, T)> {
    let key = row_key(&entity.table, row)?;

    let mut record = skeleton(&T::descriptor());
    for field in &entity.codec.fields {
        let value = if field.name == KEY_TAG {
            Value::Key(key.clone())
        } else {
            denormalize_field(field, &field.name, row)?
        };
        if !set_value_at(&mut record, &field.path, value) {
            return Err(Error::corrupt(&field.name, "field path out of range"));
        }
    }

    Ok((key, T::from_value(record)?))
}

/// An empty record shaped like the descriptor: every field `Null`, with
/// embedded records pre-expanded so field paths resolve.
fn skeleton(desc: &StructDescriptor) -> Value {
    Value::Record(
        desc.fields
            .iter()
            .map(|f| {
                let value = match &f.ty {
                    FieldType::Struct(inner) if f.embedded => skeleton(inner),
                    _ => Value::Null,
                };
                (f.name.to_string(), value)
            })
            .collect(),
    )
}

fn set_value_at(root: &mut Value, path: &[usize], value: Value) -> bool {
    let Some((&last, parents)) = path.split_last() else {
        return false;
    };
    let mut cur = root;
    for &idx in parents {
        match cur {
            Value::Record(fields) => match fields.get_mut(idx) {
                Some(entry) => cur = &mut entry.1,
                None => return false,
            },
            _ => return false,
        }
    }
    match cur {
        Value::Record(fields) => match fields.get_mut(last) {
            Some(entry) => {
                entry.1 = value;
                true
            }
            None => return false,
        },
        _ => false,
    }
}

/// The stored `$Key` literal: either a bare integer or a quoted name.
fn parse_id_literal(text: &str) -> Result<Id> {
    if let Some(inner) = text.strip_prefix('\'') {
        let name = inner
            .strip_suffix('\'')
            .ok_or_else(|| Error::MalformedKey(text.to_string()))?;
        if name.is_empty() || name.contains('\'') {
            return Err(Error::MalformedKey(text.to_string()));
        }
        return Ok(Id::Name(name.to_string()));
    }
    match text.parse::<i64>() {
        Ok(n) => Ok(Id::Int(n)),
        Err(_) => Err(Error::MalformedKey(text.to_string())),
    }
}

fn column_text(row: &Row, column: &str) -> Result<Option<String>> {
    match row.get(column) {
        Some(Some(bytes)) => std::str::from_utf8(bytes)
            .map(|s| Some(s.to_string()))
            .map_err(|e| Error::corrupt(column, e.to_string())),
        _ => Ok(None),
    }
}
