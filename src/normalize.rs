//! Value normalization: native field values to storage-neutral properties,
//! and stored column bytes back to native values.
//!
//! Both directions dispatch on the field's declared [`FieldType`], never
//! on inference from the bytes, because every SQL driver delivers columns
//! as text. Flatten fields explode nested records into
//! dotted property names (`parent.child`, `parent.child[0]`) and are
//! re-assembled from the same names on the way back.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{Error, Result};
use crate::key::Key;
use crate::model::codec::{Field, StructCodec, value_at};
use crate::model::{FieldType, KEY_TAG};
use crate::row::Row;
use crate::tag;
use crate::value::{GeoPoint, Storable, Value};

/// Timestamp storage format (UTC).
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Date-only storage format.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A flattened `(column name, declared kind, storage value)` triple: the
/// unit of exchange between the value layer and the statement builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub ty: FieldType,
    pub value: Storable,
}

/// Normalize a whole record into properties, skipping the identity field
/// (the statement builder derives `$Key`/`$Parent` from the key itself).
pub fn normalize_record(codec: &StructCodec, record: &Value) -> Result<Vec<Property>> {
    let mut props = Vec::new();
    for field in &codec.fields {
        if field.name == KEY_TAG {
            continue;
        }
        let value = value_at(record, &field.path).unwrap_or(&Value::Null);
        if field.options.omit_empty && value.is_empty() {
            continue;
        }
        normalize_field(field, &field.name, value, &mut props)?;
    }
    Ok(props)
}

/// Normalize one field into zero or more properties.
pub fn normalize_field(
    field: &Field,
    name: &str,
    value: &Value,
    props: &mut Vec<Property>,
) -> Result<()> {
    match &field.ty {
        FieldType::Struct(_) if field.options.flatten => {
            for sub in field.sub.as_deref().unwrap_or_default() {
                let sub_value = match value {
                    Value::Null => &Value::Null,
                    other => value_at(other, &sub.path).unwrap_or(&Value::Null),
                };
                normalize_field(sub, &format!("{name}.{}", sub.name), sub_value, props)?;
            }
            Ok(())
        }
        FieldType::List(elem) if field.options.flatten => {
            let items = match value {
                Value::Null => &[][..],
                Value::List(items) => items.as_slice(),
                _ => {
                    return Err(Error::ValueMismatch {
                        column: name.to_string(),
                        expected: "list",
                    });
                }
            };
            for (i, item) in items.iter().enumerate() {
                match elem.as_ref() {
                    FieldType::Struct(_) => {
                        for sub in field.sub.as_deref().unwrap_or_default() {
                            let sub_value = value_at(item, &sub.path).unwrap_or(&Value::Null);
                            let column = format!("{name}.{}[{i}]", sub.name);
                            props.push(Property {
                                name: column.clone(),
                                ty: sub.ty.clone(),
                                value: normalize_scalar(&column, sub, sub_value)?,
                            });
                        }
                    }
                    base => {
                        let column = format!("{name}[{i}]");
                        props.push(Property {
                            name: column.clone(),
                            ty: base.clone(),
                            value: normalize_base(&column, base, item)?,
                        });
                    }
                }
            }
            Ok(())
        }
        FieldType::Struct(_) | FieldType::List(_) => {
            // Serialized into one JSON column.
            let value = match value {
                Value::Null => Storable::Null,
                other => Storable::Text(to_json(other).to_string()),
            };
            props.push(Property {
                name: name.to_string(),
                ty: field.ty.clone(),
                value,
            });
            Ok(())
        }
        base => {
            props.push(Property {
                name: name.to_string(),
                ty: base.clone(),
                value: normalize_base(name, base, value)?,
            });
            Ok(())
        }
    }
}

/// Normalize a sub-field of a flattened list element: base kinds convert
/// directly, nested records/lists fall back to their JSON column form.
fn normalize_scalar(column: &str, field: &Field, value: &Value) -> Result<Storable> {
    match &field.ty {
        FieldType::Struct(_) | FieldType::List(_) => Ok(match value {
            Value::Null => Storable::Null,
            other => Storable::Text(to_json(other).to_string()),
        }),
        base => normalize_base(column, base, value),
    }
}

/// Native scalar to storage scalar, by declared kind.
fn normalize_base(column: &str, ty: &FieldType, value: &Value) -> Result<Storable> {
    let mismatch = || Error::ValueMismatch {
        column: column.to_string(),
        expected: ty.name(),
    };
    if matches!(value, Value::Null) {
        return Ok(Storable::Null);
    }
    Ok(match (ty, value) {
        (FieldType::Bool, Value::Bool(b)) => Storable::Bool(*b),
        (
            FieldType::Int8 | FieldType::Int16 | FieldType::Int32 | FieldType::Int64,
            Value::Int(n),
        ) => Storable::Int(*n),
        (
            FieldType::Uint8 | FieldType::Uint16 | FieldType::Uint32 | FieldType::Uint64,
            Value::Uint(n),
        ) => Storable::Uint(*n),
        (
            FieldType::Uint8 | FieldType::Uint16 | FieldType::Uint32 | FieldType::Uint64,
            Value::Int(n),
        ) if *n >= 0 => Storable::Uint(*n as u64),
        (FieldType::Float32 | FieldType::Float64, Value::Float(x)) => Storable::Float(*x),
        (FieldType::Float32 | FieldType::Float64, Value::Int(n)) => Storable::Float(*n as f64),
        (FieldType::Text, Value::Text(s)) => Storable::Text(s.clone()),
        (FieldType::Bytes, Value::Bytes(b)) => Storable::Text(BASE64.encode(b)),
        (FieldType::DateTime, Value::DateTime(t)) => {
            Storable::Text(t.format(DATETIME_FORMAT).to_string())
        }
        (FieldType::Date, Value::Date(d)) => Storable::Text(d.format(DATE_FORMAT).to_string()),
        (FieldType::SoftDelete, Value::DateTime(t)) => {
            Storable::Text(t.format(DATETIME_FORMAT).to_string())
        }
        (FieldType::Key, Value::Key(k)) => {
            if !k.is_complete() {
                return Err(Error::IncompleteKey(k.encode()));
            }
            Storable::Text(k.encode())
        }
        (FieldType::GeoPoint, Value::GeoPoint(g)) => Storable::Text(
            serde_json::to_string(g).map_err(|e| Error::corrupt(column, e.to_string()))?,
        ),
        _ => return Err(mismatch()),
    })
}

/// Rebuild one field's native value from a result row, re-assembling
/// flattened columns first.
pub fn denormalize_field(field: &Field, name: &str, row: &Row) -> Result<Value> {
    match &field.ty {
        FieldType::Struct(_) if field.options.flatten => {
            let mut entries = Vec::new();
            let mut all_null = true;
            for sub in field.sub.as_deref().unwrap_or_default() {
                let value = denormalize_field(sub, &format!("{name}.{}", sub.name), row)?;
                all_null &= value == Value::Null;
                entries.push((sub.name.clone(), value));
            }
            if all_null && field.optional {
                return Ok(Value::Null);
            }
            Ok(Value::Record(entries))
        }
        FieldType::List(elem) if field.options.flatten => {
            let count = flattened_len(name, row);
            let mut items = Vec::with_capacity(count);
            for i in 0..count {
                match elem.as_ref() {
                    FieldType::Struct(_) => {
                        let mut entries = Vec::new();
                        for sub in field.sub.as_deref().unwrap_or_default() {
                            let column = format!("{name}.{}[{i}]", sub.name);
                            let value = if sub.ty.is_base() {
                                denormalize_base(&sub.ty, &column, row)?
                            } else {
                                denormalize_json(&sub.ty, &column, row)?
                            };
                            entries.push((sub.name.clone(), value));
                        }
                        items.push(Value::Record(entries));
                    }
                    base => {
                        items.push(denormalize_base(base, &format!("{name}[{i}]"), row)?);
                    }
                }
            }
            Ok(Value::List(items))
        }
        FieldType::Struct(_) | FieldType::List(_) => denormalize_json(&field.ty, name, row),
        base => denormalize_base(base, name, row),
    }
}

/// Number of elements present for a flattened list: one past the highest
/// index with any non-null column.
fn flattened_len(name: &str, row: &Row) -> usize {
    let dotted = format!("{name}.");
    let bracketed = format!("{name}[");
    let mut len = 0usize;
    for (column, value) in row {
        if value.is_none() || !(column.starts_with(&dotted) || column.starts_with(&bracketed)) {
            continue;
        }
        let Some(open) = column.rfind('[') else {
            continue;
        };
        let Some(close) = column.rfind(']') else {
            continue;
        };
        if let Ok(i) = column[open + 1..close].parse::<usize>() {
            len = len.max(i + 1);
        }
    }
    len
}

/// One JSON column back into a typed value.
fn denormalize_json(ty: &FieldType, column: &str, row: &Row) -> Result<Value> {
    let Some(Some(bytes)) = row.get(column) else {
        return Ok(Value::Null);
    };
    let text = std::str::from_utf8(bytes).map_err(|e| Error::corrupt(column, e.to_string()))?;
    let json: serde_json::Value =
        serde_json::from_str(text).map_err(|e| Error::corrupt(column, e.to_string()))?;
    from_json(ty, &json, column)
}

/// One scalar column back into a typed value. Overflow during numeric
/// reconstruction is a hard error, never a silent truncation.
fn denormalize_base(ty: &FieldType, column: &str, row: &Row) -> Result<Value> {
    let Some(Some(bytes)) = row.get(column) else {
        return Ok(Value::Null);
    };
    let text = std::str::from_utf8(bytes).map_err(|e| Error::corrupt(column, e.to_string()))?;
    parse_base(ty, text, column)
}

fn parse_base(ty: &FieldType, text: &str, column: &str) -> Result<Value> {
    let mismatch = || Error::ValueMismatch {
        column: column.to_string(),
        expected: ty.name(),
    };
    Ok(match ty {
        FieldType::Bool => match text {
            "1" | "true" | "TRUE" => Value::Bool(true),
            "0" | "false" | "FALSE" => Value::Bool(false),
            _ => return Err(mismatch()),
        },
        FieldType::Int8 | FieldType::Int16 | FieldType::Int32 | FieldType::Int64 => {
            let n: i64 = text.parse().map_err(|_| mismatch())?;
            check_int_width(ty, n, column)?;
            Value::Int(n)
        }
        FieldType::Uint8 | FieldType::Uint16 | FieldType::Uint32 | FieldType::Uint64 => {
            let n: u64 = text.parse().map_err(|_| mismatch())?;
            check_uint_width(ty, n, column)?;
            Value::Uint(n)
        }
        FieldType::Float32 | FieldType::Float64 => Value::Float(text.parse().map_err(|_| mismatch())?),
        FieldType::Text => Value::Text(text.to_string()),
        FieldType::Bytes => Value::Bytes(
            BASE64
                .decode(text)
                .map_err(|e| Error::corrupt(column, e.to_string()))?,
        ),
        FieldType::DateTime => Value::DateTime(
            NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
                .map_err(|e| Error::corrupt(column, e.to_string()))?,
        ),
        FieldType::Date => Value::Date(
            NaiveDate::parse_from_str(text, DATE_FORMAT)
                .map_err(|e| Error::corrupt(column, e.to_string()))?,
        ),
        FieldType::SoftDelete => Value::DateTime(
            NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
                .map_err(|e| Error::corrupt(column, e.to_string()))?,
        ),
        FieldType::Key => match Key::decode(text)? {
            Some(key) => Value::Key(key),
            None => Value::Null,
        },
        FieldType::GeoPoint => {
            let g: GeoPoint =
                serde_json::from_str(text).map_err(|e| Error::corrupt(column, e.to_string()))?;
            Value::GeoPoint(g)
        }
        FieldType::Struct(_) | FieldType::List(_) => return Err(mismatch()),
    })
}

fn check_int_width(ty: &FieldType, n: i64, column: &str) -> Result<()> {
    let fits = match ty {
        FieldType::Int8 => i8::try_from(n).is_ok(),
        FieldType::Int16 => i16::try_from(n).is_ok(),
        FieldType::Int32 => i32::try_from(n).is_ok(),
        _ => true,
    };
    if fits {
        Ok(())
    } else {
        Err(Error::ValueOverflow {
            column: column.to_string(),
            value: n.to_string(),
            width: ty.name(),
        })
    }
}

fn check_uint_width(ty: &FieldType, n: u64, column: &str) -> Result<()> {
    let fits = match ty {
        FieldType::Uint8 => u8::try_from(n).is_ok(),
        FieldType::Uint16 => u16::try_from(n).is_ok(),
        FieldType::Uint32 => u32::try_from(n).is_ok(),
        _ => true,
    };
    if fits {
        Ok(())
    } else {
        Err(Error::ValueOverflow {
            column: column.to_string(),
            value: n.to_string(),
            width: ty.name(),
        })
    }
}

/// Convert a native scalar into its storage form without a declared type:
/// filter values and map-update values arrive untyped. Nested records and
/// lists fall back to their JSON column form.
pub fn storable_from_value(value: &Value) -> Storable {
    match value {
        Value::Null => Storable::Null,
        Value::Bool(b) => Storable::Bool(*b),
        Value::Int(n) => Storable::Int(*n),
        Value::Uint(n) => Storable::Uint(*n),
        Value::Float(x) => Storable::Float(*x),
        Value::Text(s) => Storable::Text(s.clone()),
        Value::Bytes(b) => Storable::Text(BASE64.encode(b)),
        Value::DateTime(t) => Storable::Text(t.format(DATETIME_FORMAT).to_string()),
        Value::Date(d) => Storable::Text(d.format(DATE_FORMAT).to_string()),
        Value::Key(k) => Storable::Text(k.encode()),
        Value::GeoPoint(g) => Storable::Text(
            serde_json::json!({"latitude": g.latitude, "longitude": g.longitude}).to_string(),
        ),
        Value::Record(_) | Value::List(_) => Storable::Text(to_json(value).to_string()),
    }
}

/// Native value to its JSON storage form (for serialized nested columns).
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::Value::from(*n),
        Value::Uint(n) => serde_json::Value::from(*n),
        Value::Float(x) => serde_json::Value::from(*x),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::String(BASE64.encode(b)),
        Value::DateTime(t) => serde_json::Value::String(t.format(DATETIME_FORMAT).to_string()),
        Value::Date(d) => serde_json::Value::String(d.format(DATE_FORMAT).to_string()),
        Value::Key(k) => serde_json::Value::String(k.encode()),
        Value::GeoPoint(g) => serde_json::json!({
            "latitude": g.latitude,
            "longitude": g.longitude,
        }),
        Value::Record(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(name, v)| (name.clone(), to_json(v)))
                .collect(),
        ),
        Value::List(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
    }
}

/// JSON storage form back to a typed value, driven by the declared kind.
pub fn from_json(ty: &FieldType, json: &serde_json::Value, column: &str) -> Result<Value> {
    let mismatch = || Error::ValueMismatch {
        column: column.to_string(),
        expected: ty.name(),
    };
    if json.is_null() {
        return Ok(Value::Null);
    }
    Ok(match ty {
        FieldType::Bool => Value::Bool(json.as_bool().ok_or_else(mismatch)?),
        FieldType::Int8 | FieldType::Int16 | FieldType::Int32 | FieldType::Int64 => {
            let n = json.as_i64().ok_or_else(mismatch)?;
            check_int_width(ty, n, column)?;
            Value::Int(n)
        }
        FieldType::Uint8 | FieldType::Uint16 | FieldType::Uint32 | FieldType::Uint64 => {
            let n = json.as_u64().ok_or_else(mismatch)?;
            check_uint_width(ty, n, column)?;
            Value::Uint(n)
        }
        FieldType::Float32 | FieldType::Float64 => {
            Value::Float(json.as_f64().ok_or_else(mismatch)?)
        }
        FieldType::Text => Value::Text(json.as_str().ok_or_else(mismatch)?.to_string()),
        FieldType::Bytes => Value::Bytes(
            BASE64
                .decode(json.as_str().ok_or_else(mismatch)?)
                .map_err(|e| Error::corrupt(column, e.to_string()))?,
        ),
        FieldType::DateTime | FieldType::SoftDelete => {
            let s = json.as_str().ok_or_else(mismatch)?;
            Value::DateTime(
                NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
                    .map_err(|e| Error::corrupt(column, e.to_string()))?,
            )
        }
        FieldType::Date => {
            let s = json.as_str().ok_or_else(mismatch)?;
            Value::Date(
                NaiveDate::parse_from_str(s, DATE_FORMAT)
                    .map_err(|e| Error::corrupt(column, e.to_string()))?,
            )
        }
        FieldType::Key => match Key::decode(json.as_str().ok_or_else(mismatch)?)? {
            Some(key) => Value::Key(key),
            None => Value::Null,
        },
        FieldType::GeoPoint => Value::GeoPoint(
            serde_json::from_value(json.clone())
                .map_err(|e| Error::corrupt(column, e.to_string()))?,
        ),
        FieldType::Struct(desc) => {
            let obj = json.as_object().ok_or_else(mismatch)?;
            let mut entries = Vec::with_capacity(desc.fields.len());
            for fd in &desc.fields {
                let parsed = tag::parse(fd.tag);
                if parsed.skip {
                    entries.push((fd.name.to_string(), Value::Null));
                    continue;
                }
                let name = parsed.name.unwrap_or_else(|| fd.name.to_string());
                let value = match obj.get(&name) {
                    Some(v) => from_json(&fd.ty, v, column)?,
                    None => Value::Null,
                };
                entries.push((name, value));
            }
            Value::Record(entries)
        }
        FieldType::List(elem) => {
            let items = json.as_array().ok_or_else(mismatch)?;
            Value::List(
                items
                    .iter()
                    .map(|v| from_json(elem, v, column))
                    .collect::<Result<_>>()?,
            )
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::codec::StructCodec;
    use crate::model::{FieldDescriptor as Fd, StructDescriptor};
    use pretty_assertions::assert_eq;

    fn email_desc() -> StructDescriptor {
        StructDescriptor::new(
            "Email",
            vec![
                Fd::new("Addr", "", FieldType::Text),
                Fd::new("Verified", "", FieldType::Bool),
            ],
        )
    }

    fn contact_codec() -> StructCodec {
        StructCodec::build(&StructDescriptor::new(
            "Contact",
            vec![
                Fd::new("Name", "", FieldType::Text),
                Fd::new(
                    "Emails",
                    "Email,flatten",
                    FieldType::List(Box::new(FieldType::Struct(email_desc()))),
                ),
            ],
        ))
        .unwrap()
    }

    fn email(addr: &str, verified: bool) -> Value {
        Value::Record(vec![
            ("Addr".to_string(), Value::from(addr)),
            ("Verified".to_string(), Value::Bool(verified)),
        ])
    }

    #[test]
    fn test_flatten_list_expands_to_indexed_columns() {
        let codec = contact_codec();
        let record = Value::Record(vec![
            ("Name".to_string(), Value::from("jo")),
            (
                "Emails".to_string(),
                Value::List(vec![email("a@x.io", true), email("b@x.io", false)]),
            ),
        ]);
        let props = normalize_record(&codec, &record).unwrap();
        let names: Vec<_> = props.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Name",
                "Email.Addr[0]",
                "Email.Verified[0]",
                "Email.Addr[1]",
                "Email.Verified[1]",
            ]
        );
    }

    #[test]
    fn test_flatten_round_trip() {
        let codec = contact_codec();
        let record = Value::Record(vec![
            ("Name".to_string(), Value::from("jo")),
            (
                "Emails".to_string(),
                Value::List(vec![email("a@x.io", true), email("b@x.io", false)]),
            ),
        ]);
        let props = normalize_record(&codec, &record).unwrap();

        // Simulate the driver: every property comes back as text bytes.
        let mut row = Row::new();
        for p in props {
            let bytes = match p.value {
                Storable::Null => None,
                Storable::Bool(b) => Some(if b { b"1".to_vec() } else { b"0".to_vec() }),
                other => Some(other.to_string().trim_matches('\'').as_bytes().to_vec()),
            };
            row.insert(p.name, bytes);
        }

        let emails = codec.field("Email").unwrap();
        let rebuilt = denormalize_field(emails, "Email", &row).unwrap();
        assert_eq!(
            rebuilt,
            Value::List(vec![email("a@x.io", true), email("b@x.io", false)])
        );
    }

    #[test]
    fn test_nested_struct_serializes_to_json_without_flatten() {
        let codec = StructCodec::build(&StructDescriptor::new(
            "Contact",
            vec![Fd::new("Home", "", FieldType::Struct(email_desc()))],
        ))
        .unwrap();
        let record = Value::Record(vec![("Home".to_string(), email("a@x.io", true))]);
        let props = normalize_record(&codec, &record).unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(
            props[0].value,
            Storable::Text(r#"{"Addr":"a@x.io","Verified":true}"#.to_string())
        );
    }

    #[test]
    fn test_bytes_normalize_to_base64() {
        let mut props = Vec::new();
        let field = Field {
            name: "Blob".to_string(),
            path: vec![0],
            seq: vec![0],
            ty: FieldType::Bytes,
            optional: false,
            options: Default::default(),
            sub: None,
        };
        normalize_field(&field, "Blob", &Value::Bytes(vec![1, 2, 3]), &mut props).unwrap();
        assert_eq!(props[0].value, Storable::Text("AQID".to_string()));
    }

    #[test]
    fn test_overflow_is_hard_error() {
        let mut row = Row::new();
        row.insert("Age".to_string(), Some(b"300".to_vec()));
        let err = denormalize_base(&FieldType::Uint8, "Age", &row).unwrap_err();
        assert_eq!(
            err,
            Error::ValueOverflow {
                column: "Age".to_string(),
                value: "300".to_string(),
                width: "u8",
            }
        );
    }

    #[test]
    fn test_datetime_round_trip() {
        let t = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(13, 30, 0)
            .unwrap();
        let stored = Value::DateTime(t);
        let mut props = Vec::new();
        let field = Field {
            name: "At".to_string(),
            path: vec![0],
            seq: vec![0],
            ty: FieldType::DateTime,
            optional: false,
            options: Default::default(),
            sub: None,
        };
        normalize_field(&field, "At", &stored, &mut props).unwrap();
        assert_eq!(
            props[0].value,
            Storable::Text("2024-05-01 13:30:00".to_string())
        );
        let mut row = Row::new();
        row.insert("At".to_string(), Some(b"2024-05-01 13:30:00".to_vec()));
        assert_eq!(denormalize_base(&FieldType::DateTime, "At", &row).unwrap(), stored);
    }

    #[test]
    fn test_incomplete_key_value_rejected() {
        let field = Field {
            name: "Ref".to_string(),
            path: vec![0],
            seq: vec![0],
            ty: FieldType::Key,
            optional: false,
            options: Default::default(),
            sub: None,
        };
        let mut props = Vec::new();
        let err = normalize_field(
            &field,
            "Ref",
            &Value::Key(Key::incomplete("User")),
            &mut props,
        )
        .unwrap_err();
        assert!(matches!(err, Error::IncompleteKey(_)));
    }
}
