//! Record type descriptions.
//!
//! Rust has no runtime reflection, so a record type describes itself: a
//! [`Model`] supplies an ordered [`StructDescriptor`] of its fields and
//! converts to/from the crate's [`Value`] form. The struct codec
//! ([`codec`]) consumes the descriptor once per type, validates it, and
//! builds the addressable field tree everything else works from.

pub mod codec;

use crate::error::Result;
use crate::value::Value;

/// Reserved physical primary-key column: the leaf id literal.
pub const KEY_COLUMN: &str = "$Key";
/// Reserved physical parent-path column: the canonical parent chain.
pub const PARENT_COLUMN: &str = "$Parent";
/// Reserved soft-delete marker column: nullable timestamp.
pub const DELETED_COLUMN: &str = "$Deleted";

/// Tag name that marks the identity field.
pub const KEY_TAG: &str = "__key__";

/// The closed set of storable field kinds.
///
/// Every value conversion in the crate dispatches on this, never on runtime
/// type inspection.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    Text,
    Bytes,
    /// Timestamp, stored as `YYYY-MM-DD HH:MM:SS` UTC text.
    DateTime,
    /// Date-only variant, stored as `YYYY-MM-DD`.
    Date,
    /// The dedicated hierarchical key type.
    Key,
    GeoPoint,
    /// Soft-delete marker: nullable timestamp, always stored under
    /// [`DELETED_COLUMN`].
    SoftDelete,
    /// Nested record with its own descriptor.
    Struct(StructDescriptor),
    /// Slice/array of an element type.
    List(Box<FieldType>),
}

impl FieldType {
    /// Short name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::Int8 => "i8",
            FieldType::Int16 => "i16",
            FieldType::Int32 => "i32",
            FieldType::Int64 => "i64",
            FieldType::Uint8 => "u8",
            FieldType::Uint16 => "u16",
            FieldType::Uint32 => "u32",
            FieldType::Uint64 => "u64",
            FieldType::Float32 => "f32",
            FieldType::Float64 => "f64",
            FieldType::Text => "text",
            FieldType::Bytes => "bytes",
            FieldType::DateTime => "datetime",
            FieldType::Date => "date",
            FieldType::Key => "key",
            FieldType::GeoPoint => "geopoint",
            FieldType::SoftDelete => "softdelete",
            FieldType::Struct(_) => "struct",
            FieldType::List(_) => "list",
        }
    }

    /// Whether this is a base (leaf) kind: one value, one column.
    pub fn is_base(&self) -> bool {
        !matches!(self, FieldType::Struct(_) | FieldType::List(_))
    }
}

/// One declared field of a record type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Identifier name as declared on the type.
    pub name: &'static str,
    /// Raw annotation string, parsed by [`crate::tag`].
    pub tag: &'static str,
    pub ty: FieldType,
    /// Pointer-of/optional flag: the column is nullable.
    pub optional: bool,
    /// Anonymous embedding: the nested record's fields are promoted into
    /// the parent's column namespace.
    pub embedded: bool,
}

impl FieldDescriptor {
    pub fn new(name: &'static str, tag: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            tag,
            ty,
            optional: false,
            embedded: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }
}

/// The ordered field list of one record type.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDescriptor {
    pub type_name: &'static str,
    pub fields: Vec<FieldDescriptor>,
}

impl StructDescriptor {
    pub fn new(type_name: &'static str, fields: Vec<FieldDescriptor>) -> Self {
        Self { type_name, fields }
    }
}

/// A persistable record type.
///
/// `to_value` must produce a [`Value::Record`] whose entries follow the
/// descriptor's declaration order, nested records included; the codec
/// addresses values by structural path.
pub trait Model: Sized + 'static {
    /// Default table name (the key kind).
    fn kind() -> &'static str;

    /// The field list, in declaration order.
    fn descriptor() -> StructDescriptor;

    /// Decompose into the crate's value form.
    fn to_value(&self) -> Value;

    /// Rebuild from the crate's value form.
    fn from_value(value: Value) -> Result<Self>;
}
