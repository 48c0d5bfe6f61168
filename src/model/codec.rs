//! The struct codec: one validated, ordered field tree per record type.
//!
//! Built once per distinct type via a breadth-first traversal of the
//! descriptor (embedded records are spliced into the parent namespace),
//! then memoized in a process-wide registry. Column order is restored from
//! per-field sequence keys, so it is deterministic regardless of traversal
//! order. Build failures are cached too: a type that fails validation once
//! replays the same error without rebuilding.

use std::any::TypeId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{
    DELETED_COLUMN, FieldDescriptor, FieldType, KEY_COLUMN, KEY_TAG, Model, PARENT_COLUMN,
    StructDescriptor,
};
use crate::tag::{self, TagOptions};
use crate::value::Value;

/// One node of the field tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Storage column name (tag name or identifier name).
    pub name: String,
    /// Structural offsets from the tree root, for direct value access.
    pub path: Vec<usize>,
    /// Declaration-order sequence key, compared component-wise.
    pub seq: Vec<usize>,
    pub ty: FieldType,
    /// Nullable column.
    pub optional: bool,
    pub options: TagOptions,
    /// Owned sub-tree when the field denotes a nested record (directly or
    /// as a list element).
    pub sub: Option<Vec<Field>>,
}

/// One physical column derived from the field tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPlan {
    /// Flattened column name; dots and `[i]` suffixes come from flatten
    /// expansion only.
    pub name: String,
    pub ty: FieldType,
    pub nullable: bool,
    pub options: TagOptions,
}

/// The immutable field tree for one record type.
#[derive(Debug, Clone, PartialEq)]
pub struct StructCodec {
    pub type_name: &'static str,
    /// Column-level fields, sorted by sequence key.
    pub fields: Vec<Field>,
    /// Index of the identity field within `fields`.
    pub key_field: Option<usize>,
    /// Index of the soft-delete field within `fields`.
    pub soft_delete_field: Option<usize>,
}

impl StructCodec {
    /// Build and validate the field tree for a descriptor. Partial codecs
    /// are never produced: any structural error fails the whole build.
    pub fn build(desc: &StructDescriptor) -> Result<StructCodec> {
        let mut fields = Vec::new();
        // Breadth-first over embedded records; seq keys restore the
        // declaration order afterwards.
        let mut queue: VecDeque<(StructDescriptor, Vec<usize>, Vec<usize>)> = VecDeque::new();
        queue.push_back((desc.clone(), Vec::new(), Vec::new()));

        while let Some((desc, base_path, base_seq)) = queue.pop_front() {
            for (i, fd) in desc.fields.iter().enumerate() {
                let mut path = base_path.clone();
                path.push(i);
                let mut seq = base_seq.clone();
                seq.push(i);

                let parsed = tag::parse(fd.tag);
                if parsed.skip {
                    continue;
                }

                if fd.embedded {
                    match &fd.ty {
                        FieldType::Struct(sub) => {
                            queue.push_back((sub.clone(), path, seq));
                            continue;
                        }
                        other => {
                            return Err(Error::unsupported(
                                fd.name,
                                format!("embedded field of kind {}", other.name()),
                            ));
                        }
                    }
                }

                fields.push(build_field(fd, parsed, path, seq)?);
            }
        }

        fields.sort_by(|a, b| a.seq.cmp(&b.seq));

        let mut key_field = None;
        let mut soft_delete_field = None;
        let mut seen = HashSet::new();
        for (i, field) in fields.iter().enumerate() {
            if field.name == KEY_TAG {
                if key_field.is_some() {
                    return Err(Error::DuplicateName(KEY_TAG.to_string()));
                }
                key_field = Some(i);
            }
            if field.ty == FieldType::SoftDelete {
                soft_delete_field = Some(i);
            }
            if !seen.insert(field.name.clone()) {
                return Err(Error::DuplicateName(field.name.clone()));
            }
        }

        Ok(StructCodec {
            type_name: desc.type_name,
            fields,
            key_field,
            soft_delete_field,
        })
    }

    /// The identity field, required for any keyed operation.
    pub fn key_field(&self) -> Result<&Field> {
        self.key_field
            .map(|i| &self.fields[i])
            .ok_or_else(|| Error::InvalidKeyField(self.type_name.to_string()))
    }

    /// Look up a column-level field by storage name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Enumerate the declared physical columns, excluding `$Key`/`$Parent`
    /// (the statement builder owns those). Flattened nested records expand
    /// into dotted names; flattened lists declare their index-0 leaves and
    /// grow through the additive alter pass.
    pub fn column_plan(&self) -> Vec<ColumnPlan> {
        let mut plan = Vec::new();
        for field in &self.fields {
            if field.name == KEY_TAG {
                continue;
            }
            plan_field(field, &field.name, &mut plan);
        }
        plan
    }
}

fn plan_field(field: &Field, name: &str, plan: &mut Vec<ColumnPlan>) {
    match &field.ty {
        FieldType::Struct(_) if field.options.flatten => {
            for sub in field.sub.as_deref().unwrap_or_default() {
                plan_field(sub, &format!("{name}.{}", sub.name), plan);
            }
        }
        FieldType::List(elem) if field.options.flatten => match elem.as_ref() {
            FieldType::Struct(_) => {
                for sub in field.sub.as_deref().unwrap_or_default() {
                    plan_field(sub, &format!("{name}.{}[0]", sub.name), plan);
                }
            }
            _ => plan.push(ColumnPlan {
                name: format!("{name}[0]"),
                ty: elem.as_ref().clone(),
                nullable: true,
                options: field.options.clone(),
            }),
        },
        ty => plan.push(ColumnPlan {
            name: name.to_string(),
            ty: ty.clone(),
            nullable: field.optional || matches!(ty, FieldType::SoftDelete),
            options: field.options.clone(),
        }),
    }
}

/// Build one column-level field, recursing into nested records.
fn build_field(
    fd: &FieldDescriptor,
    parsed: tag::Tag,
    path: Vec<usize>,
    seq: Vec<usize>,
) -> Result<Field> {
    let is_identity = parsed.name.as_deref() == Some(KEY_TAG);
    let name = if fd.ty == FieldType::SoftDelete {
        // Deduplicated onto the reserved column regardless of tag.
        DELETED_COLUMN.to_string()
    } else if is_identity {
        KEY_TAG.to_string()
    } else {
        let name = parsed.name.clone().unwrap_or_else(|| fd.name.to_string());
        validate_name(&name)?;
        name
    };

    if is_identity && fd.ty != FieldType::Key {
        return Err(Error::InvalidKeyField(fd.name.to_string()));
    }

    let sub = match &fd.ty {
        FieldType::Struct(desc) => Some(build_subtree(desc)?),
        FieldType::List(elem) => match elem.as_ref() {
            FieldType::Key => {
                return Err(Error::unsupported(fd.name, "slice of key-typed fields"));
            }
            FieldType::SoftDelete => {
                return Err(Error::unsupported(fd.name, "slice of soft-delete markers"));
            }
            FieldType::List(_) => {
                return Err(Error::unsupported(fd.name, "slice of slices"));
            }
            FieldType::Struct(desc) => Some(build_subtree(desc)?),
            _ => None,
        },
        _ => None,
    };

    Ok(Field {
        name,
        path,
        seq,
        ty: fd.ty.clone(),
        optional: fd.optional,
        options: parsed.options,
        sub,
    })
}

/// Build the field tree of a nested record type. Nested records cannot
/// carry identity or soft-delete markers; their namespace is local.
fn build_subtree(desc: &StructDescriptor) -> Result<Vec<Field>> {
    let mut fields = Vec::new();
    let mut seen = HashSet::new();
    for (i, fd) in desc.fields.iter().enumerate() {
        let parsed = tag::parse(fd.tag);
        if parsed.skip {
            continue;
        }
        if parsed.name.as_deref() == Some(KEY_TAG) {
            return Err(Error::InvalidKeyField(fd.name.to_string()));
        }
        if fd.ty == FieldType::SoftDelete {
            return Err(Error::unsupported(fd.name, "nested soft-delete marker"));
        }
        let field = build_field(fd, parsed, vec![i], vec![i])?;
        if !seen.insert(field.name.clone()) {
            return Err(Error::DuplicateName(field.name.clone()));
        }
        fields.push(field);
    }
    Ok(fields)
}

/// Storage names: identifier characters only; dots and brackets are
/// produced by flatten expansion, never declared.
fn validate_name(name: &str) -> Result<()> {
    if name == KEY_COLUMN || name == PARENT_COLUMN || name == DELETED_COLUMN {
        return Err(Error::ReservedName(name.to_string()));
    }
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_head || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::InvalidFieldName(name.to_string()));
    }
    Ok(())
}

/// Navigate a record value by structural path.
pub fn value_at<'a>(root: &'a Value, path: &[usize]) -> Option<&'a Value> {
    let mut cur = root;
    for &i in path {
        match cur {
            Value::Record(fields) => cur = &fields.get(i)?.1,
            _ => return None,
        }
    }
    Some(cur)
}

type Registry = Mutex<HashMap<TypeId, std::result::Result<Arc<StructCodec>, Error>>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Look up or build the codec for a record type.
///
/// One mutex guards the lookup-and-publish section; concurrent first
/// accesses of the same type serialize on it. Failed builds are published
/// as well, so a broken type reports the same error on every use.
pub fn codec_for<T: Model>() -> Result<Arc<StructCodec>> {
    let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = registry.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(cached) = map.get(&TypeId::of::<T>()) {
        return cached.clone();
    }
    let desc = T::descriptor();
    debug!(type_name = desc.type_name, "building struct codec");
    let built = StructCodec::build(&desc).map(Arc::new);
    map.insert(TypeId::of::<T>(), built.clone());
    built
}
