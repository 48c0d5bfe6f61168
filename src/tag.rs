//! Field annotation parsing.
//!
//! Grammar: `name,flag1,flag2,key=value,...`. The optional custom name comes
//! first; an empty leading segment keeps the identifier's natural name and a
//! name of `-` skips the field entirely. Unknown flag tokens are ignored so
//! new flags can be introduced without breaking old readers.

/// Structured form of one field annotation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    /// Custom storage name, if the annotation supplied one.
    pub name: Option<String>,
    /// `-`: the field takes no part in persistence.
    pub skip: bool,
    /// Recognized flag and key/value options.
    pub options: TagOptions,
}

/// The option set a field annotation can carry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagOptions {
    /// `omitempty`: empty values are not written.
    pub omit_empty: bool,
    /// `noindex`: suppress the secondary index on this column.
    pub no_index: bool,
    /// `flatten`: expand a nested record (or list of records) into
    /// independent physical columns instead of one serialized column.
    pub flatten: bool,
    /// `unsigned`: integer column is declared unsigned.
    pub unsigned: bool,
    /// `longtext`: text column is declared with the long text type.
    pub long_text: bool,
    /// `charset=`: character set override.
    pub charset: Option<String>,
    /// `collate=`: collation override.
    pub collate: Option<String>,
    /// `datatype=`: raw SQL column type override.
    pub datatype: Option<String>,
}

/// Parse one field's annotation string.
pub fn parse(raw: &str) -> Tag {
    let mut tag = Tag::default();
    let mut parts = raw.split(',');

    match parts.next() {
        Some("") | None => {}
        Some("-") => {
            tag.skip = true;
            return tag;
        }
        Some(name) => tag.name = Some(name.trim().to_string()),
    }

    for part in parts {
        let part = part.trim();
        match part {
            "omitempty" => tag.options.omit_empty = true,
            "noindex" => tag.options.no_index = true,
            "flatten" => tag.options.flatten = true,
            "unsigned" => tag.options.unsigned = true,
            "longtext" => tag.options.long_text = true,
            _ => {
                if let Some((k, v)) = part.split_once('=') {
                    match k {
                        "charset" => tag.options.charset = Some(v.to_string()),
                        "collate" => tag.options.collate = Some(v.to_string()),
                        "datatype" => tag.options.datatype = Some(v.to_string()),
                        _ => {} // unknown option, ignored
                    }
                }
                // unknown bare flag, ignored
            }
        }
    }
    tag
}
