//! Hierarchical keys and their canonical string codec.
//!
//! A [`Key`] names a record by kind plus identifier, optionally chained to a
//! parent key. The canonical text form is `kind,id` segments joined by `/`,
//! ordered root to leaf, with name identifiers single-quoted:
//!
//! ```text
//! Account,'acme'/User,42
//! ```
//!
//! The same string doubles as the physical representation: the leaf id
//! literal lands in the `$Key` column and the parent chain in `$Parent`,
//! which is what makes ancestor queries expressible as anchored LIKE
//! prefixes.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::char,
    combinator::{map, verify},
    multi::separated_list1,
    sequence::delimited,
};

use crate::error::{Error, Result};

/// The identifier half of a key link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Id {
    /// No identifier assigned yet; the key is incomplete.
    #[default]
    None,
    /// Numeric identifier, rendered bare (`42`).
    Int(i64),
    /// Name identifier, rendered single-quoted (`'acme'`).
    Name(String),
}

impl Id {
    /// The literal stored in the `$Key` column: `42` or `'acme'`.
    pub fn literal(&self) -> String {
        match self {
            Id::None => String::new(),
            Id::Int(n) => n.to_string(),
            Id::Name(s) => format!("'{s}'"),
        }
    }

    /// Whether this link carries a usable identifier.
    pub fn is_set(&self) -> bool {
        match self {
            Id::None => false,
            Id::Int(_) => true,
            Id::Name(s) => !s.is_empty(),
        }
    }
}

/// A hierarchical identifier: kind, id, optional parent chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    kind: String,
    id: Id,
    parent: Option<Box<Key>>,
}

impl Key {
    /// An incomplete key of the given kind, id to be assigned on insert.
    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: Id::None,
            parent: None,
        }
    }

    /// A key with a numeric identifier.
    pub fn with_int(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id: Id::Int(id),
            parent: None,
        }
    }

    /// A key with a name identifier.
    ///
    /// Names may not contain a single quote; the canonical form quotes with
    /// `'` and does not escape.
    pub fn with_name(kind: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.contains('\'') {
            return Err(Error::MalformedKey(name));
        }
        Ok(Self {
            kind: kind.into(),
            id: Id::Name(name),
            parent: None,
        })
    }

    /// Attach a parent key, returning the extended key.
    pub fn with_parent(mut self, parent: Key) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    /// Replace the identifier on the leaf link.
    pub fn set_id(&mut self, id: Id) {
        self.id = id;
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    /// A key is complete only if every link of the chain has a non-empty
    /// kind and identifier.
    pub fn is_complete(&self) -> bool {
        let mut cur = Some(self);
        while let Some(k) = cur {
            if k.kind.is_empty() || !k.id.is_set() {
                return false;
            }
            cur = k.parent.as_deref();
        }
        true
    }

    /// Canonical string, root to leaf. An incomplete leaf renders with an
    /// empty id literal; callers requiring completeness check first.
    pub fn encode(&self) -> String {
        let mut segments = Vec::new();
        let mut cur = Some(self);
        while let Some(k) = cur {
            segments.push(format!("{},{}", k.kind, k.id.literal()));
            cur = k.parent.as_deref();
        }
        segments.reverse();
        segments.join("/")
    }

    /// Canonical string of the parent chain alone; empty for root keys.
    ///
    /// This is the exact value stored in the `$Parent` column.
    pub fn parent_path(&self) -> String {
        self.parent.as_deref().map(Key::encode).unwrap_or_default()
    }

    /// The concatenated form `parent_path + "/" + kind,id`, with a leading
    /// `/` when the key has no parent. Matches the SQL-side
    /// `CONCAT($Parent, '/kind,', $Key)` expression used for ordering,
    /// deletion membership, and cursors.
    pub fn concatenated(&self) -> String {
        format!("{}/{},{}", self.parent_path(), self.kind, self.id.literal())
    }

    /// Decode a canonical key string. The empty string decodes to `None`;
    /// malformed segments are hard errors.
    pub fn decode(input: &str) -> Result<Option<Key>> {
        if input.is_empty() {
            return Ok(None);
        }
        let (rest, links) = key_links(input).map_err(|_| Error::MalformedKey(input.to_string()))?;
        if !rest.is_empty() {
            return Err(Error::MalformedKey(input.to_string()));
        }
        // Root comes first; each link's parent is the previously built key.
        let mut key: Option<Key> = None;
        for (kind, id) in links {
            key = Some(Key {
                kind,
                id,
                parent: key.map(Box::new),
            });
        }
        Ok(key)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// `kind,id[/kind,id]...`
fn key_links(input: &str) -> IResult<&str, Vec<(String, Id)>> {
    separated_list1(char('/'), key_link)(input)
}

/// One `kind,id` segment. The kind is everything up to the first comma.
fn key_link(input: &str) -> IResult<&str, (String, Id)> {
    let (input, kind) = take_while1(|c| c != ',' && c != '/')(input)?;
    let (input, _) = char(',')(input)?;
    let (input, id) = alt((quoted_name, bare_id))(input)?;
    Ok((input, (kind.to_string(), id)))
}

/// `'name'`: always a name link, even when the quoted text is numeric.
fn quoted_name(input: &str) -> IResult<&str, Id> {
    map(
        delimited(char('\''), take_while(|c| c != '\''), char('\'')),
        |s: &str| Id::Name(s.to_string()),
    )(input)
}

/// Bare id value: a signed 64-bit integer, or failing that a name. A value
/// that opens a quote but never made it through `quoted_name` is malformed.
fn bare_id(input: &str) -> IResult<&str, Id> {
    map(
        verify(take_while1(|c| c != '/'), |s: &str| !s.starts_with('\'')),
        |s: &str| match s.parse::<i64>() {
            Ok(n) => Id::Int(n),
            Err(_) => Id::Name(s.to_string()),
        },
    )(input)
}

/// Encode a key as an opaque pagination cursor (URL-safe base64, unpadded).
pub fn encode_cursor(key: &Key) -> String {
    URL_SAFE_NO_PAD.encode(key.encode())
}

/// Decode a pagination cursor back into a key.
pub fn decode_cursor(cursor: &str) -> Result<Key> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| Error::InvalidCursor)?;
    let text = String::from_utf8(bytes).map_err(|_| Error::InvalidCursor)?;
    Key::decode(&text)?.ok_or(Error::InvalidCursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn acme_user() -> Key {
        Key::with_int("User", 42).with_parent(Key::with_name("Account", "acme").unwrap())
    }

    #[test]
    fn test_encode_parent_chain() {
        assert_eq!(acme_user().encode(), "Account,'acme'/User,42");
    }

    #[test]
    fn test_decode_rebuilds_chain_root_first() {
        let key = Key::decode("Account,'acme'/User,42").unwrap().unwrap();
        assert_eq!(key.kind(), "User");
        assert_eq!(key.id(), &Id::Int(42));
        let parent = key.parent().unwrap();
        assert_eq!(parent.kind(), "Account");
        assert_eq!(parent.id(), &Id::Name("acme".to_string()));
        assert!(parent.parent().is_none());
    }

    #[test]
    fn test_round_trip() {
        let keys = [
            Key::with_int("User", 1),
            Key::with_int("User", -7),
            Key::with_name("User", "jo hn/doe,esq").unwrap(),
            acme_user(),
            Key::with_int("C", 3)
                .with_parent(Key::with_int("B", 2).with_parent(Key::with_int("A", 1))),
        ];
        for key in keys {
            let decoded = Key::decode(&key.encode()).unwrap().unwrap();
            assert_eq!(decoded, key);
        }
    }

    #[test]
    fn test_quoted_numeric_stays_name() {
        let key = Key::decode("User,'42'").unwrap().unwrap();
        assert_eq!(key.id(), &Id::Name("42".to_string()));
    }

    #[test]
    fn test_bare_non_numeric_is_name() {
        let key = Key::decode("User,jane").unwrap().unwrap();
        assert_eq!(key.id(), &Id::Name("jane".to_string()));
    }

    #[test]
    fn test_empty_decodes_to_none() {
        assert_eq!(Key::decode("").unwrap(), None);
    }

    #[test]
    fn test_malformed_segments() {
        for bad in ["User", "User,", ",42", "User,42/", "/User,42", "User,'x"] {
            assert!(Key::decode(bad).is_err(), "expected error for {bad:?}");
        }
    }

    #[test]
    fn test_completeness() {
        assert!(acme_user().is_complete());
        assert!(!Key::incomplete("User").is_complete());
        let dangling = Key::with_int("User", 1).with_parent(Key::incomplete("Account"));
        assert!(!dangling.is_complete());
    }

    #[test]
    fn test_concatenated_has_leading_slash_for_roots() {
        assert_eq!(Key::with_int("User", 42).concatenated(), "/User,42");
        assert_eq!(acme_user().concatenated(), "Account,'acme'/User,42");
    }

    #[test]
    fn test_cursor_round_trip() {
        let key = acme_user();
        let cursor = encode_cursor(&key);
        assert!(!cursor.contains('='));
        assert_eq!(decode_cursor(&cursor).unwrap(), key);
        assert!(decode_cursor("!!!").is_err());
    }
}
