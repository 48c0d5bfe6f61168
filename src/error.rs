//! Error types for arbor.

use thiserror::Error;

/// The main error type for arbor operations.
///
/// Variants fall into five families: codec construction, key handling,
/// value conversion, query construction, and driver execution. Nothing is
/// retried automatically; every error is terminal to the operation that
/// raised it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    // --- codec construction ---
    /// Field resolves to a storage name that is not a valid column name.
    #[error("invalid field name '{0}'")]
    InvalidFieldName(String),

    /// Field resolves to a reserved column name ($Key, $Parent, $Deleted).
    #[error("field name '{0}' collides with a reserved column")]
    ReservedName(String),

    /// Two fields resolve to the same storage name.
    #[error("duplicate column name '{0}'")]
    DuplicateName(String),

    /// A field tagged `__key__` is not of the key type.
    #[error("identity field '{0}' must be of the key type")]
    InvalidKeyField(String),

    /// A field kind the codec cannot map onto a column.
    #[error("unsupported field '{field}': {reason}")]
    UnsupportedField { field: String, reason: String },

    // --- keys ---
    /// A canonical key string that does not parse.
    #[error("malformed key string '{0}'")]
    MalformedKey(String),

    /// A key with an empty link used where completeness is required.
    #[error("incomplete key '{0}'")]
    IncompleteKey(String),

    /// A cursor string that does not decode to a key.
    #[error("invalid cursor")]
    InvalidCursor,

    // --- value conversion ---
    /// Stored bytes do not match the declared field type.
    #[error("value mismatch for column '{column}': expected {expected}")]
    ValueMismatch {
        column: String,
        expected: &'static str,
    },

    /// Stored number does not fit the declared width.
    #[error("numeric overflow for column '{column}': {value} does not fit {width}")]
    ValueOverflow {
        column: String,
        value: String,
        width: &'static str,
    },

    /// Corrupt byte/JSON/timestamp payload.
    #[error("corrupt payload for column '{column}': {detail}")]
    CorruptPayload { column: String, detail: String },

    // --- query construction ---
    /// An operator token that maps to no known operator.
    #[error("invalid operator '{0}'")]
    InvalidOperator(String),

    /// Accumulated query-builder errors, reported together at render time.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    // --- execution ---
    /// Error forwarded verbatim from the driver.
    #[error("arbor: driver error: {0}")]
    Driver(String),

    /// Lookup of a connection name that was never registered.
    #[error("no connection registered under '{0}'")]
    UnknownConnection(String),
}

impl Error {
    /// Create an unsupported-field error.
    pub fn unsupported(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a corrupt-payload error.
    pub fn corrupt(column: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::CorruptPayload {
            column: column.into(),
            detail: detail.into(),
        }
    }
}

/// Result type alias for arbor operations.
pub type Result<T> = std::result::Result<T, Error>;
