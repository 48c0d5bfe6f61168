//! The entity wrapper: a struct codec bound to a concrete table.

use std::sync::Arc;

use crate::error::Result;
use crate::model::codec::{StructCodec, codec_for};
use crate::model::Model;

/// A lightweight binding of a record type's codec to a table name.
/// Created per operation, discarded after.
#[derive(Debug, Clone)]
pub struct Entity {
    pub codec: Arc<StructCodec>,
    /// Table name; also the key kind.
    pub table: String,
}

impl Entity {
    /// Bind a record type to its default table (the key kind).
    pub fn of<T: Model>() -> Result<Self> {
        Ok(Self {
            codec: codec_for::<T>()?,
            table: T::kind().to_string(),
        })
    }

    /// Rebind to a different table name.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }
}
