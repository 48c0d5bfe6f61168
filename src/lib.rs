//! Hierarchical, ancestor-keyed records on plain SQL.
//!
//! Records carry a [`key::Key`]: a kind plus an id, optionally chained
//! under a parent key. The crate maps those records onto ordinary SQL
//! tables using two reserved columns for identity, builds every statement
//! through a dialect seam ([`stmt::Dialect`]), and scans rows back into
//! native types through a per-type [`model::codec::StructCodec`].
//!
//! The crate never talks to a database itself. Drivers implement
//! [`registry::Executor`] and register under a connection name; a
//! [`store::Store`] resolves one and runs the full pipeline:
//!
//! ```text
//! Model → StructCodec → normalize → Statement → Executor → Rows → scan
//! ```

pub mod entity;
pub mod error;
pub mod key;
pub mod model;
pub mod normalize;
pub mod query;
pub mod registry;
pub mod row;
pub mod stmt;
pub mod store;
pub mod tag;
pub mod value;

pub use entity::Entity;
pub use error::{Error, Result};
pub use key::{Id, Key, decode_cursor, encode_cursor};
pub use model::{FieldDescriptor, FieldType, Model, StructDescriptor};
pub use query::{Direction, LockMode, Operator, Query};
pub use registry::{Executor, register};
pub use row::{Page, Row, Rows};
pub use stmt::{Dialect, Statement, TableInfo};
pub use store::Store;
pub use value::{GeoPoint, Storable, Value};
