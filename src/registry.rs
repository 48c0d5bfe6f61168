//! Driver seam and named connection registry.
//!
//! The crate builds statements; executing them is the driver's job. A
//! driver adapter implements [`Executor`] and registers under a name, and
//! stores resolve connections through the process-wide registry.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::info;

use crate::error::{Error, Result};
use crate::row::Rows;
use crate::stmt::Statement;

/// Name the default connection registers under.
pub const DEFAULT_CONNECTION: &str = "default";

/// A driver adapter: executes built statements against a live connection.
pub trait Executor: Send + Sync {
    /// Run a statement that returns no rows; yields the affected row count.
    fn execute(&self, stmt: &Statement) -> Result<u64>;

    /// Run a statement that returns rows.
    fn fetch(&self, stmt: &Statement) -> Result<Rows>;
}

fn registry() -> &'static RwLock<HashMap<String, Arc<dyn Executor>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<dyn Executor>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a connection under `name`, replacing any previous holder.
pub fn register(name: impl Into<String>, executor: Arc<dyn Executor>) {
    let name = name.into();
    info!(connection = %name, "registering connection");
    let mut map = match registry().write() {
        Ok(map) => map,
        Err(poisoned) => poisoned.into_inner(),
    };
    map.insert(name, executor);
}

/// Look up a registered connection.
pub fn connection(name: &str) -> Result<Arc<dyn Executor>> {
    let map = match registry().read() {
        Ok(map) => map,
        Err(poisoned) => poisoned.into_inner(),
    };
    map.get(name)
        .cloned()
        .ok_or_else(|| Error::UnknownConnection(name.to_string()))
}
