//! Low-level key-value client interface and its backends.
//!
//! The runner only needs what a conditional-write store offers: describe and
//! create a table, and get / put / delete a single item by its hash key. A put
//! may carry a "key must not exist" condition, which is the only atomic
//! primitive the lock protocol relies on.
//!
//! Two backends ship with the crate:
//! - [`RedbStore`]: persistent, file-backed, one redb table per logical table.
//! - [`MemoryStore`]: in-process, with fault injection for tests.

pub mod memory;
pub mod redb_store;

pub use self::memory::MemoryStore;
pub use self::redb_store::RedbStore;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("conditional check failed for key '{0}'")]
    ConditionCheckFailed(String),

    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("invalid item: {0}")]
    InvalidItem(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Table metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Creating,
    Active,
}

/// Shape of a table: its name, the attribute holding the hash key, and the
/// provisioned throughput requested at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub hash_key: String,
    #[serde(default = "default_capacity")]
    pub read_capacity: u64,
    #[serde(default = "default_capacity")]
    pub write_capacity: u64,
}

fn default_capacity() -> u64 {
    1
}

impl TableSpec {
    /// A table with a single string hash key and minimal capacity.
    pub fn new(name: impl Into<String>, hash_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash_key: hash_key.into(),
            read_capacity: default_capacity(),
            write_capacity: default_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDescription {
    pub spec: TableSpec,
    pub status: TableStatus,
}

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// A single row: a flat map of attribute name to JSON value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item {
    attributes: BTreeMap<String, Value>,
}

impl Item {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.attributes.get(name).and_then(Value::as_i64)
    }

    /// The string value of the table's hash key attribute.
    pub fn key(&self, hash_key: &str) -> StoreResult<&str> {
        self.get_str(hash_key).ok_or_else(|| {
            StoreError::InvalidItem(format!("missing string hash key attribute '{hash_key}'"))
        })
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.attributes.into_iter().collect())
    }

    /// Build an item from a JSON object. Anything else is rejected.
    pub fn from_value(value: Value) -> StoreResult<Self> {
        match value {
            Value::Object(map) => Ok(Self {
                attributes: map.into_iter().collect(),
            }),
            other => Err(StoreError::InvalidItem(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// KvStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCondition {
    /// Overwrite any existing item with the same key.
    Always,
    /// Fail with [`StoreError::ConditionCheckFailed`] if the key is present.
    KeyNotExists,
}

/// A key-value client with single-item conditional writes.
///
/// Every call is one round trip with no internal retry.
pub trait KvStore: Send + Sync {
    /// Fails with [`StoreError::TableNotFound`] when the table is absent.
    fn describe_table(&self, name: &str) -> StoreResult<TableDescription>;

    fn create_table(&self, spec: &TableSpec) -> StoreResult<TableDescription>;

    fn get_item(&self, table: &str, key: &str) -> StoreResult<Option<Item>>;

    fn put_item(&self, table: &str, item: Item, condition: PutCondition) -> StoreResult<()>;

    /// Deleting an absent key is not an error.
    fn delete_item(&self, table: &str, key: &str) -> StoreResult<()>;

    /// All items in key order.
    fn scan(&self, table: &str) -> StoreResult<Vec<Item>>;
}
