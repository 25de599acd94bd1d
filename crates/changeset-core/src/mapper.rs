//! Higher-level client mapping serde documents onto store items.
//!
//! Change sets that prefer typed access take a [`DocumentMapper`] instead of
//! the raw [`KvStore`]. A mapper is a thin wrapper around a client plus an
//! optional table-name prefix, so building one is cheap.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ChangesetError, Result};
use crate::store::{Item, KvStore, PutCondition, StoreError, TableSpec};

/// A document type stored in its own table.
pub trait Document: Serialize + DeserializeOwned {
    /// Base table name, before any prefix.
    const TABLE: &'static str;
    /// Attribute holding the hash key.
    const HASH_KEY: &'static str;
}

fn store_err(e: StoreError) -> ChangesetError {
    match e {
        StoreError::ConditionCheckFailed(key) => ChangesetError::AlreadyExists(key),
        other => ChangesetError::Connection(other.to_string()),
    }
}

#[derive(Clone)]
pub struct DocumentMapper {
    client: Arc<dyn KvStore>,
    table_prefix: Option<String>,
}

impl DocumentMapper {
    pub fn new(client: Arc<dyn KvStore>) -> Self {
        Self {
            client,
            table_prefix: None,
        }
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = Some(prefix.into());
        self
    }

    pub fn client(&self) -> &Arc<dyn KvStore> {
        &self.client
    }

    pub fn table_prefix(&self) -> Option<&str> {
        self.table_prefix.as_deref()
    }

    pub fn table_name(&self, base: &str) -> String {
        match &self.table_prefix {
            Some(prefix) => format!("{prefix}{base}"),
            None => base.to_string(),
        }
    }

    /// Create the document's table if it does not exist yet.
    pub fn ensure_table<T: Document>(&self) -> Result<()> {
        let name = self.table_name(T::TABLE);
        match self.client.describe_table(&name) {
            Ok(_) => Ok(()),
            Err(StoreError::TableNotFound(_)) => {
                self.client
                    .create_table(&TableSpec::new(name, T::HASH_KEY))
                    .map_err(store_err)?;
                Ok(())
            }
            Err(e) => Err(store_err(e)),
        }
    }

    pub fn save<T: Document>(&self, doc: &T) -> Result<()> {
        let item = Item::from_value(serde_json::to_value(doc)?).map_err(store_err)?;
        self.client
            .put_item(&self.table_name(T::TABLE), item, PutCondition::Always)
            .map_err(store_err)
    }

    /// Save only if no document with the same key exists.
    pub fn insert<T: Document>(&self, doc: &T) -> Result<()> {
        let item = Item::from_value(serde_json::to_value(doc)?).map_err(store_err)?;
        self.client
            .put_item(&self.table_name(T::TABLE), item, PutCondition::KeyNotExists)
            .map_err(store_err)
    }

    pub fn load<T: Document>(&self, key: &str) -> Result<Option<T>> {
        let item = self
            .client
            .get_item(&self.table_name(T::TABLE), key)
            .map_err(store_err)?;
        match item {
            Some(item) => Ok(Some(serde_json::from_value(item.into_value())?)),
            None => Ok(None),
        }
    }

    pub fn delete<T: Document>(&self, key: &str) -> Result<()> {
        self.client
            .delete_item(&self.table_name(T::TABLE), key)
            .map_err(store_err)
    }

    pub fn scan<T: Document>(&self) -> Result<Vec<T>> {
        self.client
            .scan(&self.table_name(T::TABLE))
            .map_err(store_err)?
            .into_iter()
            .map(|item| serde_json::from_value(item.into_value()).map_err(ChangesetError::from))
            .collect()
    }
}
