//! Persistent [`KvStore`] backend on redb.
//!
//! # Table design
//!
//! A `__tables` metadata table maps each logical table name to its JSON
//! encoded [`TableSpec`]. Every logical table is a redb table of its own:
//! ```text
//! key:   value of the hash key attribute (&str)
//! value: JSON-encoded Item (&[u8])
//! ```
//!
//! redb serializes write transactions, so a conditional put that checks for
//! the key and inserts inside one write transaction is atomic with respect to
//! every other writer on the same database.

use std::fmt::Display;
use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition, TableError};

use super::{
    Item, KvStore, PutCondition, StoreError, StoreResult, TableDescription, TableSpec,
    TableStatus,
};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// Name of the metadata table. Not usable as a logical table.
pub const METADATA_TABLE: &str = "__tables";

/// Key: logical table name
/// Value: JSON-encoded TableSpec
const TABLES: TableDefinition<&str, &[u8]> = TableDefinition::new(METADATA_TABLE);

fn items_table(name: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(name)
}

fn backend(e: impl Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn read_spec<T>(meta: &T, name: &str) -> StoreResult<Option<TableSpec>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match meta.get(name).map_err(backend)? {
        Some(raw) => Ok(Some(serde_json::from_slice(raw.value()).map_err(backend)?)),
        None => Ok(None),
    }
}

fn decode_item(raw: &[u8]) -> StoreResult<Item> {
    serde_json::from_slice(raw).map_err(|e| StoreError::InvalidItem(e.to_string()))
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the redb database at `path`.
    ///
    /// Creates the metadata table if it doesn't already exist. Failure to open
    /// the file is reported as [`StoreError::Unreachable`].
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unreachable(format!("{}: {e}", parent.display())))?;
        }
        let db = Database::create(path)
            .map_err(|e| StoreError::Unreachable(format!("{}: {e}", path.display())))?;
        let wt = db.begin_write().map_err(backend)?;
        wt.open_table(TABLES).map_err(backend)?;
        wt.commit().map_err(backend)?;
        Ok(Self { db })
    }

    fn spec_for_write(&self, wt: &redb::WriteTransaction, name: &str) -> StoreResult<TableSpec> {
        let meta = wt.open_table(TABLES).map_err(backend)?;
        read_spec(&meta, name)?.ok_or_else(|| StoreError::TableNotFound(name.to_string()))
    }
}

impl KvStore for RedbStore {
    fn describe_table(&self, name: &str) -> StoreResult<TableDescription> {
        let rt = self.db.begin_read().map_err(backend)?;
        let meta = rt.open_table(TABLES).map_err(backend)?;
        let spec = read_spec(&meta, name)?.ok_or_else(|| StoreError::TableNotFound(name.into()))?;
        Ok(TableDescription {
            spec,
            status: TableStatus::Active,
        })
    }

    fn create_table(&self, spec: &TableSpec) -> StoreResult<TableDescription> {
        if spec.name == METADATA_TABLE {
            return Err(StoreError::Backend(format!(
                "'{METADATA_TABLE}' is reserved for table metadata"
            )));
        }
        let encoded = serde_json::to_vec(spec).map_err(backend)?;
        let wt = self.db.begin_write().map_err(backend)?;
        {
            let mut meta = wt.open_table(TABLES).map_err(backend)?;
            if read_spec(&meta, &spec.name)?.is_none() {
                meta.insert(spec.name.as_str(), encoded.as_slice())
                    .map_err(backend)?;
            }
        }
        wt.open_table(items_table(&spec.name)).map_err(backend)?;
        wt.commit().map_err(backend)?;
        self.describe_table(&spec.name)
    }

    fn get_item(&self, table: &str, key: &str) -> StoreResult<Option<Item>> {
        let rt = self.db.begin_read().map_err(backend)?;
        let items = match rt.open_table(items_table(table)) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => {
                return Err(StoreError::TableNotFound(table.to_string()))
            }
            Err(e) => return Err(backend(e)),
        };
        let item = match items.get(key).map_err(backend)? {
            Some(raw) => Some(decode_item(raw.value())?),
            None => None,
        };
        Ok(item)
    }

    fn put_item(&self, table: &str, item: Item, condition: PutCondition) -> StoreResult<()> {
        let wt = self.db.begin_write().map_err(backend)?;
        let spec = self.spec_for_write(&wt, table)?;
        let key = item.key(&spec.hash_key)?.to_string();
        let value = serde_json::to_vec(&item).map_err(backend)?;
        {
            let mut items = wt.open_table(items_table(table)).map_err(backend)?;
            if condition == PutCondition::KeyNotExists
                && items.get(key.as_str()).map_err(backend)?.is_some()
            {
                drop(items);
                wt.abort().map_err(backend)?;
                return Err(StoreError::ConditionCheckFailed(key));
            }
            items
                .insert(key.as_str(), value.as_slice())
                .map_err(backend)?;
        }
        wt.commit().map_err(backend)?;
        Ok(())
    }

    fn delete_item(&self, table: &str, key: &str) -> StoreResult<()> {
        let wt = self.db.begin_write().map_err(backend)?;
        self.spec_for_write(&wt, table)?;
        {
            let mut items = wt.open_table(items_table(table)).map_err(backend)?;
            items.remove(key).map_err(backend)?;
        }
        wt.commit().map_err(backend)?;
        Ok(())
    }

    fn scan(&self, table: &str) -> StoreResult<Vec<Item>> {
        let rt = self.db.begin_read().map_err(backend)?;
        let items = match rt.open_table(items_table(table)) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => {
                return Err(StoreError::TableNotFound(table.to_string()))
            }
            Err(e) => return Err(backend(e)),
        };

        let mut result = Vec::new();
        for entry in items.iter().map_err(backend)? {
            let (_, v) = entry.map_err(backend)?;
            result.push(decode_item(v.value())?);
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, RedbStore) {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(&dir.path().join("ledger.redb")).unwrap();
        (dir, store)
    }

    fn row(id: &str) -> Item {
        Item::new().with("changeId", id).with("author", "ops")
    }

    #[test]
    fn metadata_table_name_is_refused() {
        let (_dir, store) = open_tmp();
        assert!(matches!(
            store.create_table(&TableSpec::new(METADATA_TABLE, "changeId")),
            Err(StoreError::Backend(_))
        ));
    }

    #[test]
    fn describe_missing_table_is_not_found() {
        let (_dir, store) = open_tmp();
        assert!(matches!(
            store.describe_table("changelog"),
            Err(StoreError::TableNotFound(name)) if name == "changelog"
        ));
    }

    #[test]
    fn create_table_is_active_and_idempotent() {
        let (_dir, store) = open_tmp();
        let spec = TableSpec::new("changelog", "changeId");
        let desc = store.create_table(&spec).unwrap();
        assert_eq!(desc.status, TableStatus::Active);
        assert_eq!(desc.spec.hash_key, "changeId");

        store.put_item("changelog", row("a"), PutCondition::Always).unwrap();
        store.create_table(&spec).unwrap();
        assert!(store.get_item("changelog", "a").unwrap().is_some());
    }

    #[test]
    fn conditional_put_rejects_existing_key() {
        let (_dir, store) = open_tmp();
        store
            .create_table(&TableSpec::new("changelog", "changeId"))
            .unwrap();
        store
            .put_item("changelog", row("LOCK"), PutCondition::KeyNotExists)
            .unwrap();
        let second = store.put_item("changelog", row("LOCK"), PutCondition::KeyNotExists);
        assert!(matches!(second, Err(StoreError::ConditionCheckFailed(k)) if k == "LOCK"));

        // An unconditional put still overwrites.
        store
            .put_item(
                "changelog",
                row("LOCK").with("author", "other"),
                PutCondition::Always,
            )
            .unwrap();
        let item = store.get_item("changelog", "LOCK").unwrap().unwrap();
        assert_eq!(item.get_str("author"), Some("other"));
    }

    #[test]
    fn delete_absent_key_is_ok() {
        let (_dir, store) = open_tmp();
        store
            .create_table(&TableSpec::new("changelog", "changeId"))
            .unwrap();
        store.delete_item("changelog", "nothing").unwrap();
    }

    #[test]
    fn operations_on_missing_table_fail() {
        let (_dir, store) = open_tmp();
        assert!(matches!(
            store.get_item("nope", "a"),
            Err(StoreError::TableNotFound(_))
        ));
        assert!(matches!(
            store.put_item("nope", row("a"), PutCondition::Always),
            Err(StoreError::TableNotFound(_))
        ));
        assert!(matches!(
            store.delete_item("nope", "a"),
            Err(StoreError::TableNotFound(_))
        ));
    }

    #[test]
    fn put_without_hash_key_is_invalid() {
        let (_dir, store) = open_tmp();
        store
            .create_table(&TableSpec::new("changelog", "changeId"))
            .unwrap();
        let item = Item::new().with("author", "ops");
        assert!(matches!(
            store.put_item("changelog", item, PutCondition::Always),
            Err(StoreError::InvalidItem(_))
        ));
    }

    #[test]
    fn scan_returns_items_in_key_order() {
        let (_dir, store) = open_tmp();
        store
            .create_table(&TableSpec::new("changelog", "changeId"))
            .unwrap();
        for id in ["003", "001", "002"] {
            store.put_item("changelog", row(id), PutCondition::Always).unwrap();
        }
        let ids: Vec<String> = store
            .scan("changelog")
            .unwrap()
            .iter()
            .map(|i| i.get_str("changeId").unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["001", "002", "003"]);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/ledger.redb");
        {
            let store = RedbStore::open(&path).unwrap();
            store
                .create_table(&TableSpec::new("changelog", "changeId"))
                .unwrap();
            store.put_item("changelog", row("a"), PutCondition::Always).unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        assert!(store.get_item("changelog", "a").unwrap().is_some());
    }
}
