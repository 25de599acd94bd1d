//! In-process [`KvStore`] backend.
//!
//! Behaves like a remote store as far as the runner can tell: new tables can
//! be made to report `Creating` for a number of describe calls before turning
//! `Active`, and the whole store can be marked unreachable.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{
    Item, KvStore, PutCondition, StoreError, StoreResult, TableDescription, TableSpec,
    TableStatus,
};

struct MemTable {
    spec: TableSpec,
    items: BTreeMap<String, Item>,
    pending_polls: u32,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, MemTable>>,
    unreachable: AtomicBool,
    activation_polls: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newly created tables report `Creating` for the next `polls` describe
    /// calls.
    pub fn with_activation_delay(self, polls: u32) -> Self {
        self.activation_polls.store(polls, Ordering::SeqCst);
        self
    }

    /// Fail every subsequent call with [`StoreError::Unreachable`].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn tables(&self) -> StoreResult<MutexGuard<'_, HashMap<String, MemTable>>> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable("memory store marked unreachable".into()));
        }
        self.tables
            .lock()
            .map_err(|e| StoreError::Backend(format!("memory store poisoned: {e}")))
    }
}

fn table_mut<'a>(
    tables: &'a mut HashMap<String, MemTable>,
    name: &str,
) -> StoreResult<&'a mut MemTable> {
    tables
        .get_mut(name)
        .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
}

impl KvStore for MemoryStore {
    fn describe_table(&self, name: &str) -> StoreResult<TableDescription> {
        let mut tables = self.tables()?;
        let table = table_mut(&mut tables, name)?;
        let status = if table.pending_polls > 0 {
            table.pending_polls -= 1;
            TableStatus::Creating
        } else {
            TableStatus::Active
        };
        Ok(TableDescription {
            spec: table.spec.clone(),
            status,
        })
    }

    fn create_table(&self, spec: &TableSpec) -> StoreResult<TableDescription> {
        let delay = self.activation_polls.load(Ordering::SeqCst);
        let mut tables = self.tables()?;
        let table = tables.entry(spec.name.clone()).or_insert_with(|| MemTable {
            spec: spec.clone(),
            items: BTreeMap::new(),
            pending_polls: delay,
        });
        let status = if table.pending_polls > 0 {
            TableStatus::Creating
        } else {
            TableStatus::Active
        };
        Ok(TableDescription {
            spec: table.spec.clone(),
            status,
        })
    }

    fn get_item(&self, table: &str, key: &str) -> StoreResult<Option<Item>> {
        let mut tables = self.tables()?;
        Ok(table_mut(&mut tables, table)?.items.get(key).cloned())
    }

    fn put_item(&self, table: &str, item: Item, condition: PutCondition) -> StoreResult<()> {
        let mut tables = self.tables()?;
        let table = table_mut(&mut tables, table)?;
        let key = item.key(&table.spec.hash_key)?.to_string();
        if condition == PutCondition::KeyNotExists && table.items.contains_key(&key) {
            return Err(StoreError::ConditionCheckFailed(key));
        }
        table.items.insert(key, item);
        Ok(())
    }

    fn delete_item(&self, table: &str, key: &str) -> StoreResult<()> {
        let mut tables = self.tables()?;
        table_mut(&mut tables, table)?.items.remove(key);
        Ok(())
    }

    fn scan(&self, table: &str) -> StoreResult<Vec<Item>> {
        let mut tables = self.tables()?;
        Ok(table_mut(&mut tables, table)?.items.values().cloned().collect())
    }
}
