//! Typed access to the changelog table.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::entry::{self, LedgerEntry, KEY_CHANGE_ID, LOCK_KEY};
use crate::error::{ChangesetError, Result};
use crate::store::{Item, KvStore, PutCondition, StoreError, TableSpec, TableStatus};

/// How long `ensure_table` waits for a new table to turn active.
#[derive(Debug, Clone, Copy)]
pub struct TableWait {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for TableWait {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Store failures seen by the ledger. Only a violated condition keeps its
/// identity; everything else is a connection problem for the current run.
fn map_store_err(e: StoreError) -> ChangesetError {
    match e {
        StoreError::ConditionCheckFailed(key) => ChangesetError::AlreadyExists(key),
        other => ChangesetError::Connection(other.to_string()),
    }
}

/// Handle on the changelog table.
#[derive(Clone)]
pub struct LedgerStore {
    client: Arc<dyn KvStore>,
    table: String,
}

impl LedgerStore {
    /// Look the table up by name, creating it with a single `changeId` hash
    /// key when absent, then block until it reports active.
    pub fn ensure_table(client: Arc<dyn KvStore>, name: &str, wait: TableWait) -> Result<Self> {
        info!(table = %name, "searching for an existing changelog table");
        let status = match client.describe_table(name) {
            Ok(desc) => {
                info!(table = %name, "changelog table found");
                desc.status
            }
            Err(StoreError::TableNotFound(_)) => {
                info!(table = %name, "creating changelog table");
                client
                    .create_table(&TableSpec::new(name, KEY_CHANGE_ID))
                    .map_err(map_store_err)?
                    .status
            }
            Err(e) => return Err(map_store_err(e)),
        };

        let store = Self {
            client,
            table: name.to_string(),
        };
        if status != TableStatus::Active {
            store.wait_for_active(wait)?;
        }
        Ok(store)
    }

    fn wait_for_active(&self, wait: TableWait) -> Result<()> {
        let deadline = Instant::now().checked_add(wait.timeout);
        loop {
            let desc = self
                .client
                .describe_table(&self.table)
                .map_err(map_store_err)?;
            if desc.status == TableStatus::Active {
                info!(table = %self.table, "changelog table is active");
                return Ok(());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(ChangesetError::Connection(format!(
                    "table '{}' did not become active within {}s",
                    self.table,
                    wait.timeout.as_secs()
                )));
            }
            debug!(table = %self.table, "waiting for changelog table to become active");
            std::thread::sleep(wait.poll_interval);
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn client(&self) -> &Arc<dyn KvStore> {
        &self.client
    }

    // -----------------------------------------------------------------------
    // Primitives
    // -----------------------------------------------------------------------

    pub fn get(&self, key: &str) -> Result<Option<Item>> {
        self.client.get_item(&self.table, key).map_err(map_store_err)
    }

    /// Write `item`; with `conditional_on_absent` an existing key fails with
    /// [`ChangesetError::AlreadyExists`].
    pub fn put(&self, item: Item, conditional_on_absent: bool) -> Result<()> {
        let condition = if conditional_on_absent {
            PutCondition::KeyNotExists
        } else {
            PutCondition::Always
        };
        self.client
            .put_item(&self.table, item, condition)
            .map_err(map_store_err)
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_item(&self.table, key)
            .map_err(map_store_err)
    }

    // -----------------------------------------------------------------------
    // Ledger operations
    // -----------------------------------------------------------------------

    pub fn is_new_change(&self, change_id: &str) -> Result<bool> {
        Ok(self.get(change_id)?.is_none())
    }

    /// Append an entry. The insert is conditional so a second runner that
    /// slipped past the lock cannot overwrite the first record.
    pub fn record(&self, entry: &LedgerEntry) -> Result<()> {
        if entry::is_reserved_key(&entry.change_id) {
            return Err(ChangesetError::AlreadyExists(format!(
                "'{}' is the reserved lock key",
                entry.change_id
            )));
        }
        self.put(entry.to_item(), true)
    }

    /// All applied entries, oldest first. The lock row is not part of the ledger.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let items = self.client.scan(&self.table).map_err(map_store_err)?;
        let mut entries = items
            .iter()
            .filter(|item| item.get_str(KEY_CHANGE_ID) != Some(LOCK_KEY))
            .map(LedgerEntry::from_item)
            .collect::<Result<Vec<_>>>()?;
        entries.sort_by(|a, b| {
            a.applied_at
                .cmp(&b.applied_at)
                .then_with(|| a.change_id.cmp(&b.change_id))
        });
        Ok(entries)
    }
}
