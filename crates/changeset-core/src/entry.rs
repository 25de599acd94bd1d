//! Rows stored in the changelog table.
//!
//! Ledger entries and the lock record share one table and one key space. The
//! lock lives under the reserved key [`LOCK_KEY`], which no change set may use
//! as its id.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChangesetError, Result};
use crate::store::Item;

pub const KEY_CHANGE_ID: &str = "changeId";
pub const KEY_AUTHOR: &str = "author";
pub const KEY_TIMESTAMP: &str = "timestamp";
pub const KEY_UNIT: &str = "changeLogClass";
pub const KEY_STEP: &str = "changeSetMethod";
pub const KEY_LOCK_TOKEN: &str = "lockToken";

/// Reserved hash key of the singleton lock record.
pub const LOCK_KEY: &str = "LOCK";

pub fn is_reserved_key(change_id: &str) -> bool {
    change_id == LOCK_KEY
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ChangesetError::Connection(format!("invalid timestamp in row: {ms}")))
}

fn required_str<'a>(item: &'a Item, name: &str) -> Result<&'a str> {
    item.get_str(name)
        .ok_or_else(|| ChangesetError::Connection(format!("row is missing attribute '{name}'")))
}

// ---------------------------------------------------------------------------
// LedgerEntry
// ---------------------------------------------------------------------------

/// One applied change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub change_id: String,
    pub author: String,
    pub applied_at: DateTime<Utc>,
    pub unit_name: String,
    pub step_name: String,
}

impl LedgerEntry {
    pub fn new(
        change_id: impl Into<String>,
        author: impl Into<String>,
        unit_name: impl Into<String>,
        step_name: impl Into<String>,
    ) -> Self {
        Self {
            change_id: change_id.into(),
            author: author.into(),
            applied_at: Utc::now(),
            unit_name: unit_name.into(),
            step_name: step_name.into(),
        }
    }

    pub fn to_item(&self) -> Item {
        Item::new()
            .with(KEY_CHANGE_ID, self.change_id.as_str())
            .with(KEY_AUTHOR, self.author.as_str())
            .with(KEY_TIMESTAMP, self.applied_at.timestamp_millis())
            .with(KEY_UNIT, self.unit_name.as_str())
            .with(KEY_STEP, self.step_name.as_str())
    }

    pub fn from_item(item: &Item) -> Result<Self> {
        let ts = item.get_i64(KEY_TIMESTAMP).ok_or_else(|| {
            ChangesetError::Connection(format!("row is missing attribute '{KEY_TIMESTAMP}'"))
        })?;
        Ok(Self {
            change_id: required_str(item, KEY_CHANGE_ID)?.to_string(),
            author: item.get_str(KEY_AUTHOR).unwrap_or_default().to_string(),
            applied_at: millis_to_utc(ts)?,
            unit_name: item.get_str(KEY_UNIT).unwrap_or_default().to_string(),
            step_name: item.get_str(KEY_STEP).unwrap_or_default().to_string(),
        })
    }
}

impl std::fmt::Display for LedgerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[ChangeSet: id={}, author={}, unit={}, step={}]",
            self.change_id, self.author, self.unit_name, self.step_name
        )
    }
}

// ---------------------------------------------------------------------------
// LockRecord
// ---------------------------------------------------------------------------

/// Identity of a runner competing for the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOwner {
    pub name: String,
    pub token: Uuid,
}

impl LockOwner {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: Uuid::new_v4(),
        }
    }

    /// Owner named after the local hostname.
    pub fn local() -> Self {
        let name = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "UnknownHost".to_string());
        Self::new(name)
    }
}

/// The singleton "run in progress" row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub owner: String,
    pub token: Option<Uuid>,
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn for_owner(owner: &LockOwner) -> Self {
        Self {
            owner: owner.name.clone(),
            token: Some(owner.token),
            acquired_at: Utc::now(),
        }
    }

    pub fn to_item(&self) -> Item {
        let mut item = Item::new()
            .with(KEY_CHANGE_ID, LOCK_KEY)
            .with(KEY_AUTHOR, self.owner.as_str())
            .with(KEY_TIMESTAMP, self.acquired_at.timestamp_millis());
        if let Some(token) = self.token {
            item = item.with(KEY_LOCK_TOKEN, token.to_string());
        }
        item
    }

    /// Rows written by older runners carry no token.
    pub fn from_item(item: &Item) -> Result<Self> {
        let ts = item.get_i64(KEY_TIMESTAMP).unwrap_or_default();
        let token = item
            .get_str(KEY_LOCK_TOKEN)
            .and_then(|t| Uuid::parse_str(t).ok());
        Ok(Self {
            owner: item.get_str(KEY_AUTHOR).unwrap_or("unknown").to_string(),
            token,
            acquired_at: millis_to_utc(ts)?,
        })
    }

    pub fn is_owned_by(&self, owner: &LockOwner) -> bool {
        self.token == Some(owner.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_entry_uses_changelog_attribute_names() {
        let entry = LedgerEntry::new("001-init", "ops", "app::migrations::Initial", "create_users");
        let item = entry.to_item();
        assert_eq!(item.get_str("changeId"), Some("001-init"));
        assert_eq!(item.get_str("changeLogClass"), Some("app::migrations::Initial"));
        assert_eq!(item.get_str("changeSetMethod"), Some("create_users"));
        assert_eq!(
            item.get_i64("timestamp"),
            Some(entry.applied_at.timestamp_millis())
        );
    }

    #[test]
    fn ledger_entry_from_item_requires_timestamp() {
        let item = Item::new().with("changeId", "x");
        assert!(LedgerEntry::from_item(&item).is_err());
    }

    #[test]
    fn lock_record_tolerates_missing_token() {
        let item = Item::new()
            .with("changeId", LOCK_KEY)
            .with("author", "build-01")
            .with("timestamp", 1_700_000_000_000i64);
        let record = LockRecord::from_item(&item).unwrap();
        assert_eq!(record.owner, "build-01");
        assert!(record.token.is_none());
        assert!(!record.is_owned_by(&LockOwner::new("build-01")));
    }

    #[test]
    fn lock_record_ownership_is_by_token() {
        let me = LockOwner::new("build-01");
        let record = LockRecord::from_item(&LockRecord::for_owner(&me).to_item()).unwrap();
        assert!(record.is_owned_by(&me));
        assert!(!record.is_owned_by(&LockOwner::new("build-01")));
    }

    #[test]
    fn only_lock_key_is_reserved() {
        assert!(is_reserved_key("LOCK"));
        assert!(!is_reserved_key("lock"));
        assert!(!is_reserved_key("001-LOCK"));
    }
}
