use super::{load_config, open_ledger};
use crate::output::print_json;
use anyhow::Context;
use changeset_core::entry::{LockRecord, KEY_AUTHOR};
use changeset_core::lock::LockManager;
use std::path::Path;

/// Clear the lock row regardless of who holds it.
///
/// Meant for a runner that died mid-run. Clearing the lock of a live run lets
/// a second runner start alongside it.
pub fn run(db: &Path, config_path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let ledger = open_ledger(db, &config)?;
    let locks = LockManager::new(ledger, config.lock_policy());

    let cleared = locks.force_release().context("failed to release lock")?;
    let record = cleared.as_ref().and_then(|row| LockRecord::from_item(row).ok());

    if json {
        let value = serde_json::json!({
            "released": cleared.is_some(),
            "owner": cleared.as_ref().and_then(|row| row.get_str(KEY_AUTHOR)),
            "acquired_at": record.as_ref().map(|l| l.acquired_at.to_rfc3339()),
        });
        return print_json(&value);
    }

    match (&cleared, &record) {
        (Some(_), Some(l)) => println!(
            "Released lock held by {} since {}.",
            l.owner,
            l.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        (Some(row), None) => println!(
            "Released unreadable lock row (author: {}).",
            row.get_str(KEY_AUTHOR).unwrap_or("unknown")
        ),
        (None, _) => println!("No lock held."),
    }
    Ok(())
}
