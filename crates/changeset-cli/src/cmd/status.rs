use super::{load_config, open_ledger};
use crate::output::print_json;
use anyhow::Context;
use changeset_core::lock::LockManager;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct StatusOutput {
    table: String,
    locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    acquired_at: Option<String>,
    entries: usize,
}

pub fn run(db: &Path, config_path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let ledger = open_ledger(db, &config)?;
    let locks = LockManager::new(ledger.clone(), config.lock_policy());

    let locked = locks.is_held().context("failed to read lock")?;
    // An unreadable lock row still counts as held; `changeset unlock` clears it.
    let lock = locks.current().ok().flatten();
    let entries = ledger.entries().context("failed to read ledger")?;

    let output = StatusOutput {
        table: ledger.table_name().to_string(),
        locked,
        owner: lock.as_ref().map(|l| l.owner.clone()),
        acquired_at: lock.as_ref().map(|l| l.acquired_at.to_rfc3339()),
        entries: entries.len(),
    };

    if json {
        return print_json(&output);
    }

    println!("Table:   {}", output.table);
    match &lock {
        Some(l) => println!(
            "Lock:    held by {} since {}",
            l.owner,
            l.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None if locked => println!("Lock:    held (unreadable lock row)"),
        None => println!("Lock:    free"),
    }
    println!("Applied: {}", output.entries);
    Ok(())
}
