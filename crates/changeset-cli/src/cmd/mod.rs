pub mod config;
pub mod ledger;
pub mod status;
pub mod unlock;

use anyhow::Context;
use changeset_core::config::RunnerConfig;
use changeset_core::ledger::LedgerStore;
use changeset_core::store::RedbStore;
use std::path::Path;
use std::sync::Arc;

/// Load the runner config, or the defaults when no file was given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<RunnerConfig> {
    match path {
        Some(p) => RunnerConfig::load(p)
            .with_context(|| format!("failed to load config {}", p.display())),
        None => Ok(RunnerConfig::default()),
    }
}

/// Open the ledger table of an existing database file.
pub fn open_ledger(db: &Path, config: &RunnerConfig) -> anyhow::Result<LedgerStore> {
    if !db.exists() {
        anyhow::bail!(
            "ledger database not found: {} (set --db or CHANGESET_DB)",
            db.display()
        );
    }
    let store =
        RedbStore::open(db).with_context(|| format!("failed to open {}", db.display()))?;
    LedgerStore::ensure_table(
        Arc::new(store),
        &config.effective_table_name(),
        config.table_wait(),
    )
    .context("failed to open ledger table")
}
