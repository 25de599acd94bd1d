//! One migration pass: lock, walk the catalog, apply what the ledger lacks,
//! unlock.
//!
//! Correctness across concurrent runners rests on the process lock. The
//! ledger check is a plain read followed later by a write, which is only safe
//! because no two runners get past `acquire_guard` at the same time.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::catalog::{Catalog, ChangeSet};
use crate::config::RunnerConfig;
use crate::entry::{self, LedgerEntry, LockOwner};
use crate::environment::Environment;
use crate::error::{ChangesetError, Result};
use crate::invoker::ChangeSetInvoker;
use crate::ledger::LedgerStore;
use crate::lock::LockManager;
use crate::mapper::DocumentMapper;
use crate::store::KvStore;

// ---------------------------------------------------------------------------
// RunOutcome / RunReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The runner is switched off; nothing was touched.
    Disabled,
    /// Another runner holds the lock.
    LockNotAcquired,
    Completed(RunReport),
}

/// Change ids by what happened to them during a completed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub applied: Vec<String>,
    /// Run-always change sets. They run on every pass and are never recorded.
    pub reapplied: Vec<String>,
    pub skipped: Vec<String>,
    pub invocation_failures: Vec<String>,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct Runner {
    config: RunnerConfig,
    client: Arc<dyn KvStore>,
    catalog: Arc<dyn Catalog>,
    mapper: Option<DocumentMapper>,
    environment: Option<Environment>,
}

impl Runner {
    pub fn new(config: RunnerConfig, client: Arc<dyn KvStore>, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            config,
            client,
            catalog,
            mapper: None,
            environment: None,
        }
    }

    /// Pre-built mapper handed to change sets instead of one built from the client.
    pub fn with_mapper(mut self, mapper: DocumentMapper) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn owner(&self) -> LockOwner {
        match &self.config.owner {
            Some(name) => LockOwner::new(name.clone()),
            None => LockOwner::local(),
        }
    }

    fn connect(&self) -> Result<LedgerStore> {
        LedgerStore::ensure_table(
            Arc::clone(&self.client),
            &self.config.effective_table_name(),
            self.config.table_wait(),
        )
    }

    /// Whether any runner currently holds the process lock.
    pub fn is_run_in_progress(&self) -> Result<bool> {
        let ledger = self.connect()?;
        LockManager::new(ledger, self.config.lock_policy()).is_held()
    }

    pub fn run(&self) -> Result<RunOutcome> {
        if !self.config.enabled {
            info!("changeset runner is disabled; exiting");
            return Ok(RunOutcome::Disabled);
        }

        self.config.validate()?;

        let ledger = self.connect()?;
        let locks = LockManager::new(ledger.clone(), self.config.lock_policy());
        let owner = self.owner();

        let Some(guard) = locks.acquire_guard(&owner)? else {
            info!(owner = %owner.name, "did not acquire process lock; exiting");
            return Ok(RunOutcome::LockNotAcquired);
        };
        info!(owner = %owner.name, "acquired process lock, starting migration");

        let result = self.execute(&ledger);
        let released = guard.release();

        match (result, released) {
            (Ok(report), Ok(())) => {
                info!(
                    applied = report.applied.len(),
                    reapplied = report.reapplied.len(),
                    skipped = report.skipped.len(),
                    failed = report.invocation_failures.len(),
                    "migration finished"
                );
                Ok(RunOutcome::Completed(report))
            }
            (Ok(_), Err(release_err)) => Err(release_err),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                error!(error = %release_err, "failed to release process lock after a failed run");
                Err(e)
            }
        }
    }

    fn execute(&self, ledger: &LedgerStore) -> Result<RunReport> {
        let source = self.config.source().ok_or_else(|| {
            ChangesetError::Configuration("changelog source is not set".to_string())
        })?;
        let environment = self.environment.as_ref();
        let invoker = ChangeSetInvoker::new(Arc::clone(&self.client))
            .with_mapper(self.mapper.clone())
            .with_environment(self.environment.clone())
            .with_table_prefix(self.config.table_prefix.clone());

        let mut report = RunReport::default();
        for unit in self.catalog.list_units(source, environment)? {
            let change_sets = unit.instantiate(environment)?;
            for change_set in &change_sets {
                let entry =
                    LedgerEntry::new(&change_set.id, &change_set.author, &unit.name, &change_set.method);
                self.apply(ledger, &invoker, change_set, entry, &mut report)?;
            }
        }
        Ok(report)
    }

    fn apply(
        &self,
        ledger: &LedgerStore,
        invoker: &ChangeSetInvoker,
        change_set: &ChangeSet,
        entry: LedgerEntry,
        report: &mut RunReport,
    ) -> Result<()> {
        if entry::is_reserved_key(&change_set.id) {
            let e = ChangesetError::StepInvocation {
                change_id: change_set.id.clone(),
                method: change_set.method.clone(),
                reason: "change id is reserved for the process lock".to_string(),
            };
            error!(error = %e, "skipping change set");
            report.invocation_failures.push(change_set.id.clone());
            return Ok(());
        }

        if change_set.run_always {
            if Self::invoke_isolated(invoker, change_set, report)? {
                info!("{entry} reapplied");
                report.reapplied.push(change_set.id.clone());
            }
        } else if ledger.is_new_change(&change_set.id)? {
            if Self::invoke_isolated(invoker, change_set, report)? {
                match ledger.record(&entry) {
                    Ok(()) => {}
                    Err(ChangesetError::AlreadyExists(_)) => {
                        warn!(change_id = %entry.change_id, "ledger entry was written concurrently");
                    }
                    Err(e) => return Err(e),
                }
                info!("{entry} applied");
                report.applied.push(change_set.id.clone());
            }
        } else {
            info!("{entry} passed over");
            report.skipped.push(change_set.id.clone());
        }
        Ok(())
    }

    /// `Ok(false)` when the change set could not be invoked at all; that is
    /// logged and the run moves on. A failure inside the change set aborts.
    fn invoke_isolated(
        invoker: &ChangeSetInvoker,
        change_set: &ChangeSet,
        report: &mut RunReport,
    ) -> Result<bool> {
        match invoker.invoke(change_set) {
            Ok(()) => Ok(true),
            Err(e @ ChangesetError::StepInvocation { .. }) => {
                error!(error = %e, "skipping change set");
                report.invocation_failures.push(change_set.id.clone());
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
