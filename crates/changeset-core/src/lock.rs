//! Process lock over the changelog table.
//!
//! The lock is a single row under [`LOCK_KEY`]. Acquiring it is a put with a
//! "key must not exist" condition; releasing it deletes the row. There is no
//! lease: a runner that dies while holding the lock leaves the row behind
//! until an operator clears it (`changeset unlock`).
//!
//! States: `Unlocked → Locked → Unlocked`.

use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::entry::{LockOwner, LockRecord, LOCK_KEY};
use crate::error::{ChangesetError, Result};
use crate::ledger::LedgerStore;
use crate::store::Item;

/// What to do when the lock is already held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub wait_for_lock: bool,
    pub max_wait: Duration,
    pub poll_interval: Duration,
    /// Fail with [`ChangesetError::Lock`] instead of returning "not acquired".
    pub throw_on_failure: bool,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            wait_for_lock: false,
            max_wait: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(10),
            throw_on_failure: false,
        }
    }
}

pub struct LockManager {
    ledger: LedgerStore,
    policy: LockPolicy,
}

impl LockManager {
    pub fn new(ledger: LedgerStore, policy: LockPolicy) -> Self {
        Self { ledger, policy }
    }

    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    /// One conditional write. `Ok(false)` only when the lock row already exists.
    pub fn try_acquire(&self, owner: &LockOwner) -> Result<bool> {
        match self
            .ledger
            .put(LockRecord::for_owner(owner).to_item(), true)
        {
            Ok(()) => Ok(true),
            Err(ChangesetError::AlreadyExists(_)) => {
                warn!(owner = %owner.name, "the process lock is already held");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Try once, then optionally keep polling every `poll_interval` until
    /// `max_wait` has passed since the first attempt.
    pub fn acquire(
        &self,
        owner: &LockOwner,
        wait_for_lock: bool,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> Result<bool> {
        let started = Instant::now();
        let mut acquired = self.try_acquire(owner)?;
        if acquired || !wait_for_lock {
            return Ok(acquired);
        }

        // A wait too long to represent as an Instant never expires.
        let give_up_at = started.checked_add(max_wait);
        while !acquired && give_up_at.map_or(true, |t| Instant::now() < t) {
            info!(owner = %owner.name, "waiting for the process lock");
            std::thread::sleep(poll_interval);
            acquired = self.try_acquire(owner)?;
        }
        Ok(acquired)
    }

    /// Acquire according to the configured policy.
    ///
    /// Returns `Ok(None)` when the lock is held elsewhere, unless the policy
    /// asks to fail loudly.
    pub fn acquire_guard(&self, owner: &LockOwner) -> Result<Option<LockGuard<'_>>> {
        let acquired = self.acquire(
            owner,
            self.policy.wait_for_lock,
            self.policy.max_wait,
            self.policy.poll_interval,
        )?;
        if acquired {
            return Ok(Some(LockGuard {
                manager: self,
                owner: owner.clone(),
                released: false,
            }));
        }
        if self.policy.throw_on_failure {
            info!(owner = %owner.name, "process lock not acquired; failing as configured");
            return Err(ChangesetError::Lock(format!(
                "lock on table '{}' is held by another runner",
                self.ledger.table_name()
            )));
        }
        Ok(None)
    }

    /// Delete the lock row whoever holds it. A foreign holder is logged, not
    /// refused, and a row that no longer decodes is deleted all the same.
    pub fn release(&self, owner: &LockOwner) -> Result<()> {
        if let Some(current) = self.current().ok().flatten() {
            if !current.is_owned_by(owner) {
                warn!(
                    owner = %owner.name,
                    holder = %current.owner,
                    "releasing a process lock acquired by another owner"
                );
            }
        }
        self.ledger.delete(LOCK_KEY)
    }

    /// Administrative release, used to clear an orphaned lock.
    ///
    /// Returns the raw row that was removed so callers can report on it even
    /// when it does not decode as a [`LockRecord`].
    pub fn force_release(&self) -> Result<Option<Item>> {
        let row = self.ledger.get(LOCK_KEY)?;
        if row.is_some() {
            self.ledger.delete(LOCK_KEY)?;
        }
        Ok(row)
    }

    pub fn is_held(&self) -> Result<bool> {
        Ok(self.ledger.get(LOCK_KEY)?.is_some())
    }

    pub fn current(&self) -> Result<Option<LockRecord>> {
        self.ledger
            .get(LOCK_KEY)?
            .map(|item| LockRecord::from_item(&item))
            .transpose()
    }
}

/// Scoped ownership of the process lock. Released on [`LockGuard::release`]
/// or, failing that, on drop.
pub struct LockGuard<'a> {
    manager: &'a LockManager,
    owner: LockOwner,
    released: bool,
}

impl LockGuard<'_> {
    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        info!(owner = %self.owner.name, "releasing process lock");
        self.manager.release(&self.owner)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        info!(owner = %self.owner.name, "releasing process lock");
        if let Err(e) = self.manager.release(&self.owner) {
            error!(owner = %self.owner.name, error = %e, "failed to release process lock");
        }
    }
}
