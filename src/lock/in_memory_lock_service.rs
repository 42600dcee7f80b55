use std::{collections::HashMap, time::Duration};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};

use super::{Lock, LockError, LockService, OwnerToken, ResourceId};

/// Server side state of one resource. Reset rather than removed on release.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct LockStatus {
    locked_at_millis: i64,
    unlock_at_millis: i64,
    owner: Option<OwnerToken>,
}

impl LockStatus {
    fn is_free_at(&self, now: i64) -> bool {
        self.owner.is_none() || now >= self.unlock_at_millis
    }

    fn hold(&mut self, now: i64, hold_millis: i64, owner: OwnerToken) {
        self.locked_at_millis = now;
        self.unlock_at_millis = now.saturating_add(hold_millis);
        self.owner = Some(owner);
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

fn as_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Lock service keeping the lock table in process memory.
///
/// Waiters park on a condition variable and are woken by releases. A waiter
/// also wakes up on its own when the current hold expires or its wait budget
/// runs out, whichever comes first.
#[derive(Debug)]
pub struct InMemoryLockService<C = SystemClock> {
    clock: C,
    locks: Mutex<HashMap<ResourceId, LockStatus>>,
    released: Condvar,
}

impl InMemoryLockService<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for InMemoryLockService<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> InMemoryLockService<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            locks: Mutex::new(HashMap::new()),
            released: Condvar::new(),
        }
    }
}

impl<C: Clock> LockService for InMemoryLockService<C> {
    fn try_lock(
        &self,
        lock: &mut Lock,
        wait: Duration,
        hold: Duration,
    ) -> Result<bool, LockError> {
        let id = lock.resource_id();
        if lock.is_locked() {
            return Err(LockError::AlreadyLocked(id));
        }

        let started = self.clock.now_millis();
        let deadline = started.saturating_add(as_millis(wait));
        let hold_millis = as_millis(hold);

        let Some(mut locks) = self.locks.try_lock_for(wait) else {
            debug!(resource = %id, ?wait, "lock table busy for the whole wait budget");
            return Ok(false);
        };

        loop {
            // the budget may have been spent waiting for the table
            let now = self.clock.now_millis();
            if now > deadline {
                return Ok(false);
            }

            let status = locks.entry(id).or_default();
            if status.is_free_at(now) {
                if let Some(previous) = status.owner {
                    debug!(resource = %id, %previous, "reclaiming expired lock");
                }
                status.hold(now, hold_millis, lock.owner());
                lock.set_locked(true);
                trace!(resource = %id, owner = %lock.owner(), waited_ms = now - started, "lock acquired");
                return Ok(true);
            }
            if now >= deadline {
                return Ok(false);
            }

            let wake_at = deadline.min(status.unlock_at_millis);
            let timeout = u64::try_from(wake_at - now).unwrap_or(0).max(1);
            self.released
                .wait_for(&mut locks, Duration::from_millis(timeout));
        }
    }

    fn try_unlock(&self, lock: &mut Lock, allow_lost: bool) -> Result<(), LockError> {
        let id = lock.resource_id();
        if !lock.is_locked() {
            return if allow_lost {
                Ok(())
            } else {
                Err(LockError::AlreadyUnlocked(id))
            };
        }

        let mut locks = self.locks.lock();
        let now = self.clock.now_millis();
        let outcome = match locks.get_mut(&id) {
            None => Err(LockError::LockDoesNotExist(id)),
            Some(status) if status.owner != Some(lock.owner()) => Err(LockError::LostLock {
                id,
                expected: lock.owner(),
                actual: status.owner,
            }),
            Some(status) if now >= status.unlock_at_millis => Err(LockError::ExpiredLock(id)),
            Some(status) => {
                status.reset();
                Ok(())
            }
        };
        drop(locks);

        // in every case this handle does not hold the resource anymore
        lock.set_locked(false);
        match outcome {
            Ok(()) => {
                self.released.notify_all();
                trace!(resource = %id, "lock released");
                Ok(())
            }
            Err(err) if allow_lost => {
                debug!(resource = %id, %err, "ignoring lost lock");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
