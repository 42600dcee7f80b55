use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

pub mod in_memory_lock_service;

/// Name of a lockable resource, here an account id.
pub type ResourceId = Uuid;
pub type OwnerToken = Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock {0} is already locked by this handle")]
    AlreadyLocked(ResourceId),
    #[error("Lock {0} is already unlocked")]
    AlreadyUnlocked(ResourceId),
    #[error("Lock {0} does not exist")]
    LockDoesNotExist(ResourceId),
    #[error("Lock {id} supposed to belong to {expected} but belongs to {actual:?}")]
    LostLock {
        id: ResourceId,
        expected: OwnerToken,
        actual: Option<OwnerToken>,
    },
    #[error("Lock {0} has expired")]
    ExpiredLock(ResourceId),
}

/// Client side handle of an exclusive, time bounded lock.
///
/// Every handle gets its own owner token, so two handles on the same
/// resource never mistake each other's hold for their own.
#[derive(Debug, PartialEq, Eq)]
pub struct Lock {
    resource_id: ResourceId,
    owner: OwnerToken,
    locked: bool,
}

impl Lock {
    pub fn new(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            owner: Uuid::new_v4(),
            locked: false,
        }
    }

    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    pub fn owner(&self) -> OwnerToken {
        self.owner
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Only for [`LockService`] implementations, which own this flag.
    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }
}

pub trait LockService: Send + Sync {
    /// Fresh handle on `resource_id`, shared state is not touched.
    fn create(&self, resource_id: ResourceId) -> Lock {
        Lock::new(resource_id)
    }

    /// Tries to become the only holder of the resource for `hold`, waiting up
    /// to `wait` while someone else validly holds it.
    ///
    /// Returns `Ok(false)` when the wait budget runs out.
    fn try_lock(&self, lock: &mut Lock, wait: Duration, hold: Duration)
    -> Result<bool, LockError>;

    /// Releases the resource held by `lock`.
    ///
    /// With `allow_lost` every failure is swallowed; it is meant for cleanup
    /// paths where the state of the lock is unknown.
    fn try_unlock(&self, lock: &mut Lock, allow_lost: bool) -> Result<(), LockError>;
}
