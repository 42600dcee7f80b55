use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    account::AccountId,
    balance::{Amount, GlobalId},
    command::Command,
    ledger::{Ledger, LedgerError, LedgerStore, Transaction},
    lock::{Lock, LockError, LockService, ResourceId},
};

pub mod service;

/// How long the source account stays locked once acquired.
pub const LOCK_HOLD: Duration = Duration::from_secs(2);

/// How long a transfer waits for the source account lock by default.
pub const LOCK_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSettings {
    pub lock_wait: Duration,
    pub lock_hold: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            lock_wait: LOCK_WAIT,
            lock_hold: LOCK_HOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Safe to show to the user, retrying the same request won't help
    Validation,
    /// Someone else holds the resource, the caller may retry the whole transfer
    Contention,
    /// Programming error
    Defect,
    /// Balances may be left inconsistent and must be reconciled manually
    Reconciliation,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Transfer between given accounts is prohibited")]
    IllegalTransfer,
    #[error("Amount must be greater than zero, got {0}")]
    InvalidAmount(Amount),
    #[error("Account {0} does not exist")]
    UnknownAccount(AccountId),
    #[error("Ledger for account {0} does not exist")]
    NoSuchLedger(AccountId),
    #[error("Account {0} does not have enough balance")]
    InsufficientFunds(AccountId),
    #[error("Failed to wait {waited:?} to acquire lock {resource}")]
    UnableToAcquire {
        resource: ResourceId,
        waited: Duration,
    },
    #[error("Transfer was executed before its preconditions were checked")]
    NotPrepared,
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("Transfer {global_id} was completed on one side only and needs manual reconciliation")]
    PartiallyCompleted { global_id: GlobalId },
    #[error("Issues with lock {resource} - transactions are possible in the unbalanced state")]
    Unbalanced {
        resource: ResourceId,
        #[source]
        source: LockError,
    },
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::IllegalTransfer
            | TransferError::InvalidAmount(_)
            | TransferError::UnknownAccount(_)
            | TransferError::NoSuchLedger(_)
            | TransferError::InsufficientFunds(_) => ErrorKind::Validation,
            TransferError::UnableToAcquire { .. } => ErrorKind::Contention,
            TransferError::Lock(LockError::AlreadyLocked(_)) => ErrorKind::Defect,
            TransferError::Lock(_) => ErrorKind::Contention,
            TransferError::NotPrepared | TransferError::Ledger(_) => ErrorKind::Defect,
            TransferError::PartiallyCompleted { .. } | TransferError::Unbalanced { .. } => {
                ErrorKind::Reconciliation
            }
        }
    }

    pub fn is_displayable(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    /// Message which can be shown to the user, if any.
    pub fn to_displayable(&self) -> Option<String> {
        self.is_displayable().then(|| self.to_string())
    }
}

#[derive(Debug)]
struct Leg {
    transaction: Transaction,
    completed: bool,
}

impl Leg {
    fn open(transaction: Transaction) -> Self {
        Self {
            transaction,
            completed: false,
        }
    }
}

#[derive(Debug)]
struct Ledgers {
    from: Ledger,
    to: Ledger,
}

/// Moves `amount` from one account's ledger to another's.
///
/// Only the source account is locked. Receiving ledgers are updated by
/// commutative appends, so concurrent transfers into the same account never
/// lose a write.
pub struct TransferCommand<'a, S: ?Sized, L: ?Sized> {
    store: &'a S,
    from: AccountId,
    to: AccountId,
    amount: Amount,
    requested_by: AccountId,
    lock_wait: Duration,
    lock_hold: Duration,
    lock_service: Option<&'a L>,
    from_lock: Option<Lock>,
    ledgers: Option<Ledgers>,
    debit: Option<Leg>,
    credit: Option<Leg>,
}

impl<'a, S, L> TransferCommand<'a, S, L>
where
    S: LedgerStore + ?Sized,
    L: LockService + ?Sized,
{
    pub fn new(
        store: &'a S,
        from: AccountId,
        to: AccountId,
        amount: Amount,
        requested_by: AccountId,
        lock_wait: Duration,
    ) -> Self {
        Self {
            store,
            from,
            to,
            amount,
            requested_by,
            lock_wait,
            lock_hold: LOCK_HOLD,
            lock_service: None,
            from_lock: None,
            ledgers: None,
            debit: None,
            credit: None,
        }
    }

    pub fn with_lock_hold(mut self, lock_hold: Duration) -> Self {
        self.lock_hold = lock_hold;
        self
    }

    fn load(&self, account_id: AccountId) -> Result<Ledger, TransferError> {
        self.store
            .get_by_account_id(account_id)?
            .ok_or(TransferError::NoSuchLedger(account_id))
    }

    /// Cancels the legs opened so far, receiving side first.
    fn compensate(&mut self) -> Result<(), TransferError> {
        let opened = [self.credit.as_ref(), self.debit.as_ref()];
        let completed = opened.iter().flatten().filter(|leg| leg.completed).count();
        let open = opened.iter().flatten().count();
        if completed == open {
            // nothing opened, or the transfer went through and something after it failed
            return Ok(());
        }
        if completed > 0 {
            let global_id = opened
                .iter()
                .flatten()
                .map(|leg| leg.transaction.id())
                .next()
                .unwrap_or_default();
            return Err(TransferError::PartiallyCompleted { global_id });
        }

        let Some(ledgers) = self.ledgers.as_mut() else {
            return Err(TransferError::NotPrepared);
        };
        let mut outcome = Ok(());
        if let Some(leg) = self.credit.as_ref() {
            if let Err(err) = ledgers.to.cancel_transaction(self.store, &leg.transaction) {
                warn!(global_id = %leg.transaction.id(), %err, "failed to cancel credit transaction");
                outcome = Err(err.into());
            }
        }
        if let Some(leg) = self.debit.as_ref() {
            if let Err(err) = ledgers.from.cancel_transaction(self.store, &leg.transaction) {
                warn!(global_id = %leg.transaction.id(), %err, "failed to cancel debit transaction");
                outcome = outcome.and(Err(err.into()));
            }
        }
        outcome
    }
}

impl<'a, S, L> Command<'a, L> for TransferCommand<'a, S, L>
where
    S: LedgerStore + ?Sized,
    L: LockService + ?Sized,
{
    type Error = TransferError;

    fn pre(&mut self, lock_service: &'a L) -> Result<(), TransferError> {
        if self.from == self.to {
            return Err(TransferError::IllegalTransfer);
        }
        if self.amount <= 0 {
            return Err(TransferError::InvalidAmount(self.amount));
        }

        self.lock_service = Some(lock_service);
        let mut lock = lock_service.create(self.from);
        if !lock_service.try_lock(&mut lock, self.lock_wait, self.lock_hold)? {
            return Err(TransferError::UnableToAcquire {
                resource: lock.resource_id(),
                waited: self.lock_wait,
            });
        }
        self.from_lock = Some(lock);

        let from = self.load(self.from)?;
        let to = self.load(self.to)?;
        if from.actual_balance() < self.amount {
            return Err(TransferError::InsufficientFunds(self.from));
        }
        self.ledgers = Some(Ledgers { from, to });
        Ok(())
    }

    fn execute(&mut self) -> Result<(), TransferError> {
        let store = self.store;
        let Some(ledgers) = self.ledgers.as_mut() else {
            return Err(TransferError::NotPrepared);
        };

        // two mirroring transactions, DEBIT for the sender and CREDIT for the receiver
        let debit =
            ledgers
                .from
                .create_debit_transaction(store, self.requested_by, &ledgers.to, self.amount)?;
        self.debit = Some(Leg::open(debit.clone()));
        let credit = ledgers.to.create_credit_transaction(
            store,
            self.requested_by,
            &ledgers.from,
            self.amount,
            debit.id(),
        )?;
        self.credit = Some(Leg::open(credit.clone()));

        ledgers.to.complete_transaction(store, &credit)?;
        if let Some(leg) = self.credit.as_mut() {
            leg.completed = true;
        }
        ledgers.from.complete_transaction(store, &debit)?;
        if let Some(leg) = self.debit.as_mut() {
            leg.completed = true;
        }

        if let (Some(service), Some(lock)) = (self.lock_service, self.from_lock.as_mut()) {
            service.try_unlock(lock, false)?;
        }
        self.from_lock = None;
        Ok(())
    }

    fn on_success(&mut self) {
        info!(from = %self.from, to = %self.to, amount = self.amount, "transferred");
    }

    fn on_failure(&mut self, err: &TransferError) -> Result<(), TransferError> {
        if err.is_displayable() {
            info!(from = %self.from, to = %self.to, amount = self.amount, %err, "transfer rejected");
        } else {
            error!(from = %self.from, to = %self.to, amount = self.amount, %err, "rolling back transfer");
        }
        let compensated = self.compensate();

        if let (Some(service), Some(lock)) = (self.lock_service, self.from_lock.as_mut()) {
            service.try_unlock(lock, true)?;
        }
        compensated
    }

    fn release(&mut self) -> Result<(), TransferError> {
        let (Some(service), Some(mut lock)) = (self.lock_service, self.from_lock.take()) else {
            return Ok(());
        };
        match service.try_unlock(&mut lock, true) {
            Ok(()) => Ok(()),
            Err(
                err @ (LockError::AlreadyUnlocked(_)
                | LockError::ExpiredLock(_)
                | LockError::LostLock { .. }),
            ) => {
                warn!(resource = %lock.resource_id(), %err, "lock was lost before release");
                Ok(())
            }
            Err(source) => Err(TransferError::Unbalanced {
                resource: lock.resource_id(),
                source,
            }),
        }
    }
}
