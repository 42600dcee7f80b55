use tracing::debug;

use crate::{
    account::{AccountId, AccountService},
    balance::Amount,
    command::CommandExecutor,
    ledger::LedgerStore,
    lock::LockService,
};

use super::{TransferCommand, TransferError, TransferSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Amount,
    pub requested_by: AccountId,
}

/// Validates transfer requests and runs them as [`TransferCommand`]s.
pub struct TransferService<S, A, L> {
    ledgers: S,
    accounts: A,
    executor: CommandExecutor<L>,
    settings: TransferSettings,
}

impl<S, A, L> TransferService<S, A, L>
where
    S: LedgerStore,
    A: AccountService,
    L: LockService,
{
    pub fn new(ledgers: S, accounts: A, lock_service: L, settings: TransferSettings) -> Self {
        Self {
            ledgers,
            accounts,
            executor: CommandExecutor::new(lock_service),
            settings,
        }
    }

    pub fn ledgers(&self) -> &S {
        &self.ledgers
    }

    pub fn accounts(&self) -> &A {
        &self.accounts
    }

    pub fn transfer(&self, request: TransferRequest) -> Result<(), TransferError> {
        if request.amount <= 0 {
            return Err(TransferError::InvalidAmount(request.amount));
        }
        let from = self
            .accounts
            .resolve(request.from)
            .ok_or(TransferError::UnknownAccount(request.from))?;
        let to = self
            .accounts
            .resolve(request.to)
            .ok_or(TransferError::UnknownAccount(request.to))?;
        if from.id == to.id {
            return Err(TransferError::IllegalTransfer);
        }

        debug!(from = %from.id, to = %to.id, amount = request.amount, "executing transfer");
        let mut command = TransferCommand::new(
            &self.ledgers,
            from.id,
            to.id,
            request.amount,
            request.requested_by,
            self.settings.lock_wait,
        )
        .with_lock_hold(self.settings.lock_hold);
        self.executor.execute(&mut command)
    }
}
