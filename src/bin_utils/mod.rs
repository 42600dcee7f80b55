//! Batch driver that replays a CSV of account openings and transfers against
//! in-memory services and reports the resulting ledgers.

use std::io::{Read, Write};

use anyhow::Result;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use thiserror::Error;

use crate::{
    account::{Account, AccountId, AccountService, InMemoryAccountService},
    balance::Amount,
    ledger::{LedgerError, LedgerStore, in_memory_store::InMemoryLedgerStore},
    lock::in_memory_lock_service::InMemoryLockService,
    transfer::{
        TransferError, TransferSettings,
        service::{TransferRequest, TransferService},
    },
};
use csv_parser::{CsvOperationParser, Operation, OperationKind};
use csv_printer::{LedgerRow, print_ledgers};

pub mod csv_parser;
pub mod csv_printer;

/// Amounts in the CSV are in major units, with at most this many decimal places.
pub const MINOR_UNIT_SCALE: u32 = 2;

#[derive(Debug, Error)]
pub enum RowError {
    #[error("Malformed row: {0}")]
    Parse(#[from] csv::Error),
    #[error("Amount {0} has more than {scale} decimal places", scale = MINOR_UNIT_SCALE)]
    TooPrecise(Decimal),
    #[error("Amount {0} is out of range")]
    OutOfRange(Decimal),
    #[error("Transfer requires a `to` account")]
    MissingCounterparty,
    #[error("Account {0} already exists")]
    DuplicateAccount(AccountId),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

pub fn to_minor_units(amount: Decimal) -> Result<Amount, RowError> {
    let minor = amount
        .checked_mul(Decimal::from(10_i64.pow(MINOR_UNIT_SCALE)))
        .ok_or(RowError::OutOfRange(amount))?;
    if !minor.fract().is_zero() {
        return Err(RowError::TooPrecise(amount));
    }
    minor.to_i64().ok_or(RowError::OutOfRange(amount))
}

pub fn to_major_units(amount: Amount) -> Decimal {
    Decimal::new(amount, MINOR_UNIT_SCALE)
}

type InMemoryTransferService =
    TransferService<InMemoryLedgerStore, InMemoryAccountService, InMemoryLockService>;

pub struct Service<'w, R, W: 'w> {
    pub input: R,
    pub output: &'w mut W,
    pub settings: TransferSettings,
    pub error_printer: Box<dyn FnMut(u64, RowError)>,
}

impl<'w, R, W> Service<'w, R, W>
where
    R: Read,
    W: Write + 'w,
{
    pub fn run(mut self) -> Result<()> {
        let parser = CsvOperationParser::new(self.input);

        let service = TransferService::new(
            InMemoryLedgerStore::new(),
            InMemoryAccountService::default(),
            InMemoryLockService::new(),
            self.settings,
        );
        let mut opened = Vec::new();

        for (line, row) in parser {
            match row.map_err(RowError::from).and_then(|op| process(&service, op)) {
                Ok(Some(account_id)) => opened.push(account_id),
                Ok(None) => {}
                Err(err) => (self.error_printer)(line, err),
            }
        }

        let mut rows = Vec::with_capacity(opened.len());
        for account_id in opened {
            if let Some(ledger) = service.ledgers().get_by_account_id(account_id)? {
                let balance = ledger.balance();
                rows.push(LedgerRow {
                    account: account_id,
                    ledger: ledger.id(),
                    actual: to_major_units(balance.actual()),
                    obligating: to_major_units(balance.obligating()),
                    receiving: to_major_units(balance.receiving()),
                });
            }
        }
        print_ledgers(self.output, rows.into_iter())
    }
}

/// Returns the id of a newly opened account.
fn process(
    service: &InMemoryTransferService,
    op: Operation,
) -> Result<Option<AccountId>, RowError> {
    let amount = to_minor_units(op.amount)?;
    match op.kind {
        OperationKind::Open => {
            let account = Account {
                id: op.from,
                name: op.name.unwrap_or_else(|| op.from.to_string()),
            };
            if service.accounts().resolve(account.id).is_some() {
                return Err(RowError::DuplicateAccount(account.id));
            }
            service.ledgers().open_ledger(account.id, amount)?;
            service.accounts().register(account);
            Ok(Some(op.from))
        }
        OperationKind::Transfer => {
            let to = op.to.ok_or(RowError::MissingCounterparty)?;
            service.transfer(TransferRequest {
                from: op.from,
                to,
                amount,
                requested_by: op.from,
            })?;
            Ok(None)
        }
    }
}
