use thiserror::Error;
use uuid::Uuid;

use crate::account::AccountId;

pub type LedgerId = Uuid;
pub type EntryId = Uuid;

/// Correlates the mirrored entries of one logical transfer.
pub type GlobalId = Uuid;

/// Amount in minor currency units.
pub type Amount = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    Debit,
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntrySubtype {
    /// Obliged to send money
    Obligation,
    /// Expecting to receive money
    Receiving,
    /// Obligation/receiving finished successfully
    Actual,
    /// Obligation/receiving rolled back
    Cancel,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum BalanceError {
    #[error("{subtype:?} is not a valid subtype of a {entry_type:?} entry")]
    UnknownSubtype {
        entry_type: EntryType,
        subtype: EntrySubtype,
    },
    #[error("Applying {entry_type:?}/{subtype:?} of {amount} overflows the balance")]
    Overflow {
        entry_type: EntryType,
        subtype: EntrySubtype,
        amount: Amount,
    },
}

/// One phase of one transaction leg. Never mutated once appended to a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub global_id: GlobalId,
    pub from_ledger_id: LedgerId,
    pub to_ledger_id: LedgerId,
    pub amount: Amount,
    pub entry_type: EntryType,
    pub subtype: EntrySubtype,
    pub created_at_millis: i64,
    pub created_by: AccountId,
}

impl LedgerEntry {
    /// Second phase entry (`Actual` or `Cancel`) of the leg opened by `self`.
    pub fn follow_up(&self, subtype: EntrySubtype, created_at_millis: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            subtype,
            created_at_millis,
            ..self.clone()
        }
    }

    /// Ledger whose log holds this entry.
    pub fn owner_ledger_id(&self) -> LedgerId {
        match self.entry_type {
            EntryType::Debit => self.from_ledger_id,
            EntryType::Credit => self.to_ledger_id,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balance {
    actual: Amount,
    obligating: Amount,
    receiving: Amount,
}

impl Balance {
    pub fn new(actual: Amount, obligating: Amount, receiving: Amount) -> Self {
        Self {
            actual,
            obligating,
            receiving,
        }
    }

    /// Funds available to be sent.
    pub fn actual(&self) -> Amount {
        self.actual
    }

    /// Funds on hold for outgoing transactions.
    pub fn obligating(&self) -> Amount {
        self.obligating
    }

    /// Funds expected from incoming transactions, not usable yet.
    pub fn receiving(&self) -> Amount {
        self.receiving
    }

    /// No transaction referencing this balance is in flight.
    pub fn is_settled(&self) -> bool {
        self.obligating == 0 && self.receiving == 0
    }

    /// Applies one entry to the counters. On error the balance is left untouched.
    pub fn apply(
        &mut self,
        entry_type: EntryType,
        subtype: EntrySubtype,
        amount: Amount,
    ) -> Result<(), BalanceError> {
        *self = self.applied(entry_type, subtype, amount)?;
        Ok(())
    }

    fn applied(
        self,
        entry_type: EntryType,
        subtype: EntrySubtype,
        amount: Amount,
    ) -> Result<Self, BalanceError> {
        let overflow = BalanceError::Overflow {
            entry_type,
            subtype,
            amount,
        };
        let Balance {
            mut actual,
            mut obligating,
            mut receiving,
        } = self;
        match (entry_type, subtype) {
            (EntryType::Debit, EntrySubtype::Obligation) => {
                actual = actual.checked_sub(amount).ok_or(overflow)?;
                obligating = obligating.checked_add(amount).ok_or(overflow)?;
            }
            (EntryType::Debit, EntrySubtype::Actual) => {
                obligating = obligating.checked_sub(amount).ok_or(overflow)?;
            }
            (EntryType::Debit, EntrySubtype::Cancel) => {
                obligating = obligating.checked_sub(amount).ok_or(overflow)?;
                actual = actual.checked_add(amount).ok_or(overflow)?;
            }
            (EntryType::Credit, EntrySubtype::Receiving) => {
                receiving = receiving.checked_add(amount).ok_or(overflow)?;
            }
            (EntryType::Credit, EntrySubtype::Actual) => {
                actual = actual.checked_add(amount).ok_or(overflow)?;
                receiving = receiving.checked_sub(amount).ok_or(overflow)?;
            }
            (EntryType::Credit, EntrySubtype::Cancel) => {
                receiving = receiving.checked_sub(amount).ok_or(overflow)?;
            }
            (entry_type, subtype) => {
                return Err(BalanceError::UnknownSubtype {
                    entry_type,
                    subtype,
                });
            }
        }
        Ok(Balance {
            actual,
            obligating,
            receiving,
        })
    }

    pub fn apply_entry(&mut self, entry: &LedgerEntry) -> Result<(), BalanceError> {
        self.apply(entry.entry_type, entry.subtype, entry.amount)
    }

    /// Rebuilds the balance from zero by folding `entries` in creation order.
    ///
    /// On error the balance is left untouched.
    pub fn recompute<'a>(
        &mut self,
        entries: impl IntoIterator<Item = &'a LedgerEntry>,
    ) -> Result<(), BalanceError> {
        let mut balance = Balance::default();
        for entry in entries {
            balance.apply_entry(entry)?;
        }
        *self = balance;
        Ok(())
    }
}
