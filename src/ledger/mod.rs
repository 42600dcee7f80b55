use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::{
    account::AccountId,
    balance::{
        Amount, Balance, BalanceError, EntrySubtype, EntryType, GlobalId, LedgerEntry, LedgerId,
    },
};

pub mod in_memory_store;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger {0} does not exist")]
    UnknownLedger(LedgerId),
    #[error("Account {0} already has a ledger")]
    DuplicateLedger(AccountId),
    #[error("Transaction amount must be greater than zero, got {0}")]
    NonPositiveAmount(Amount),
    #[error("Opening balance must not be negative, got {0}")]
    NegativeOpeningBalance(Amount),
    #[error("{entry_type:?}/{subtype:?} cannot open a transaction")]
    NotAnOpeningEntry {
        entry_type: EntryType,
        subtype: EntrySubtype,
    },
    #[error("Transaction {global_id} is already open on ledger {ledger_id}")]
    DuplicateTransaction {
        global_id: GlobalId,
        ledger_id: LedgerId,
    },
    #[error("Transaction {global_id} is not open on ledger {ledger_id}")]
    TransactionNotOpen {
        global_id: GlobalId,
        ledger_id: LedgerId,
    },
    #[error("Transaction {global_id} belongs to ledger {owner}, not to {ledger_id}")]
    ForeignTransaction {
        global_id: GlobalId,
        owner: LedgerId,
        ledger_id: LedgerId,
    },
    #[error(transparent)]
    Balance(#[from] BalanceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerType {
    /// Holds balances of internal accounts
    Internal,
}

/// Pending leg of a transfer, a view over its opening entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    /// Owned by the sending ledger (`from_ledger_id`)
    Debit(LedgerEntry),
    /// Owned by the receiving ledger (`to_ledger_id`)
    Credit(LedgerEntry),
}

impl Transaction {
    pub fn opening_entry(&self) -> &LedgerEntry {
        match self {
            Transaction::Debit(entry) | Transaction::Credit(entry) => entry,
        }
    }

    /// Same across both legs of a transfer.
    pub fn id(&self) -> GlobalId {
        self.opening_entry().global_id
    }

    pub fn owner_ledger_id(&self) -> LedgerId {
        match self {
            Transaction::Debit(entry) => entry.from_ledger_id,
            Transaction::Credit(entry) => entry.to_ledger_id,
        }
    }

    pub fn amount(&self) -> Amount {
        self.opening_entry().amount
    }
}

/// Data for the opening entry of a transaction leg. The store assigns the
/// entry id and the creation time.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub global_id: GlobalId,
    pub from_ledger_id: LedgerId,
    pub to_ledger_id: LedgerId,
    pub amount: Amount,
    pub entry_type: EntryType,
    pub subtype: EntrySubtype,
    pub created_by: AccountId,
}

/// Persistence capability for ledgers and their append-only entry logs.
///
/// Every append is applied to the stored balance atomically with respect to
/// other appends on the same ledger. Callers mutating the sending side of a
/// transfer hold the account lock first.
pub trait LedgerStore: Send + Sync {
    /// Loads the ledger of `account_id` with its balance rebuilt from the log.
    fn get_by_account_id(&self, account_id: AccountId) -> Result<Option<Ledger>, LedgerError>;

    /// Appends the opening entry of a new leg: `Debit`/`Obligation` or
    /// `Credit`/`Receiving`, with a positive amount.
    fn initiate_transaction(&self, new: NewTransaction) -> Result<LedgerEntry, LedgerError>;

    /// Appends the `Actual` entry for an open transaction.
    fn complete_transaction(&self, transaction: &Transaction) -> Result<LedgerEntry, LedgerError>;

    /// Appends the `Cancel` entry for an open transaction.
    fn cancel_transaction(&self, transaction: &Transaction) -> Result<LedgerEntry, LedgerError>;

    /// The full log of a ledger in creation order.
    fn entries(&self, ledger_id: LedgerId) -> Result<Vec<LedgerEntry>, LedgerError>;
}

/// Per-account aggregate. The balance is updated in lockstep with every
/// entry this ledger appends through the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    id: LedgerId,
    account_id: AccountId,
    ledger_type: LedgerType,
    balance: Balance,
}

impl Ledger {
    pub fn new(
        id: LedgerId,
        account_id: AccountId,
        ledger_type: LedgerType,
        balance: Balance,
    ) -> Self {
        Self {
            id,
            account_id,
            ledger_type,
            balance,
        }
    }

    pub fn id(&self) -> LedgerId {
        self.id
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn ledger_type(&self) -> LedgerType {
        self.ledger_type
    }

    pub fn balance(&self) -> Balance {
        self.balance
    }

    pub fn actual_balance(&self) -> Amount {
        self.balance.actual()
    }

    /// Used when loading a ledger, the log is the source of truth.
    pub fn recompute_balance<'a>(
        &mut self,
        entries: impl IntoIterator<Item = &'a LedgerEntry>,
    ) -> Result<(), BalanceError> {
        self.balance.recompute(entries)
    }

    /// Opens the sending leg of a transfer to `to` (`Debit`/`Obligation`).
    pub fn create_debit_transaction<S>(
        &mut self,
        store: &S,
        created_by: AccountId,
        to: &Ledger,
        amount: Amount,
    ) -> Result<Transaction, LedgerError>
    where
        S: LedgerStore + ?Sized,
    {
        if amount <= 0 {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        let entry = store.initiate_transaction(NewTransaction {
            global_id: Uuid::new_v4(),
            from_ledger_id: self.id,
            to_ledger_id: to.id,
            amount,
            entry_type: EntryType::Debit,
            subtype: EntrySubtype::Obligation,
            created_by,
        })?;
        self.balance.apply_entry(&entry)?;
        debug!(ledger = %self.id, global_id = %entry.global_id, amount, "debit transaction opened");
        Ok(Transaction::Debit(entry))
    }

    /// Opens the receiving leg of a transfer from `from` (`Credit`/`Receiving`),
    /// correlated with the sending leg by `global_id`.
    pub fn create_credit_transaction<S>(
        &mut self,
        store: &S,
        created_by: AccountId,
        from: &Ledger,
        amount: Amount,
        global_id: GlobalId,
    ) -> Result<Transaction, LedgerError>
    where
        S: LedgerStore + ?Sized,
    {
        if amount <= 0 {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        let entry = store.initiate_transaction(NewTransaction {
            global_id,
            from_ledger_id: from.id,
            to_ledger_id: self.id,
            amount,
            entry_type: EntryType::Credit,
            subtype: EntrySubtype::Receiving,
            created_by,
        })?;
        self.balance.apply_entry(&entry)?;
        debug!(ledger = %self.id, %global_id, amount, "credit transaction opened");
        Ok(Transaction::Credit(entry))
    }

    pub fn complete_transaction<S>(
        &mut self,
        store: &S,
        transaction: &Transaction,
    ) -> Result<(), LedgerError>
    where
        S: LedgerStore + ?Sized,
    {
        self.ensure_owned(transaction)?;
        let entry = store.complete_transaction(transaction)?;
        self.balance.apply_entry(&entry)?;
        Ok(())
    }

    /// Reverts the opening entry of `transaction`. Valid as long as the
    /// transaction has not been completed.
    pub fn cancel_transaction<S>(
        &mut self,
        store: &S,
        transaction: &Transaction,
    ) -> Result<(), LedgerError>
    where
        S: LedgerStore + ?Sized,
    {
        self.ensure_owned(transaction)?;
        let entry = store.cancel_transaction(transaction)?;
        self.balance.apply_entry(&entry)?;
        Ok(())
    }

    fn ensure_owned(&self, transaction: &Transaction) -> Result<(), LedgerError> {
        let owner = transaction.owner_ledger_id();
        if owner == self.id {
            Ok(())
        } else {
            Err(LedgerError::ForeignTransaction {
                global_id: transaction.id(),
                owner,
                ledger_id: self.id,
            })
        }
    }
}
