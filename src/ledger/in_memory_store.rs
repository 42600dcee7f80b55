use std::collections::{HashMap, hash_map::Entry};

use parking_lot::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{
    account::AccountId,
    balance::{Amount, Balance, EntrySubtype, EntryType, GlobalId, LedgerEntry, LedgerId},
    clock::{Clock, SystemClock},
};

use super::{Ledger, LedgerError, LedgerStore, LedgerType, NewTransaction, Transaction};

/// Counterparty of the entries funding a freshly opened ledger.
pub const GENESIS_LEDGER_ID: LedgerId = Uuid::from_u128(0);

/// Author of the entries funding a freshly opened ledger.
pub const SYSTEM_ACCOUNT_ID: AccountId = Uuid::from_u128(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegState {
    Open,
    Settled,
}

#[derive(Debug)]
struct LedgerRecord {
    account_id: AccountId,
    ledger_type: LedgerType,
    entries: Vec<LedgerEntry>,
    balance: Balance,
    legs: HashMap<GlobalId, LegState>,
}

impl LedgerRecord {
    fn new(account_id: AccountId, ledger_type: LedgerType) -> Self {
        Self {
            account_id,
            ledger_type,
            entries: Vec::new(),
            balance: Balance::default(),
            legs: HashMap::new(),
        }
    }

    /// Applies `entry` to the balance and appends it, or does neither.
    fn append(&mut self, entry: LedgerEntry) -> Result<(), LedgerError> {
        let mut balance = self.balance;
        balance.apply_entry(&entry)?;
        self.balance = balance;
        self.entries.push(entry);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Tables {
    ledgers: HashMap<LedgerId, LedgerRecord>,
    by_account: HashMap<AccountId, LedgerId>,
}

/// Ledger store keeping every log in memory.
///
/// Construct one per process and share it by reference with the transfer
/// sagas.
#[derive(Debug)]
pub struct InMemoryLedgerStore<C = SystemClock> {
    clock: C,
    tables: Mutex<Tables>,
}

impl InMemoryLedgerStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for InMemoryLedgerStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> InMemoryLedgerStore<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Creates the ledger of `account_id`. A positive `initial_actual` is
    /// recorded as a completed credit from the genesis ledger, so that the
    /// opening balance is reproducible from the log.
    pub fn open_ledger(
        &self,
        account_id: AccountId,
        initial_actual: Amount,
    ) -> Result<LedgerId, LedgerError> {
        if initial_actual < 0 {
            return Err(LedgerError::NegativeOpeningBalance(initial_actual));
        }
        let ledger_id = Uuid::new_v4();
        let mut tables = self.tables.lock();
        match tables.by_account.entry(account_id) {
            Entry::Occupied(_) => return Err(LedgerError::DuplicateLedger(account_id)),
            Entry::Vacant(entry) => entry.insert(ledger_id),
        };

        let mut record = LedgerRecord::new(account_id, LedgerType::Internal);
        if initial_actual > 0 {
            let receiving = LedgerEntry {
                id: Uuid::new_v4(),
                global_id: Uuid::new_v4(),
                from_ledger_id: GENESIS_LEDGER_ID,
                to_ledger_id: ledger_id,
                amount: initial_actual,
                entry_type: EntryType::Credit,
                subtype: EntrySubtype::Receiving,
                created_at_millis: self.clock.now_millis(),
                created_by: SYSTEM_ACCOUNT_ID,
            };
            let actual = receiving.follow_up(EntrySubtype::Actual, self.clock.now_millis());
            record.legs.insert(receiving.global_id, LegState::Settled);
            record.append(receiving)?;
            record.append(actual)?;
        }
        tables.ledgers.insert(ledger_id, record);
        debug!(account = %account_id, ledger = %ledger_id, initial_actual, "ledger opened");
        Ok(ledger_id)
    }

    /// Balance maintained incrementally by appends, without replaying the log.
    pub fn live_balance(&self, ledger_id: LedgerId) -> Option<Balance> {
        self.tables
            .lock()
            .ledgers
            .get(&ledger_id)
            .map(|record| record.balance)
    }

    fn settle(
        &self,
        transaction: &Transaction,
        subtype: EntrySubtype,
    ) -> Result<LedgerEntry, LedgerError> {
        let ledger_id = transaction.owner_ledger_id();
        let global_id = transaction.id();
        let mut tables = self.tables.lock();
        let record = tables
            .ledgers
            .get_mut(&ledger_id)
            .ok_or(LedgerError::UnknownLedger(ledger_id))?;

        let Some(leg) = record.legs.get_mut(&global_id).filter(|s| **s == LegState::Open) else {
            return Err(LedgerError::TransactionNotOpen {
                global_id,
                ledger_id,
            });
        };
        *leg = LegState::Settled;

        let entry = transaction
            .opening_entry()
            .follow_up(subtype, self.clock.now_millis());
        if let Err(err) = record.append(entry.clone()) {
            record.legs.insert(global_id, LegState::Open);
            return Err(err);
        }
        trace!(ledger = %ledger_id, %global_id, ?subtype, "transaction settled");
        Ok(entry)
    }
}

impl<C: Clock> LedgerStore for InMemoryLedgerStore<C> {
    fn get_by_account_id(&self, account_id: AccountId) -> Result<Option<Ledger>, LedgerError> {
        let mut tables = self.tables.lock();
        let Some(ledger_id) = tables.by_account.get(&account_id).copied() else {
            return Ok(None);
        };
        let record = tables
            .ledgers
            .get_mut(&ledger_id)
            .ok_or(LedgerError::UnknownLedger(ledger_id))?;

        let mut ledger = Ledger::new(
            ledger_id,
            record.account_id,
            record.ledger_type,
            Balance::default(),
        );
        ledger.recompute_balance(&record.entries)?;
        record.balance = ledger.balance();
        Ok(Some(ledger))
    }

    fn initiate_transaction(&self, new: NewTransaction) -> Result<LedgerEntry, LedgerError> {
        if new.amount <= 0 {
            return Err(LedgerError::NonPositiveAmount(new.amount));
        }
        match (new.entry_type, new.subtype) {
            (EntryType::Debit, EntrySubtype::Obligation)
            | (EntryType::Credit, EntrySubtype::Receiving) => {}
            (entry_type, subtype) => {
                return Err(LedgerError::NotAnOpeningEntry {
                    entry_type,
                    subtype,
                });
            }
        }
        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            global_id: new.global_id,
            from_ledger_id: new.from_ledger_id,
            to_ledger_id: new.to_ledger_id,
            amount: new.amount,
            entry_type: new.entry_type,
            subtype: new.subtype,
            created_at_millis: self.clock.now_millis(),
            created_by: new.created_by,
        };
        let ledger_id = entry.owner_ledger_id();

        let mut tables = self.tables.lock();
        let record = tables
            .ledgers
            .get_mut(&ledger_id)
            .ok_or(LedgerError::UnknownLedger(ledger_id))?;
        if record.legs.contains_key(&entry.global_id) {
            return Err(LedgerError::DuplicateTransaction {
                global_id: entry.global_id,
                ledger_id,
            });
        }
        record.append(entry.clone())?;
        record.legs.insert(entry.global_id, LegState::Open);
        trace!(ledger = %ledger_id, global_id = %entry.global_id, "transaction initiated");
        Ok(entry)
    }

    fn complete_transaction(&self, transaction: &Transaction) -> Result<LedgerEntry, LedgerError> {
        self.settle(transaction, EntrySubtype::Actual)
    }

    fn cancel_transaction(&self, transaction: &Transaction) -> Result<LedgerEntry, LedgerError> {
        self.settle(transaction, EntrySubtype::Cancel)
    }

    fn entries(&self, ledger_id: LedgerId) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.tables
            .lock()
            .ledgers
            .get(&ledger_id)
            .map(|record| record.entries.clone())
            .ok_or(LedgerError::UnknownLedger(ledger_id))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeDelta;

    use crate::{balance::BalanceError, clock::ManualClock};

    use super::*;

    #[test]
    fn open_ledger_seeds_log_from_genesis() {
        let clock = Arc::new(ManualClock::default());
        let store = InMemoryLedgerStore::with_clock(clock.clone());
        let account = Uuid::new_v4();
        let ledger_id = store.open_ledger(account, 1_000).unwrap();

        let entries = store.entries(ledger_id).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].subtype, EntrySubtype::Receiving);
        assert_eq!(entries[1].subtype, EntrySubtype::Actual);
        assert_eq!(entries[0].global_id, entries[1].global_id);
        assert!(entries.iter().all(|e| e.from_ledger_id == GENESIS_LEDGER_ID
            && e.to_ledger_id == ledger_id
            && e.created_by == SYSTEM_ACCOUNT_ID
            && e.created_at_millis == clock.now_millis()));

        let ledger = store.get_by_account_id(account).unwrap().unwrap();
        assert_eq!(ledger.id(), ledger_id);
        assert_eq!(ledger.account_id(), account);
        assert_eq!(ledger.ledger_type(), LedgerType::Internal);
        assert_eq!(ledger.balance(), Balance::new(1_000, 0, 0));
    }

    #[test]
    fn one_ledger_per_account() {
        let store = InMemoryLedgerStore::new();
        let account = Uuid::new_v4();
        store.open_ledger(account, 0).unwrap();
        let err = store.open_ledger(account, 10).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateLedger(id) if id == account));
        assert!(matches!(
            store.open_ledger(Uuid::new_v4(), -1).unwrap_err(),
            LedgerError::NegativeOpeningBalance(-1)
        ));
    }

    #[test]
    fn unknown_account_has_no_ledger() {
        let store = InMemoryLedgerStore::new();
        assert!(store.get_by_account_id(Uuid::new_v4()).unwrap().is_none());
        assert!(matches!(
            store.entries(Uuid::new_v4()).unwrap_err(),
            LedgerError::UnknownLedger(_)
        ));
    }

    #[test]
    fn entries_are_stamped_and_kept_in_creation_order() {
        let clock = Arc::new(ManualClock::default());
        let store = InMemoryLedgerStore::with_clock(clock.clone());
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        store.open_ledger(alice, 50).unwrap();
        store.open_ledger(bob, 0).unwrap();
        let mut from = store.get_by_account_id(alice).unwrap().unwrap();
        let to = store.get_by_account_id(bob).unwrap().unwrap();

        clock.advance(TimeDelta::milliseconds(10));
        let debit = from
            .create_debit_transaction(&store, alice, &to, 20)
            .unwrap();
        clock.advance(TimeDelta::milliseconds(10));
        from.complete_transaction(&store, &debit).unwrap();

        let entries = store.entries(from.id()).unwrap();
        let stamps: Vec<i64> = entries.iter().map(|e| e.created_at_millis).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(entries[2].id, debit.opening_entry().id);
        assert_eq!(entries[3].subtype, EntrySubtype::Actual);
        assert_eq!(entries[3].global_id, debit.id());
        assert_eq!(entries[3].created_by, alice);
    }

    #[test]
    fn live_balance_matches_replayed_balance() {
        let store = InMemoryLedgerStore::new();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        store.open_ledger(alice, 300).unwrap();
        store.open_ledger(bob, 0).unwrap();
        let mut from = store.get_by_account_id(alice).unwrap().unwrap();
        let to = store.get_by_account_id(bob).unwrap().unwrap();

        let first = from
            .create_debit_transaction(&store, alice, &to, 100)
            .unwrap();
        let second = from
            .create_debit_transaction(&store, alice, &to, 50)
            .unwrap();
        from.complete_transaction(&store, &first).unwrap();
        from.cancel_transaction(&store, &second).unwrap();

        let live = store.live_balance(from.id()).unwrap();
        let mut replayed = Balance::default();
        replayed.recompute(&store.entries(from.id()).unwrap()).unwrap();
        assert_eq!(live, replayed);
        assert_eq!(live, Balance::new(200, 0, 0));
        assert_eq!(from.balance(), live);
    }

    #[test]
    fn correlation_id_is_unique_per_ledger() {
        let store = InMemoryLedgerStore::new();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        store.open_ledger(alice, 0).unwrap();
        store.open_ledger(bob, 0).unwrap();
        let from = store.get_by_account_id(alice).unwrap().unwrap();
        let mut to = store.get_by_account_id(bob).unwrap().unwrap();

        let global_id = Uuid::new_v4();
        to.create_credit_transaction(&store, alice, &from, 5, global_id)
            .unwrap();
        let err = to
            .create_credit_transaction(&store, alice, &from, 5, global_id)
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateTransaction { .. }));
        assert_eq!(to.balance(), Balance::new(0, 0, 5));
    }

    #[test]
    fn transaction_on_unknown_ledger_fails() {
        let store = InMemoryLedgerStore::new();
        let err = store
            .initiate_transaction(NewTransaction {
                global_id: Uuid::new_v4(),
                from_ledger_id: Uuid::new_v4(),
                to_ledger_id: Uuid::new_v4(),
                amount: 1,
                entry_type: EntryType::Debit,
                subtype: EntrySubtype::Obligation,
                created_by: Uuid::new_v4(),
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownLedger(_)));
    }

    #[test]
    fn initiate_rejects_invalid_opening_entries() {
        let store = InMemoryLedgerStore::new();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let from = store.open_ledger(alice, 600).unwrap();
        let to = store.open_ledger(bob, 0).unwrap();
        let new = NewTransaction {
            global_id: Uuid::new_v4(),
            from_ledger_id: from,
            to_ledger_id: to,
            amount: -500,
            entry_type: EntryType::Debit,
            subtype: EntrySubtype::Obligation,
            created_by: alice,
        };

        let err = store.initiate_transaction(new.clone()).unwrap_err();
        assert!(matches!(err, LedgerError::NonPositiveAmount(-500)));
        let err = store
            .initiate_transaction(NewTransaction {
                amount: 0,
                ..new.clone()
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::NonPositiveAmount(0)));

        for (entry_type, subtype) in [
            (EntryType::Debit, EntrySubtype::Cancel),
            (EntryType::Debit, EntrySubtype::Actual),
            (EntryType::Credit, EntrySubtype::Actual),
            (EntryType::Credit, EntrySubtype::Obligation),
        ] {
            let err = store
                .initiate_transaction(NewTransaction {
                    amount: 10,
                    entry_type,
                    subtype,
                    ..new.clone()
                })
                .unwrap_err();
            assert!(matches!(
                err,
                LedgerError::NotAnOpeningEntry { entry_type: t, subtype: s }
                    if t == entry_type && s == subtype
            ));
        }

        assert_eq!(store.entries(from).unwrap().len(), 2);
        assert!(store.entries(to).unwrap().is_empty());
        assert_eq!(
            store.get_by_account_id(alice).unwrap().unwrap().balance(),
            Balance::new(600, 0, 0)
        );
    }

    #[test]
    fn overflowing_completion_leaves_leg_open() {
        let store = InMemoryLedgerStore::new();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        store.open_ledger(alice, 100).unwrap();
        store.open_ledger(bob, Amount::MAX - 10).unwrap();
        let from = store.get_by_account_id(alice).unwrap().unwrap();
        let mut to = store.get_by_account_id(bob).unwrap().unwrap();

        let credit = to
            .create_credit_transaction(&store, alice, &from, 50, Uuid::new_v4())
            .unwrap();
        let err = to.complete_transaction(&store, &credit).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Balance(BalanceError::Overflow { amount: 50, .. })
        ));
        assert_eq!(store.entries(to.id()).unwrap().len(), 3);

        to.cancel_transaction(&store, &credit).unwrap();
        assert_eq!(
            store.live_balance(to.id()).unwrap(),
            Balance::new(Amount::MAX - 10, 0, 0)
        );
    }
}
