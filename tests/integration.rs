use std::{
    cell::RefCell,
    rc::Rc,
    str::from_utf8,
    time::Duration,
};

use transfer_ledger::{
    account::{Account, AccountId, InMemoryAccountService},
    balance::{Amount, Balance, BalanceError},
    bin_utils::{RowError, Service},
    command::CommandExecutor,
    ledger::{LedgerError, LedgerStore, in_memory_store::InMemoryLedgerStore},
    lock::in_memory_lock_service::InMemoryLockService,
    transfer::{
        ErrorKind, TransferCommand, TransferError, TransferSettings,
        service::{TransferRequest, TransferService},
    },
};
use uuid::Uuid;

const TEST_FILE: &str = include_str!("transfers.csv");

fn open(store: &InMemoryLedgerStore, amount: Amount) -> AccountId {
    let id = Uuid::new_v4();
    store.open_ledger(id, amount).unwrap();
    id
}

fn balance(store: &InMemoryLedgerStore, account_id: AccountId) -> Balance {
    store.get_by_account_id(account_id).unwrap().unwrap().balance()
}

#[test]
fn transfer_settles_both_sides() {
    let store = InMemoryLedgerStore::new();
    let executor = CommandExecutor::new(InMemoryLockService::new());
    let a = open(&store, 1_000);
    let b = open(&store, 500);

    let mut command = TransferCommand::new(&store, a, b, 300, a, Duration::from_millis(500));
    executor.execute(&mut command).unwrap();

    assert_eq!(balance(&store, a), Balance::new(700, 0, 0));
    assert_eq!(balance(&store, b), Balance::new(800, 0, 0));
}

#[test]
fn insufficient_funds_leave_ledgers_untouched() {
    let store = InMemoryLedgerStore::new();
    let executor = CommandExecutor::new(InMemoryLockService::new());
    let a = open(&store, 50);
    let b = open(&store, 0);
    let a_ledger = store.get_by_account_id(a).unwrap().unwrap().id();
    let entries_before = store.entries(a_ledger).unwrap().len();

    let mut command = TransferCommand::new(&store, a, b, 100, a, Duration::from_millis(500));
    let err = executor.execute(&mut command).unwrap_err();

    assert!(matches!(err, TransferError::InsufficientFunds(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(store.entries(a_ledger).unwrap().len(), entries_before);
    assert_eq!(balance(&store, a), Balance::new(50, 0, 0));
    assert_eq!(balance(&store, b), Balance::new(0, 0, 0));
}

#[test]
fn transfer_to_self_is_illegal() {
    let store = InMemoryLedgerStore::new();
    let executor = CommandExecutor::new(InMemoryLockService::new());
    let a = open(&store, 10);

    let mut command = TransferCommand::new(&store, a, a, 1, a, Duration::from_millis(500));
    let err = executor.execute(&mut command).unwrap_err();

    assert!(matches!(err, TransferError::IllegalTransfer));
    assert_eq!(balance(&store, a), Balance::new(10, 0, 0));
}

#[test]
fn concurrent_transfers_from_one_account() {
    const TRANSFERS: usize = 50;

    let store = InMemoryLedgerStore::new();
    let executor = CommandExecutor::new(InMemoryLockService::new());
    let from = open(&store, TRANSFERS as Amount);
    let to = open(&store, 0);

    let errors: Vec<TransferError> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..TRANSFERS)
            .map(|_| {
                s.spawn(|| {
                    let mut command =
                        TransferCommand::new(&store, from, to, 1, from, Duration::from_secs(5));
                    executor.execute(&mut command)
                })
            })
            .collect();
        handles
            .into_iter()
            .filter_map(|handle| handle.join().unwrap().err())
            .collect()
    });

    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    assert_eq!(balance(&store, from), Balance::new(0, 0, 0));
    assert_eq!(balance(&store, to), Balance::new(TRANSFERS as Amount, 0, 0));
}

#[test]
fn concurrent_transfers_in_both_directions() {
    const ROUNDS: usize = 20;

    let ledgers = InMemoryLedgerStore::new();
    let accounts = InMemoryAccountService::default();
    let a = open(&ledgers, 1_000);
    let b = open(&ledgers, 1_000);
    for (id, name) in [(a, "John"), (b, "Smith")] {
        accounts.register(Account {
            id,
            name: name.to_string(),
        });
    }
    let service = TransferService::new(
        ledgers,
        accounts,
        InMemoryLockService::new(),
        TransferSettings {
            lock_wait: Duration::from_secs(5),
            ..TransferSettings::default()
        },
    );

    std::thread::scope(|s| {
        for (from, to) in [(a, b), (b, a)] {
            let service = &service;
            s.spawn(move || {
                for _ in 0..ROUNDS {
                    service
                        .transfer(TransferRequest {
                            from,
                            to,
                            amount: 7,
                            requested_by: from,
                        })
                        .unwrap();
                }
            });
        }
    });

    let total: Amount = [a, b]
        .iter()
        .map(|id| {
            let balance = balance(service.ledgers(), *id);
            assert!(balance.is_settled());
            balance.actual()
        })
        .sum();
    assert_eq!(total, 2_000);
}

#[test]
fn process_transfers_file() {
    let mut output = Vec::new();
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&errors);
    let service = Service {
        input: TEST_FILE.as_bytes(),
        output: &mut output,
        settings: TransferSettings::default(),
        error_printer: Box::new(move |line, err| sink.borrow_mut().push((line, err))),
    };
    service.run().unwrap();

    let errors = errors.borrow();
    assert_eq!(errors.len(), 5);
    assert!(matches!(
        errors[0].1,
        RowError::Transfer(TransferError::InsufficientFunds(_))
    ));
    assert!(matches!(
        errors[1].1,
        RowError::Transfer(TransferError::IllegalTransfer)
    ));
    assert!(matches!(
        errors[2].1,
        RowError::Transfer(TransferError::UnknownAccount(_))
    ));
    assert!(matches!(errors[3].1, RowError::TooPrecise(_)));
    assert!(matches!(errors[4].1, RowError::DuplicateAccount(_)));

    let lines: Vec<&str> = from_utf8(&output).unwrap().lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "account,ledger,actual,obligating,receiving");
    assert!(lines[1].starts_with("11111111-1111-4111-8111-111111111111,"));
    assert!(lines[1].ends_with(",700.50,0.00,0.00"));
    assert!(lines[2].starts_with("22222222-2222-4222-8222-222222222222,"));
    assert!(lines[2].ends_with(",799.50,0.00,0.00"));
}

#[test]
fn overflowing_transfer_is_rolled_back() {
    let input = "type,from,to,amount
open,11111111-1111-4111-8111-111111111111,,90000000000000000.00
open,22222222-2222-4222-8222-222222222222,,90000000000000000.00
transfer,11111111-1111-4111-8111-111111111111,22222222-2222-4222-8222-222222222222,10000000000000000.00
transfer,11111111-1111-4111-8111-111111111111,22222222-2222-4222-8222-222222222222,1.25
";
    let mut output = Vec::new();
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&errors);
    let service = Service {
        input: input.as_bytes(),
        output: &mut output,
        settings: TransferSettings::default(),
        error_printer: Box::new(move |line, err| sink.borrow_mut().push((line, err))),
    };
    service.run().unwrap();

    let errors = errors.borrow();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0].1,
        RowError::Transfer(err @ TransferError::Ledger(LedgerError::Balance(BalanceError::Overflow { .. })))
            if err.kind() == ErrorKind::Defect
    ));

    // the source account was unlocked and can send again
    let lines: Vec<&str> = from_utf8(&output).unwrap().lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].ends_with(",89999999999999998.75,0.00,0.00"));
    assert!(lines[2].ends_with(",90000000000000001.25,0.00,0.00"));
}
