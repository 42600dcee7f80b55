use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

pub type AccountId = Uuid;

/// Any party able to own a ledger, a user or another service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
}

pub trait AccountService: Send + Sync {
    fn resolve(&self, id: AccountId) -> Option<Account>;
}

#[derive(Debug, Default)]
pub struct InMemoryAccountService {
    accounts: RwLock<HashMap<AccountId, Account>>,
}

impl InMemoryAccountService {
    /// Returns `false` if an account with the same id already exists.
    pub fn register(&self, account: Account) -> bool {
        let mut accounts = self.accounts.write();
        if accounts.contains_key(&account.id) {
            return false;
        }
        accounts.insert(account.id, account);
        true
    }
}

impl AccountService for InMemoryAccountService {
    fn resolve(&self, id: AccountId) -> Option<Account> {
        self.accounts.read().get(&id).cloned()
    }
}
