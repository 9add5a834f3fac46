use std::sync::Arc;

use super::{Account, AccountsRepository, BackendError, SaveResult, Scope, Transaction, TransactionStore};

/// Reusable backend handle: the two capabilities a module constructed plus the
/// scope currently bound to them.
///
/// Construction is the expensive part; `rebind` only swaps the scope, so a handle
/// is built once and re-stamped for every request that borrows it.
pub struct Repository {
    serial: u64,
    store: Arc<dyn TransactionStore>,
    accounts: Arc<dyn AccountsRepository>,
    scope: Scope,
}

impl Repository {
    pub fn new(serial: u64, store: Arc<dyn TransactionStore>, accounts: Arc<dyn AccountsRepository>) -> Self {
        Self {
            serial,
            store,
            accounts,
            scope: Scope::default(),
        }
    }

    /// Identifies the constructed handle for its whole lifetime.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn rebind(&mut self, user: impl Into<String>, coa: impl Into<String>) {
        self.scope.user = user.into();
        self.scope.coa = coa.into();
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub async fn save(&self, txs: Vec<Transaction>) -> Result<Vec<SaveResult>, BackendError> {
        self.store.save(&self.scope, txs).await
    }

    pub async fn get(&self, id: &str) -> Result<Transaction, BackendError> {
        self.store.get(&self.scope, id).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), BackendError> {
        self.store.delete(&self.scope, id).await
    }

    pub async fn accounts(&self) -> Result<Vec<Account>, BackendError> {
        self.accounts.accounts(&self.scope).await
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("serial", &self.serial)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}
