//! In-process reference backend.
//!
//! Every handle constructed by one `memory` module talks to the same ledger, the
//! way connections talk to one database. Data is partitioned by scope, so a user
//! only ever sees the charts of accounts they wrote to.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{LoaderSlot, PluginModule, Symbol, CONSTRUCTOR_SYMBOL, LOADER_SLOT_SYMBOL};
use crate::backend::{
    Account, AccountsRepository, BackendConstructor, BackendError, BackendSettings, ConstructionError,
    SaveResult, SaveStatus, Scope, SharedConstructor, Transaction, TransactionStore,
};

/// Exported by `memory-accounts`.
pub const ACCOUNTS_SYMBOL: &str = "NewAccountsRepository";

/// Concrete type behind [`ACCOUNTS_SYMBOL`].
pub type AccountsFactory =
    Arc<dyn Fn(&BackendSettings) -> Result<Arc<dyn AccountsRepository>, ConstructionError> + Send + Sync>;

pub fn modules() -> Vec<PluginModule> {
    let slot = LoaderSlot::new();
    let constructor: SharedConstructor = Arc::new(MemoryConstructor {
        ledger: Arc::new(MemoryLedger::default()),
        loader: slot.clone(),
    });

    let accounts_factory: AccountsFactory = Arc::new(
        |settings: &BackendSettings| -> Result<Arc<dyn AccountsRepository>, ConstructionError> {
            Ok(Arc::new(MemoryAccounts::from_settings(settings)?))
        },
    );

    vec![
        PluginModule::new("memory")
            .export(CONSTRUCTOR_SYMBOL, Symbol::new(constructor))
            .export(LOADER_SLOT_SYMBOL, Symbol::new(slot)),
        PluginModule::new("memory-accounts").export(ACCOUNTS_SYMBOL, Symbol::new(accounts_factory)),
    ]
}

#[derive(Default)]
struct MemoryLedger {
    charts: RwLock<HashMap<Scope, BTreeMap<String, Transaction>>>,
}

struct MemoryConstructor {
    ledger: Arc<MemoryLedger>,
    loader: Arc<LoaderSlot>,
}

#[async_trait]
impl BackendConstructor for MemoryConstructor {
    async fn construct(
        &self,
        store: &BackendSettings,
        accounts: &BackendSettings,
    ) -> Result<(Arc<dyn TransactionStore>, Arc<dyn AccountsRepository>), ConstructionError> {
        if flag(store, "fail_construction") {
            return Err(ConstructionError::Failed("memory store configured to fail".to_string()));
        }

        let accounts: Arc<dyn AccountsRepository> = match accounts.get("module").and_then(Value::as_str) {
            Some(module) => {
                let failed = |e: super::PluginError| ConstructionError::Failed(e.to_string());
                let factory = self
                    .loader
                    .load(module, ACCOUNTS_SYMBOL)
                    .map_err(failed)?
                    .downcast::<AccountsFactory>(ACCOUNTS_SYMBOL)
                    .map_err(failed)?;
                factory(accounts)?
            }
            None => Arc::new(MemoryAccounts::from_settings(accounts)?),
        };

        let store: Arc<dyn TransactionStore> = Arc::new(MemoryStore {
            ledger: self.ledger.clone(),
            accounts: accounts.clone(),
            validate_accounts: flag(store, "validate_accounts"),
        });
        Ok((store, accounts))
    }
}

fn flag(settings: &BackendSettings, key: &str) -> bool {
    settings.get(key).and_then(Value::as_bool).unwrap_or(false)
}

struct MemoryStore {
    ledger: Arc<MemoryLedger>,
    accounts: Arc<dyn AccountsRepository>,
    validate_accounts: bool,
}

impl MemoryStore {
    async fn check_entries(&self, scope: &Scope, tx: &Transaction) -> Result<(), BackendError> {
        let Some(entries) = tx.fields.get("entries").and_then(Value::as_array) else {
            return Ok(());
        };

        for entry in entries {
            let account = entry
                .get("account")
                .and_then(Value::as_str)
                .ok_or_else(|| BackendError::Rejected("entry is missing an account".to_string()))?;
            if !self.accounts.exists(scope, account).await? {
                return Err(BackendError::Rejected(format!(
                    "account {} does not exist in chart {}",
                    account, scope.coa
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn save(&self, scope: &Scope, txs: Vec<Transaction>) -> Result<Vec<SaveResult>, BackendError> {
        if self.validate_accounts {
            for tx in &txs {
                self.check_entries(scope, tx).await?;
            }
        }

        let now = chrono::Utc::now();
        let mut charts = self.ledger.charts.write().await;
        let chart = charts.entry(scope.clone()).or_default();

        let results = txs
            .into_iter()
            .map(|mut tx| {
                let id = tx.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
                tx.id = Some(id.clone());
                let status = match chart.insert(id.clone(), tx) {
                    Some(_) => SaveStatus::Updated,
                    None => SaveStatus::Created,
                };
                SaveResult {
                    id,
                    status,
                    saved_at: Some(now),
                }
            })
            .collect();

        Ok(results)
    }

    async fn get(&self, scope: &Scope, id: &str) -> Result<Transaction, BackendError> {
        let charts = self.ledger.charts.read().await;
        charts
            .get(scope)
            .and_then(|chart| chart.get(id))
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("transaction {}", id)))
    }

    async fn delete(&self, scope: &Scope, id: &str) -> Result<(), BackendError> {
        let mut charts = self.ledger.charts.write().await;
        charts
            .get_mut(scope)
            .and_then(|chart| chart.remove(id))
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(format!("transaction {}", id)))
    }
}

/// Fixed account list from settings, shared by every chart.
struct MemoryAccounts {
    accounts: Vec<Account>,
}

impl MemoryAccounts {
    fn from_settings(settings: &BackendSettings) -> Result<Self, ConstructionError> {
        let accounts = match settings.get("accounts") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| ConstructionError::InvalidSettings(format!("accounts: {}", e)))?,
            None => Vec::new(),
        };
        Ok(Self { accounts })
    }
}

#[async_trait]
impl AccountsRepository for MemoryAccounts {
    async fn accounts(&self, _scope: &Scope) -> Result<Vec<Account>, BackendError> {
        Ok(self.accounts.clone())
    }

    async fn exists(&self, _scope: &Scope, account_id: &str) -> Result<bool, BackendError> {
        Ok(self.accounts.iter().any(|a| a.id == account_id))
    }
}
