pub mod pool;
pub mod repository;
pub mod resolver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use pool::{HandlePool, PoolStats, PooledRepository};
pub use repository::Repository;
pub use resolver::{BackendConstructor, BackendResolver, SharedConstructor};

/// Opaque configuration blob handed to a backend constructor.
pub type BackendSettings = Map<String, Value>;

/// Identity and chart of accounts every backend call is scoped to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Scope {
    pub user: String,
    pub coa: String,
}

impl Scope {
    pub fn new(user: impl Into<String>, coa: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            coa: coa.into(),
        }
    }
}

/// A ledger transaction as the gateway sees it: an optional id plus whatever
/// fields the backend understands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveResult {
    pub id: String,
    pub status: SaveStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Failures reported by a backend capability while serving an operation.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Failures building a backend handle.
#[derive(Debug, Clone, Error)]
pub enum ConstructionError {
    #[error("Invalid backend settings: {0}")]
    InvalidSettings(String),

    #[error("Backend construction failed: {0}")]
    Failed(String),
}

/// Transaction persistence capability supplied by a backend module.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn save(&self, scope: &Scope, txs: Vec<Transaction>) -> Result<Vec<SaveResult>, BackendError>;

    async fn get(&self, scope: &Scope, id: &str) -> Result<Transaction, BackendError>;

    async fn delete(&self, scope: &Scope, id: &str) -> Result<(), BackendError>;
}

/// Chart-of-accounts lookup capability supplied by a backend module.
#[async_trait]
pub trait AccountsRepository: Send + Sync {
    async fn accounts(&self, scope: &Scope) -> Result<Vec<Account>, BackendError>;

    async fn exists(&self, scope: &Scope, account_id: &str) -> Result<bool, BackendError>;
}
