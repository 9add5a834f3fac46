#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};

use ledger_gateway::auth::IdentityGate;
use ledger_gateway::backend::{
    Account, AccountsRepository, BackendConstructor, BackendError, BackendResolver, BackendSettings,
    ConstructionError, HandlePool, SaveResult, SaveStatus, Scope, SharedConstructor, Transaction,
    TransactionStore,
};
use ledger_gateway::config::{LedgerConfig, PoolConfig, ServerConfig};
use ledger_gateway::plugin::{PluginLoader, PluginModule, Symbol, CONSTRUCTOR_SYMBOL};
use ledger_gateway::{router, AppContext};

pub const ISSUER: &str = "https://issuer.example";
pub const AUDIENCE: &str = "ledger-gateway";
pub const ALICE: &str = "alice@example.com";

const PRIVATE_KEY: &[u8] = include_bytes!("../fixtures/test_rsa_private.pem");
const JWKS: &str = include_str!("../fixtures/test_jwks.json");

pub fn gate() -> IdentityGate {
    let keys: JwkSet = serde_json::from_str(JWKS).expect("fixture JWKS must parse");
    IdentityGate::from_jwks(ISSUER, AUDIENCE, keys)
}

pub fn id_claims(email: &str) -> Value {
    let now = chrono::Utc::now().timestamp();
    json!({
        "iss": ISSUER,
        "aud": AUDIENCE,
        "sub": "1234567890",
        "iat": now,
        "exp": now + 3600,
        "email": email,
        "email_verified": true,
    })
}

pub fn mint(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("test-kid".to_string());
    let key = EncodingKey::from_rsa_pem(PRIVATE_KEY).expect("fixture private key must parse");
    encode(&header, claims, &key).expect("token encode should succeed")
}

pub fn token(email: &str) -> String {
    mint(&id_claims(email))
}

/// Everything a recorder backend saw, in call order.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: &'static str,
    pub scope: Scope,
    pub id: Option<String>,
    pub txs: Vec<Transaction>,
}

/// Backend module that records calls and can be told to misbehave.
#[derive(Default)]
pub struct Recorder {
    pub constructions: AtomicUsize,
    pub calls: Mutex<Vec<Call>>,
    pub fail_ops: AtomicBool,
    pub fail_construction: AtomicBool,
    pub op_delay_ms: AtomicUsize,
}

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: &'static str, scope: &Scope, id: Option<&str>, txs: &[Transaction]) {
        self.calls.lock().unwrap().push(Call {
            op,
            scope: scope.clone(),
            id: id.map(str::to_string),
            txs: txs.to_vec(),
        });
    }

    async fn pause(&self) -> Result<(), BackendError> {
        let delay = self.op_delay_ms.load(Ordering::SeqCst) as u64;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_ops.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("recorder told to fail".to_string()));
        }
        Ok(())
    }
}

struct RecorderConstructor(Arc<Recorder>);

#[async_trait]
impl BackendConstructor for RecorderConstructor {
    async fn construct(
        &self,
        _store: &BackendSettings,
        _accounts: &BackendSettings,
    ) -> Result<(Arc<dyn TransactionStore>, Arc<dyn AccountsRepository>), ConstructionError> {
        if self.0.fail_construction.load(Ordering::SeqCst) {
            return Err(ConstructionError::Failed("recorder refused to construct".to_string()));
        }
        self.0.constructions.fetch_add(1, Ordering::SeqCst);
        let store: Arc<dyn TransactionStore> = Arc::new(RecorderStore(self.0.clone()));
        let accounts: Arc<dyn AccountsRepository> = Arc::new(RecorderStore(self.0.clone()));
        Ok((store, accounts))
    }
}

struct RecorderStore(Arc<Recorder>);

#[async_trait]
impl TransactionStore for RecorderStore {
    async fn save(&self, scope: &Scope, txs: Vec<Transaction>) -> Result<Vec<SaveResult>, BackendError> {
        self.0.record("save", scope, None, &txs);
        self.0.pause().await?;
        Ok(txs
            .iter()
            .map(|tx| SaveResult {
                id: tx.id.clone().unwrap_or_default(),
                status: SaveStatus::Created,
                saved_at: None,
            })
            .collect())
    }

    async fn get(&self, scope: &Scope, id: &str) -> Result<Transaction, BackendError> {
        self.0.record("get", scope, Some(id), &[]);
        self.0.pause().await?;
        Ok(serde_json::from_value(json!({"id": id, "amount": 100})).unwrap())
    }

    async fn delete(&self, scope: &Scope, id: &str) -> Result<(), BackendError> {
        self.0.record("delete", scope, Some(id), &[]);
        self.0.pause().await
    }
}

#[async_trait]
impl AccountsRepository for RecorderStore {
    async fn accounts(&self, scope: &Scope) -> Result<Vec<Account>, BackendError> {
        self.0.record("accounts", scope, None, &[]);
        self.0.pause().await?;
        Ok(vec![Account {
            id: "cash".to_string(),
            name: Some("Cash".to_string()),
        }])
    }

    async fn exists(&self, _scope: &Scope, account_id: &str) -> Result<bool, BackendError> {
        Ok(account_id == "cash")
    }
}

pub fn recording_loader(recorder: &Arc<Recorder>) -> PluginLoader {
    let constructor: SharedConstructor = Arc::new(RecorderConstructor(recorder.clone()));
    PluginLoader::builtin().with_module(PluginModule::new("recorder").export(CONSTRUCTOR_SYMBOL, Symbol::new(constructor)))
}

pub fn ledger(plugin: &str, store: Value, accounts: Value) -> LedgerConfig {
    let as_map = |v: Value| match v {
        Value::Object(map) => map,
        _ => BackendSettings::new(),
    };
    LedgerConfig {
        plugin: plugin.to_string(),
        store: as_map(store),
        accounts_repository: as_map(accounts),
    }
}

pub struct TestApp {
    pub base_url: String,
    pub pool: Arc<HandlePool>,
    pub client: reqwest::Client,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}/charts-of-accounts{}", self.base_url, path)
    }
}

pub async fn spawn_app(loader: PluginLoader, ledger: LedgerConfig) -> Result<TestApp> {
    let resolver = BackendResolver::load(&loader, &ledger).context("plugin must load")?;
    let pool = HandlePool::new(Arc::new(resolver), &PoolConfig::default());
    let app = router(AppContext::new(gate(), pool.clone()), &ServerConfig::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let base_url = format!("http://{}", listener.local_addr()?);
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server");
    });

    Ok(TestApp {
        base_url,
        pool,
        client: reqwest::Client::new(),
    })
}

pub async fn spawn_recording_app(recorder: &Arc<Recorder>) -> Result<TestApp> {
    spawn_app(recording_loader(recorder), ledger("recorder", json!({}), json!({}))).await
}

pub async fn spawn_memory_app() -> Result<TestApp> {
    spawn_app(PluginLoader::builtin(), ledger("memory", json!({}), json!({}))).await
}
