use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{AccountsRepository, BackendSettings, ConstructionError, Repository, TransactionStore};
use crate::config::LedgerConfig;
use crate::plugin::{LoaderSlot, PluginError, PluginLoader, CONSTRUCTOR_SYMBOL, LOADER_SLOT_SYMBOL};

/// Builds the two backend capabilities from the gateway's settings blobs.
///
/// The returned capabilities must not hold identity state: the scope arrives with
/// every call, so one construction can serve any number of requests.
#[async_trait]
pub trait BackendConstructor: Send + Sync {
    async fn construct(
        &self,
        store: &BackendSettings,
        accounts: &BackendSettings,
    ) -> Result<(Arc<dyn TransactionStore>, Arc<dyn AccountsRepository>), ConstructionError>;
}

/// Concrete type a module exports under [`CONSTRUCTOR_SYMBOL`].
pub type SharedConstructor = Arc<dyn BackendConstructor>;

/// Holds the constructor obtained at startup together with the settings it is
/// invoked with.
pub struct BackendResolver {
    constructor: SharedConstructor,
    store: BackendSettings,
    accounts: BackendSettings,
    serials: AtomicU64,
}

impl BackendResolver {
    pub fn new(constructor: SharedConstructor, store: BackendSettings, accounts: BackendSettings) -> Self {
        Self {
            constructor,
            store,
            accounts,
            serials: AtomicU64::new(0),
        }
    }

    /// Resolve the configured module's constructor. Failure here means the process
    /// must not serve traffic.
    pub fn load(loader: &PluginLoader, config: &LedgerConfig) -> Result<Self, PluginError> {
        let module = loader.open(&config.plugin)?;
        let constructor = module
            .lookup(CONSTRUCTOR_SYMBOL)?
            .downcast::<SharedConstructor>(CONSTRUCTOR_SYMBOL)?;

        if let Ok(slot) = module.lookup(LOADER_SLOT_SYMBOL) {
            let slot = slot.downcast::<Arc<LoaderSlot>>(LOADER_SLOT_SYMBOL)?;
            if slot.inject(loader.symbol_loader()) {
                info!("Injected symbol loader into plugin module {}", module.name());
            }
        }

        info!("Loaded backend constructor from plugin module {}", module.name());
        Ok(Self::new(
            constructor,
            config.store.clone(),
            config.accounts_repository.clone(),
        ))
    }

    /// Build a fresh handle. Its scope is empty until the pool rebinds it.
    pub async fn resolve(&self) -> Result<Repository, ConstructionError> {
        let (store, accounts) = self.constructor.construct(&self.store, &self.accounts).await?;
        let serial = self.serials.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Repository::new(serial, store, accounts))
    }
}
