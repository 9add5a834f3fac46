//! Backend module registry.
//!
//! A module is looked up by locator and exposes named, type-erased symbols. The
//! gateway only needs two of them: the backend constructor and, optionally, a slot
//! through which the module receives the gateway's own symbol loader so it can pull
//! in further modules.

pub mod memory;

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use thiserror::Error;

/// Symbol every backend module must export.
pub const CONSTRUCTOR_SYMBOL: &str = "NewStoreAndAccountsRepository";

/// Optional symbol; when present the gateway injects its loader into it.
pub const LOADER_SLOT_SYMBOL: &str = "LoadSymbolFunction";

#[derive(Debug, Clone, Error)]
pub enum PluginError {
    #[error("plugin module not found: {0}")]
    ModuleNotFound(String),

    #[error("symbol {symbol} not found in plugin module {module}")]
    SymbolNotFound { module: String, symbol: String },

    #[error("symbol {symbol} has type {actual}, expected {expected}")]
    SymbolTypeMismatch {
        symbol: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("no symbol loader has been injected")]
    LoaderNotInjected,
}

/// Type-erased exported value.
#[derive(Clone)]
pub struct Symbol {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Symbol {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: type_name::<T>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Recover the exported value as `T`.
    pub fn downcast<T: Any + Send + Sync + Clone>(&self, symbol: &str) -> Result<T, PluginError> {
        self.value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| PluginError::SymbolTypeMismatch {
                symbol: symbol.to_string(),
                expected: type_name::<T>(),
                actual: self.type_name,
            })
    }
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Symbol").field(&self.type_name).finish()
    }
}

/// `load_symbol(path, name)` as handed to modules.
pub type SymbolLoader = Arc<dyn Fn(&str, &str) -> Result<Symbol, PluginError> + Send + Sync>;

/// Write-once slot a module exports under [`LOADER_SLOT_SYMBOL`].
#[derive(Default)]
pub struct LoaderSlot(OnceCell<SymbolLoader>);

impl LoaderSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns false if a loader was already injected.
    pub fn inject(&self, loader: SymbolLoader) -> bool {
        self.0.set(loader).is_ok()
    }

    pub fn is_injected(&self) -> bool {
        self.0.get().is_some()
    }

    pub fn load(&self, path: &str, name: &str) -> Result<Symbol, PluginError> {
        let loader = self.0.get().ok_or(PluginError::LoaderNotInjected)?;
        loader(path, name)
    }
}

pub struct PluginModule {
    name: String,
    symbols: HashMap<String, Symbol>,
}

impl PluginModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbols: HashMap::new(),
        }
    }

    pub fn export(mut self, symbol: impl Into<String>, value: Symbol) -> Self {
        self.symbols.insert(symbol.into(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lookup(&self, symbol: &str) -> Result<&Symbol, PluginError> {
        self.symbols.get(symbol).ok_or_else(|| PluginError::SymbolNotFound {
            module: self.name.clone(),
            symbol: symbol.to_string(),
        })
    }
}

/// Resolves module locators against the modules registered at process start.
#[derive(Clone, Default)]
pub struct PluginLoader {
    modules: Arc<HashMap<String, Arc<PluginModule>>>,
}

impl PluginLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader with the modules shipped in this crate.
    pub fn builtin() -> Self {
        memory::modules()
            .into_iter()
            .fold(Self::new(), |loader, module| loader.with_module(module))
    }

    pub fn with_module(mut self, module: PluginModule) -> Self {
        Arc::make_mut(&mut self.modules).insert(module.name.clone(), Arc::new(module));
        self
    }

    /// Accepts a bare module name or a file path whose stem names the module,
    /// e.g. `plugins/libmemory.so` resolves to `memory`.
    pub fn open(&self, locator: &str) -> Result<Arc<PluginModule>, PluginError> {
        if let Some(module) = self.modules.get(locator) {
            return Ok(module.clone());
        }

        let stem = Path::new(locator)
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.strip_prefix("lib").unwrap_or(s));

        stem.and_then(|s| self.modules.get(s))
            .cloned()
            .ok_or_else(|| PluginError::ModuleNotFound(locator.to_string()))
    }

    pub fn load_symbol(&self, locator: &str, symbol: &str) -> Result<Symbol, PluginError> {
        self.open(locator)?.lookup(symbol).cloned()
    }

    /// This loader as a callable suitable for injection into a module.
    pub fn symbol_loader(&self) -> SymbolLoader {
        let loader = self.clone();
        Arc::new(move |locator: &str, symbol: &str| loader.load_symbol(locator, symbol))
    }
}
