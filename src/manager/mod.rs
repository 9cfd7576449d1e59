use std::sync::{Arc, RwLock};

use futures::future::join_all;
use indexmap::IndexMap;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info, warn};

use crate::core::config::{ProviderConfig, ProviderFactory, ProviderSetup};
use crate::core::error::{RoutingError, RuntimeError};
use crate::core::traits::Provider;
use crate::core::types::{
    Completion, CompletionRequest, DispatchHooks, ProviderName, ProviderStatus,
};
use crate::pool::ProviderPool;
use crate::strategy::{DispatchStrategy, FallbackStrategy, FirstSuccessStrategy};

/// Owns the provider pool and the active dispatch strategy.
pub struct ProviderManager<N: ProviderName> {
    pool: RwLock<Arc<ProviderPool<N>>>,
    factories: RwLock<IndexMap<N, ProviderFactory<N>>>,
    strategy: RwLock<Arc<dyn DispatchStrategy<N>>>,
    init_lock: Mutex<()>,
}

impl<N: ProviderName> std::fmt::Debug for ProviderManager<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderManager").finish_non_exhaustive()
    }
}

pub struct ProviderManagerBuilder<N: ProviderName> {
    pool: ProviderPool<N>,
    strategy: Arc<dyn DispatchStrategy<N>>,
}

/// Which providers of an `initialize` call authenticated successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport<N: ProviderName> {
    pub authenticated: IndexMap<N, bool>,
}

impl<N: ProviderName> InitReport<N> {
    pub fn all_authenticated(&self) -> bool {
        self.authenticated.values().all(|authenticated| *authenticated)
    }

    pub fn unauthenticated(&self) -> Vec<&N> {
        self.authenticated
            .iter()
            .filter(|(_, authenticated)| !**authenticated)
            .map(|(name, _)| name)
            .collect()
    }
}

impl<N: ProviderName> ProviderManager<N> {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ProviderManagerBuilder<N> {
        ProviderManagerBuilder {
            pool: ProviderPool::new(),
            strategy: Arc::new(FirstSuccessStrategy::new()),
        }
    }

    /// Constructs and authenticates every provider in `setups`.
    ///
    /// Providers are staged on a copy of the current pool which replaces the
    /// live pool only when every construction succeeded; on error the live pool
    /// is untouched. An authentication failure is not fatal and is reported in
    /// the returned [`InitReport`]. Calls are serialized.
    pub async fn initialize(
        &self,
        setups: IndexMap<N, ProviderSetup<N>>,
    ) -> Result<InitReport<N>, RuntimeError> {
        let _guard = self.init_lock.lock().await;

        let mut staged_pool = ProviderPool::clone(&self.pool());
        let mut staged_factories = self.read_factories();
        let mut authenticated = IndexMap::new();

        for (name, setup) in setups {
            let provider = setup.build(&name).map_err(|source| {
                error!(provider = %name, error = %source, "provider construction failed");
                RuntimeError::InitializationFailed {
                    provider: name.to_string(),
                    source,
                }
            })?;

            let ok = provider.authenticate().await;
            if !ok {
                warn!(provider = %name, "provider authentication failed");
            }

            staged_pool.insert(name.clone(), provider);
            staged_factories.insert(name.clone(), setup.factory);
            authenticated.insert(name, ok);
        }

        info!(
            providers = staged_pool.len(),
            initialized = authenticated.len(),
            "provider pool initialized"
        );
        *write_lock(&self.pool) = Arc::new(staged_pool);
        *write_lock(&self.factories) = staged_factories;

        Ok(InitReport { authenticated })
    }

    /// Rebuilds one provider from a new config with the factory remembered
    /// from `initialize`, authenticates it and swaps it into the pool.
    pub async fn reconfigure(&self, name: &N, config: ProviderConfig) -> Result<bool, RuntimeError> {
        let _guard = self.init_lock.lock().await;

        let factory = read_lock(&self.factories)
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| RoutingError::ProviderNotFound {
                provider: name.to_string(),
            })?;
        let provider = factory(name, config).map_err(|source| RuntimeError::InitializationFailed {
            provider: name.to_string(),
            source,
        })?;

        let ok = provider.authenticate().await;
        if !ok {
            warn!(provider = %name, "provider authentication failed");
        }

        let mut staged_pool = ProviderPool::clone(&self.pool());
        staged_pool.insert(name.clone(), provider);
        *write_lock(&self.pool) = Arc::new(staged_pool);

        Ok(ok)
    }

    pub fn get_provider(&self, name: &N) -> Result<Arc<dyn Provider>, RoutingError> {
        self.pool().get(name)
    }

    pub fn providers_in_order(&self) -> Vec<(N, Arc<dyn Provider>)> {
        self.pool().in_order()
    }

    /// Snapshot of the live pool.
    pub fn pool(&self) -> Arc<ProviderPool<N>> {
        Arc::clone(&read_lock(&self.pool))
    }

    pub fn set_strategy<S>(&self, strategy: S)
    where
        S: DispatchStrategy<N> + 'static,
    {
        self.set_strategy_arc(Arc::new(strategy));
    }

    pub fn set_strategy_arc(&self, strategy: Arc<dyn DispatchStrategy<N>>) {
        debug!(strategy = strategy.name(), "dispatch strategy replaced");
        *write_lock(&self.strategy) = strategy;
    }

    pub fn strategy_name(&self) -> &'static str {
        read_lock(&self.strategy).name()
    }

    /// Dispatches one completion.
    ///
    /// With `model` set, the named provider is tried first and the rest of the
    /// pool serves as fallback for this call only. Otherwise the active
    /// strategy decides.
    pub async fn completion(
        &self,
        request: &CompletionRequest,
        model: Option<&N>,
        hooks: &DispatchHooks<N>,
    ) -> Result<Completion, RuntimeError> {
        let pool = self.pool();

        match model {
            Some(primary) => {
                FallbackStrategy::new(primary.clone())
                    .completion(&pool, request, hooks)
                    .await
            }
            None => {
                let strategy = Arc::clone(&read_lock(&self.strategy));
                strategy.completion(&pool, request, hooks).await
            }
        }
    }

    /// Shorthand for a non-streaming completion with the active strategy.
    pub async fn complete(
        &self,
        request: impl Into<CompletionRequest>,
    ) -> Result<Completion, RuntimeError> {
        self.completion(&request.into(), None, &DispatchHooks::default())
            .await
    }

    /// Probes every provider concurrently. Meant for health surfaces, not the
    /// request path.
    pub async fn available_providers(&self) -> IndexMap<N, ProviderStatus> {
        let providers = self.providers_in_order();
        let probes = providers
            .iter()
            .map(|(_, provider)| provider.is_available());
        let results = join_all(probes).await;

        providers
            .into_iter()
            .zip(results)
            .map(|((name, provider), is_available)| {
                let status = ProviderStatus {
                    is_available,
                    extra: provider.config().extra.clone(),
                };
                (name, status)
            })
            .collect()
    }

    fn read_factories(&self) -> IndexMap<N, ProviderFactory<N>> {
        read_lock(&self.factories).clone()
    }
}

impl<N: ProviderName> Default for ProviderManager<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: ProviderName> ProviderManagerBuilder<N> {
    /// Adds a ready provider. A repeated name replaces the earlier provider.
    pub fn with_provider(mut self, name: N, provider: Arc<dyn Provider>) -> Self {
        self.pool.insert(name, provider);
        self
    }

    pub fn with_strategy<S>(mut self, strategy: S) -> Self
    where
        S: DispatchStrategy<N> + 'static,
    {
        self.strategy = Arc::new(strategy);
        self
    }

    pub fn build(self) -> ProviderManager<N> {
        ProviderManager {
            pool: RwLock::new(Arc::new(self.pool)),
            factories: RwLock::new(IndexMap::new()),
            strategy: RwLock::new(self.strategy),
            init_lock: Mutex::new(()),
        }
    }
}

/// Init-once holder for a process-wide manager.
///
/// The first call creates the manager; every call (re)applies the given
/// setups to that same manager.
pub struct ManagerCell<N: ProviderName> {
    cell: OnceCell<Arc<ProviderManager<N>>>,
}

impl<N: ProviderName> ManagerCell<N> {
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    pub async fn get_or_initialize(
        &self,
        setups: IndexMap<N, ProviderSetup<N>>,
    ) -> Result<Arc<ProviderManager<N>>, RuntimeError> {
        let manager = self
            .cell
            .get_or_init(|| async { Arc::new(ProviderManager::new()) })
            .await;
        manager.initialize(setups).await?;
        Ok(Arc::clone(manager))
    }

    pub fn get(&self) -> Option<Arc<ProviderManager<N>>> {
        self.cell.get().map(Arc::clone)
    }
}

impl<N: ProviderName> Default for ManagerCell<N> {
    fn default() -> Self {
        Self::new()
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
