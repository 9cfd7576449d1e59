use std::sync::Arc;

use indexmap::IndexMap;

use crate::core::error::RoutingError;
use crate::core::traits::Provider;
use crate::core::types::ProviderName;

/// Named provider instances in insertion order.
///
/// Insertion order is the iteration order order-dependent strategies use.
/// Re-inserting an existing name replaces the provider in place and keeps its
/// original position.
pub struct ProviderPool<N: ProviderName> {
    providers: IndexMap<N, Arc<dyn Provider>>,
}

impl<N: ProviderName> ProviderPool<N> {
    pub fn new() -> Self {
        Self {
            providers: IndexMap::new(),
        }
    }

    pub fn insert(&mut self, name: N, provider: Arc<dyn Provider>) {
        self.providers.insert(name, provider);
    }

    pub fn get(&self, name: &N) -> Result<Arc<dyn Provider>, RoutingError> {
        self.providers
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| RoutingError::ProviderNotFound {
                provider: name.to_string(),
            })
    }

    pub fn contains(&self, name: &N) -> bool {
        self.providers.contains_key(name)
    }

    pub fn names(&self) -> Vec<N> {
        self.providers.keys().cloned().collect()
    }

    pub fn in_order(&self) -> Vec<(N, Arc<dyn Provider>)> {
        self.providers
            .iter()
            .map(|(name, provider)| (name.clone(), Arc::clone(provider)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl<N: ProviderName> Default for ProviderPool<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: ProviderName> Clone for ProviderPool<N> {
    fn clone(&self) -> Self {
        Self {
            providers: self.providers.clone(),
        }
    }
}
