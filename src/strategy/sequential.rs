use std::collections::HashMap;

use async_trait::async_trait;

use super::{DispatchStrategy, complete_in_order};
use crate::core::error::RuntimeError;
use crate::core::types::{Completion, CompletionRequest, DispatchHooks, ProviderName};
use crate::pool::ProviderPool;

/// Walks the pool in insertion order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstSuccessStrategy;

impl FirstSuccessStrategy {
    pub const NAME: &'static str = "first_success";

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<N: ProviderName> DispatchStrategy<N> for FirstSuccessStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn completion(
        &self,
        pool: &ProviderPool<N>,
        request: &CompletionRequest,
        hooks: &DispatchHooks<N>,
    ) -> Result<Completion, RuntimeError> {
        complete_in_order(Self::NAME, pool, pool.names(), request, hooks).await
    }
}

/// Tries a designated primary first, then the rest of the pool in insertion order.
#[derive(Debug, Clone)]
pub struct FallbackStrategy<N: ProviderName> {
    primary: N,
}

impl<N: ProviderName> FallbackStrategy<N> {
    pub const NAME: &'static str = "fallback";

    pub fn new(primary: N) -> Self {
        Self { primary }
    }

    pub fn primary(&self) -> &N {
        &self.primary
    }

    fn order(&self, pool: &ProviderPool<N>) -> Vec<N> {
        std::iter::once(self.primary.clone())
            .chain(pool.names().into_iter().filter(|name| *name != self.primary))
            .collect()
    }
}

#[async_trait]
impl<N: ProviderName> DispatchStrategy<N> for FallbackStrategy<N> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn completion(
        &self,
        pool: &ProviderPool<N>,
        request: &CompletionRequest,
        hooks: &DispatchHooks<N>,
    ) -> Result<Completion, RuntimeError> {
        complete_in_order(Self::NAME, pool, self.order(pool), request, hooks).await
    }
}

/// Tries providers by ascending priority. Providers without an entry have
/// priority 0; ties keep pool order.
#[derive(Debug, Clone)]
pub struct PriorityBasedStrategy<N: ProviderName> {
    priorities: HashMap<N, i64>,
}

impl<N: ProviderName> PriorityBasedStrategy<N> {
    pub const NAME: &'static str = "priority_based";

    pub fn new(priorities: HashMap<N, i64>) -> Self {
        Self { priorities }
    }

    pub fn with_priority(mut self, name: N, priority: i64) -> Self {
        self.priorities.insert(name, priority);
        self
    }

    pub fn priority_of(&self, name: &N) -> i64 {
        self.priorities.get(name).copied().unwrap_or(0)
    }

    fn order(&self, pool: &ProviderPool<N>) -> Vec<N> {
        let mut names = pool.names();
        names.sort_by_key(|name| self.priority_of(name));
        names
    }
}

impl<N: ProviderName> FromIterator<(N, i64)> for PriorityBasedStrategy<N> {
    fn from_iter<T: IntoIterator<Item = (N, i64)>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[async_trait]
impl<N: ProviderName> DispatchStrategy<N> for PriorityBasedStrategy<N> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn completion(
        &self,
        pool: &ProviderPool<N>,
        request: &CompletionRequest,
        hooks: &DispatchHooks<N>,
    ) -> Result<Completion, RuntimeError> {
        complete_in_order(Self::NAME, pool, self.order(pool), request, hooks).await
    }
}
