//! Dispatch policies deciding which pool members receive a request.
//!
//! Each call is an independent run; the only state a strategy keeps is its
//! fixed policy data (a primary provider, a priority table). Sequential
//! strategies never start attempt N+1 before attempt N has settled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::core::error::RuntimeError;
use crate::core::traits::Provider;
use crate::core::types::{
    Completion, CompletionOptions, CompletionRequest, DispatchHooks, ProviderName, StreamCallback,
    StreamChunk,
};
use crate::pool::ProviderPool;

mod parallel;
mod sequential;

pub use parallel::ParallelRaceStrategy;
pub use sequential::{FallbackStrategy, FirstSuccessStrategy, PriorityBasedStrategy};

#[async_trait]
pub trait DispatchStrategy<N: ProviderName>: Send + Sync {
    fn name(&self) -> &'static str;

    /// Performs one logical completion against `pool`.
    ///
    /// Returns the first usable completion, or
    /// [`RuntimeError::AllProvidersFailed`] once every candidate is exhausted.
    async fn completion(
        &self,
        pool: &ProviderPool<N>,
        request: &CompletionRequest,
        hooks: &DispatchHooks<N>,
    ) -> Result<Completion, RuntimeError>;
}

/// Tries `order` one provider at a time and stops at the first usable result.
pub(crate) async fn complete_in_order<N: ProviderName>(
    strategy: &'static str,
    pool: &ProviderPool<N>,
    order: Vec<N>,
    request: &CompletionRequest,
    hooks: &DispatchHooks<N>,
) -> Result<Completion, RuntimeError> {
    let streaming = hooks.options.is_streaming();
    let attempted = order.len();

    for name in order {
        let provider = match pool.get(&name) {
            Ok(provider) => provider,
            Err(error) => {
                warn!(provider = %name, strategy, error = %error, "provider skipped");
                continue;
            }
        };

        let attempt = AttemptStream::new(&hooks.options);
        let outcome = provider.completion(request, attempt.options()).await;

        match outcome {
            Ok(completion) if completion.is_usable(streaming) => {
                debug!(provider = %name, strategy, "provider produced completion");
                hooks.options.emit(StreamChunk::Done);
                notify_finish(hooks, &name, provider.as_ref()).await;
                return Ok(completion);
            }
            // Fragments already reached the caller; another provider would
            // splice a second answer onto them.
            outcome if attempt.opened() => {
                let reason = match outcome {
                    Ok(_) => "stream ended without a usable result".to_string(),
                    Err(error) => error.to_string(),
                };
                warn!(provider = %name, strategy, reason = %reason, "stream interrupted");
                hooks.options.emit(StreamChunk::Done);
                return Err(RuntimeError::StreamInterrupted {
                    strategy,
                    provider: name.to_string(),
                    reason,
                });
            }
            Ok(_) => {
                warn!(provider = %name, strategy, "provider returned empty completion");
            }
            Err(error) => {
                warn!(provider = %name, strategy, error = %error, "provider failed");
            }
        }
    }

    warn!(strategy, attempted, "all providers failed to generate text");
    Err(RuntimeError::all_failed(strategy, attempted))
}

/// One attempt's view of the caller's stream callback.
///
/// Fragments pass through; the provider's own `Done` is held back so the
/// dispatch emits the single terminating marker once it has settled.
pub(crate) struct AttemptStream {
    opened: Arc<AtomicBool>,
    options: CompletionOptions,
}

impl AttemptStream {
    pub(crate) fn new(caller: &CompletionOptions) -> Self {
        let opened = Arc::new(AtomicBool::new(false));
        let on_stream = caller.on_stream.as_ref().map(|forward| {
            let forward = Arc::clone(forward);
            let opened = Arc::clone(&opened);
            Arc::new(move |chunk: StreamChunk| {
                if chunk.is_done() {
                    return;
                }
                opened.store(true, Ordering::SeqCst);
                forward(chunk);
            }) as StreamCallback
        });

        Self {
            opened,
            options: CompletionOptions {
                on_stream,
                should_abort: caller.should_abort.clone(),
            },
        }
    }

    pub(crate) fn options(&self) -> &CompletionOptions {
        &self.options
    }

    /// Whether any fragment reached the caller during this attempt.
    pub(crate) fn opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }
}

pub(crate) async fn notify_finish<N: ProviderName>(
    hooks: &DispatchHooks<N>,
    name: &N,
    provider: &dyn Provider,
) {
    if let Some(on_finish) = &hooks.on_finish {
        on_finish.on_finish(name, provider.config()).await;
    }
}
