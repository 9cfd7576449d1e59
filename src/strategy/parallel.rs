use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tracing::{debug, warn};

use super::{AttemptStream, DispatchStrategy, notify_finish};
use crate::core::error::RuntimeError;
use crate::core::types::{Completion, CompletionRequest, DispatchHooks, ProviderName, StreamChunk};
use crate::pool::ProviderPool;

/// Starts every pool member at once and keeps the first usable result.
///
/// Attempts are multiplexed on the calling task rather than spawned. Once a
/// winner settles the remaining attempts are dropped, which cancels their
/// in-flight requests. Every attempt streams into the caller's callback, which
/// receives a single `Done` when the race settles.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelRaceStrategy;

impl ParallelRaceStrategy {
    pub const NAME: &'static str = "parallel_race";

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<N: ProviderName> DispatchStrategy<N> for ParallelRaceStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn completion(
        &self,
        pool: &ProviderPool<N>,
        request: &CompletionRequest,
        hooks: &DispatchHooks<N>,
    ) -> Result<Completion, RuntimeError> {
        let streaming = hooks.options.is_streaming();
        let options = &hooks.options;

        let mut attempts = pool
            .in_order()
            .into_iter()
            .map(|(name, provider)| async move {
                let attempt = AttemptStream::new(options);
                let result = provider.completion(request, attempt.options()).await;
                (name, provider, result, attempt.opened())
            })
            .collect::<FuturesUnordered<_>>();
        let attempted = attempts.len();
        let mut opened = false;
        let mut winner = None;

        while let Some((name, provider, result, attempt_opened)) = attempts.next().await {
            opened |= attempt_opened;

            match result {
                Ok(completion) if completion.is_usable(streaming) => {
                    winner = Some((name, provider, completion));
                    break;
                }
                Ok(_) => {
                    warn!(
                        provider = %name,
                        strategy = Self::NAME,
                        "provider returned empty completion"
                    );
                }
                Err(error) => {
                    warn!(provider = %name, strategy = Self::NAME, error = %error, "provider failed");
                }
            }
        }

        drop(attempts);

        if winner.is_some() || opened {
            options.emit(StreamChunk::Done);
        }
        if let Some((name, provider, completion)) = winner {
            debug!(provider = %name, strategy = Self::NAME, "provider won race");
            notify_finish(hooks, &name, provider.as_ref()).await;
            return Ok(completion);
        }

        warn!(
            strategy = Self::NAME,
            attempted, "all providers failed to generate text"
        );
        Err(RuntimeError::all_failed(Self::NAME, attempted))
    }
}
