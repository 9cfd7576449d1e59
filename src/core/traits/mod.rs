use async_trait::async_trait;

use crate::core::config::ProviderConfig;
use crate::core::error::ProviderError;
use crate::core::types::{Completion, CompletionOptions, CompletionRequest, ProviderName};

/// Capability contract every vendor adapter implements.
///
/// The manager and strategies depend on this trait only; they never inspect a
/// concrete adapter.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Performs the vendor handshake and prepares the client used by later
    /// calls. Failures are logged and reported as `false`.
    async fn authenticate(&self) -> bool;

    /// Lightweight liveness probe. Returns `false` on any error.
    async fn is_available(&self) -> bool;

    fn config(&self) -> &ProviderConfig;

    /// Executes one completion.
    ///
    /// Without a stream callback the result is a message. With one, fragments
    /// are pushed to the callback, the stream always ends with
    /// [`StreamChunk::Done`](crate::core::types::StreamChunk::Done) and the
    /// result is [`Completion::Streamed`].
    async fn completion(
        &self,
        request: &CompletionRequest,
        options: &CompletionOptions,
    ) -> Result<Completion, ProviderError>;
}

/// Invoked once per successful dispatch with the provider that produced the
/// result. This is where usage metering hooks in.
#[async_trait]
pub trait FinishHook<N: ProviderName>: Send + Sync {
    async fn on_finish(&self, name: &N, config: &ProviderConfig);
}
