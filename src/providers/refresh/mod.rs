use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::error::ProviderError;

/// Background credential refresh owned by one provider.
///
/// At most one refresh loop is outstanding: scheduling again aborts the
/// previous loop, and dropping the owner aborts the current one.
#[derive(Debug, Default)]
pub(crate) struct RefreshTask {
    slot: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F, Fut>(&self, provider: &str, interval: Duration, refresh: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ProviderError>> + Send + 'static,
    {
        let label = provider.to_string();
        let mut slot = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match refresh().await {
                    Ok(()) => debug!(provider = %label, "access token refreshed"),
                    Err(err) => {
                        warn!(provider = %label, error = %err, "access token refresh failed")
                    }
                }
            }
        }));
        debug!(provider, ?interval, "token refresh scheduled");
    }

    pub fn is_scheduled(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        if let Some(task) = self
            .slot
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            task.abort();
        }
    }
}
