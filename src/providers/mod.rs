use std::sync::Arc;

use crate::core::config::{ProviderConfig, ProviderFactory, VendorConfig};
use crate::core::error::ConfigError;
use crate::core::traits::Provider;
use crate::core::types::ProviderName;

pub(crate) mod chat;
pub mod gigachat;
pub mod openai_compat;
pub(crate) mod refresh;
pub mod yandex_gpt;

pub use gigachat::GigaChatProvider;
pub use openai_compat::OpenAiCompatibleProvider;
pub use yandex_gpt::YandexGptProvider;

/// Factory dispatching on the config's vendor variant to the built-in adapters.
pub fn builtin_factory<N: ProviderName>() -> ProviderFactory<N> {
    Arc::new(|name: &N, config: ProviderConfig| build_builtin(&name.to_string(), config))
}

pub fn build_builtin(label: &str, config: ProviderConfig) -> Result<Arc<dyn Provider>, ConfigError> {
    match config.vendor {
        VendorConfig::OpenAi { .. } | VendorConfig::Grok { .. } => {
            Ok(Arc::new(OpenAiCompatibleProvider::new(label, config)?))
        }
        VendorConfig::GigaChat { .. } => Ok(Arc::new(GigaChatProvider::new(label, config)?)),
        VendorConfig::YandexGpt { .. } => Ok(Arc::new(YandexGptProvider::new(label, config)?)),
        VendorConfig::Custom => Err(ConfigError::invalid(
            label,
            format!(
                "no built-in adapter for vendor {}; supply a custom factory",
                config.vendor.kind()
            ),
        )),
    }
}
