use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::error::ConfigError;
use crate::core::traits::Provider;
use crate::core::types::ProviderName;

/// Immutable record a provider is constructed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub max_tokens_count: u32,
    pub transformer_value: f64,
    pub generate_attempts_count: u32,
    pub vendor: VendorConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, vendor: VendorConfig) -> Self {
        Self {
            id: id.into(),
            max_tokens_count: 1_024,
            transformer_value: 1.0,
            generate_attempts_count: 1,
            vendor,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens_count: u32) -> Self {
        self.max_tokens_count = max_tokens_count;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Vendor-specific settings. Adapters narrow this with a `match` at
/// construction and reject the wrong variant before any I/O happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "vendor", rename_all = "snake_case")]
pub enum VendorConfig {
    OpenAi {
        api_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
    },
    Grok {
        api_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
    },
    GigaChat {
        client_secret: String,
        auth_data: String,
        client_id: String,
        scope: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth_url: Option<String>,
    },
    YandexGpt {
        identifier: String,
        open_key_identifier: String,
        certificate_path: String,
        folder_identifier: String,
        temperature: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        iam_url: Option<String>,
    },
    Custom,
}

impl VendorConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OpenAi { .. } => "open_ai",
            Self::Grok { .. } => "grok",
            Self::GigaChat { .. } => "giga_chat",
            Self::YandexGpt { .. } => "yandex_gpt",
            Self::Custom => "custom",
        }
    }
}

/// Constructs a provider for one pool slot.
pub type ProviderFactory<N> =
    Arc<dyn Fn(&N, ProviderConfig) -> Result<Arc<dyn Provider>, ConfigError> + Send + Sync>;

/// A provider config paired with the constructor that turns it into a provider.
pub struct ProviderSetup<N: ProviderName> {
    pub config: ProviderConfig,
    pub factory: ProviderFactory<N>,
}

impl<N: ProviderName> ProviderSetup<N> {
    /// Uses the built-in adapter selected by the config's vendor variant.
    pub fn builtin(config: ProviderConfig) -> Self {
        Self {
            config,
            factory: crate::providers::builtin_factory(),
        }
    }

    pub fn with_factory(config: ProviderConfig, factory: ProviderFactory<N>) -> Self {
        Self { config, factory }
    }

    pub fn build(&self, name: &N) -> Result<Arc<dyn Provider>, ConfigError> {
        (self.factory)(name, self.config.clone())
    }
}

impl<N: ProviderName> Clone for ProviderSetup<N> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<N: ProviderName> fmt::Debug for ProviderSetup<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSetup")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Returns the trimmed value, or `None` when blank.
pub(crate) fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Resolves a credential from the config, falling back to an environment variable.
pub(crate) fn resolve_credential(configured: &str, env_var: &str) -> Option<String> {
    non_blank(configured).or_else(|| {
        std::env::var(env_var)
            .ok()
            .and_then(|value| non_blank(&value))
    })
}
