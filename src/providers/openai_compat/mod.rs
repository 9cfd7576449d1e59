use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, warn};

use crate::core::config::{ProviderConfig, VendorConfig, non_blank, resolve_credential};
use crate::core::error::{ConfigError, ProviderError};
use crate::core::traits::Provider;
use crate::core::types::{Completion, CompletionOptions, CompletionRequest};
use crate::providers::chat::ChatEndpoint;
use crate::transport::http::{DEFAULT_TIMEOUT_MS, HttpTransport, RequestAuth};

const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_DEFAULT_MODEL: &str = "gpt-4o";
const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

const GROK_DEFAULT_BASE_URL: &str = "https://api.x.ai/v1";
const GROK_DEFAULT_MODEL: &str = "grok-2-latest";
const XAI_API_KEY_ENV: &str = "XAI_API_KEY";

/// Adapter for vendors speaking the OpenAI chat-completions dialect with a
/// static API key (OpenAI and Grok).
pub struct OpenAiCompatibleProvider {
    label: String,
    config: ProviderConfig,
    transport: HttpTransport,
    base_url: String,
    model: String,
    api_key: String,
    session: RwLock<Option<RequestAuth>>,
}

impl OpenAiCompatibleProvider {
    pub fn new(label: impl Into<String>, config: ProviderConfig) -> Result<Self, ConfigError> {
        let label = label.into();

        let (api_key, model, base_url, defaults) = match &config.vendor {
            VendorConfig::OpenAi {
                api_key,
                model,
                base_url,
            } => (
                api_key,
                model,
                base_url,
                (OPENAI_API_KEY_ENV, OPENAI_DEFAULT_MODEL, OPENAI_DEFAULT_BASE_URL),
            ),
            VendorConfig::Grok {
                api_key,
                model,
                base_url,
            } => (
                api_key,
                model,
                base_url,
                (XAI_API_KEY_ENV, GROK_DEFAULT_MODEL, GROK_DEFAULT_BASE_URL),
            ),
            other => {
                return Err(ConfigError::invalid(
                    label,
                    format!(
                        "vendor {} is not OpenAI-compatible; expected open_ai or grok",
                        other.kind()
                    ),
                ));
            }
        };
        let (key_env, default_model, default_base_url) = defaults;

        let api_key = resolve_credential(api_key, key_env).ok_or_else(|| {
            ConfigError::invalid(
                label.clone(),
                format!("missing api_key; set it in the config or the {key_env} env var"),
            )
        })?;
        let model = model
            .as_deref()
            .and_then(non_blank)
            .unwrap_or_else(|| default_model.to_string());
        let base_url = normalize_base_url(base_url.as_deref(), default_base_url);

        Ok(Self {
            label,
            transport: HttpTransport::new(DEFAULT_TIMEOUT_MS)?,
            config,
            base_url,
            model,
            api_key,
            session: RwLock::new(None),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn session(&self) -> Option<RequestAuth> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn probe_models(&self, auth: &RequestAuth) -> Result<(), ProviderError> {
        let url = format!("{}/models", self.base_url);
        let body: Value = self.transport.get_json(&self.label, &url, auth).await?;
        if body.get("object").is_some() {
            Ok(())
        } else {
            Err(ProviderError::Protocol {
                provider: self.label.clone(),
                model: None,
                message: "model listing response missing `object`".to_string(),
            })
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    async fn authenticate(&self) -> bool {
        let auth = RequestAuth::bearer(&self.api_key);
        *self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(auth.clone());

        match self.probe_models(&auth).await {
            Ok(()) => true,
            Err(err) => {
                error!(provider = %self.label, error = %err, "authentication failed");
                false
            }
        }
    }

    async fn is_available(&self) -> bool {
        let Some(auth) = self.session() else {
            return false;
        };

        match self.probe_models(&auth).await {
            Ok(()) => true,
            Err(err) => {
                warn!(provider = %self.label, error = %err, "availability probe failed");
                false
            }
        }
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn completion(
        &self,
        request: &CompletionRequest,
        options: &CompletionOptions,
    ) -> Result<Completion, ProviderError> {
        let auth = self.session().ok_or_else(|| ProviderError::NotAuthenticated {
            provider: self.label.clone(),
        })?;

        ChatEndpoint {
            provider: &self.label,
            transport: &self.transport,
            url: format!("{}/chat/completions", self.base_url),
            model: &self.model,
            max_tokens: Some(self.config.max_tokens_count),
            auth,
        }
        .complete(request, options)
        .await
    }
}

pub(crate) fn normalize_base_url(base_url: Option<&str>, default: &str) -> String {
    base_url
        .and_then(non_blank)
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}
