use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, warn};
use uuid::Uuid;

use crate::core::config::{ProviderConfig, VendorConfig, non_blank, resolve_credential};
use crate::core::error::{ConfigError, ProviderError};
use crate::core::traits::Provider;
use crate::core::types::{Completion, CompletionOptions, CompletionRequest};
use crate::providers::chat::ChatEndpoint;
use crate::providers::openai_compat::normalize_base_url;
use crate::providers::refresh::RefreshTask;
use crate::transport::http::{DEFAULT_TIMEOUT_MS, HttpTransport, RequestAuth};

const GIGACHAT_DEFAULT_BASE_URL: &str = "https://gigachat.devices.sberbank.ru/api/v1";
const GIGACHAT_DEFAULT_AUTH_URL: &str = "https://ngw.devices.sberbank.ru:9443/api/v2/oauth";
const GIGACHAT_DEFAULT_SCOPE: &str = "GIGACHAT_API_PERS";
const GIGACHAT_MODEL: &str = "GigaChat:latest";
const GIGACHAT_AUTH_DATA_ENV: &str = "GIGACHAT_AUTH_DATA";
const REQUEST_UID_HEADER: &str = "RqUID";

pub const DEFAULT_TOKEN_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// GigaChat adapter. Tokens come from an OAuth client-credentials exchange
/// and are refreshed by a background task owned by the provider.
pub struct GigaChatProvider {
    session: Arc<TokenSession>,
    config: ProviderConfig,
    refresh_interval: Duration,
    refresh: RefreshTask,
}

struct TokenSession {
    label: String,
    transport: HttpTransport,
    base_url: String,
    auth_url: String,
    auth_data: String,
    scope: String,
    access_token: RwLock<Option<String>>,
}

impl TokenSession {
    async fn refresh(&self) -> Result<(), ProviderError> {
        let auth = RequestAuth::basic(&self.auth_data)
            .with_header(REQUEST_UID_HEADER, Uuid::new_v4().to_string())
            .with_header("accept", "application/json");

        let token: TokenResponse = self
            .transport
            .post_form(
                &self.label,
                &self.auth_url,
                &[("scope", self.scope.as_str())],
                &auth,
            )
            .await?;

        if token.access_token.trim().is_empty() {
            return Err(ProviderError::CredentialsRejected {
                provider: self.label.clone(),
                message: "token endpoint returned an empty access token".to_string(),
            });
        }

        *self
            .access_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token.access_token);
        Ok(())
    }

    fn bearer(&self) -> Result<RequestAuth, ProviderError> {
        self.access_token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(RequestAuth::bearer)
            .ok_or_else(|| ProviderError::NotAuthenticated {
                provider: self.label.clone(),
            })
    }
}

impl GigaChatProvider {
    pub fn new(label: impl Into<String>, config: ProviderConfig) -> Result<Self, ConfigError> {
        let label = label.into();

        let VendorConfig::GigaChat {
            client_secret,
            auth_data,
            client_id,
            scope,
            base_url,
            auth_url,
        } = &config.vendor
        else {
            return Err(ConfigError::invalid(
                label,
                format!("expected giga_chat vendor config, got {}", config.vendor.kind()),
            ));
        };

        if non_blank(client_id).is_none() {
            return Err(ConfigError::invalid(label, "missing client_id"));
        }
        if non_blank(client_secret).is_none() {
            return Err(ConfigError::invalid(label, "missing client_secret"));
        }
        let auth_data = resolve_credential(auth_data, GIGACHAT_AUTH_DATA_ENV).ok_or_else(|| {
            ConfigError::invalid(
                label.clone(),
                format!("missing auth_data; set it in the config or the {GIGACHAT_AUTH_DATA_ENV} env var"),
            )
        })?;

        let session = TokenSession {
            transport: HttpTransport::new(DEFAULT_TIMEOUT_MS)?,
            base_url: normalize_base_url(base_url.as_deref(), GIGACHAT_DEFAULT_BASE_URL),
            auth_url: auth_url
                .as_deref()
                .and_then(non_blank)
                .unwrap_or_else(|| GIGACHAT_DEFAULT_AUTH_URL.to_string()),
            auth_data,
            scope: non_blank(scope).unwrap_or_else(|| GIGACHAT_DEFAULT_SCOPE.to_string()),
            access_token: RwLock::new(None),
            label,
        };

        Ok(Self {
            session: Arc::new(session),
            config,
            refresh_interval: DEFAULT_TOKEN_REFRESH_INTERVAL,
            refresh: RefreshTask::new(),
        })
    }

    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    pub fn refresh_scheduled(&self) -> bool {
        self.refresh.is_scheduled()
    }

    fn schedule_refresh(&self) {
        let session = Arc::clone(&self.session);
        self.refresh
            .schedule(&self.session.label, self.refresh_interval, move || {
                let session = Arc::clone(&session);
                async move { session.refresh().await }
            });
    }
}

#[async_trait]
impl Provider for GigaChatProvider {
    async fn authenticate(&self) -> bool {
        match self.session.refresh().await {
            Ok(()) => {
                self.schedule_refresh();
                true
            }
            Err(err) => {
                error!(provider = %self.session.label, error = %err, "authentication failed");
                false
            }
        }
    }

    async fn is_available(&self) -> bool {
        let Ok(auth) = self.session.bearer() else {
            return false;
        };

        let url = format!("{}/models", self.session.base_url);
        match self
            .session
            .transport
            .get_json::<Value>(&self.session.label, &url, &auth)
            .await
        {
            Ok(_) => true,
            Err(err) => {
                warn!(provider = %self.session.label, error = %err, "availability probe failed");
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
        let auth = self.session.bearer()?;

        ChatEndpoint {
            provider: &self.session.label,
            transport: &self.session.transport,
            url: format!("{}/chat/completions", self.session.base_url),
            model: GIGACHAT_MODEL,
            max_tokens: Some(self.config.max_tokens_count),
            auth,
        }
        .complete(request, options)
        .await
    }
}
