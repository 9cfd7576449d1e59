use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};

use crate::core::config::{ProviderConfig, VendorConfig, non_blank};
use crate::core::error::{ConfigError, ProviderError};
use crate::core::traits::Provider;
use crate::core::types::{
    Completion, CompletionOptions, CompletionRequest, Message, Role, StreamChunk,
};
use crate::providers::openai_compat::normalize_base_url;
use crate::providers::refresh::RefreshTask;
use crate::transport::http::{DEFAULT_TIMEOUT_MS, HttpTransport, RequestAuth};

const YANDEX_DEFAULT_BASE_URL: &str = "https://llm.api.cloud.yandex.net/foundationModels/v1";
const YANDEX_IAM_URL: &str = "https://iam.api.cloud.yandex.net/iam/v1/tokens";
const YANDEX_MODEL: &str = "yandexgpt/latest";
const FOLDER_HEADER: &str = "x-folder-id";
const JWT_LIFETIME_SECS: u64 = 3600;
const PEM_BEGIN: &str = "-----BEGIN";

pub const DEFAULT_IAM_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Service-account authorized key as issued by Yandex Cloud.
#[derive(Debug, Deserialize)]
struct AuthorizedKey {
    private_key: String,
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    aud: &'a str,
    iss: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Serialize)]
struct IamTokenRequest<'a> {
    jwt: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IamTokenResponse {
    iam_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionBody {
    model_uri: String,
    completion_options: CompletionSettings,
    messages: Vec<TextMessage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionSettings {
    stream: bool,
    temperature: f64,
    max_tokens: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TextMessage {
    role: Role,
    text: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    result: CompletionResult,
}

#[derive(Debug, Deserialize)]
struct CompletionResult {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    message: TextMessage,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenizeBody<'a> {
    model_uri: &'a str,
    text: &'a str,
}

/// YandexGPT adapter. A PS256-signed service-account JWT is exchanged for an
/// IAM token, which a background task owned by the provider renews hourly.
///
/// The foundation-models API answers in one piece; with a stream callback the
/// whole answer is delivered as a single fragment.
pub struct YandexGptProvider {
    session: Arc<IamSession>,
    config: ProviderConfig,
    base_url: String,
    model_uri: String,
    temperature: f64,
    refresh_interval: Duration,
    refresh: RefreshTask,
}

struct IamSession {
    label: String,
    transport: HttpTransport,
    iam_url: String,
    service_account_id: String,
    key_id: String,
    key_path: String,
    folder_id: String,
    iam_token: RwLock<Option<String>>,
}

impl IamSession {
    fn signed_jwt(&self) -> Result<String, ProviderError> {
        let rejected = |message: String| ProviderError::CredentialsRejected {
            provider: self.label.clone(),
            message,
        };

        let raw = std::fs::read_to_string(&self.key_path)
            .map_err(|err| rejected(format!("cannot read key file {}: {err}", self.key_path)))?;
        let key: AuthorizedKey = serde_json::from_str(&raw)
            .map_err(|err| rejected(format!("malformed key file {}: {err}", self.key_path)))?;
        // Issued keys carry a banner line ahead of the PEM block.
        let pem = key
            .private_key
            .find(PEM_BEGIN)
            .map(|start| &key.private_key[start..])
            .ok_or_else(|| rejected("key file holds no PEM private key".to_string()))?;
        let signing_key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|err| rejected(format!("invalid RSA private key: {err}")))?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        let claims = JwtClaims {
            aud: YANDEX_IAM_URL,
            iss: &self.service_account_id,
            iat: now,
            exp: now + JWT_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::PS256);
        header.kid = Some(self.key_id.clone());

        encode(&header, &claims, &signing_key)
            .map_err(|err| rejected(format!("failed to sign JWT: {err}")))
    }

    async fn refresh(&self) -> Result<(), ProviderError> {
        let jwt = self.signed_jwt()?;
        let token: IamTokenResponse = self
            .transport
            .post_json(
                &self.label,
                None,
                &self.iam_url,
                &IamTokenRequest { jwt: &jwt },
                &RequestAuth::default(),
            )
            .await?;

        if token.iam_token.trim().is_empty() {
            return Err(ProviderError::CredentialsRejected {
                provider: self.label.clone(),
                message: "IAM endpoint returned an empty token".to_string(),
            });
        }

        *self
            .iam_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token.iam_token);
        Ok(())
    }

    fn bearer(&self) -> Result<RequestAuth, ProviderError> {
        self.iam_token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|token| RequestAuth::bearer(token).with_header(FOLDER_HEADER, &self.folder_id))
            .ok_or_else(|| ProviderError::NotAuthenticated {
                provider: self.label.clone(),
            })
    }
}

impl YandexGptProvider {
    pub fn new(label: impl Into<String>, config: ProviderConfig) -> Result<Self, ConfigError> {
        let label = label.into();

        let VendorConfig::YandexGpt {
            identifier,
            open_key_identifier,
            certificate_path,
            folder_identifier,
            temperature,
            base_url,
            iam_url,
        } = &config.vendor
        else {
            return Err(ConfigError::invalid(
                label,
                format!("expected yandex_gpt vendor config, got {}", config.vendor.kind()),
            ));
        };

        let required = |value: &str, field: &str| {
            non_blank(value)
                .ok_or_else(|| ConfigError::invalid(label.clone(), format!("missing {field}")))
        };
        let service_account_id = required(identifier.as_str(), "identifier")?;
        let key_id = required(open_key_identifier.as_str(), "open_key_identifier")?;
        let key_path = required(certificate_path.as_str(), "certificate_path")?;
        let folder_id = required(folder_identifier.as_str(), "folder_identifier")?;
        if !(0.0..=1.0).contains(temperature) {
            return Err(ConfigError::invalid(
                label,
                format!("temperature {temperature} is outside 0..=1"),
            ));
        }

        let session = IamSession {
            transport: HttpTransport::new(DEFAULT_TIMEOUT_MS)?,
            iam_url: iam_url
                .as_deref()
                .and_then(non_blank)
                .unwrap_or_else(|| YANDEX_IAM_URL.to_string()),
            service_account_id,
            key_id,
            key_path,
            folder_id: folder_id.clone(),
            iam_token: RwLock::new(None),
            label,
        };

        Ok(Self {
            session: Arc::new(session),
            base_url: normalize_base_url(base_url.as_deref(), YANDEX_DEFAULT_BASE_URL),
            model_uri: format!("gpt://{folder_id}/{YANDEX_MODEL}"),
            temperature: *temperature,
            config,
            refresh_interval: DEFAULT_IAM_REFRESH_INTERVAL,
            refresh: RefreshTask::new(),
        })
    }

    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    pub fn model_uri(&self) -> &str {
        &self.model_uri
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

    async fn request_text(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let auth = self.session.bearer()?;
        let body = CompletionBody {
            model_uri: self.model_uri.clone(),
            completion_options: CompletionSettings {
                stream: false,
                temperature: self.temperature,
                max_tokens: self.config.max_tokens_count.to_string(),
            },
            messages: request
                .to_messages()
                .into_iter()
                .map(|message| TextMessage {
                    role: message.role,
                    text: message.content.text(),
                })
                .collect(),
        };

        let response: CompletionResponse = self
            .transport()
            .post_json(
                &self.session.label,
                Some(YANDEX_MODEL),
                &format!("{}/completion", self.base_url),
                &body,
                &auth,
            )
            .await?;

        response
            .result
            .alternatives
            .into_iter()
            .next()
            .map(|alternative| alternative.message.text)
            .ok_or_else(|| ProviderError::Protocol {
                provider: self.session.label.clone(),
                model: Some(YANDEX_MODEL.to_string()),
                message: "response contained no alternatives".to_string(),
            })
    }

    fn transport(&self) -> &HttpTransport {
        &self.session.transport
    }
}

#[async_trait]
impl Provider for YandexGptProvider {
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

        let url = format!("{}/tokenize", self.base_url);
        let body = TokenizeBody {
            model_uri: &self.model_uri,
            text: "ping",
        };
        match self
            .transport()
            .post_json::<_, Value>(&self.session.label, Some(YANDEX_MODEL), &url, &body, &auth)
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
        let text = self.request_text(request).await?;

        if options.is_streaming() {
            if options.abort_requested() {
                warn!(provider = %self.session.label, "stream aborted by caller");
            } else if !text.is_empty() {
                options.emit(StreamChunk::Delta(text));
            }
            options.emit(StreamChunk::Done);
            return Ok(Completion::Streamed);
        }

        Ok(if text.is_empty() {
            Completion::Empty
        } else {
            Completion::Message(Message::assistant(text))
        })
    }
}
