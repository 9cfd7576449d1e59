use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::error::{ConfigError, ProviderError};

pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Per-request authentication and extra headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestAuth {
    pub authorization: Option<Authorization>,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Bearer(String),
    Basic(String),
}

impl RequestAuth {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            authorization: Some(Authorization::Bearer(token.into())),
            headers: Vec::new(),
        }
    }

    pub fn basic(credentials: impl Into<String>) -> Self {
        Self {
            authorization: Some(Authorization::Basic(credentials.into())),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Thin reqwest wrapper shared by the vendor adapters. One attempt per call;
/// non-2xx statuses become [`ProviderError::Status`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout_ms: u64,
}

impl HttpTransport {
    pub fn new(timeout_ms: u64) -> Result<Self, ConfigError> {
        Self::with_client(reqwest::Client::new(), timeout_ms)
    }

    pub fn with_client(client: reqwest::Client, timeout_ms: u64) -> Result<Self, ConfigError> {
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout { timeout_ms });
        }

        Ok(Self { client, timeout_ms })
    }

    pub async fn get_json<TResp>(
        &self,
        provider: &str,
        url: &str,
        auth: &RequestAuth,
    ) -> Result<TResp, ProviderError>
    where
        TResp: DeserializeOwned,
    {
        let builder = self.request(provider, None, Method::GET, url, auth)?;
        let response = self.send(provider, None, builder).await?;
        decode_json(provider, None, response).await
    }

    pub async fn post_json<TReq, TResp>(
        &self,
        provider: &str,
        model: Option<&str>,
        url: &str,
        body: &TReq,
        auth: &RequestAuth,
    ) -> Result<TResp, ProviderError>
    where
        TReq: Serialize + ?Sized,
        TResp: DeserializeOwned,
    {
        let builder = self.json_request(provider, model, url, body, auth)?;
        let response = self.send(provider, model, builder).await?;
        decode_json(provider, model, response).await
    }

    /// Posts an `application/x-www-form-urlencoded` body.
    pub async fn post_form<TResp>(
        &self,
        provider: &str,
        url: &str,
        fields: &[(&str, &str)],
        auth: &RequestAuth,
    ) -> Result<TResp, ProviderError>
    where
        TResp: DeserializeOwned,
    {
        let builder = self
            .request(provider, None, Method::POST, url, auth)?
            .form(fields);
        let response = self.send(provider, None, builder).await?;
        decode_json(provider, None, response).await
    }

    /// Posts a JSON body and returns the raw, status-checked response for
    /// incremental consumption.
    pub async fn post_stream<TReq>(
        &self,
        provider: &str,
        model: Option<&str>,
        url: &str,
        body: &TReq,
        auth: &RequestAuth,
    ) -> Result<Response, ProviderError>
    where
        TReq: Serialize + ?Sized,
    {
        let builder = self
            .json_request(provider, model, url, body, auth)?
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"));
        self.send(provider, model, builder).await
    }

    fn json_request<TReq>(
        &self,
        provider: &str,
        model: Option<&str>,
        url: &str,
        body: &TReq,
        auth: &RequestAuth,
    ) -> Result<RequestBuilder, ProviderError>
    where
        TReq: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(body).map_err(|error| ProviderError::Serialization {
            provider: provider.to_string(),
            model: model.map(str::to_string),
            message: error.to_string(),
        })?;

        Ok(self
            .request(provider, model, Method::POST, url, auth)?
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(payload))
    }

    fn request(
        &self,
        provider: &str,
        model: Option<&str>,
        method: Method,
        url: &str,
        auth: &RequestAuth,
    ) -> Result<RequestBuilder, ProviderError> {
        let headers = build_headers(provider, model, auth)?;

        Ok(self
            .client
            .request(method, url)
            .timeout(Duration::from_millis(self.timeout_ms))
            .headers(headers))
    }

    async fn send(
        &self,
        provider: &str,
        model: Option<&str>,
        builder: RequestBuilder,
    ) -> Result<Response, ProviderError> {
        let response = builder
            .send()
            .await
            .map_err(|error| ProviderError::Transport {
                provider: provider.to_string(),
                message: error.to_string(),
            })?;

        let status_code = response.status().as_u16();
        if response.status().is_success() {
            return Ok(response);
        }

        let message = match response.text().await {
            Ok(body) if !body.trim().is_empty() => body,
            Ok(_) => format!("http status {status_code}"),
            Err(error) => {
                format!("http status {status_code}; failed to read response body: {error}")
            }
        };

        if status_code == 401 || status_code == 403 {
            return Err(ProviderError::CredentialsRejected {
                provider: provider.to_string(),
                message,
            });
        }

        Err(ProviderError::Status {
            provider: provider.to_string(),
            model: model.map(str::to_string),
            status_code,
            message,
        })
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

async fn decode_json<TResp>(
    provider: &str,
    model: Option<&str>,
    response: Response,
) -> Result<TResp, ProviderError>
where
    TResp: DeserializeOwned,
{
    response
        .json::<TResp>()
        .await
        .map_err(|error| ProviderError::Serialization {
            provider: provider.to_string(),
            model: model.map(str::to_string),
            message: error.to_string(),
        })
}

fn build_headers(
    provider: &str,
    model: Option<&str>,
    auth: &RequestAuth,
) -> Result<HeaderMap, ProviderError> {
    let invalid = |message: String| ProviderError::Protocol {
        provider: provider.to_string(),
        model: model.map(str::to_string),
        message,
    };

    let mut headers = HeaderMap::new();
    if let Some(authorization) = &auth.authorization {
        let rendered = match authorization {
            Authorization::Bearer(token) => format!("Bearer {token}"),
            Authorization::Basic(credentials) => format!("Basic {credentials}"),
        };
        let value = HeaderValue::from_str(&rendered)
            .map_err(|error| invalid(format!("invalid authorization header value: {error}")))?;
        headers.insert(AUTHORIZATION, value);
    }

    for (name, value) in &auth.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|error| invalid(format!("invalid header name: {name}: {error}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|error| invalid(format!("invalid header value for {name}: {error}")))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}
