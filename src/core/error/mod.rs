use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid provider config for {provider}: {reason}")]
    InvalidProviderConfig { provider: String, reason: String },
    #[error("invalid timeout: {timeout_ms} ms")]
    InvalidTimeout { timeout_ms: u64 },
}

impl ConfigError {
    pub(crate) fn invalid(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProviderConfig {
            provider: provider.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("provider not found: {provider}")]
    ProviderNotFound { provider: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("provider not authenticated [provider={provider}]: call authenticate() first")]
    NotAuthenticated { provider: String },
    #[error(
        "provider credentials rejected{context}: {message}",
        context = format_context(Some(.provider), None, None)
    )]
    CredentialsRejected { provider: String, message: String },
    #[error(
        "provider transport error{context}: {message}",
        context = format_context(Some(.provider), None, None)
    )]
    Transport { provider: String, message: String },
    #[error(
        "provider status error{context}: {message}",
        context = format_context(Some(.provider), .model.as_deref(), Some(*.status_code))
    )]
    Status {
        provider: String,
        model: Option<String>,
        status_code: u16,
        message: String,
    },
    #[error(
        "provider protocol error{context}: {message}",
        context = format_context(Some(.provider), .model.as_deref(), None)
    )]
    Protocol {
        provider: String,
        model: Option<String>,
        message: String,
    },
    #[error(
        "provider serialization error{context}: {message}",
        context = format_context(Some(.provider), .model.as_deref(), None)
    )]
    Serialization {
        provider: String,
        model: Option<String>,
        message: String,
    },
}

impl ProviderError {
    pub fn provider(&self) -> &str {
        match self {
            Self::NotAuthenticated { provider }
            | Self::CredentialsRejected { provider, .. }
            | Self::Transport { provider, .. }
            | Self::Status { provider, .. }
            | Self::Protocol { provider, .. }
            | Self::Serialization { provider, .. } => provider,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    ConfigError(#[from] ConfigError),
    #[error(transparent)]
    RoutingError(#[from] RoutingError),
    /// Every candidate was exhausted. Per-attempt causes are only logged.
    #[error("all providers failed to generate text [strategy={strategy}, attempted={attempted}]")]
    AllProvidersFailed {
        strategy: &'static str,
        attempted: usize,
    },
    /// A provider failed after its fragments had already reached the stream
    /// callback. The dispatch stops instead of trying another provider.
    #[error("stream interrupted [strategy={strategy}, provider={provider}]: {reason}")]
    StreamInterrupted {
        strategy: &'static str,
        provider: String,
        reason: String,
    },
    #[error("initialization failed for provider {provider}: {source}")]
    InitializationFailed {
        provider: String,
        #[source]
        source: ConfigError,
    },
}

impl RuntimeError {
    pub fn all_failed(strategy: &'static str, attempted: usize) -> Self {
        Self::AllProvidersFailed {
            strategy,
            attempted,
        }
    }

    pub fn is_all_providers_failed(&self) -> bool {
        matches!(self, Self::AllProvidersFailed { .. })
    }
}

fn format_context(
    provider: Option<&String>,
    model: Option<&str>,
    status_code: Option<u16>,
) -> String {
    let mut context = Vec::new();

    if let Some(provider) = provider {
        context.push(format!("provider={provider}"));
    }
    if let Some(model) = model {
        context.push(format!("model={model}"));
    }
    if let Some(status_code) = status_code {
        context.push(format!("status_code={status_code}"));
    }

    if context.is_empty() {
        String::new()
    } else {
        format!(" [{}]", context.join(", "))
    }
}
