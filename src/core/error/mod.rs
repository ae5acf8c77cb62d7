use std::fmt;

use crate::core::types::ProviderId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid provider config for {provider}: {reason}")]
    InvalidProviderConfig {
        provider: ProviderId,
        reason: String,
    },
    #[error("invalid timeout: {timeout_ms} ms")]
    InvalidTimeout { timeout_ms: u64 },
    #[error("invalid retry policy: {reason}")]
    InvalidRetryPolicy { reason: String },
    #[error("invalid refresh interval: {reason}")]
    InvalidRefreshInterval { reason: String },
}

/// Normalized failure body from an upstream endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    pub status_code: u16,
    pub message: String,
    pub hint: Option<String>,
}

impl UpstreamError {
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
            hint: None,
        }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hint {
            Some(hint) => write!(f, "{}\n\n{}", self.message, hint),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for UpstreamError {}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error(
        "credential missing{context}: {message}",
        context = format_context(Some(.provider), None, None, None)
    )]
    CredentialMissing {
        provider: ProviderId,
        message: String,
    },
    #[error(
        "credential exchange failed{context}: {message}",
        context = format_context(Some(.provider), None, None, *.status_code)
    )]
    CredentialExchange {
        provider: ProviderId,
        status_code: Option<u16>,
        message: String,
    },
    #[error(
        "upstream error{context}: {error}",
        context = format_context(
            Some(.provider),
            .model.as_deref(),
            .request_id.as_deref(),
            Some(.error.status_code)
        )
    )]
    Upstream {
        provider: ProviderId,
        model: Option<String>,
        request_id: Option<String>,
        error: UpstreamError,
    },
    #[error(
        "provider transport error{context}: {message}",
        context = format_context(Some(.provider), None, .request_id.as_deref(), None)
    )]
    Transport {
        provider: ProviderId,
        request_id: Option<String>,
        message: String,
    },
    #[error(
        "request cancelled{context}",
        context = format_context(Some(.provider), None, None, None)
    )]
    Cancelled { provider: ProviderId },
    #[error(
        "provider decode error{context}: {message}",
        context = format_context(
            Some(.provider),
            .model.as_deref(),
            .request_id.as_deref(),
            None
        )
    )]
    Decode {
        provider: ProviderId,
        model: Option<String>,
        request_id: Option<String>,
        message: String,
    },
    #[error(
        "provider protocol error{context}: {message}",
        context = format_context(
            Some(.provider),
            .model.as_deref(),
            .request_id.as_deref(),
            None
        )
    )]
    Protocol {
        provider: ProviderId,
        model: Option<String>,
        request_id: Option<String>,
        message: String,
    },
    #[error(
        "provider serialization error{context}: {message}",
        context = format_context(Some(.provider), .model.as_deref(), None, None)
    )]
    Serialization {
        provider: ProviderId,
        model: Option<String>,
        message: String,
    },
}

impl ProviderError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Upstream { error, .. } => Some(error.status_code),
            Self::CredentialExchange { status_code, .. } => *status_code,
            _ => None,
        }
    }

    pub fn upstream(&self) -> Option<&UpstreamError> {
        match self {
            Self::Upstream { error, .. } => Some(error),
            _ => None,
        }
    }
}

fn format_context(
    provider: Option<&ProviderId>,
    model: Option<&str>,
    request_id: Option<&str>,
    status_code: Option<u16>,
) -> String {
    let mut context = Vec::new();

    if let Some(provider) = provider {
        context.push(format!("provider={provider}"));
    }
    if let Some(model) = model {
        context.push(format!("model={model}"));
    }
    if let Some(request_id) = request_id {
        context.push(format!("request_id={request_id}"));
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
