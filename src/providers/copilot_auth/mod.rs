use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::auth::{CachedToken, TokenExchanger};
use crate::core::error::ProviderError;
use crate::core::types::{AdapterContext, CredentialRecord, ProviderId};
use crate::providers::copilot_translate::{
    COPILOT_USER_AGENT, EDITOR_PLUGIN_VERSION, EDITOR_PLUGIN_VERSION_HEADER, EDITOR_VERSION,
    EDITOR_VERSION_HEADER,
};
use crate::transport::http::{HttpTransport, header_value};

pub(crate) const LOGIN_HINT: &str =
    "no GitHub token found; sign in to Copilot to store one for provider copilot";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
    /// Epoch seconds.
    #[serde(default)]
    expires_at: i64,
}

/// Trades the stored GitHub OAuth token for a Copilot API token.
#[derive(Debug, Clone)]
pub struct CopilotTokenExchanger {
    transport: HttpTransport,
    token_url: String,
}

impl CopilotTokenExchanger {
    pub fn new(transport: HttpTransport, token_url: impl Into<String>) -> Self {
        Self {
            transport,
            token_url: token_url.into(),
        }
    }

    fn exchange_headers(&self, github_token: &str) -> Result<HeaderMap, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("token {github_token}"), &ProviderId::Copilot, None)?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(COPILOT_USER_AGENT));
        headers.insert(
            HeaderName::from_static(EDITOR_VERSION_HEADER),
            HeaderValue::from_static(EDITOR_VERSION),
        );
        headers.insert(
            HeaderName::from_static(EDITOR_PLUGIN_VERSION_HEADER),
            HeaderValue::from_static(EDITOR_PLUGIN_VERSION),
        );
        Ok(headers)
    }
}

#[async_trait]
impl TokenExchanger for CopilotTokenExchanger {
    async fn exchange(
        &self,
        credential: &CredentialRecord,
        ctx: &AdapterContext,
    ) -> Result<CachedToken, ProviderError> {
        let github_token = github_token(credential)?;
        let headers = self.exchange_headers(github_token)?;

        let response: TokenResponse = self
            .transport
            .get_json(ProviderId::Copilot, None, &self.token_url, headers, ctx)
            .await
            .map_err(exchange_error)?;

        if response.token.trim().is_empty() {
            return Err(ProviderError::CredentialExchange {
                provider: ProviderId::Copilot,
                status_code: None,
                message: "token endpoint returned an empty token".to_string(),
            });
        }

        Ok(CachedToken::from_epoch_seconds(
            response.token,
            response.expires_at,
        ))
    }
}

/// The long-lived GitHub token lives in the record's refresh slot.
fn github_token(credential: &CredentialRecord) -> Result<&str, ProviderError> {
    credential
        .refresh_token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ProviderError::CredentialMissing {
            provider: ProviderId::Copilot,
            message: LOGIN_HINT.to_string(),
        })
}

fn exchange_error(error: ProviderError) -> ProviderError {
    match error {
        ProviderError::Upstream { error, .. } => ProviderError::CredentialExchange {
            provider: ProviderId::Copilot,
            status_code: Some(error.status_code),
            message: error.message,
        },
        ProviderError::Decode { message, .. } => ProviderError::CredentialExchange {
            provider: ProviderId::Copilot,
            status_code: None,
            message: format!("invalid token response: {message}"),
        },
        ProviderError::Transport { message, .. } => ProviderError::CredentialExchange {
            provider: ProviderId::Copilot,
            status_code: None,
            message: format!("token endpoint unreachable: {message}"),
        },
        other => other,
    }
}
