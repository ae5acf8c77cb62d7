use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderValue};
use serde::Deserialize;

use crate::core::error::ProviderError;
use crate::core::traits::{ModelSource, TokenProvider};
use crate::core::types::{AdapterContext, ModelCatalog, ModelInfo, ProviderId};
use crate::providers::copilot_translate::identification_headers;
use crate::transport::http::{HttpTransport, header_value};

const CHAT_MODEL_TYPE: &str = "chat";
const DISABLED_POLICY: &str = "disabled";

#[derive(Debug, Deserialize)]
pub(crate) struct CopilotModelsResponse {
    #[serde(default)]
    pub data: Vec<CopilotModel>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CopilotModel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub capabilities: Option<CopilotCapabilities>,
    #[serde(default)]
    pub policy: Option<CopilotPolicy>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CopilotCapabilities {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub limits: CopilotLimits,
    #[serde(default)]
    pub supports: CopilotSupports,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CopilotLimits {
    #[serde(default)]
    pub max_context_window_tokens: Option<u32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CopilotSupports {
    #[serde(default)]
    pub tool_calls: Option<bool>,
    #[serde(default)]
    pub vision: Option<bool>,
    #[serde(default)]
    pub streaming: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CopilotPolicy {
    #[serde(default)]
    pub state: Option<String>,
}

/// Lists models from `GET {base}/models` with a Copilot bearer token.
pub struct CopilotModelSource {
    transport: HttpTransport,
    models_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl CopilotModelSource {
    pub fn new(
        transport: HttpTransport,
        base_url: &str,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            transport,
            models_url: format!("{}/models", base_url.trim_end_matches('/')),
            tokens,
        }
    }
}

#[async_trait]
impl ModelSource for CopilotModelSource {
    async fn fetch_models(&self, ctx: &AdapterContext) -> Result<Vec<ModelInfo>, ProviderError> {
        let token = self.tokens.access_token(ctx).await?;

        let mut headers = identification_headers();
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("Bearer {token}"), &ProviderId::Copilot, None)?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let response: CopilotModelsResponse = self
            .transport
            .get_json(ProviderId::Copilot, None, &self.models_url, headers, ctx)
            .await?;

        Ok(decode_copilot_models(response))
    }
}

/// Keeps chat models that are not disabled by policy.
pub(crate) fn decode_copilot_models(response: CopilotModelsResponse) -> Vec<ModelInfo> {
    response
        .data
        .into_iter()
        .filter(is_usable_chat_model)
        .map(|model| {
            let capabilities = model.capabilities.unwrap_or_default();
            ModelInfo {
                id: model.id,
                provider: ProviderId::Copilot,
                display_name: model.name,
                vendor: model.vendor,
                context_window: capabilities.limits.max_context_window_tokens,
                max_output_tokens: capabilities.limits.max_output_tokens,
                supports_tools: capabilities.supports.tool_calls.unwrap_or(false),
                supports_vision: capabilities.supports.vision.unwrap_or(false),
                supports_streaming: capabilities.supports.streaming.unwrap_or(true),
            }
        })
        .collect()
}

fn is_usable_chat_model(model: &CopilotModel) -> bool {
    let is_chat = model
        .capabilities
        .as_ref()
        .and_then(|capabilities| capabilities.kind.as_deref())
        == Some(CHAT_MODEL_TYPE);
    let disabled = model
        .policy
        .as_ref()
        .and_then(|policy| policy.state.as_deref())
        == Some(DISABLED_POLICY);

    !model.id.trim().is_empty() && is_chat && !disabled
}

/// Catalog served when the first upstream listing fails.
pub fn fallback_catalog() -> ModelCatalog {
    let builtin = [
        ("gpt-4.1", "GPT-4.1", "Azure OpenAI", true),
        ("gpt-4o", "GPT-4o", "Azure OpenAI", true),
        ("gpt-4o-mini", "GPT-4o mini", "Azure OpenAI", false),
        ("o3-mini", "o3-mini", "Azure OpenAI", false),
        ("claude-3.5-sonnet", "Claude Sonnet 3.5", "Anthropic", true),
        ("claude-sonnet-4", "Claude Sonnet 4", "Anthropic", true),
        ("gemini-2.0-flash-001", "Gemini 2.0 Flash", "Google", true),
    ];

    ModelCatalog {
        models: builtin
            .into_iter()
            .map(|(id, name, vendor, vision)| ModelInfo {
                id: id.to_string(),
                provider: ProviderId::Copilot,
                display_name: Some(name.to_string()),
                vendor: Some(vendor.to_string()),
                context_window: None,
                max_output_tokens: None,
                supports_tools: true,
                supports_vision: vision,
                supports_streaming: true,
            })
            .collect(),
    }
}
