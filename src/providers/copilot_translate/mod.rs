use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use uuid::Uuid;

use crate::core::error::ProviderError;
use crate::core::types::{ChatCompletionRequest, Message, MessageRole, ProviderId};
use crate::providers::translator_contract::{ProviderTranslator, WireRequest};
use crate::transport::http::header_value;

pub(crate) const COPILOT_USER_AGENT: &str = "GitHubCopilotChat/0.26.7";
pub(crate) const EDITOR_VERSION: &str = "vscode/1.99.3";
pub(crate) const EDITOR_PLUGIN_VERSION: &str = "copilot-chat/0.26.7";
const INTEGRATION_ID: &str = "vscode-chat";
const GITHUB_API_VERSION: &str = "2025-04-01";
const OPENAI_INTENT: &str = "conversation-panel";

const EVENT_STREAM: &str = "text/event-stream";
const APPLICATION_JSON: &str = "application/json";

pub(crate) const EDITOR_VERSION_HEADER: &str = "editor-version";
pub(crate) const EDITOR_PLUGIN_VERSION_HEADER: &str = "editor-plugin-version";
const INTEGRATION_ID_HEADER: &str = "copilot-integration-id";
const GITHUB_API_VERSION_HEADER: &str = "x-github-api-version";
pub(crate) const REQUEST_ID_HEADER: &str = "x-request-id";
const INITIATOR_HEADER: &str = "x-initiator";
const OPENAI_INTENT_HEADER: &str = "openai-intent";
const VISION_REQUEST_HEADER: &str = "copilot-vision-request";

/// Who drives the current turn, as reported in `X-Initiator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initiator {
    /// No assistant or tool turn yet.
    User,
    /// Follow-up turn inside an ongoing exchange.
    Agent,
}

impl Initiator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
        }
    }
}

/// Builds Copilot chat requests. `Content-Type` is left to the transport.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CopilotTranslator;

impl ProviderTranslator for CopilotTranslator {
    type WireBody = ChatCompletionRequest;

    fn build_wire_request(
        &self,
        req: &ChatCompletionRequest,
        access_token: &str,
    ) -> Result<WireRequest<Self::WireBody>, ProviderError> {
        let model = Some(req.model.as_str());
        let mut headers = identification_headers();

        headers.insert(
            AUTHORIZATION,
            header_value(
                &format!("Bearer {access_token}"),
                &ProviderId::Copilot,
                model,
            )?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(if req.stream {
                EVENT_STREAM
            } else {
                APPLICATION_JSON
            }),
        );
        headers.insert(
            HeaderName::from_static(REQUEST_ID_HEADER),
            header_value(&Uuid::new_v4().to_string(), &ProviderId::Copilot, model)?,
        );
        headers.insert(
            HeaderName::from_static(INITIATOR_HEADER),
            HeaderValue::from_static(initiator(&req.messages).as_str()),
        );
        headers.insert(
            HeaderName::from_static(OPENAI_INTENT_HEADER),
            HeaderValue::from_static(OPENAI_INTENT),
        );

        if has_image_content(&req.messages) {
            headers.insert(
                HeaderName::from_static(VISION_REQUEST_HEADER),
                HeaderValue::from_static("true"),
            );
        }

        Ok(WireRequest {
            headers,
            body: encode_copilot_request(req),
        })
    }
}

/// Static client identification for Copilot API calls.
pub(crate) fn identification_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(COPILOT_USER_AGENT));
    headers.insert(
        HeaderName::from_static(EDITOR_VERSION_HEADER),
        HeaderValue::from_static(EDITOR_VERSION),
    );
    headers.insert(
        HeaderName::from_static(EDITOR_PLUGIN_VERSION_HEADER),
        HeaderValue::from_static(EDITOR_PLUGIN_VERSION),
    );
    headers.insert(
        HeaderName::from_static(INTEGRATION_ID_HEADER),
        HeaderValue::from_static(INTEGRATION_ID),
    );
    headers.insert(
        HeaderName::from_static(GITHUB_API_VERSION_HEADER),
        HeaderValue::from_static(GITHUB_API_VERSION),
    );
    headers
}

/// Copy of `req` with system turns re-labelled as assistant turns; Copilot
/// rejects the system role. Every other field passes through.
pub(crate) fn encode_copilot_request(req: &ChatCompletionRequest) -> ChatCompletionRequest {
    let mut wire = req.clone();
    for message in &mut wire.messages {
        if message.role == MessageRole::System {
            message.role = MessageRole::Assistant;
        }
    }
    wire
}

pub fn initiator(messages: &[Message]) -> Initiator {
    let follow_up = messages
        .iter()
        .any(|message| matches!(message.role, MessageRole::Assistant | MessageRole::Tool));
    if follow_up {
        Initiator::Agent
    } else {
        Initiator::User
    }
}

pub fn has_image_content(messages: &[Message]) -> bool {
    messages.iter().any(Message::has_image)
}

#[cfg(test)]
mod tests;
