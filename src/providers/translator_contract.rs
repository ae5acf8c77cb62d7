use reqwest::header::HeaderMap;
use serde::Serialize;

use crate::core::error::ProviderError;
use crate::core::types::ChatCompletionRequest;

/// Headers plus JSON body for one upstream chat call.
#[derive(Debug, Clone)]
pub(crate) struct WireRequest<B> {
    pub headers: HeaderMap,
    pub body: B,
}

/// Internal provider-layer translation contract.
///
/// `ProviderAdapter` is the caller-facing extension point. This contract is
/// crate-private and used by provider modules to turn the canonical request
/// into the upstream's wire request. Implementations perform no I/O.
pub(crate) trait ProviderTranslator {
    /// Upstream JSON payload.
    type WireBody: Serialize;

    fn build_wire_request(
        &self,
        req: &ChatCompletionRequest,
        access_token: &str,
    ) -> Result<WireRequest<Self::WireBody>, ProviderError>;
}
