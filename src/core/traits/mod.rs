use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::error::ProviderError;
use crate::core::types::{
    AdapterContext, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
    CredentialRecord, ModelCatalog, ModelInfo, ProviderId,
};

/// Provider adapter contract: accepts canonical chat requests and hands back a
/// stream of canonical chunks, hiding the upstream protocol.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable provider identifier for routing and diagnostics.
    fn id(&self) -> ProviderId;

    /// Current model catalog snapshot. May block on the first call only.
    async fn models(&self) -> Arc<ModelCatalog>;

    async fn supports_model(&self, model_id: &str) -> bool;

    /// Issues a chat completion. Non-success HTTP statuses are not reported
    /// here; they surface on the first `CompletionStream::next`.
    async fn chat_completion(
        &self,
        req: &ChatCompletionRequest,
        ctx: &AdapterContext,
    ) -> Result<Box<dyn CompletionStream>, ProviderError>;

    /// Primes the model catalog.
    async fn init(&self, ctx: &AdapterContext) -> Result<(), ProviderError>;

    /// Starts background work such as periodic catalog refresh.
    fn start(&self);

    /// Stops background work, waiting for any in-flight refresh to settle.
    async fn close(&self);

    async fn refresh_models(&self, ctx: &AdapterContext) -> Result<(), ProviderError>;
}

/// Single-consumer pull stream over one upstream chat response.
///
/// `next` yields `Ok(None)` once exhausted and keeps doing so on every later
/// call. At most one terminal error is returned, and it stays readable via `err`.
#[async_trait]
pub trait CompletionStream: Send {
    async fn next(&mut self) -> Result<Option<ChatCompletionChunk>, ProviderError>;

    /// Buffered result of a non-streaming call, available after exhaustion.
    fn response(&self) -> Option<&ChatCompletionResponse>;

    fn err(&self) -> Option<&ProviderError>;

    /// Releases the underlying connection. Idempotent.
    fn close(&mut self);

    /// Handle that can close the stream from another task, including while
    /// `next` is suspended on a read.
    fn closer(&self) -> StreamCloser;
}

#[derive(Debug, Clone)]
pub struct StreamCloser {
    cancellation: CancellationToken,
}

impl StreamCloser {
    pub(crate) fn new(cancellation: CancellationToken) -> Self {
        Self { cancellation }
    }

    pub fn close(&self) {
        self.cancellation.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Supplies short-lived bearer tokens for upstream calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self, ctx: &AdapterContext) -> Result<String, ProviderError>;
}

/// External credential storage, keyed by provider.
pub trait CredentialStore: Send + Sync {
    /// Fails with `ProviderError::CredentialMissing` when nothing is stored.
    fn get_credentials(&self, provider: &ProviderId) -> Result<CredentialRecord, ProviderError>;

    fn set_credentials(
        &self,
        provider: &ProviderId,
        record: CredentialRecord,
    ) -> Result<(), ProviderError>;
}

/// Upstream model listing used to populate a models cache.
#[async_trait]
pub trait ModelSource: Send + Sync {
    async fn fetch_models(&self, ctx: &AdapterContext) -> Result<Vec<ModelInfo>, ProviderError>;
}
