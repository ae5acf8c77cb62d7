pub mod auth;
pub mod catalog;
pub mod core;
pub mod normalize;
pub mod providers;
pub mod stream;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use auth::{CachedToken, MemoryCredentialStore, TokenBroker, TokenExchanger};
pub use catalog::ModelsCache;
pub use core::error::{ConfigError, ProviderError, UpstreamError};
pub use core::traits::{
    CompletionStream, CredentialStore, ModelSource, ProviderAdapter, StreamCloser, TokenProvider,
};
pub use core::types::*;
pub use normalize::ErrorNormalizer;
pub use providers::copilot::{CopilotAdapter, CopilotConfig};
pub use stream::ChatStream;
