use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::auth::{DEFAULT_REFRESH_MARGIN, TokenBroker};
use crate::catalog::ModelsCache;
use crate::core::error::{ConfigError, ProviderError};
use crate::core::traits::{CompletionStream, CredentialStore, ProviderAdapter, TokenProvider};
use crate::core::types::{AdapterContext, ChatCompletionRequest, ModelCatalog, ProviderId};
use crate::normalize::ErrorNormalizer;
use crate::providers::copilot_auth::CopilotTokenExchanger;
use crate::providers::copilot_models::{CopilotModelSource, fallback_catalog};
use crate::providers::copilot_translate::CopilotTranslator;
use crate::providers::translator_contract::ProviderTranslator;
use crate::stream::ChatStream;
use crate::transport::http::{HttpTransport, RetryPolicy};

pub const COPILOT_DEFAULT_API_BASE_URL: &str = "https://api.githubcopilot.com";
pub const COPILOT_DEFAULT_TOKEN_URL: &str = "https://api.github.com/copilot_internal/v2/token";
pub const COPILOT_DEFAULT_MODELS_REFRESH: Duration = Duration::from_secs(30 * 60);
pub const COPILOT_DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const COPILOT_DEFAULT_STREAM_TIMEOUT_MS: u64 = 5 * 60 * 1_000;

pub const COPILOT_API_BASE_URL_ENV: &str = "COPILOT_API_BASE_URL";
pub const COPILOT_TOKEN_URL_ENV: &str = "COPILOT_TOKEN_URL";
pub const COPILOT_MODELS_REFRESH_ENV: &str = "COPILOT_MODELS_REFRESH";
pub const COPILOT_REQUEST_TIMEOUT_MS_ENV: &str = "COPILOT_REQUEST_TIMEOUT_MS";
pub const COPILOT_STREAM_TIMEOUT_MS_ENV: &str = "COPILOT_STREAM_TIMEOUT_MS";

/// Appended to "model not supported / not available" failures.
pub const MODEL_ENABLEMENT_HINT: &str =
    "Make sure the model is enabled in your Copilot settings: https://github.com/settings/copilot";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopilotConfig {
    pub api_base_url: String,
    pub token_url: String,
    pub models_refresh: Duration,
    pub request_timeout_ms: u64,
    /// Bounds a whole chat call, body included.
    pub stream_timeout_ms: u64,
    pub refresh_margin: Duration,
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            api_base_url: COPILOT_DEFAULT_API_BASE_URL.to_string(),
            token_url: COPILOT_DEFAULT_TOKEN_URL.to_string(),
            models_refresh: COPILOT_DEFAULT_MODELS_REFRESH,
            request_timeout_ms: COPILOT_DEFAULT_REQUEST_TIMEOUT_MS,
            stream_timeout_ms: COPILOT_DEFAULT_STREAM_TIMEOUT_MS,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
        }
    }
}

impl CopilotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for the
    /// `COPILOT_*` keys. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(url) = read(COPILOT_API_BASE_URL_ENV) {
            config.api_base_url = url;
        }
        if let Some(url) = read(COPILOT_TOKEN_URL_ENV) {
            config.token_url = url;
        }
        if let Some(raw) = read(COPILOT_MODELS_REFRESH_ENV) {
            config.models_refresh = parse_refresh_interval(&raw)?;
        }
        if let Some(raw) = read(COPILOT_REQUEST_TIMEOUT_MS_ENV) {
            config.request_timeout_ms = parse_millis(COPILOT_REQUEST_TIMEOUT_MS_ENV, &raw)?;
        }
        if let Some(raw) = read(COPILOT_STREAM_TIMEOUT_MS_ENV) {
            config.stream_timeout_ms = parse_millis(COPILOT_STREAM_TIMEOUT_MS_ENV, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, url) in [
            ("api_base_url", &self.api_base_url),
            ("token_url", &self.token_url),
        ] {
            if url.trim().is_empty() {
                return Err(ConfigError::InvalidProviderConfig {
                    provider: ProviderId::Copilot,
                    reason: format!("{name} must not be empty"),
                });
            }
        }
        if self.models_refresh.is_zero() {
            return Err(ConfigError::InvalidRefreshInterval {
                reason: "models refresh interval must be > 0".to_string(),
            });
        }
        for timeout_ms in [self.request_timeout_ms, self.stream_timeout_ms] {
            if timeout_ms == 0 {
                return Err(ConfigError::InvalidTimeout { timeout_ms });
            }
        }
        Ok(())
    }

    fn chat_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.api_base_url.trim().trim_end_matches('/')
        )
    }
}

/// Accepts plain seconds (`"90"`) or a count with an `s`, `m` or `h` suffix.
pub fn parse_refresh_interval(raw: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidRefreshInterval {
        reason: format!("expected seconds or <n>s|m|h, got {raw:?}"),
    };

    let value = raw.trim();
    let (digits, unit_secs) = match value.char_indices().last() {
        Some((index, 's')) => (&value[..index], 1),
        Some((index, 'm')) => (&value[..index], 60),
        Some((index, 'h')) => (&value[..index], 60 * 60),
        _ => (value, 1),
    };

    let count = digits.trim().parse::<u64>().map_err(|_| invalid())?;
    let seconds = count.checked_mul(unit_secs).ok_or_else(invalid)?;
    if seconds == 0 {
        return Err(ConfigError::InvalidRefreshInterval {
            reason: "models refresh interval must be > 0".to_string(),
        });
    }
    Ok(Duration::from_secs(seconds))
}

fn parse_millis(key: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse::<u64>()
        .map_err(|error| ConfigError::InvalidProviderConfig {
            provider: ProviderId::Copilot,
            reason: format!("{key} must be an integer number of milliseconds: {error}"),
        })
}

/// GitHub Copilot chat provider.
///
/// Chat calls go to `{api_base_url}/chat/completions` with a Copilot token
/// obtained from the stored GitHub OAuth token. The model catalog is served
/// from a [`ModelsCache`] refreshed in the background between `start` and
/// `close`.
pub struct CopilotAdapter {
    tokens: Arc<dyn TokenProvider>,
    translator: CopilotTranslator,
    chat_transport: HttpTransport,
    chat_url: String,
    models: Arc<ModelsCache>,
}

impl CopilotAdapter {
    pub fn new(store: Arc<dyn CredentialStore>) -> Result<Self, ConfigError> {
        Self::with_config(store, CopilotConfig::default())
    }

    pub fn from_env(store: Arc<dyn CredentialStore>) -> Result<Self, ConfigError> {
        Self::with_config(store, CopilotConfig::from_env()?)
    }

    pub fn with_config(
        store: Arc<dyn CredentialStore>,
        config: CopilotConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let token_transport =
            HttpTransport::new(config.request_timeout_ms, RetryPolicy::single_attempt())?;
        let exchanger = CopilotTokenExchanger::new(token_transport, config.token_url.clone());
        let broker = TokenBroker::new(ProviderId::Copilot, store, exchanger)
            .with_refresh_margin(config.refresh_margin);

        Self::with_token_provider(config, Arc::new(broker))
    }

    /// Builds the adapter around an existing token source.
    pub fn with_token_provider(
        config: CopilotConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let models_transport =
            HttpTransport::new(config.request_timeout_ms, RetryPolicy::default())?;
        let source = CopilotModelSource::new(
            models_transport,
            &config.api_base_url,
            Arc::clone(&tokens),
        );
        let models = ModelsCache::new(ProviderId::Copilot, Arc::new(source), config.models_refresh)
            .with_fallback(fallback_catalog());

        let chat_transport =
            HttpTransport::new(config.stream_timeout_ms, RetryPolicy::single_attempt())?
                .with_error_normalizer(ErrorNormalizer::with_model_unavailable_hint(
                    MODEL_ENABLEMENT_HINT,
                ));

        Ok(Self {
            tokens,
            translator: CopilotTranslator,
            chat_transport,
            chat_url: config.chat_url(),
            models: Arc::new(models),
        })
    }

    pub fn models_cache(&self) -> &Arc<ModelsCache> {
        &self.models
    }
}

#[async_trait]
impl ProviderAdapter for CopilotAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Copilot
    }

    async fn models(&self) -> Arc<ModelCatalog> {
        self.models.models().await
    }

    async fn supports_model(&self, model_id: &str) -> bool {
        self.models.supports_model(model_id).await
    }

    async fn chat_completion(
        &self,
        req: &ChatCompletionRequest,
        ctx: &AdapterContext,
    ) -> Result<Box<dyn CompletionStream>, ProviderError> {
        let token = self.tokens.access_token(ctx).await?;
        let wire = self.translator.build_wire_request(req, &token)?;

        tracing::debug!(
            provider = %ProviderId::Copilot,
            model = %req.model,
            stream = req.stream,
            messages = req.messages.len(),
            "sending chat completion"
        );

        let response = self
            .chat_transport
            .send_json(
                ProviderId::Copilot,
                Some(req.model.as_str()),
                &self.chat_url,
                wire.headers,
                &wire.body,
                ctx,
            )
            .await?;

        Ok(Box::new(ChatStream::new(
            ProviderId::Copilot,
            Some(req.model.clone()),
            response,
            req.stream,
            self.chat_transport.error_normalizer().clone(),
            ctx.cancellation.child_token(),
        )))
    }

    async fn init(&self, ctx: &AdapterContext) -> Result<(), ProviderError> {
        let catalog = self.models.prime(ctx).await?;
        tracing::info!(
            provider = %ProviderId::Copilot,
            models = catalog.len(),
            "copilot provider initialized"
        );
        Ok(())
    }

    /// Must be called from within a Tokio runtime.
    fn start(&self) {
        self.models.start_background_refresh();
    }

    async fn close(&self) {
        self.models.stop_background_refresh().await;
    }

    async fn refresh_models(&self, ctx: &AdapterContext) -> Result<(), ProviderError> {
        self.models.refresh_models(ctx).await
    }
}
