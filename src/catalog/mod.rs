use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::error::ProviderError;
use crate::core::traits::ModelSource;
use crate::core::types::{AdapterContext, ModelCatalog, ModelInfo, ProviderId};
use crate::transport::http::cancellable;

/// Background-refreshed snapshot of a provider's models.
///
/// Readers clone an `Arc` of the current snapshot under a short read lock;
/// refreshes fetch without holding it and swap the whole snapshot in at the
/// end, so a reader sees either the old or the new catalog, never a mix.
pub struct ModelsCache {
    provider: ProviderId,
    source: Arc<dyn ModelSource>,
    refresh_interval: Duration,
    fallback: ModelCatalog,
    snapshot: RwLock<Option<Arc<ModelCatalog>>>,
    refresh_lock: tokio::sync::Mutex<()>,
    background: Mutex<Option<BackgroundRefresh>>,
}

struct BackgroundRefresh {
    cancellation: CancellationToken,
    handle: JoinHandle<()>,
}

impl ModelsCache {
    pub fn new(
        provider: ProviderId,
        source: Arc<dyn ModelSource>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            provider,
            source,
            refresh_interval,
            fallback: ModelCatalog::default(),
            snapshot: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            background: Mutex::new(None),
        }
    }

    /// Catalog installed when the very first load fails.
    pub fn with_fallback(mut self, fallback: ModelCatalog) -> Self {
        self.fallback = fallback;
        self
    }

    /// Current snapshot without touching the network.
    pub fn current(&self) -> Option<Arc<ModelCatalog>> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Current snapshot, loading it first if none exists yet.
    pub async fn models(&self) -> Arc<ModelCatalog> {
        match self.prime(&AdapterContext::default()).await {
            Ok(snapshot) => snapshot,
            Err(_) => Arc::new(self.fallback.clone()),
        }
    }

    /// Loads the first snapshot under `ctx` unless one exists. Any failure
    /// other than cancellation installs the fallback catalog.
    pub async fn prime(&self, ctx: &AdapterContext) -> Result<Arc<ModelCatalog>, ProviderError> {
        if let Some(snapshot) = self.current() {
            return Ok(snapshot);
        }

        let _guard = cancellable(&self.provider, ctx, self.refresh_lock.lock()).await?;
        if let Some(snapshot) = self.current() {
            return Ok(snapshot);
        }

        match self.fetch_and_store(ctx).await {
            Ok(snapshot) => Ok(snapshot),
            Err(error) if error.is_cancelled() => Err(error),
            Err(error) => {
                tracing::warn!(
                    provider = %self.provider,
                    error = %error,
                    fallback_models = self.fallback.len(),
                    "initial model catalog load failed; using fallback catalog"
                );
                let fallback = Arc::new(self.fallback.clone());
                self.store(Arc::clone(&fallback));
                Ok(fallback)
            }
        }
    }

    pub async fn supports_model(&self, model_id: &str) -> bool {
        self.models().await.contains(model_id)
    }

    /// Forces a synchronous refresh. On failure the previous snapshot stays.
    pub async fn refresh_models(&self, ctx: &AdapterContext) -> Result<(), ProviderError> {
        let _guard = cancellable(&self.provider, ctx, self.refresh_lock.lock()).await?;
        self.fetch_and_store(ctx).await.map(|_| ())
    }

    /// Spawns the periodic refresh task. A second call while running is a no-op.
    pub fn start_background_refresh(self: &Arc<Self>) {
        let mut background = self
            .background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if background.is_some() {
            return;
        }

        let cancellation = CancellationToken::new();
        let handle = tokio::spawn(run_background_refresh(
            Arc::downgrade(self),
            self.refresh_interval,
            cancellation.clone(),
        ));

        *background = Some(BackgroundRefresh {
            cancellation,
            handle,
        });
    }

    /// Stops the periodic task and waits for it to exit, including any
    /// refresh it was running.
    pub async fn stop_background_refresh(&self) {
        let background = self
            .background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        let Some(background) = background else {
            return;
        };

        background.cancellation.cancel();
        if let Err(error) = background.handle.await {
            tracing::warn!(
                provider = %self.provider,
                error = %error,
                "model refresh task ended abnormally"
            );
        }
    }

    pub fn is_refreshing_in_background(&self) -> bool {
        self.background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    async fn fetch_and_store(
        &self,
        ctx: &AdapterContext,
    ) -> Result<Arc<ModelCatalog>, ProviderError> {
        let models = self.source.fetch_models(ctx).await?;
        let snapshot = Arc::new(build_catalog(models));
        tracing::debug!(
            provider = %self.provider,
            models = snapshot.len(),
            "model catalog refreshed"
        );
        self.store(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    fn store(&self, snapshot: Arc<ModelCatalog>) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(snapshot);
    }
}

async fn run_background_refresh(
    cache: Weak<ModelsCache>,
    refresh_interval: Duration,
    cancellation: CancellationToken,
) {
    let mut interval = tokio::time::interval(refresh_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the catalog is primed elsewhere.
    interval.tick().await;

    loop {
        tokio::select! {
            () = cancellation.cancelled() => break,
            _ = interval.tick() => {}
        }

        let Some(cache) = cache.upgrade() else {
            break;
        };

        let ctx = AdapterContext::with_cancellation(cancellation.child_token());
        match cache.refresh_models(&ctx).await {
            Ok(()) => {}
            Err(error) if error.is_cancelled() => break,
            Err(error) => {
                tracing::warn!(
                    provider = %cache.provider,
                    error = %error,
                    "background model refresh failed; keeping previous catalog"
                );
            }
        }
    }
}

/// Collapses duplicate ids onto their first occurrence, keeping upstream order.
pub fn build_catalog(models: Vec<ModelInfo>) -> ModelCatalog {
    let mut unique: IndexMap<String, ModelInfo> = IndexMap::with_capacity(models.len());
    for model in models {
        unique.entry(model.id.clone()).or_insert(model);
    }

    ModelCatalog {
        models: unique.into_values().collect(),
    }
}

pub fn export_catalog_json(catalog: &ModelCatalog) -> Result<String, ProviderError> {
    serde_json::to_string_pretty(catalog).map_err(|error| ProviderError::Serialization {
        provider: catalog
            .models
            .first()
            .map(|model| model.provider.clone())
            .unwrap_or(ProviderId::Other("unknown".to_string())),
        model: None,
        message: error.to_string(),
    })
}
