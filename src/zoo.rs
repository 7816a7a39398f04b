//! Deduplicating model cache
//!
//! One [`ModelCache`] is created at process start and shared by `Arc` with
//! every component that needs models. Each [`BoundConfiguration`] maps to at
//! most one loaded model for the cache's lifetime; entries are created on
//! first use and never replaced or evicted.
//!
//! Two callers missing the same key at once may both run the loader. The first
//! to insert wins and the other instance is dropped, so callers always observe
//! the stored entry.

use crate::config::ZooConfig;
use crate::error::ModelResult;
use crate::{gpu, metrics};
use crate::models::device::{LoadedModel, place};
use crate::models::key::{BoundConfiguration, ModelFamily, Params};
use crate::models::loader::LoaderContext;
use crate::models::registry::LoaderRegistry;
use crate::models::resolver::ArtifactResolver;
use dashmap::DashMap;
use std::sync::Arc;

/// Process-wide table of instantiated models
pub struct ModelCache {
    table: DashMap<BoundConfiguration, Arc<LoadedModel>>,
    loaders: LoaderRegistry,
    ctx: LoaderContext,
}

impl ModelCache {
    /// Create an empty cache over the given loaders
    ///
    /// Accelerator mode is taken from the loader context.
    pub fn new(loaders: LoaderRegistry, ctx: LoaderContext) -> Self {
        Self {
            table: DashMap::new(),
            loaders,
            ctx,
        }
    }

    /// Create an empty cache with the built-in loaders and configured mirrors
    ///
    /// GPU detection runs here, off the async workers, unless accelerator
    /// mode is explicitly disabled.
    pub async fn from_config(config: &ZooConfig) -> anyhow::Result<Self> {
        let resolver = Arc::new(ArtifactResolver::from_config(config)?);
        let accelerator = match config.accelerator {
            Some(false) => false,
            _ => config.accelerator_enabled(gpu::init().await),
        };
        let ctx = LoaderContext::new(resolver, accelerator)
            .with_hf_cache_dir(config.hf_cache_dir.clone());

        tracing::info!(
            cache_dir = ?config.cache_dir,
            accelerator = ctx.accelerator,
            "Model cache initialized"
        );

        Ok(Self::new(LoaderRegistry::with_defaults(), ctx))
    }

    pub fn accelerator_enabled(&self) -> bool {
        self.ctx.accelerator
    }

    pub fn resolver(&self) -> &ArtifactResolver {
        &self.ctx.resolver
    }

    /// Build a model now and return the key that retrieves it
    ///
    /// Surfaces configuration and download errors at registration time. A key
    /// that is already instantiated is returned without rebuilding.
    pub async fn register(
        &self,
        family: ModelFamily,
        params: Params,
    ) -> ModelResult<BoundConfiguration> {
        let key = BoundConfiguration::new(family, params);

        if self.table.contains_key(&key) {
            tracing::debug!(key = %key, "Model already instantiated");
        } else {
            self.instantiate(&key).await?;
        }

        Ok(key)
    }

    /// Fetch the model for `key`, building it on first retrieval
    ///
    /// `None` is a valid request for "no model" and returns `None` without
    /// touching the cache. In accelerator mode the model is placed on
    /// `cuda:<rank>` (rank 0 by default) before being returned.
    pub async fn get(
        &self,
        key: Option<&BoundConfiguration>,
        rank: Option<u32>,
    ) -> ModelResult<Option<Arc<LoadedModel>>> {
        let Some(key) = key else {
            return Ok(None);
        };

        let cached = self.table.get(key).map(|entry| Arc::clone(entry.value()));
        metrics::record_cache_lookup(key.family.as_str(), cached.is_some());

        let model = match cached {
            Some(model) => model,
            None => {
                tracing::debug!(
                    key = %key,
                    thread = ?std::thread::current().id(),
                    "Model not found in cache, instantiating"
                );
                self.instantiate(key).await?
            }
        };

        if self.ctx.accelerator {
            let rank = rank.unwrap_or(0);
            if let Some(gpus) = gpu::get()
                && !gpus.is_valid_rank(rank)
            {
                tracing::warn!(
                    key = %key,
                    rank,
                    gpu_count = gpus.count(),
                    "Placing model on a rank with no visible GPU"
                );
            }
            place(&model, rank);
        }

        Ok(Some(model))
    }

    /// Whether `key` has an instantiated model
    pub fn contains(&self, key: &BoundConfiguration) -> bool {
        self.table.contains_key(key)
    }

    /// Number of instantiated models
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Instantiated keys, sorted
    pub fn keys(&self) -> Vec<BoundConfiguration> {
        let mut keys: Vec<_> = self.table.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    async fn instantiate(&self, key: &BoundConfiguration) -> ModelResult<Arc<LoadedModel>> {
        let loader = self.loaders.get(key.family)?;
        tracing::info!(key = %key, "Instantiating model");

        let model = Arc::new(loader.load(&key.params, &self.ctx).await?);

        // First writer wins; a concurrent duplicate is dropped here
        let stored = Arc::clone(self.table.entry(key.clone()).or_insert(model).value());
        metrics::update_loaded_count(self.table.len());

        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackupLink;
    use crate::error::ModelError;
    use crate::models::adapters::ArtifactModel;
    use crate::models::device::{Device, DevicePlaceable, DeviceSlot, ModelComponent};
    use crate::models::download::Fetcher;
    use crate::models::fallback::DownloadFallbackPolicy;
    use crate::models::loader::ModelLoader;
    use async_trait::async_trait;
    use std::any::Any;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoNetwork;

    #[async_trait]
    impl Fetcher for NoNetwork {
        async fn fetch(&self, url: &str, _dest: &Path) -> anyhow::Result<u64> {
            anyhow::bail!("network disabled in tests: {}", url)
        }
    }

    #[derive(Debug, Default)]
    struct Gpuable {
        device: DeviceSlot,
    }

    impl DevicePlaceable for Gpuable {
        fn device(&self) -> Device {
            self.device.get()
        }

        fn to_device(&self, device: Device) {
            self.device.set(device);
        }
    }

    impl ModelComponent for Gpuable {
        fn kind(&self) -> &'static str {
            "gpuable"
        }

        fn as_placeable(&self) -> Option<&dyn DevicePlaceable> {
            Some(self)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Loader that counts constructions and never touches the network
    #[derive(Default)]
    struct CountingLoader {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ModelLoader for CountingLoader {
        async fn load(&self, params: &Params, _ctx: &LoaderContext) -> ModelResult<LoadedModel> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Give concurrent callers a chance to miss the same key
            tokio::task::yield_now().await;
            if params.get("fail").is_some() {
                return Err(ModelError::invalid("asked to fail"));
            }
            Ok(LoadedModel::single(Gpuable::default()))
        }
    }

    fn cache_with(loader: CountingLoader, accelerator: bool) -> ModelCache {
        let policy =
            DownloadFallbackPolicy::new("https://primary/", &[BackupLink::new("*", "https://b/")])
                .unwrap();
        let resolver = ArtifactResolver::new(
            PathBuf::from("/nonexistent/model-zoo-cache"),
            policy,
            Arc::new(NoNetwork),
        );
        let ctx = LoaderContext::new(Arc::new(resolver), accelerator);
        ModelCache::new(
            LoaderRegistry::empty().with(ModelFamily::Kenlm, loader),
            ctx,
        )
    }

    #[tokio::test]
    async fn test_register_then_get_is_same_instance() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = cache_with(CountingLoader { calls: calls.clone() }, false);

        let key = cache
            .register(ModelFamily::Kenlm, Params::new().with("lang", "en"))
            .await
            .unwrap();
        let first = cache.get(Some(&key), None).await.unwrap().unwrap();
        let second = cache.get(Some(&key), Some(3)).await.unwrap().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_register_twice_does_not_rebuild() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = cache_with(CountingLoader { calls: calls.clone() }, false);
        let params = Params::new().with("lang", "en");

        let a = cache.register(ModelFamily::Kenlm, params.clone()).await.unwrap();
        let b = cache.register(ModelFamily::Kenlm, params).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_none_has_no_side_effects() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = cache_with(CountingLoader { calls: calls.clone() }, true);

        assert!(cache.get(None, Some(1)).await.unwrap().is_none());
        assert!(cache.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_get_unregistered_builds_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = cache_with(CountingLoader { calls: calls.clone() }, false);
        let key = BoundConfiguration::new(ModelFamily::Kenlm, Params::new().with("lang", "fr"));

        assert!(!cache.contains(&key));
        let first = cache.get(Some(&key), None).await.unwrap().unwrap();
        let second = cache.get(Some(&key), None).await.unwrap().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.keys(), vec![key]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cold_gets_share_stored_entry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(cache_with(CountingLoader { calls: calls.clone() }, false));
        let key = BoundConfiguration::new(ModelFamily::Kenlm, Params::new().with("lang", "en"));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let key = key.clone();
                tokio::spawn(async move { cache.get(Some(&key), None).await })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap().unwrap());
        }

        let stored = cache.get(Some(&key), None).await.unwrap().unwrap();
        assert!(results.iter().all(|model| Arc::ptr_eq(model, &stored)));
        assert_eq!(cache.len(), 1);
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_accelerator_places_on_rank() {
        let cache = cache_with(CountingLoader::default(), true);
        let key = cache
            .register(ModelFamily::Kenlm, Params::new())
            .await
            .unwrap();

        let model = cache.get(Some(&key), None).await.unwrap().unwrap();
        assert_eq!(model.downcast::<Gpuable>().unwrap().device(), Device::Cuda(0));

        let model = cache.get(Some(&key), Some(2)).await.unwrap().unwrap();
        assert_eq!(model.downcast::<Gpuable>().unwrap().device(), Device::Cuda(2));
    }

    #[tokio::test]
    async fn test_cpu_mode_never_places() {
        let cache = cache_with(CountingLoader::default(), false);
        let key = cache
            .register(ModelFamily::Kenlm, Params::new())
            .await
            .unwrap();

        let model = cache.get(Some(&key), Some(1)).await.unwrap().unwrap();
        assert_eq!(model.downcast::<Gpuable>().unwrap().device(), Device::Cpu);
    }

    #[tokio::test]
    async fn test_loader_error_leaves_no_entry() {
        let cache = cache_with(CountingLoader::default(), false);
        let err = cache
            .register(ModelFamily::Kenlm, Params::new().with("fail", true))
            .await
            .unwrap_err();

        assert!(matches!(err, ModelError::InvalidConfiguration(_)));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_family_is_invalid() {
        let cache = cache_with(CountingLoader::default(), false);
        let err = cache
            .register(ModelFamily::Spacy, Params::new().with("lang", "en"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_download_failure_surfaces_from_register() {
        let policy = DownloadFallbackPolicy::new("https://primary/", &[]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let resolver = ArtifactResolver::new(dir.path(), policy, Arc::new(NoNetwork));
        let cache = ModelCache::new(
            LoaderRegistry::with_defaults(),
            LoaderContext::new(Arc::new(resolver), false),
        );

        let err = cache
            .register(ModelFamily::Fasttext, Params::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::DownloadFailed { .. }));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_builtin_loader_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("en.arpa.bin");
        std::fs::write(&artifact, b"mmap lm").unwrap();

        let policy = DownloadFallbackPolicy::new("https://primary/", &[]).unwrap();
        let resolver = ArtifactResolver::new(dir.path(), policy, Arc::new(NoNetwork));
        let cache = ModelCache::new(
            LoaderRegistry::with_defaults(),
            LoaderContext::new(Arc::new(resolver), true),
        );

        let key = cache
            .register(ModelFamily::Kenlm, Params::new().with("lang", "en"))
            .await
            .unwrap();
        let model = cache.get(Some(&key), Some(0)).await.unwrap().unwrap();
        assert_eq!(model.downcast::<ArtifactModel>().unwrap().path, artifact);
    }
}
