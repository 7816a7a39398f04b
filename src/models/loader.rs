//! Loader seam between the model cache and concrete model families

use crate::error::ModelResult;
use crate::models::device::LoadedModel;
use crate::models::key::Params;
use crate::models::resolver::ArtifactResolver;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared services handed to every loader
#[derive(Clone)]
pub struct LoaderContext {
    /// Resolves and downloads mirror-hosted artifacts
    pub resolver: Arc<ArtifactResolver>,
    /// Whether accelerator mode is on; some precisions require it
    pub accelerator: bool,
    /// Custom HuggingFace cache directory for hub-backed families
    pub hf_cache_dir: Option<PathBuf>,
}

impl LoaderContext {
    pub fn new(resolver: Arc<ArtifactResolver>, accelerator: bool) -> Self {
        Self {
            resolver,
            accelerator,
            hf_cache_dir: None,
        }
    }

    pub fn with_hf_cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.hf_cache_dir = dir;
        self
    }
}

/// Builds a model of one family from its parameters
///
/// Implementations must be pure with respect to `params` (same parameters,
/// same logical model) and safe to call more than once.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, params: &Params, ctx: &LoaderContext) -> ModelResult<LoadedModel>;
}
