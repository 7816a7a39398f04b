//! Mapping from model family to its loader

use super::adapters::{
    DiffusionLoader, FastTextLoader, HuggingFaceLoader, LanguageArtifactLoader, NltkLoader,
    SpacyLoader,
};
use super::key::ModelFamily;
use super::loader::ModelLoader;
use crate::error::{ModelError, ModelResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Family → loader table
#[derive(Clone)]
pub struct LoaderRegistry {
    loaders: HashMap<ModelFamily, Arc<dyn ModelLoader>>,
}

impl LoaderRegistry {
    /// Create a registry with no loaders
    pub fn empty() -> Self {
        Self {
            loaders: HashMap::new(),
        }
    }

    /// Create a registry with the built-in loader for every family
    pub fn with_defaults() -> Self {
        Self::empty()
            .with(ModelFamily::Fasttext, FastTextLoader)
            .with(ModelFamily::Sentencepiece, LanguageArtifactLoader::sentencepiece())
            .with(ModelFamily::Kenlm, LanguageArtifactLoader::kenlm())
            .with(ModelFamily::Nltk, NltkLoader)
            .with(ModelFamily::Huggingface, HuggingFaceLoader)
            .with(ModelFamily::Spacy, SpacyLoader)
            .with(ModelFamily::Diffusion, DiffusionLoader)
    }

    /// Builder-style registration, replacing any previous loader
    pub fn with(mut self, family: ModelFamily, loader: impl ModelLoader + 'static) -> Self {
        self.insert(family, Arc::new(loader));
        self
    }

    pub fn insert(&mut self, family: ModelFamily, loader: Arc<dyn ModelLoader>) {
        self.loaders.insert(family, loader);
    }

    /// Loader for `family`
    pub fn get(&self, family: ModelFamily) -> ModelResult<Arc<dyn ModelLoader>> {
        self.loaders
            .get(&family)
            .cloned()
            .ok_or_else(|| ModelError::invalid(format!("no loader registered for {}", family)))
    }

    /// Registered families, sorted
    pub fn families(&self) -> Vec<ModelFamily> {
        let mut families: Vec<_> = self.loaders.keys().copied().collect();
        families.sort();
        families
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
