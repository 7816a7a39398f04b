//! Model artifacts and loaders
//!
//! Provides functionality for:
//! - Keying model configurations by family and parameters
//! - Resolving artifacts on disk, downloading from mirrors when missing
//! - Choosing a backup mirror when the primary fails
//! - Loading each model family and placing models on accelerators

pub mod adapters;
pub mod cache;
pub mod device;
pub mod download;
pub mod fallback;
pub mod key;
pub mod loader;
pub mod metadata;
pub mod registry;
pub mod resolver;

pub use cache::{CachedArtifact, is_artifact_cached, list_cached_artifacts};
pub use device::{Device, DevicePlaceable, LoadedModel, ModelComponent, place};
pub use download::{Fetcher, HttpFetcher};
pub use fallback::DownloadFallbackPolicy;
pub use key::{BoundConfiguration, ModelFamily, ParamValue, Params};
pub use loader::{LoaderContext, ModelLoader};
pub use registry::LoaderRegistry;
pub use resolver::{ArtifactResolver, extract_archive};
