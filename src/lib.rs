//! Model Zoo - deduplicating model cache
//!
//! Turns a model family plus its parameters into a ready model. Artifacts are
//! downloaded on demand from a primary mirror with pattern-matched backups,
//! each distinct configuration is built once per process, and models are
//! placed on the requested accelerator when one is enabled.

pub mod config;
pub mod error;
pub mod gpu;
pub mod metrics;
pub mod models;
pub mod zoo;

pub use config::{BackupLink, ZooConfig};
pub use error::{ModelError, ModelResult};
pub use models::{
    ArtifactResolver, BoundConfiguration, Device, DownloadFallbackPolicy, LoadedModel,
    LoaderRegistry, ModelFamily, ParamValue, Params,
};
pub use zoo::ModelCache;
