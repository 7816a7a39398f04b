//! Configuration structures and loading logic

use crate::gpu::GpuInfo;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default mirror hosting every artifact under its model name
pub const DEFAULT_MODEL_LINKS: &str =
    "https://dail-wlcb.oss-cn-wulanchabu.aliyuncs.com/data_juicer/models/";

/// Main model zoo configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ZooConfig {
    /// Directory holding downloaded artifacts
    pub cache_dir: PathBuf,
    /// Base URL of the primary mirror
    pub primary_base_url: String,
    /// Backup mirrors, matched against the model name in declaration order
    pub backup_links: Vec<BackupLink>,
    /// Place models on CUDA devices. `None` auto-detects via nvidia-smi
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accelerator: Option<bool>,
    /// Custom HuggingFace cache directory for hub-backed families
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hf_cache_dir: Option<PathBuf>,
}

/// A glob pattern over model names and the mirror serving matching files
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BackupLink {
    pub pattern: String,
    pub url: String,
}

impl BackupLink {
    pub fn new(pattern: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            url: url.into(),
        }
    }
}

impl Default for ZooConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            primary_base_url: DEFAULT_MODEL_LINKS.to_string(),
            backup_links: default_backup_links(),
            accelerator: None,
            hf_cache_dir: None,
        }
    }
}

impl ZooConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(cache_dir) = std::env::var("MODEL_ZOO_CACHE_DIR") {
            config.cache_dir = PathBuf::from(cache_dir);
        }
        if let Ok(base_url) = std::env::var("MODEL_ZOO_BASE_URL") {
            config.primary_base_url = base_url;
        }
        if let Ok(accelerator) = std::env::var("MODEL_ZOO_ACCELERATOR") {
            config.accelerator = Some(
                accelerator
                    .parse()
                    .context("Invalid MODEL_ZOO_ACCELERATOR value (expected true/false)")?,
            );
        }
        if let Ok(hf_cache) = std::env::var("MODEL_ZOO_HF_CACHE_DIR") {
            config.hf_cache_dir = Some(PathBuf::from(hf_cache));
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !is_http_url(&self.primary_base_url) {
            anyhow::bail!(
                "Primary base URL must be http(s) (got '{}')",
                self.primary_base_url
            );
        }

        if self.cache_dir.as_os_str().is_empty() {
            anyhow::bail!("Cache directory cannot be empty");
        }

        for link in &self.backup_links {
            glob::Pattern::new(&link.pattern)
                .with_context(|| format!("Invalid backup pattern '{}'", link.pattern))?;
            if !is_http_url(&link.url) {
                anyhow::bail!(
                    "Backup URL for pattern '{}' must be http(s) (got '{}')",
                    link.pattern,
                    link.url
                );
            }
        }

        Ok(())
    }

    /// Resolve accelerator mode, falling back to whether any GPU was found
    pub fn accelerator_enabled(&self, gpus: &GpuInfo) -> bool {
        self.accelerator.unwrap_or(gpus.count() > 0)
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Default artifact cache directory
///
/// Checks in order:
/// 1. `$XDG_CACHE_HOME/model-zoo/models`
/// 2. `~/.cache/model-zoo/models`
fn default_cache_dir() -> PathBuf {
    if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
        return PathBuf::from(xdg_cache).join("model-zoo/models");
    }

    dirs::home_dir()
        .map(|h| h.join(".cache/model-zoo/models"))
        .unwrap_or_else(|| PathBuf::from("/tmp/model-zoo/models"))
}

fn default_backup_links() -> Vec<BackupLink> {
    vec![
        // language identification model from fasttext
        BackupLink::new(
            "lid.176.bin",
            "https://dl.fbaipublicfiles.com/fasttext/supervised-models/",
        ),
        // tokenizer and language model for English from sentencepiece and KenLM
        BackupLink::new(
            "*.sp.model",
            "https://huggingface.co/edugp/kenlm/resolve/main/wikipedia/",
        ),
        BackupLink::new(
            "*.arpa.bin",
            "https://huggingface.co/edugp/kenlm/resolve/main/wikipedia/",
        ),
        // sentence split model from nltk punkt
        BackupLink::new("punkt.*.pickle", DEFAULT_MODEL_LINKS),
    ]
}
