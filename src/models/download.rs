//! Byte transport for artifacts
//!
//! Two sources exist: plain HTTP(S) mirrors serving single artifact files, and
//! the HuggingFace Hub for snapshot-style model repositories. Mirror downloads
//! go through the [`Fetcher`] trait so the resolver can be driven by a fake in
//! tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use hf_hub::api::tokio::{Api, ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Fetches the bytes at a URL into a local file
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Write the body of `url` to `dest`, returning the number of bytes written
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Production fetcher using reqwest
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?
            .error_for_status()
            .with_context(|| format!("Mirror rejected {}", url))?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {:?}", dest))?;

        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.with_context(|| format!("Transfer from {} interrupted", url))?;
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {:?}", dest))?;
            written += chunk.len() as u64;
        }
        file.sync_all()
            .await
            .with_context(|| format!("Failed to sync {:?}", dest))?;

        Ok(written)
    }
}

/// Which files of a hub repository make up a usable snapshot
#[derive(Debug, Clone, Copy)]
pub enum SnapshotLayout {
    /// Single transformer: config, tokenizer/processor files, one weight format
    Transformer,
    /// Multi-component pipeline described by model_index.json
    Pipeline,
}

/// Download a model snapshot from HuggingFace Hub
///
/// # Arguments
/// * `model_id` - The repository identifier (e.g., "BAAI/bge-small-en-v1.5")
/// * `revision` - Branch or tag to fetch; `None` uses `main`
/// * `cache_dir` - Optional custom cache directory. If None, uses default HF cache.
///
/// # Returns
/// Path to the snapshot directory
pub async fn download_snapshot(
    model_id: &str,
    revision: Option<&str>,
    cache_dir: Option<PathBuf>,
    layout: SnapshotLayout,
) -> Result<PathBuf> {
    tracing::info!(
        model_id = %model_id,
        revision = ?revision,
        cache_dir = ?cache_dir,
        "Starting snapshot download via hf-hub"
    );

    let api = match cache_dir {
        Some(dir) => ApiBuilder::new()
            .with_cache_dir(dir)
            .build()
            .context("Failed to create HF API client")?,
        None => Api::new().context("Failed to create HF API client")?,
    };

    let repo = match revision {
        Some(rev) => api.repo(Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            rev.to_string(),
        )),
        None => api.model(model_id.to_string()),
    };

    let anchor = match layout {
        SnapshotLayout::Transformer => download_transformer_files(&repo, model_id).await?,
        SnapshotLayout::Pipeline => download_pipeline_files(&repo, model_id).await?,
    };

    // The snapshot directory is the parent of the root-level anchor file
    anchor
        .parent()
        .map(Path::to_path_buf)
        .with_context(|| format!("Snapshot path not found for {}", model_id))
}

async fn download_transformer_files(repo: &ApiRepo, model_id: &str) -> Result<PathBuf> {
    let config_path = repo
        .get("config.json")
        .await
        .with_context(|| format!("Failed to download config.json for {}", model_id))?;

    // Safetensors preferred, fall back to pytorch
    let weight_files = [
        "model.safetensors",
        "pytorch_model.bin",
        "model.safetensors.index.json",
    ];

    let mut downloaded_weights = false;
    for file in &weight_files {
        if repo.get(file).await.is_ok() {
            tracing::debug!(model_id = %model_id, file = %file, "Downloaded weight file");
            downloaded_weights = true;
            if file.ends_with(".index.json") {
                download_sharded_weights(repo, model_id).await?;
            }
            break;
        }
    }

    if !downloaded_weights {
        tracing::warn!(model_id = %model_id, "No standard weight files found, model may use custom format");
    }

    let optional_files = [
        "tokenizer.json",
        "tokenizer_config.json",
        "special_tokens_map.json",
        "vocab.txt",
        "preprocessor_config.json",
        "processor_config.json",
    ];

    for file in &optional_files {
        if repo.get(file).await.is_ok() {
            tracing::debug!(model_id = %model_id, file = %file, "Downloaded optional file");
        }
    }

    Ok(config_path)
}

async fn download_pipeline_files(repo: &ApiRepo, model_id: &str) -> Result<PathBuf> {
    let index_path = repo
        .get("model_index.json")
        .await
        .with_context(|| format!("Failed to download model_index.json for {}", model_id))?;

    let info = repo
        .info()
        .await
        .with_context(|| format!("Failed to list files of {}", model_id))?;

    let component_files: Vec<_> = info
        .siblings
        .iter()
        .map(|s| s.rfilename.as_str())
        .filter(|name| name.contains('/') && is_pipeline_component_file(name))
        .collect();

    tracing::info!(
        model_id = %model_id,
        file_count = component_files.len(),
        "Downloading pipeline components"
    );

    for file in component_files {
        tracing::debug!(model_id = %model_id, file = %file, "Downloading component file");
        repo.get(file)
            .await
            .with_context(|| format!("Failed to download {} for {}", file, model_id))?;
    }

    Ok(index_path)
}

fn is_pipeline_component_file(name: &str) -> bool {
    [".json", ".txt", ".safetensors", ".model"]
        .iter()
        .any(|ext| name.ends_with(ext))
}

/// Download sharded weight files referenced in an index file
async fn download_sharded_weights(repo: &ApiRepo, model_id: &str) -> Result<()> {
    let index_path = repo
        .get("model.safetensors.index.json")
        .await
        .context("Failed to get index file")?;

    let index_content = tokio::fs::read_to_string(&index_path)
        .await
        .context("Failed to read index file")?;

    let index: serde_json::Value =
        serde_json::from_str(&index_content).context("Failed to parse index file")?;

    if let Some(weight_map) = index.get("weight_map").and_then(|v| v.as_object()) {
        let shards: std::collections::HashSet<&str> =
            weight_map.values().filter_map(|v| v.as_str()).collect();

        tracing::info!(
            model_id = %model_id,
            shard_count = shards.len(),
            "Downloading sharded weights"
        );

        for shard in shards {
            tracing::debug!(model_id = %model_id, shard = %shard, "Downloading shard");
            repo.get(shard)
                .await
                .with_context(|| format!("Failed to download shard {}", shard))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_fetcher_writes_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/models/lid.176.bin")
            .with_status(200)
            .with_body("fasttext-bytes")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("lid.176.bin");
        let written = HttpFetcher::new()
            .fetch(&format!("{}/models/lid.176.bin", server.url()), &dest)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(written, 14);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "fasttext-bytes");
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_404() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing.bin")
            .with_status(404)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let result = HttpFetcher::new()
            .fetch(
                &format!("{}/missing.bin", server.url()),
                &dir.path().join("missing.bin"),
            )
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_pipeline_component_filter() {
        assert!(is_pipeline_component_file("unet/config.json"));
        assert!(is_pipeline_component_file(
            "unet/diffusion_pytorch_model.safetensors"
        ));
        assert!(is_pipeline_component_file("tokenizer/vocab.txt"));
        assert!(!is_pipeline_component_file("unet/diffusion_pytorch_model.bin"));
        assert!(!is_pipeline_component_file("README.md"));
    }

    #[tokio::test]
    async fn test_api_builder_with_cache_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let api = ApiBuilder::new()
            .with_cache_dir(temp_dir.path().to_path_buf())
            .build();
        assert!(api.is_ok());
    }

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn test_download_small_transformer() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = download_snapshot(
            "sentence-transformers/all-MiniLM-L6-v2",
            None,
            Some(temp_dir.path().to_path_buf()),
            SnapshotLayout::Transformer,
        )
        .await
        .unwrap();
        assert!(path.join("config.json").exists());
    }
}
