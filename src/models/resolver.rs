//! Local artifact resolution
//!
//! Turns a model name into a path on disk. Existing local paths are returned
//! as-is; anything else lives under the cache directory and is downloaded from
//! the primary mirror, then the backup mirror, when missing.
//!
//! Downloads land in a per-attempt temporary file next to the target and are
//! renamed into place only once complete, so concurrent cold starts racing on
//! the same artifact never expose a partial file.

use crate::config::ZooConfig;
use crate::error::{ModelError, ModelResult};
use crate::metrics;
use crate::models::cache::is_artifact_cached;
use crate::models::download::{Fetcher, HttpFetcher};
use crate::models::fallback::DownloadFallbackPolicy;
use anyhow::Context;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Resolves model names to local artifact paths
pub struct ArtifactResolver {
    cache_dir: PathBuf,
    policy: DownloadFallbackPolicy,
    fetcher: Arc<dyn Fetcher>,
}

impl ArtifactResolver {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        policy: DownloadFallbackPolicy,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            policy,
            fetcher,
        }
    }

    /// Build a resolver using the HTTP fetcher and the configured mirrors
    pub fn from_config(config: &ZooConfig) -> anyhow::Result<Self> {
        let policy = DownloadFallbackPolicy::new(&config.primary_base_url, &config.backup_links)?;
        Ok(Self::new(
            config.cache_dir.clone(),
            policy,
            Arc::new(HttpFetcher::new()),
        ))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn policy(&self) -> &DownloadFallbackPolicy {
        &self.policy
    }

    /// Return a usable local path for `model_name`, downloading it if absent
    ///
    /// With `force`, an existing cached copy is treated as corrupt and deleted
    /// before downloading again. A name that is already an existing path is
    /// returned unchanged, bypassing the cache directory.
    pub async fn resolve(&self, model_name: &str, force: bool) -> ModelResult<PathBuf> {
        let local = Path::new(model_name);
        if local.exists() {
            return Ok(local.to_path_buf());
        }

        check_cache_relative(model_name)?;
        let cached = self.cache_dir.join(model_name);
        let parent = cached.parent().unwrap_or(self.cache_dir.as_path());
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ModelError::io(format!("Failed to create {:?}", parent), e))?;

        if force {
            match tokio::fs::remove_file(&cached).await {
                Ok(()) => {
                    tracing::info!(path = ?cached, "Model invalid, forcing re-download")
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::info!(path = ?cached, "Model not found, downloading")
                }
                Err(e) => {
                    return Err(ModelError::io(
                        format!("Failed to remove {:?}", cached),
                        e,
                    ));
                }
            }
        }

        if !is_artifact_cached(&self.cache_dir, model_name) {
            self.download(model_name, &cached).await?;
        }

        Ok(cached)
    }

    /// Load through `load`, retrying once against a forced re-download
    ///
    /// `load` receives the resolved path and whether this is the forced
    /// attempt. Only [`ModelError::CorruptArtifact`] triggers the retry; the
    /// second attempt's error is returned as-is.
    pub async fn load_with_forced_retry<T, F, Fut>(
        &self,
        model_name: &str,
        mut load: F,
    ) -> ModelResult<T>
    where
        F: FnMut(PathBuf, bool) -> Fut,
        Fut: Future<Output = ModelResult<T>>,
    {
        let path = self.resolve(model_name, false).await?;
        match load(path, false).await {
            Err(e) if e.is_corrupt_artifact() => {
                tracing::warn!(
                    model_name = %model_name,
                    error = %e,
                    "Artifact unusable, retrying with forced re-download"
                );
                metrics::record_forced_retry(model_name);
                let path = self.resolve(model_name, true).await?;
                load(path, true).await
            }
            other => other,
        }
    }

    async fn download(&self, model_name: &str, dest: &Path) -> ModelResult<()> {
        let primary_url = self.policy.primary_url_for(model_name);
        tracing::info!(model_name = %model_name, url = %primary_url, "Downloading model");

        match self.fetch_atomic(&primary_url, dest).await {
            Ok(bytes) => {
                metrics::record_download("primary", true);
                tracing::info!(model_name = %model_name, bytes, "Downloaded model from primary mirror");
                return Ok(());
            }
            Err(e) => {
                metrics::record_download("primary", false);
                tracing::warn!(
                    model_name = %model_name,
                    url = %primary_url,
                    error = %format!("{:#}", e),
                    "Primary mirror failed"
                );
            }
        }

        let Some(backup_url) = self.policy.backup_download_url(model_name) else {
            tracing::error!(
                model_name = %model_name,
                primary_url = %primary_url,
                "No backup mirror matches model name"
            );
            return Err(ModelError::DownloadFailed {
                model_name: model_name.to_string(),
                primary_url,
                backup_url: None,
            });
        };

        match self.fetch_atomic(&backup_url, dest).await {
            Ok(bytes) => {
                metrics::record_download("backup", true);
                tracing::info!(model_name = %model_name, url = %backup_url, bytes, "Downloaded model from backup mirror");
                Ok(())
            }
            Err(e) => {
                metrics::record_download("backup", false);
                tracing::error!(
                    model_name = %model_name,
                    primary_url = %primary_url,
                    backup_url = %backup_url,
                    error = %format!("{:#}", e),
                    "Downloading model failed from every mirror"
                );
                Err(ModelError::DownloadFailed {
                    model_name: model_name.to_string(),
                    primary_url,
                    backup_url: Some(backup_url),
                })
            }
        }
    }

    /// Fetch into a unique sibling temp file, then rename over `dest`
    async fn fetch_atomic(&self, url: &str, dest: &Path) -> anyhow::Result<u64> {
        let temp = temp_path_for(dest);
        let result: anyhow::Result<u64> = async {
            let bytes = self.fetcher.fetch(url, &temp).await?;
            tokio::fs::rename(&temp, dest)
                .await
                .with_context(|| format!("Failed to move download into {:?}", dest))?;
            Ok(bytes)
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&temp).await;
        }
        result
    }
}

/// Cache entries must stay inside the cache directory
fn check_cache_relative(model_name: &str) -> ModelResult<()> {
    if model_name.is_empty() {
        return Err(ModelError::invalid("model name is empty"));
    }
    let escapes = Path::new(model_name)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(ModelError::invalid(format!(
            "model name '{}' is not a path inside the cache directory",
            model_name
        )));
    }
    Ok(())
}

fn temp_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(
        ".{}.{}.{}.part",
        name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ))
}

/// Unpack a `.zip` artifact next to itself
///
/// Returns the sibling directory named by stripping the suffix. Extraction is
/// skipped when that directory already exists, unless `force` is set, in which
/// case the stale directory is removed first.
pub async fn extract_archive(archive: &Path, force: bool) -> ModelResult<PathBuf> {
    let target = archive_target(archive)?;

    if target.is_dir() {
        if !force {
            return Ok(target);
        }
        tokio::fs::remove_dir_all(&target)
            .await
            .map_err(|e| ModelError::io(format!("Failed to remove {:?}", target), e))?;
    }

    let archive = archive.to_path_buf();
    let extracted = target.clone();
    tokio::task::spawn_blocking(move || unzip_into_parent(&archive, &extracted))
        .await
        .map_err(|e| ModelError::io("Archive extraction task failed", std::io::Error::other(e)))??;

    Ok(target)
}

fn archive_target(archive: &Path) -> ModelResult<PathBuf> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_suffix(".zip"))
        .ok_or_else(|| ModelError::invalid(format!("{:?} is not a .zip archive", archive)))?;
    Ok(archive.with_file_name(name))
}

fn unzip_into_parent(archive: &Path, target: &Path) -> ModelResult<()> {
    let parent = archive.parent().unwrap_or(Path::new("."));
    tracing::info!(archive = ?archive, target = ?target, "Extracting archive");

    let file = std::fs::File::open(archive)
        .map_err(|e| ModelError::io(format!("Failed to open {:?}", archive), e))?;
    let result = zip::ZipArchive::new(file).and_then(|mut zip| zip.extract(parent));

    if let Err(e) = result {
        let _ = std::fs::remove_dir_all(target);
        return Err(ModelError::corrupt(archive, e));
    }
    if !target.is_dir() {
        return Err(ModelError::corrupt(
            archive,
            format!("archive does not contain {:?}", target.file_name().unwrap_or_default()),
        ));
    }
    Ok(())
}
