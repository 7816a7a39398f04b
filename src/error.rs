//! Error types for model resolution and loading

use std::path::PathBuf;

/// Errors raised while resolving, downloading or loading a model
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Unknown family, bad parameters or an unsupported combination.
    /// Never retried.
    #[error("invalid model configuration: {0}")]
    InvalidConfiguration(String),

    /// Both the primary mirror and the backup (if any) failed
    #[error(
        "failed to download model [{model_name}]; retry later or place it in the cache directory manually from {primary_url}{}",
        backup_suffix(.backup_url)
    )]
    DownloadFailed {
        model_name: String,
        primary_url: String,
        backup_url: Option<String>,
    },

    /// The artifact exists but the adapter could not use it
    #[error("artifact {path:?} is unusable: {reason}")]
    CorruptArtifact { path: PathBuf, reason: String },

    /// HuggingFace Hub snapshot could not be fetched
    #[error("hub download failed for {model_id}: {reason}")]
    Hub { model_id: String, reason: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ModelError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::CorruptArtifact {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether a forced re-download could plausibly fix this error
    pub fn is_corrupt_artifact(&self) -> bool {
        matches!(self, Self::CorruptArtifact { .. })
    }
}

fn backup_suffix(backup_url: &Option<String>) -> String {
    backup_url
        .as_deref()
        .map(|url| format!(" or {url}"))
        .unwrap_or_default()
}

pub type ModelResult<T> = Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_failed_lists_both_urls() {
        let err = ModelError::DownloadFailed {
            model_name: "en.sp.model".to_string(),
            primary_url: "https://primary/en.sp.model".to_string(),
            backup_url: Some("https://backup/en.sp.model".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("[en.sp.model]"));
        assert!(msg.contains("https://primary/en.sp.model"));
        assert!(msg.contains("or https://backup/en.sp.model"));
    }

    #[test]
    fn test_download_failed_without_backup() {
        let err = ModelError::DownloadFailed {
            model_name: "custom.bin".to_string(),
            primary_url: "https://primary/custom.bin".to_string(),
            backup_url: None,
        };
        assert!(!err.to_string().contains(" or "));
    }

    #[test]
    fn test_only_corrupt_artifact_is_retryable() {
        assert!(ModelError::corrupt("/tmp/x", "empty").is_corrupt_artifact());
        assert!(!ModelError::invalid("bad lang").is_corrupt_artifact());
        assert!(
            !ModelError::io("read", std::io::Error::other("boom")).is_corrupt_artifact()
        );
    }
}
