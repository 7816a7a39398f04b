//! Artifact cache directory inspection
//!
//! The cache directory holds one entry per downloaded artifact, named by the
//! model name. Extracted archives sit next to their archive:
//! ```text
//! ~/.cache/model-zoo/models/
//! ├── lid.176.bin
//! ├── en.sp.model
//! ├── en.arpa.bin
//! ├── punkt.english.pickle
//! ├── en_core_web_md-3.5.0.zip
//! └── en_core_web_md-3.5.0/
//!     └── ...
//! ```
//! In-flight downloads are hidden `.<name>.<pid>.<n>.part` files and are not
//! reported.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One entry of the artifact cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedArtifact {
    /// Model name (path relative to the cache directory)
    pub name: String,
    pub path: PathBuf,
    /// Total size in bytes (recursive for directories)
    pub size_bytes: u64,
    pub is_dir: bool,
    /// Last modification time, when the filesystem reports one
    pub modified: Option<DateTime<Utc>>,
}

/// Check if an artifact is present in the cache directory
pub fn is_artifact_cached(cache_dir: &Path, model_name: &str) -> bool {
    cache_dir.join(model_name).exists()
}

/// List all cached artifacts, sorted by name
pub fn list_cached_artifacts(cache_dir: &Path) -> Vec<CachedArtifact> {
    let Ok(entries) = std::fs::read_dir(cache_dir) else {
        return Vec::new();
    };

    let mut artifacts: Vec<_> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_partial_download(&name) {
                return None;
            }
            let path = entry.path();
            let metadata = entry.metadata().ok();
            let is_dir = path.is_dir();
            let size_bytes = if is_dir {
                dir_size(&path)
            } else {
                metadata.as_ref().map(|m| m.len()).unwrap_or(0)
            };
            let modified = metadata
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from);
            Some(CachedArtifact {
                name,
                path,
                size_bytes,
                is_dir,
                modified,
            })
        })
        .collect();

    artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    artifacts
}

fn is_partial_download(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".part")
}

/// Recursively calculate directory size
pub fn dir_size(path: &Path) -> u64 {
    let mut size = 0;

    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                size += dir_size(&path);
            } else if let Ok(metadata) = std::fs::metadata(&path) {
                size += metadata.len();
            }
        }
    }

    size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_missing_dir() {
        assert!(list_cached_artifacts(Path::new("/nonexistent/model-zoo-12345")).is_empty());
    }

    #[test]
    fn test_list_sorted_and_sized() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("lid.176.bin"), "abcd").unwrap();
        std::fs::write(temp_dir.path().join("en.sp.model"), "ab").unwrap();
        let pkg = temp_dir.path().join("en_core_web_md-3.5.0");
        std::fs::create_dir(&pkg).unwrap();
        std::fs::write(pkg.join("meta.json"), "{}").unwrap();

        let artifacts = list_cached_artifacts(temp_dir.path());
        let names: Vec<_> = artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["en.sp.model", "en_core_web_md-3.5.0", "lid.176.bin"]);
        assert_eq!(artifacts[0].size_bytes, 2);
        assert!(artifacts[1].is_dir);
        assert_eq!(artifacts[1].size_bytes, 2);
        assert!(artifacts[2].modified.is_some());
    }

    #[test]
    fn test_partial_downloads_hidden() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join(".lid.176.bin.42.0.part"), "ab").unwrap();
        assert!(list_cached_artifacts(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_is_artifact_cached() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(!is_artifact_cached(temp_dir.path(), "lid.176.bin"));
        std::fs::write(temp_dir.path().join("lid.176.bin"), "x").unwrap();
        assert!(is_artifact_cached(temp_dir.path(), "lid.176.bin"));
    }

    #[test]
    fn test_dir_size_nested_dirs() {
        let temp_dir = tempfile::tempdir().unwrap();

        let subdir = temp_dir.path().join("subdir");
        std::fs::create_dir(&subdir).unwrap();
        std::fs::write(subdir.join("file1.txt"), "abc").unwrap();
        std::fs::write(temp_dir.path().join("file2.txt"), "defgh").unwrap();

        assert_eq!(dir_size(temp_dir.path()), 8);
    }
}
