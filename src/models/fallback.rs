//! Mirror selection for artifact downloads
//!
//! Every artifact is first requested from the primary mirror. When that fails,
//! the model name is matched against an ordered table of glob patterns and the
//! first match names the backup mirror. Patterns are checked in declaration
//! order; if two patterns match, the earlier one wins.

use crate::config::BackupLink;
use anyhow::{Context, Result};
use glob::Pattern;

/// Primary mirror plus the ordered backup table
#[derive(Debug, Clone)]
pub struct DownloadFallbackPolicy {
    primary_base_url: String,
    backups: Vec<(Pattern, String)>,
}

impl DownloadFallbackPolicy {
    /// Build a policy from configured backup links, compiling every pattern
    pub fn new(primary_base_url: impl Into<String>, links: &[BackupLink]) -> Result<Self> {
        let backups = links
            .iter()
            .map(|link| {
                Pattern::new(&link.pattern)
                    .map(|pattern| (pattern, link.url.clone()))
                    .with_context(|| format!("Invalid backup pattern '{}'", link.pattern))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            primary_base_url: primary_base_url.into(),
            backups,
        })
    }

    /// URL of `model_name` on the primary mirror
    pub fn primary_url_for(&self, model_name: &str) -> String {
        join_url(&self.primary_base_url, model_name)
    }

    /// Base URL of the first backup mirror whose pattern matches `model_name`
    pub fn backup_url_for(&self, model_name: &str) -> Option<&str> {
        self.backups
            .iter()
            .find(|(pattern, _)| pattern.matches(model_name))
            .map(|(_, url)| url.as_str())
    }

    /// Full backup URL of `model_name`, if any backup pattern matches
    pub fn backup_download_url(&self, model_name: &str) -> Option<String> {
        self.backup_url_for(model_name)
            .map(|base| join_url(base, model_name))
    }
}

/// Join a mirror base URL and a model name with exactly one separator
pub fn join_url(base: &str, model_name: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        model_name.trim_start_matches('/')
    )
}
