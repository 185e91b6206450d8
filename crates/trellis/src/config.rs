//! Sync configuration.
//!
//! Loaded from YAML by the embedding scheduler and passed explicitly into
//! every sync pass:
//!
//! ```yaml
//! retry-bound: 7
//! page-size: 50
//! parallel-projects: true
//! dereplication: invasive
//! state:
//!   backend: jsonl
//!   path: .trellis/sync-state.jsonl
//! projects:
//!   - id: acme/widgets
//!     trackable: widgets
//!     template: bug
//! ```

use crate::domain::{ProjectId, TemplateId, TrackableId};
use crate::error::{Error, Result};
use crate::sync::state::StateBackend;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;

/// Failed timeline attempts after which an issue is left for an operator.
pub const DEFAULT_RETRY_BOUND: u32 = 7;

/// Default page size for remote listings.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Largest page size remote trackers are asked for.
pub const MAX_PAGE_SIZE: u32 = 100;

/// How newly observed remote issues are matched to local ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DereplicationStrategy {
    /// Correlation stamp embedded in the title
    #[default]
    Invasive,

    /// `project#remote-id` external reference
    ExternalKey,
}

/// One remote project and where its issues land locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project on the remote tracker
    pub id: ProjectId,

    /// Local container for the project's issues
    pub trackable: TrackableId,

    /// Template imported issues are validated against
    pub template: TemplateId,
}

/// Configuration of the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SyncConfig {
    /// Failed attempts before an issue is excluded from automatic retries
    pub retry_bound: u32,

    /// Page size for remote listings
    pub page_size: u32,

    /// Sync projects concurrently instead of one after another
    pub parallel_projects: bool,

    /// Matching strategy for new remote issues
    pub dereplication: DereplicationStrategy,

    /// Where sync state is kept
    pub state: StateBackend,

    /// Projects to sync
    pub projects: Vec<ProjectConfig>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_bound: DEFAULT_RETRY_BOUND,
            page_size: DEFAULT_PAGE_SIZE,
            parallel_projects: true,
            dereplication: DereplicationStrategy::default(),
            state: StateBackend::default(),
            projects: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Load and validate configuration from a YAML file.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config: Self =
            serde_yaml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_yaml::to_string(self).map_err(|e| Error::Config(format!("YAML error: {e}")))?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Look up a configured project.
    #[must_use]
    pub fn project(&self, id: &ProjectId) -> Option<&ProjectConfig> {
        self.projects.iter().find(|project| &project.id == id)
    }

    /// Check the configuration for values the sync engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a zero retry bound, a page size outside
    /// `1..=100`, or an empty or duplicated project id.
    pub fn validate(&self) -> Result<()> {
        if self.retry_bound == 0 {
            return Err(Error::Config("retry-bound must be at least 1".to_string()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(Error::Config(format!(
                "page-size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }

        let mut seen = HashSet::new();
        for project in &self.projects {
            if project.id.as_str().trim().is_empty() {
                return Err(Error::Config("project id cannot be empty".to_string()));
            }
            if !seen.insert(&project.id) {
                return Err(Error::Config(format!(
                    "project '{}' is configured more than once",
                    project.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::tempdir;

    fn project(id: &str) -> ProjectConfig {
        ProjectConfig {
            id: id.into(),
            trackable: "widgets".into(),
            template: "bug".into(),
        }
    }

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.retry_bound, 7);
        assert_eq!(config.page_size, 50);
        assert!(config.parallel_projects);
        assert_eq!(config.dereplication, DereplicationStrategy::Invasive);
        assert_eq!(config.state, StateBackend::InMemory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let config: SyncConfig = serde_yaml::from_str(
            "dereplication: external-key\nprojects:\n  - id: acme/widgets\n    trackable: widgets\n    template: bug\n",
        )
        .unwrap();

        assert_eq!(config.retry_bound, DEFAULT_RETRY_BOUND);
        assert_eq!(config.dereplication, DereplicationStrategy::ExternalKey);
        assert_eq!(config.project(&"acme/widgets".into()), Some(&project("acme/widgets")));
    }

    #[rstest]
    #[case::zero_bound(SyncConfig { retry_bound: 0, ..SyncConfig::default() })]
    #[case::zero_page(SyncConfig { page_size: 0, ..SyncConfig::default() })]
    #[case::huge_page(SyncConfig { page_size: 101, ..SyncConfig::default() })]
    #[case::empty_id(SyncConfig { projects: vec![project(" ")], ..SyncConfig::default() })]
    #[case::duplicate(SyncConfig { projects: vec![project("a"), project("a")], ..SyncConfig::default() })]
    fn invalid_configs_are_rejected(#[case] config: SyncConfig) {
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync.yaml");
        let config = SyncConfig {
            page_size: 25,
            state: StateBackend::Jsonl {
                path: dir.path().join("state.jsonl"),
            },
            projects: vec![project("acme/widgets")],
            ..SyncConfig::default()
        };

        config.save(&path).await.unwrap();
        assert_eq!(SyncConfig::load(&path).await.unwrap(), config);
    }

    #[tokio::test]
    async fn load_rejects_invalid_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync.yaml");
        tokio::fs::write(&path, "page-size: 500\n").await.unwrap();

        assert!(matches!(SyncConfig::load(&path).await, Err(Error::Config(_))));
    }
}
