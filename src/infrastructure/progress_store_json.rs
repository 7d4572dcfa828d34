use std::path::{Path, PathBuf};

use anyhow::Context;
use log::debug;
use serde::Serialize;

use crate::{CrawlProgress, CrawlSummary, ProgressStore, StdResult};

/// A progress store backed by JSON files.
pub struct JsonFileProgressStore {
    /// The file holding the crawl progress.
    progress_path: PathBuf,

    /// The file receiving the final summary, if any.
    summary_path: Option<PathBuf>,
}

impl JsonFileProgressStore {
    /// Creates a new `JsonFileProgressStore` instance.
    pub fn new(progress_path: impl Into<PathBuf>, summary_path: Option<PathBuf>) -> Self {
        Self {
            progress_path: progress_path.into(),
            summary_path,
        }
    }

    /// Writes `value` through a temporary sibling file renamed over `path`.
    async fn write_atomically<T: Serialize + Sync>(path: &Path, value: &T) -> StdResult<()> {
        let json = serde_json::to_vec_pretty(value)?;
        let mut temporary_path = path.as_os_str().to_owned();
        temporary_path.push(".tmp");
        let temporary_path = PathBuf::from(temporary_path);
        tokio::fs::write(&temporary_path, json)
            .await
            .with_context(|| format!("Failed to write {}", temporary_path.display()))?;
        tokio::fs::rename(&temporary_path, path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl ProgressStore for JsonFileProgressStore {
    async fn load(&self) -> StdResult<Option<CrawlProgress>> {
        if !tokio::fs::try_exists(&self.progress_path).await? {
            return Ok(None);
        }
        let json = tokio::fs::read(&self.progress_path)
            .await
            .with_context(|| format!("Failed to read {}", self.progress_path.display()))?;
        let progress = serde_json::from_slice(&json)
            .with_context(|| format!("Corrupted progress file {}", self.progress_path.display()))?;

        Ok(Some(progress))
    }

    async fn save(&self, progress: &CrawlProgress) -> StdResult<()> {
        Self::write_atomically(&self.progress_path, progress).await?;
        debug!("Saved {progress} to {}", self.progress_path.display());

        Ok(())
    }

    async fn save_summary(&self, summary: &CrawlSummary) -> StdResult<()> {
        if let Some(summary_path) = &self.summary_path {
            Self::write_atomically(summary_path, summary).await?;
        }

        Ok(())
    }
}
