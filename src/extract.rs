//! Staging download of manifest data files
//!
//! Files land under `staging/{billing_period}/{execution_id}/`, so a
//! period can hold several executions side by side while downloads are
//! in flight. Once an execution is fully staged, superseded execution
//! directories for the same period are removed.

use crate::error::Result;
use crate::manifest::ManifestRecord;
use crate::storage::BillingStore;
use crate::types::ManifestState;
use std::path::PathBuf;
use tracing::{info, warn};

/// Aggregate download statistics for one extract run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractStats {
    pub manifests_processed: usize,
    pub files_downloaded: usize,
    pub errors: usize,
}

/// Downloads billing data files into the staging directory
pub struct Extractor<'a> {
    store: &'a BillingStore,
    staging_dir: PathBuf,
}

impl<'a> Extractor<'a> {
    pub fn new(store: &'a BillingStore, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            staging_dir: staging_dir.into(),
        }
    }

    /// Directory holding one execution's staged files
    pub fn execution_dir(&self, manifest: &ManifestRecord) -> PathBuf {
        self.staging_dir
            .join(manifest.billing_period.to_string())
            .join(&manifest.id)
    }

    /// Execution ids currently staged for a billing period
    pub fn staged_execution_ids(&self, billing_period: &str) -> Vec<String> {
        let period_dir = self.staging_dir.join(billing_period);
        let Ok(entries) = std::fs::read_dir(&period_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(std::result::Result::ok)
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect()
    }

    /// Download every data file of the given manifests.
    ///
    /// Per-file failures are counted and leave the manifest partially
    /// staged; they never abort sibling manifests. An execution whose
    /// directory already exists is skipped wholesale.
    pub async fn stage(&self, manifests: &[ManifestRecord]) -> Result<ExtractStats> {
        let mut stats = ExtractStats::default();

        for manifest in manifests {
            let period = manifest.billing_period.to_string();

            if self.staged_execution_ids(&period).contains(&manifest.id) {
                info!(
                    period = %period,
                    execution = %manifest.id,
                    state = %ManifestState::Staged,
                    "already staged, skipping"
                );
                stats.manifests_processed += 1;
                continue;
            }

            info!(
                period = %period,
                execution = %manifest.id,
                files = manifest.data_files.len(),
                state = %ManifestState::Downloading,
                "staging data files"
            );

            let target_dir = self.execution_dir(manifest);
            let mut downloaded = 0usize;

            for key in &manifest.data_files {
                let filename = file_name(key);
                let local_path = target_dir.join(filename);

                match self.store.download_file(key, &local_path).await {
                    Ok(()) => {
                        downloaded += 1;
                        stats.files_downloaded += 1;
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "failed to download data file");
                        stats.errors += 1;
                    }
                }
            }

            if downloaded == manifest.data_files.len() {
                info!(period = %period, execution = %manifest.id, state = %ManifestState::Staged, "staged");
                let removed = self.clean_superseded(&period, &manifest.id);
                if removed > 0 {
                    info!(period = %period, removed, "removed superseded execution directories");
                }
            } else {
                warn!(
                    period = %period,
                    downloaded,
                    total = manifest.data_files.len(),
                    "partial download"
                );
            }

            stats.manifests_processed += 1;
        }

        Ok(stats)
    }

    /// Remove staged execution directories for a period other than the
    /// one to keep. Returns the number removed.
    fn clean_superseded(&self, billing_period: &str, keep_execution_id: &str) -> usize {
        let mut removed = 0;
        for id in self.staged_execution_ids(billing_period) {
            if id != keep_execution_id {
                let dir = self.staging_dir.join(billing_period).join(&id);
                if std::fs::remove_dir_all(&dir).is_ok() {
                    removed += 1;
                }
            }
        }
        removed
    }
}

/// Final path component of an object key
fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestFormat;

    fn manifest(id: &str, period: &str, data_files: Vec<String>) -> ManifestRecord {
        ManifestRecord {
            id: id.to_string(),
            format: ManifestFormat::V2,
            billing_period: period.parse().unwrap(),
            period_start: format!("{period}-01"),
            period_end: String::new(),
            source_key: "m".to_string(),
            data_files,
            columns: vec![],
            compression: "GZIP".to_string(),
        }
    }

    #[tokio::test]
    async fn test_stage_and_clean_superseded() {
        let source = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(source.path().join("data")).unwrap();
        std::fs::write(source.path().join("data/part-0.csv"), b"h\n1\n").unwrap();

        let staging = tempfile::tempdir().unwrap();
        let store = BillingStore::parse(source.path().to_str().unwrap()).unwrap();
        let extractor = Extractor::new(&store, staging.path());

        // Simulate a previously staged execution for the same period
        std::fs::create_dir_all(staging.path().join("2024-01/exec-old")).unwrap();

        let m = manifest("exec-new", "2024-01", vec!["data/part-0.csv".to_string()]);
        let stats = extractor.stage(std::slice::from_ref(&m)).await.unwrap();

        assert_eq!(stats.manifests_processed, 1);
        assert_eq!(stats.files_downloaded, 1);
        assert_eq!(stats.errors, 0);
        assert!(staging.path().join("2024-01/exec-new/part-0.csv").exists());
        // The superseded execution directory is gone
        assert!(!staging.path().join("2024-01/exec-old").exists());

        // Second run skips the already-staged execution
        let stats = extractor.stage(std::slice::from_ref(&m)).await.unwrap();
        assert_eq!(stats.files_downloaded, 0);
        assert_eq!(stats.manifests_processed, 1);
    }

    #[tokio::test]
    async fn test_missing_file_counts_error_keeps_going() {
        let source = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let store = BillingStore::parse(source.path().to_str().unwrap()).unwrap();
        let extractor = Extractor::new(&store, staging.path());

        let m = manifest("exec-1", "2024-01", vec!["data/nope.csv".to_string()]);
        let stats = extractor.stage(std::slice::from_ref(&m)).await.unwrap();

        assert_eq!(stats.errors, 1);
        assert_eq!(stats.files_downloaded, 0);
        assert_eq!(stats.manifests_processed, 1);
    }
}
