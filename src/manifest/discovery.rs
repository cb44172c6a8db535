//! Manifest discovery from object storage

use super::record::{ManifestFormat, ManifestRecord};
use crate::config::{ManifestVersion, SourceConfig};
use crate::error::Result;
use crate::storage::BillingStore;
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Discovers billing manifests under the configured export prefix.
///
/// Listing failures are fatal; a single manifest that fails to download
/// or parse is logged and skipped so one bad object cannot block the
/// rest of the history.
pub struct ManifestDiscovery<'a> {
    store: &'a BillingStore,
    source: &'a SourceConfig,
}

impl<'a> ManifestDiscovery<'a> {
    pub fn new(store: &'a BillingStore, source: &'a SourceConfig) -> Self {
        Self { store, source }
    }

    /// Discover all manifests, newest billing period first, excluding
    /// executions already present in `loaded` (period -> execution id).
    ///
    /// Only an exact id match is skipped; a known period with a new
    /// execution id is kept so its partition gets replaced.
    pub async fn discover(
        &self,
        loaded: &HashMap<String, String>,
    ) -> Result<Vec<ManifestRecord>> {
        let format = match self.source.manifest_version {
            ManifestVersion::V1 => ManifestFormat::V1,
            ManifestVersion::V2 => ManifestFormat::V2,
        };

        let keys = self.store.list(&self.source.export_name).await?;
        let pattern = self.manifest_pattern();
        debug!(pattern = %pattern, "matching manifest keys");

        let manifest_keys: Vec<&String> =
            keys.iter().filter(|key| pattern.is_match(key)).collect();

        let mut manifests = Vec::new();
        for key in manifest_keys {
            match self.fetch_and_parse(key, format).await {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping unparseable manifest");
                }
            }
        }

        manifests.sort_by(|a, b| b.billing_period.cmp(&a.billing_period));

        let before = manifests.len();
        manifests.retain(|m| {
            let already = loaded.get(&m.billing_period.to_string()) == Some(&m.id);
            if already {
                info!(
                    period = %m.billing_period,
                    execution = %m.id,
                    "skipping manifest, execution already loaded"
                );
            }
            !already
        });
        if manifests.len() < before {
            info!(
                skipped = before - manifests.len(),
                remaining = manifests.len(),
                "filtered already-loaded manifests"
            );
        }

        Ok(manifests)
    }

    async fn fetch_and_parse(&self, key: &str, format: ManifestFormat) -> Result<ManifestRecord> {
        let bytes = self.store.get(key).await?;
        ManifestRecord::parse(&bytes, key, format)
    }

    /// Version-specific manifest key pattern under the export prefix
    fn manifest_pattern(&self) -> Regex {
        let base = regex::escape(&self.store.qualified(&self.source.export_name));
        let export = regex::escape(&self.source.export_name);
        let pattern = match self.source.manifest_version {
            ManifestVersion::V1 => {
                format!(r"^{base}/\d{{8}}-\d{{8}}/{export}-Manifest\.json$")
            }
            ManifestVersion::V2 => {
                format!(r"^{base}/metadata/BILLING_PERIOD=\d{{4}}-\d{{2}}/{export}-Manifest\.json$")
            }
        };
        Regex::new(&pattern).expect("valid manifest pattern")
    }
}
