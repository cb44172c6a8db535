//! Object storage access for billing exports
//!
//! Wraps the `object_store` crate behind the three operations the pipeline
//! needs: list keys under a prefix, fetch an object, download an object to
//! a local file. Retries are whatever the underlying client does by
//! default; the pipeline adds none of its own.

use crate::error::{Error, Result};
use bytes::Bytes;
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::path::Path;
use std::sync::Arc;

/// Source object storage parsed from a URL
#[derive(Debug, Clone)]
pub struct BillingStore {
    /// The object store implementation
    store: Arc<dyn ObjectStore>,
    /// Base path prefix within the bucket/container
    prefix: String,
    /// Original URL scheme for logging
    scheme: String,
}

impl BillingStore {
    /// Parse a source URL and create the appropriate object store
    ///
    /// Supported formats:
    /// - `s3://bucket/prefix/` - AWS S3
    /// - `gs://bucket/prefix/` - Google Cloud Storage
    /// - `az://container/prefix/` - Azure Blob Storage
    /// - `/local/path/` or `./path/` - Local filesystem
    pub fn parse(url: &str) -> Result<Self> {
        if url.starts_with("s3://") {
            Self::parse_s3(url)
        } else if url.starts_with("gs://") {
            Self::parse_gcs(url)
        } else if url.starts_with("az://") {
            Self::parse_azure(url)
        } else {
            Self::parse_local(url)
        }
    }

    fn parse_s3(url: &str) -> Result<Self> {
        let without_scheme = url
            .strip_prefix("s3://")
            .ok_or_else(|| Error::InvalidStorageUrl {
                url: url.to_string(),
            })?;

        let (bucket, prefix) = split_bucket_prefix(without_scheme);

        let store = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(|e| Error::config(format!("Failed to create s3 client: {e}")))?;

        Ok(Self {
            store: Arc::new(store),
            prefix,
            scheme: "s3".to_string(),
        })
    }

    fn parse_gcs(url: &str) -> Result<Self> {
        let without_scheme = url
            .strip_prefix("gs://")
            .ok_or_else(|| Error::InvalidStorageUrl {
                url: url.to_string(),
            })?;

        let (bucket, prefix) = split_bucket_prefix(without_scheme);

        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(|e| Error::config(format!("Failed to create GCS client: {e}")))?;

        Ok(Self {
            store: Arc::new(store),
            prefix,
            scheme: "gs".to_string(),
        })
    }

    fn parse_azure(url: &str) -> Result<Self> {
        let without_scheme = url
            .strip_prefix("az://")
            .ok_or_else(|| Error::InvalidStorageUrl {
                url: url.to_string(),
            })?;

        let (container, prefix) = split_bucket_prefix(without_scheme);

        let store = MicrosoftAzureBuilder::from_env()
            .with_container_name(container)
            .build()
            .map_err(|e| Error::config(format!("Failed to create Azure client: {e}")))?;

        Ok(Self {
            store: Arc::new(store),
            prefix,
            scheme: "az".to_string(),
        })
    }

    fn parse_local(path: &str) -> Result<Self> {
        let path = path.strip_prefix("file://").unwrap_or(path);

        let store = LocalFileSystem::new_with_prefix(path)
            .map_err(|e| Error::config(format!("Failed to open local store {path}: {e}")))?;

        Ok(Self {
            store: Arc::new(store),
            prefix: String::new(),
            scheme: "file".to_string(),
        })
    }

    /// Get the scheme (s3, gs, az, file)
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Join a relative path onto the store's base prefix
    pub fn qualified(&self, rel: &str) -> String {
        if self.prefix.is_empty() {
            rel.to_string()
        } else {
            format!("{}/{rel}", self.prefix.trim_end_matches('/'))
        }
    }

    /// List all object keys under a prefix relative to the base prefix.
    ///
    /// Any listing failure (missing bucket, bad credentials) is a fatal
    /// discovery error for the caller.
    pub async fn list(&self, rel_prefix: &str) -> Result<Vec<String>> {
        let full = self.qualified(rel_prefix);
        let prefix = ObjectPath::from(full.as_str());
        let mut stream = self.store.list(Some(&prefix));

        let mut keys = Vec::new();
        while let Some(entry) = stream.next().await {
            let meta = entry.map_err(|e| {
                Error::discovery(format!("listing {}://{full} failed: {e}", self.scheme))
            })?;
            keys.push(meta.location.to_string());
        }
        Ok(keys)
    }

    /// Fetch an object's contents by its full key
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        let path = ObjectPath::from(key);
        let result = self.store.get(&path).await?;
        Ok(result.bytes().await?)
    }

    /// Download an object to a local file, creating parent directories
    pub async fn download_file(&self, key: &str, local_path: &Path) -> Result<()> {
        let bytes = self.get(key).await?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, &bytes).await?;
        Ok(())
    }
}

fn split_bucket_prefix(without_scheme: &str) -> (&str, String) {
    match without_scheme.find('/') {
        Some(idx) => (
            &without_scheme[..idx],
            without_scheme[idx + 1..]
                .trim_end_matches('/')
                .to_string(),
        ),
        None => (without_scheme, String::new()),
    }
}
