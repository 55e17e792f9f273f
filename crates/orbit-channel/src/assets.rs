//! Attachment storage behind a trait so the actor never cares where
//! bytes land. The filesystem store mirrors how assets are served:
//! files under a root directory, URLs under a base prefix.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

/// An attachment received from a client, ready to be stored.
#[derive(Debug)]
pub struct Upload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store the bytes under `key` and return the public URL.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;
}

/// Local-disk store: `<root>/<key>` on disk, `<base_url>/<key>` on the
/// wire.
pub struct FsBlobStore {
    root: PathBuf,
    base_url: String,
}

impl FsBlobStore {
    pub async fn new(root: PathBuf, base_url: String) -> Result<Self> {
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("creating asset root {}", root.display()))?;
        Ok(Self {
            root,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing asset {}", path.display()))?;

        info!("stored asset {key}");
        Ok(format!("{}/{key}", self.base_url))
    }
}
