//! Blob storage abstraction for load sources.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, BufReader};

/// A store of named blobs that produce readable byte streams.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Names of all blobs in the store, sorted.
    async fn list(&self) -> Result<Vec<String>>;

    /// Open a blob by its exact name.
    async fn open(&self, name: &str) -> Result<Box<dyn AsyncRead + Unpin + Send>>;

    /// Resolve a file name fragment to exactly one blob name.
    ///
    /// Matching is a case-insensitive substring test. Zero matches and
    /// multiple matches are both errors; a load targets a single file.
    async fn resolve(&self, fragment: &str) -> Result<String> {
        let needle = fragment.to_lowercase();
        let mut matches: Vec<String> = self
            .list()
            .await?
            .into_iter()
            .filter(|name| name.to_lowercase().contains(&needle))
            .collect();
        match matches.len() {
            0 => bail!("No source file matches '{fragment}'"),
            1 => Ok(matches.remove(0)),
            _ => bail!(
                "Ambiguous source file '{}': matches {}",
                fragment,
                matches.join(", ")
            ),
        }
    }
}

/// Blob store backed by a local directory. Only regular files at the top
/// level are visible; subdirectories are not traversed.
pub struct LocalBlobStore {
    dir: PathBuf,
}

impl LocalBlobStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to read source directory {}", self.dir.display()))?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn open(&self, name: &str) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
        let path = self.dir.join(name);
        let file = fs::File::open(&path)
            .await
            .with_context(|| format!("Failed to open source file {}", path.display()))?;
        Ok(Box::new(BufReader::new(file)))
    }
}
