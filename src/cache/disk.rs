// Durable disk cache backend.
// One JSON file per (namespace, key); file mtime is the insert timestamp.
// Writes are atomic via temp file + rename.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use directories::ProjectDirs;
use tracing::info;

use crate::error::{OctorankError, Result};

use super::CacheBackend;

pub struct DiskBackend {
    root: PathBuf,
}

impl DiskBackend {
    /// Opens (and creates) the cache root. Without an explicit path the
    /// platform cache directory is used.
    pub fn new(root: Option<PathBuf>) -> Result<Self> {
        let root = match root {
            Some(path) => path,
            None => ProjectDirs::from("", "", "octorank")
                .map(|dirs| dirs.cache_dir().to_path_buf())
                .ok_or_else(|| OctorankError::Other("no cache directory available".into()))?,
        };
        fs::create_dir_all(&root)?;
        info!("Disk cache at {}", root.display());
        Ok(Self { root })
    }

    fn entry_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.root
            .join(namespace)
            .join(format!("{}.json", sanitize_name(key)))
    }
}

#[async_trait]
impl CacheBackend for DiskBackend {
    async fn read(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(namespace, key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        if contents.trim().is_empty() {
            return Err(OctorankError::Other(format!(
                "empty cache file {}",
                path.display()
            )));
        }
        Ok(Some(contents))
    }

    async fn write(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let path = self.entry_path(namespace, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically via temp file
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let path = self.entry_path(namespace, key);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    async fn insert_time_ms(&self, namespace: &str, key: &str) -> Result<Option<u64>> {
        let path = self.entry_path(namespace, key);
        if !path.exists() {
            return Ok(None);
        }
        let modified = fs::metadata(&path)?.modified()?;
        let millis = modified
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Ok(Some(millis))
    }
}

/// Sanitize a key for use as a file name.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}
