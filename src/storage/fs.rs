use anyhow::{Context, Result};
use bytes::Bytes;
use glob::{glob, Pattern};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

use super::Storage;

/// Objects stored as files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }

    fn key(root: &Path, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

impl Storage for LocalFs {
    fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.path(key);
        trace!(path = %path.display(), bytes = data.len(), "put");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, &data).with_context(|| format!("write {}", path.display()))
    }

    fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.path(key);
        trace!(path = %path.display(), "get");
        let data = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        Ok(Bytes::from(data))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Nothing stored yet.
        let Ok(root) = fs::canonicalize(&self.root) else {
            return Ok(Vec::new());
        };
        let pattern = format!("{}/**/*", Pattern::escape(&root.to_string_lossy()));
        let mut keys = Vec::new();
        for path in glob(&pattern)?.flatten() {
            if !path.is_file() {
                continue;
            }
            if let Some(key) = Self::key(&root, &path) {
                if key.starts_with(prefix.trim_start_matches('/')) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path(key);
        trace!(path = %path.display(), "remove");
        fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))
    }
}
