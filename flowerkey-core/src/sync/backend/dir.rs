//! Local directory backend, e.g. a folder mirrored by a cloud drive client.

use super::{validate_name, BackendResult, StorageBackend};
use crate::sync::models::OPLOG_DIR;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const TMP_SUFFIX: &str = ".tmp";

/// Stores objects as files below a root directory.
#[derive(Debug, Clone)]
pub struct DirBackend {
    root: PathBuf,
}

impl DirBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> BackendResult<PathBuf> {
        validate_name(name)?;
        Ok(name.split('/').fold(self.root.clone(), |p, part| p.join(part)))
    }
}

#[async_trait]
impl StorageBackend for DirBackend {
    async fn ensure_dir(&self) -> BackendResult<()> {
        fs::create_dir_all(self.root.join(OPLOG_DIR)).await?;
        Ok(())
    }

    async fn read(&self, name: &str) -> BackendResult<Option<Vec<u8>>> {
        match fs::read(self.path(name)?).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, name: &str, data: &[u8]) -> BackendResult<()> {
        let path = self.path(name)?;
        let mut tmp = path.clone().into_os_string();
        tmp.push(TMP_SUFFIX);

        // Readers never observe a half-written object
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn list_oplog(&self) -> BackendResult<Vec<String>> {
        let mut dir = match fs::read_dir(self.root.join(OPLOG_DIR)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            if !item.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = item.file_name().to_str() {
                if !name.ends_with(TMP_SUFFIX) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn remove(&self, name: &str) -> BackendResult<()> {
        match fs::remove_file(self.path(name)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
