//! In-process backend shared between simulated devices.

use super::{validate_name, BackendError, BackendResult, StorageBackend};
use crate::sync::models::OPLOG_DIR;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, Vec<u8>>,
    fail_writes: Option<String>,
    fail_reads: Option<String>,
}

/// Map-backed store. Clones share the same objects.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make writes to names starting with `prefix` fail; `None` clears it.
    pub fn fail_writes_matching(&self, prefix: Option<&str>) {
        self.lock().fail_writes = prefix.map(str::to_string);
    }

    /// Make reads of names starting with `prefix` fail; `None` clears it.
    pub fn fail_reads_matching(&self, prefix: Option<&str>) {
        self.lock().fail_reads = prefix.map(str::to_string);
    }

    /// Every stored object name, sorted.
    pub fn object_names(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Raw object access for inspection.
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(name).cloned()
    }

    /// Raw object write that bypasses failure injection.
    pub fn put(&self, name: &str, data: Vec<u8>) {
        self.lock().objects.insert(name.to_string(), data);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the map cannot leave it half-written
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn injected(rule: &Option<String>, name: &str) -> bool {
    rule.as_deref().is_some_and(|prefix| name.starts_with(prefix))
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn ensure_dir(&self) -> BackendResult<()> {
        Ok(())
    }

    async fn read(&self, name: &str) -> BackendResult<Option<Vec<u8>>> {
        validate_name(name)?;
        let inner = self.lock();
        if injected(&inner.fail_reads, name) {
            return Err(BackendError::Unavailable(format!("injected read failure: {}", name)));
        }
        Ok(inner.objects.get(name).cloned())
    }

    async fn write(&self, name: &str, data: &[u8]) -> BackendResult<()> {
        validate_name(name)?;
        let mut inner = self.lock();
        if injected(&inner.fail_writes, name) {
            return Err(BackendError::Unavailable(format!("injected write failure: {}", name)));
        }
        inner.objects.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn list_oplog(&self) -> BackendResult<Vec<String>> {
        let prefix = format!("{}/", OPLOG_DIR);
        Ok(self
            .lock()
            .objects
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    async fn remove(&self, name: &str) -> BackendResult<()> {
        validate_name(name)?;
        self.lock().objects.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_write_remove() {
        let backend = MemoryBackend::new();
        backend.ensure_dir().await.unwrap();

        assert_eq!(backend.read("sync.lock").await.unwrap(), None);
        backend.write("sync.lock", b"{}").await.unwrap();
        assert_eq!(backend.read("sync.lock").await.unwrap(), Some(b"{}".to_vec()));

        backend.write("sync.lock", b"[]").await.unwrap();
        assert_eq!(backend.get("sync.lock"), Some(b"[]".to_vec()));

        backend.remove("sync.lock").await.unwrap();
        backend.remove("sync.lock").await.unwrap();
        assert_eq!(backend.read("sync.lock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_oplog_is_sorted_and_scoped() {
        let backend = MemoryBackend::new();
        backend.write("oplog/b_2.enc", b"x").await.unwrap();
        backend.write("oplog/a_1.enc", b"x").await.unwrap();
        backend.write("vault.enc", b"x").await.unwrap();
        backend.put("oplog/nested/c_3.enc", b"x".to_vec());

        assert_eq!(
            backend.list_oplog().await.unwrap(),
            vec!["a_1.enc".to_string(), "b_2.enc".to_string()]
        );
    }

    #[tokio::test]
    async fn clones_share_state_and_failures_can_be_injected() {
        let a = MemoryBackend::new();
        let b = a.clone();

        a.write("vault.enc", b"snap").await.unwrap();
        assert!(b.read("vault.enc").await.unwrap().is_some());

        b.fail_writes_matching(Some("oplog/"));
        assert!(a.write("oplog/x_1.enc", b"x").await.is_err());
        assert!(a.write("sync.lock", b"x").await.is_ok());
        b.fail_writes_matching(None);
        assert!(a.write("oplog/x_1.enc", b"x").await.is_ok());

        a.fail_reads_matching(Some("vault"));
        assert!(b.read("vault.enc").await.is_err());
    }

    #[tokio::test]
    async fn rejects_escaping_names() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.write("../etc", b"x").await,
            Err(BackendError::InvalidName(_))
        ));
    }
}
