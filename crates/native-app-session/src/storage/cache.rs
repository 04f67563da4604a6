//! Registry of open named storages.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use native_app_core::{NativeAppRpc, RpcError, StorageValue};
use tokio::sync::OnceCell;

use crate::error::{NativeAppError, Result};

type Slot = Arc<OnceCell<Arc<Storage>>>;

struct Registry {
    rpc: Arc<dyn NativeAppRpc>,
    storages: Mutex<HashMap<String, Slot>>,
}

/// Owns the at-most-one-handle-per-name invariant for open storages.
///
/// Concurrent opens of the same name share a single remote open call.
#[derive(Clone)]
pub struct StorageCache {
    registry: Arc<Registry>,
}

impl StorageCache {
    #[must_use]
    pub fn new(rpc: Arc<dyn NativeAppRpc>) -> Self {
        Self {
            registry: Arc::new(Registry {
                rpc,
                storages: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Open or create the storage `name`, reusing a live handle if present.
    ///
    /// # Errors
    /// Returns the host error if the remote open fails; no handle is registered.
    pub async fn open(&self, name: &str) -> Result<Arc<Storage>> {
        let slot = Arc::clone(
            self.storages()
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );

        // A failed init leaves the slot empty for the next open to retry.
        let storage = slot
            .get_or_try_init(|| async {
                tracing::debug!(name, "storage_open");
                let id = self.registry.rpc.storage_open(name).await?;
                Ok::<_, RpcError>(Arc::new(Storage {
                    id,
                    name: name.to_owned(),
                    open: AtomicBool::new(true),
                    rpc: Arc::clone(&self.registry.rpc),
                    registry: Arc::downgrade(&self.registry),
                }))
            })
            .await?;
        Ok(Arc::clone(storage))
    }

    /// Close `storage`, optionally deleting it permanently.
    ///
    /// # Errors
    /// `StorageNotFound` if `storage` is not the registered handle for its
    /// name. A failed remote close leaves the handle open and registered.
    pub async fn close(&self, storage: &Storage, delete: bool) -> Result<()> {
        if !self.is_registered(storage) {
            return Err(NativeAppError::StorageNotFound(storage.id.clone()));
        }

        tracing::debug!(id = %storage.id, delete, "storage_close");
        self.registry.rpc.storage_close(&storage.id, delete).await?;

        storage.open.store(false, Ordering::SeqCst);
        let mut storages = self.storages();
        let still_registered = storages
            .get(&storage.name)
            .and_then(|s| s.get())
            .is_some_and(|s| std::ptr::eq(Arc::as_ptr(s), storage));
        if still_registered {
            storages.remove(&storage.name);
        }
        Ok(())
    }

    /// Every storage name the host knows about, open or not.
    ///
    /// # Errors
    /// Returns the host error unchanged.
    pub async fn names(&self) -> Result<Vec<String>> {
        tracing::debug!("storage_names");
        Ok(self.registry.rpc.storage_names().await?)
    }

    /// Names with a live local handle.
    #[must_use]
    pub fn open_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .storages()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn is_registered(&self, storage: &Storage) -> bool {
        self.storages()
            .get(&storage.name)
            .and_then(|s| s.get())
            .is_some_and(|s| std::ptr::eq(Arc::as_ptr(s), storage))
    }

    fn storages(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.registry
            .storages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to one open named storage.
///
/// Once closed, every operation fails with `StorageNotOpen` without
/// contacting the host.
pub struct Storage {
    id: String,
    name: String,
    open: AtomicBool,
    rpc: Arc<dyn NativeAppRpc>,
    registry: Weak<Registry>,
}

impl Storage {
    /// Host-assigned id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name the storage was opened with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Value stored against `key`, if any.
    ///
    /// # Errors
    /// `StorageNotOpen` if closed; otherwise the host error.
    pub async fn get(&self, key: &str) -> Result<Option<StorageValue>> {
        self.ensure_open()?;
        Ok(self.rpc.storage_get(&self.id, key).await?)
    }

    /// # Errors
    /// `StorageNotOpen` if closed; otherwise the host error.
    pub async fn set(&self, key: &str, value: impl Into<StorageValue>) -> Result<()> {
        self.ensure_open()?;
        Ok(self.rpc.storage_set(&self.id, key, value.into()).await?)
    }

    /// All keys. May be expensive for large storages.
    ///
    /// # Errors
    /// `StorageNotOpen` if closed; otherwise the host error.
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        Ok(self.rpc.storage_keys(&self.id).await?)
    }

    /// Remove every key.
    ///
    /// # Errors
    /// `StorageNotOpen` if closed; otherwise the host error.
    pub async fn remove_all(&self) -> Result<()> {
        self.ensure_open()?;
        Ok(self.rpc.storage_remove_all(&self.id).await?)
    }

    /// Close the storage, keeping its data.
    ///
    /// # Errors
    /// See [`StorageCache::close`].
    pub async fn close(&self) -> Result<()> {
        self.close_with(false).await
    }

    /// Close the storage and ask the host to delete it.
    ///
    /// # Errors
    /// See [`StorageCache::close`].
    pub async fn close_and_delete(&self) -> Result<()> {
        self.close_with(true).await
    }

    async fn close_with(&self, delete: bool) -> Result<()> {
        self.ensure_open()?;
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| NativeAppError::StorageNotFound(self.id.clone()))?;
        StorageCache { registry }.close(self, delete).await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(NativeAppError::StorageNotOpen(self.id.clone()))
        }
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::time::Duration;

    use native_app_core::EventHub;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::host::MemoryHost;

    fn cache() -> (Arc<MemoryHost>, StorageCache) {
        let host = Arc::new(MemoryHost::new(Arc::new(EventHub::new())));
        (host.clone(), StorageCache::new(host))
    }

    #[tokio::test]
    async fn reopen_returns_same_handle_with_one_remote_call() {
        let (host, cache) = cache();
        let a = cache.open("prefs").await.unwrap();
        let b = cache.open("prefs").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(host.calls_to("storage_open"), 1);
        assert_eq!(cache.open_names(), vec!["prefs".to_owned()]);
    }

    #[tokio::test]
    async fn closed_handle_fails_fast() {
        let (host, cache) = cache();
        let storage = cache.open("prefs").await.unwrap();
        assert_ok!(storage.close().await);
        assert!(!storage.is_open());
        let before = host.calls().len();

        assert!(matches!(storage.get("k").await, Err(NativeAppError::StorageNotOpen(_))));
        assert!(matches!(storage.set("k", 1_i64).await, Err(NativeAppError::StorageNotOpen(_))));
        assert!(matches!(storage.keys().await, Err(NativeAppError::StorageNotOpen(_))));
        assert!(matches!(storage.remove_all().await, Err(NativeAppError::StorageNotOpen(_))));
        assert!(matches!(storage.close().await, Err(NativeAppError::StorageNotOpen(_))));
        assert_eq!(host.calls().len(), before);
    }

    #[tokio::test]
    async fn close_of_stale_handle_is_not_found() {
        let (_host, cache) = cache();
        let first = cache.open("prefs").await.unwrap();
        assert_ok!(cache.close(&first, false).await);
        let _second = cache.open("prefs").await.unwrap();

        let err = cache.close(&first, false).await.unwrap_err();
        assert!(matches!(err, NativeAppError::StorageNotFound(_)));
    }

    #[tokio::test]
    async fn failed_open_registers_nothing() {
        let (host, cache) = cache();
        host.fail_on("storage_open");
        assert_err!(cache.open("prefs").await);
        assert!(cache.open_names().is_empty());

        host.clear_failures();
        assert_ok!(cache.open("prefs").await);
        assert_eq!(host.calls_to("storage_open"), 2);
    }

    #[tokio::test]
    async fn concurrent_open_survives_first_caller_failing() {
        let (host, cache) = cache();
        host.set_latency(Some(Duration::from_millis(10)));
        host.fail_next("storage_open");

        let (first, second) = tokio::join!(cache.open("prefs"), cache.open("prefs"));
        assert_err!(first);
        let storage = assert_ok!(second);
        assert_eq!(cache.open_names(), vec!["prefs".to_owned()]);

        let again = cache.open("prefs").await.unwrap();
        assert!(Arc::ptr_eq(&storage, &again));
        assert_eq!(host.calls_to("storage_open"), 2);

        assert_ok!(storage.close().await);
        assert!(cache.open_names().is_empty());
    }

    #[tokio::test]
    async fn failed_remote_close_keeps_handle_open() {
        let (host, cache) = cache();
        let storage = cache.open("prefs").await.unwrap();
        host.fail_on("storage_close");

        assert!(matches!(storage.close_and_delete().await, Err(NativeAppError::Rpc(_))));
        assert!(storage.is_open());
        assert_eq!(cache.open_names(), vec!["prefs".to_owned()]);
    }

    #[tokio::test]
    async fn data_survives_close_unless_deleted() {
        let (_host, cache) = cache();
        let storage = cache.open("prefs").await.unwrap();
        storage.set("theme", "dark").await.unwrap();
        storage.close().await.unwrap();

        let storage = cache.open("prefs").await.unwrap();
        assert_eq!(storage.get("theme").await.unwrap(), Some(StorageValue::from("dark")));
        storage.close_and_delete().await.unwrap();

        assert!(cache.names().await.unwrap().is_empty());
        let storage = cache.open("prefs").await.unwrap();
        assert!(storage.keys().await.unwrap().is_empty());
    }
}
