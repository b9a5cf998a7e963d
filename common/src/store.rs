//! Secret storage used to back secure-string requests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{config::ADMIN_SERVICE_CLASS_NAME, error::StoreError};

/// Key/value string storage with encryption at rest.
///
/// Every operation may fail, typically because key material could not be
/// initialized. Callers in the protocol path go through [`NamespacedSecrets`]
/// which turns those failures into plain booleans and options.
pub trait SecretStore: Send + Sync {
    /// Returns the stored value, `None` when the key is absent
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Whether any value (including an empty one) is stored under `key`
    fn contains(&self, key: &str) -> Result<bool, StoreError>;

    /// Removes `key`; removing an absent key is not an error
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

impl<T: SecretStore + ?Sized> SecretStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        (**self).contains(key)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }
}

/// In-memory store, used in tests and when nothing should touch disk
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value under an already namespaced key
    pub fn raw(&self, key: &str) -> Option<String> {
        self.lock().ok()?.get(key).cloned()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.contains_key(key))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Protocol-facing view of a [`SecretStore`].
///
/// Keys arriving over IPC are prefixed with a fixed qualifier so they can
/// never address secrets stored outside that namespace. Store failures are
/// logged and reported as `false` / `None`.
pub struct NamespacedSecrets<S> {
    store:     S,
    qualifier: String,
}

impl<S: SecretStore> NamespacedSecrets<S> {
    /// Namespaces keys under the admin service class name
    pub fn new(store: S) -> Self {
        Self::with_qualifier(store, ADMIN_SERVICE_CLASS_NAME)
    }

    pub fn with_qualifier(store: S, qualifier: impl Into<String>) -> Self {
        Self {
            store,
            qualifier: qualifier.into(),
        }
    }

    /// Key as it is stored in the backing store
    pub fn namespaced_key(&self, key: &str) -> String {
        format!("{}.{}", self.qualifier, key)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.store.get(&self.namespaced_key(key)) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to read secret '{}': {}", key, e);
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: &str) -> bool {
        match self.store.set(&self.namespaced_key(key), value) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to save secret '{}': {}", key, e);
                false
            }
        }
    }

    /// True only when a non-empty value is stored
    pub fn exists_non_empty(&self, key: &str) -> bool {
        let key = self.namespaced_key(key);
        match self.store.contains(&key) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                tracing::error!("Failed to check secret '{}': {}", key, e);
                return false;
            }
        }
        match self.store.get(&key) {
            Ok(value) => value.is_some_and(|v| !v.is_empty()),
            Err(e) => {
                tracing::error!("Failed to read secret '{}': {}", key, e);
                false
            }
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        match self.store.remove(&self.namespaced_key(key)) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to delete secret '{}': {}", key, e);
                false
            }
        }
    }
}
