//! File-backed [`SecretStore`] with AES-256-GCM encrypted values.
//!
//! The master key lives in its own file and is created on first use. Entry
//! names are hashed together with the key so stored names reveal nothing;
//! each value is sealed with a fresh random nonce and bound to its entry name.

use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{config::StoreConfig, error::StoreError, store::SecretStore};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    entries: BTreeMap<String, SealedEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedEntry {
    nonce:      String,
    ciphertext: String,
}

struct OpenStore {
    cipher:  Aes256Gcm,
    key:     [u8; KEY_LEN],
    entries: BTreeMap<String, SealedEntry>,
}

/// Encrypted secret store persisted to a JSON file
pub struct EncryptedFileStore {
    store_path: PathBuf,
    key_path:   PathBuf,
    // Opened lazily so a missing key directory only fails the call that needs it
    state:      Mutex<Option<OpenStore>>,
}

impl EncryptedFileStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self::with_paths(&config.store_path, &config.key_path)
    }

    pub fn with_paths(store_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Self {
        Self {
            store_path: store_path.as_ref().to_path_buf(),
            key_path:   key_path.as_ref().to_path_buf(),
            state:      Mutex::new(None),
        }
    }

    /// Runs `f` against the opened store, opening it first if needed
    fn with_open<T>(
        &self,
        f: impl FnOnce(&mut OpenStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard: MutexGuard<'_, Option<OpenStore>> = self
            .state
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;

        if guard.is_none() {
            *guard = Some(self.open()?);
            tracing::debug!("Encrypted secret store opened at {:?}", self.store_path);
        }

        match guard.as_mut() {
            Some(open) => f(open),
            None => Err(StoreError::Unavailable("store not initialized".to_string())),
        }
    }

    fn open(&self) -> Result<OpenStore, StoreError> {
        let key = load_or_create_key(&self.key_path)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| StoreError::Unavailable(format!("invalid master key: {e}")))?;

        let entries = match fs::read(&self.store_path) {
            Ok(bytes) => {
                let file: StoreFile = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Corrupted(e.to_string()))?;
                if file.version != FORMAT_VERSION {
                    return Err(StoreError::Corrupted(format!(
                        "unsupported store version {}",
                        file.version
                    )));
                }
                file.entries
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(OpenStore {
            cipher,
            key,
            entries,
        })
    }

    fn persist(&self, entries: &BTreeMap<String, SealedEntry>) -> Result<(), StoreError> {
        let file = StoreFile {
            version: FORMAT_VERSION,
            entries: entries.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| StoreError::Corrupted(e.to_string()))?;

        if let Some(parent) = self.store_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.store_path.with_extension("tmp");
        write_private_file(&tmp_path, &json)?;
        fs::rename(&tmp_path, &self.store_path)?;
        Ok(())
    }
}

impl OpenStore {
    fn entry_name(&self, name: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn seal(&self, entry_name: &str, value: &str) -> Result<SealedEntry, StoreError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: value.as_bytes(),
                    aad: entry_name.as_bytes(),
                },
            )
            .map_err(|e| StoreError::Crypto(e.to_string()))?;

        Ok(SealedEntry {
            nonce:      hex::encode(nonce),
            ciphertext: hex::encode(ciphertext),
        })
    }

    fn unseal(&self, entry_name: &str, entry: &SealedEntry) -> Result<String, StoreError> {
        let nonce = hex::decode(&entry.nonce).map_err(|e| StoreError::Corrupted(e.to_string()))?;
        if nonce.len() != NONCE_LEN {
            return Err(StoreError::Corrupted(format!(
                "nonce has {} bytes, expected {}",
                nonce.len(),
                NONCE_LEN
            )));
        }
        let ciphertext =
            hex::decode(&entry.ciphertext).map_err(|e| StoreError::Corrupted(e.to_string()))?;

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: entry_name.as_bytes(),
                },
            )
            .map_err(|e| StoreError::Crypto(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| StoreError::Corrupted(e.to_string()))
    }
}

impl SecretStore for EncryptedFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_open(|open| {
            let name = open.entry_name(key);
            match open.entries.get(&name) {
                Some(entry) => open.unseal(&name, entry).map(Some),
                None => Ok(None),
            }
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_open(|open| {
            let name = open.entry_name(key);
            let sealed = open.seal(&name, value)?;
            let mut entries = open.entries.clone();
            entries.insert(name, sealed);
            self.persist(&entries)?;
            open.entries = entries;
            Ok(())
        })
    }

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        self.with_open(|open| Ok(open.entries.contains_key(&open.entry_name(key))))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.with_open(|open| {
            let name = open.entry_name(key);
            if !open.entries.contains_key(&name) {
                return Ok(());
            }
            let mut entries = open.entries.clone();
            entries.remove(&name);
            self.persist(&entries)?;
            open.entries = entries;
            Ok(())
        })
    }
}

fn load_or_create_key(path: &Path) -> Result<[u8; KEY_LEN], StoreError> {
    match fs::read(path) {
        Ok(bytes) => bytes.as_slice().try_into().map_err(|_| {
            StoreError::Unavailable(format!(
                "master key at {:?} has {} bytes, expected {}",
                path,
                bytes.len(),
                KEY_LEN
            ))
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let mut key = [0u8; KEY_LEN];
            rand::thread_rng().fill_bytes(&mut key);
            write_key_file(path, &key)
                .map_err(|e| StoreError::Unavailable(format!("cannot create master key: {e}")))?;
            tracing::info!("Created master key at {:?}", path);
            Ok(key)
        }
        Err(e) => Err(StoreError::Unavailable(format!(
            "cannot read master key at {path:?}: {e}"
        ))),
    }
}

fn write_key_file(path: &Path, key: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(key)?;
    file.sync_all()
}

/// Writes `contents` to `path`, readable by the owner only
fn write_private_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    // A leftover temp file keeps its old mode
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NamespacedSecrets;

    fn store_in(dir: &Path) -> EncryptedFileStore {
        EncryptedFileStore::new(&StoreConfig::in_dir(dir))
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let store = store_in(dir.path());
        store.set("svc.wifiPassword", "abc123").unwrap();
        drop(store);

        let reopened = store_in(dir.path());
        assert_eq!(
            reopened.get("svc.wifiPassword").unwrap().as_deref(),
            Some("abc123")
        );
        assert!(reopened.contains("svc.wifiPassword").unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn store_and_key_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::in_dir(dir.path());
        // Stale temp file from an interrupted write
        fs::write(config.store_path.with_extension("tmp"), b"{}").unwrap();
        fs::set_permissions(
            config.store_path.with_extension("tmp"),
            fs::Permissions::from_mode(0o644),
        )
        .unwrap();

        let store = EncryptedFileStore::new(&config);
        store.set("svc.token", "t0k3n").unwrap();

        for path in [&config.store_path, &config.key_path] {
            let mode = fs::metadata(path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "{}", path.display());
        }
    }

    #[test]
    fn nothing_is_stored_in_clear() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::in_dir(dir.path());
        let store = EncryptedFileStore::new(&config);
        store.set("svc.wifiPassword", "hunter2-secret").unwrap();

        let raw = fs::read_to_string(&config.store_path).unwrap();
        assert!(!raw.contains("hunter2-secret"));
        assert!(!raw.contains("wifiPassword"));
    }

    #[test]
    fn remove_of_absent_key_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.remove("svc.missing").unwrap();
        store.set("svc.k", "v").unwrap();
        store.remove("svc.k").unwrap();
        assert_eq!(store.get("svc.k").unwrap(), None);
        assert!(!store.contains("svc.k").unwrap());
    }

    #[test]
    fn wrong_key_cannot_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::in_dir(dir.path());
        store_in(dir.path()).set("svc.k", "v").unwrap();

        fs::remove_file(&config.key_path).unwrap();
        fs::write(&config.key_path, [7u8; KEY_LEN]).unwrap();

        // Names are keyed too, so the entry is simply not found
        let store = store_in(dir.path());
        assert_eq!(store.get("svc.k").unwrap(), None);
    }

    #[test]
    fn truncated_key_makes_store_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::in_dir(dir.path());
        fs::write(&config.key_path, [1u8; 5]).unwrap();

        let store = EncryptedFileStore::new(&config);
        assert!(matches!(store.get("k"), Err(StoreError::Unavailable(_))));

        let secrets = NamespacedSecrets::new(store);
        assert!(!secrets.set("k", "v"));
        assert_eq!(secrets.get("k"), None);
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::in_dir(dir.path());
        store_in(dir.path()).set("svc.k", "value").unwrap();

        let mut file: StoreFile =
            serde_json::from_slice(&fs::read(&config.store_path).unwrap()).unwrap();
        for entry in file.entries.values_mut() {
            let mut bytes = hex::decode(&entry.ciphertext).unwrap();
            bytes[0] ^= 0xFF;
            entry.ciphertext = hex::encode(bytes);
        }
        fs::write(&config.store_path, serde_json::to_vec(&file).unwrap()).unwrap();

        assert!(matches!(
            store_in(dir.path()).get("svc.k"),
            Err(StoreError::Crypto(_))
        ));
    }
}
