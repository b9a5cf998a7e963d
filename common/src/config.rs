use std::{env, path::PathBuf, time::Duration};

/// Fully qualified class name of the admin app's service
pub const ADMIN_SERVICE_CLASS_NAME: &str = "com.mightyimmersion.mightyplatform.AdminService";

/// Installed admin apps are recognized by this package prefix
pub const ADMIN_PACKAGE_PREFIX: &str = "com.mightyimmersion.mightyplatform.adminapp";

/// Packages containing any of these markers are pre-release or test builds
pub const EXCLUDED_PACKAGE_MARKERS: &[&str] = &["preload", "test"];

/// How often the launcher re-checks its binding to the admin service
pub const DEFAULT_BIND_INTERVAL: Duration = Duration::from_secs(10);

/// Largest frame accepted on the socket transport (1MB)
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const SOCKET_DIR_ENV: &str = "KIOSK_ADMIN_SOCKET_DIR";
const DEFAULT_SOCKET_DIR: &str = "/tmp/kiosk-admin";

const SECRET_STORE_DIR_ENV: &str = "KIOSK_SECRET_STORE_DIR";
const DEFAULT_SECRET_STORE_DIR: &str = "secrets";

/// Directory holding one `<package>.sock` per running admin service
pub fn socket_dir() -> PathBuf {
    env::var(SOCKET_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_SOCKET_DIR))
}

fn secret_store_dir() -> PathBuf {
    env::var(SECRET_STORE_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_SECRET_STORE_DIR))
}

/// Locations of the encrypted secret store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Encrypted entries
    pub store_path: PathBuf,
    /// Master key, created on first use
    pub key_path:   PathBuf,
    /// Prefix applied to every key received over IPC
    pub qualifier:  String,
}

impl StoreConfig {
    /// Creates a store configuration rooted at `KIOSK_SECRET_STORE_DIR`
    pub fn new() -> Self {
        Self::in_dir(secret_store_dir())
    }

    /// Creates a store configuration rooted at `dir`
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let base = dir.into();
        Self {
            store_path: base.join("secure-strings.json"),
            key_path:   base.join("master.key"),
            qualifier:  ADMIN_SERVICE_CLASS_NAME.to_string(),
        }
    }

    /// Set the namespace qualifier
    pub fn with_qualifier<S: Into<String>>(mut self, qualifier: S) -> Self {
        self.qualifier = qualifier.into();
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}
