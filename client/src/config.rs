use std::{path::PathBuf, time::Duration};

use kiosk_common::config::{
    socket_dir, ADMIN_PACKAGE_PREFIX, ADMIN_SERVICE_CLASS_NAME, DEFAULT_BIND_INTERVAL,
    EXCLUDED_PACKAGE_MARKERS,
};

/// Configuration for the connection manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Delay between bind attempts while unbound
    pub bind_interval:      Duration,
    /// Installed admin apps start with this prefix
    pub package_prefix:     String,
    /// Packages containing any of these are skipped
    pub excluded_markers:   Vec<String>,
    /// Service class bound inside the admin package
    pub service_class_name: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            bind_interval:      DEFAULT_BIND_INTERVAL,
            package_prefix:     ADMIN_PACKAGE_PREFIX.to_string(),
            excluded_markers:   EXCLUDED_PACKAGE_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            service_class_name: ADMIN_SERVICE_CLASS_NAME.to_string(),
        }
    }
}

impl ManagerConfig {
    /// Creates a manager configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind retry interval
    pub fn with_bind_interval(mut self, bind_interval: Duration) -> Self {
        self.bind_interval = bind_interval;
        self
    }

    /// Set the admin package prefix
    pub fn with_package_prefix<S: Into<String>>(mut self, package_prefix: S) -> Self {
        self.package_prefix = package_prefix.into();
        self
    }

    /// Set the excluded package markers
    pub fn with_excluded_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_markers = markers.into_iter().map(Into::into).collect();
        self
    }

    /// Set the admin service class name
    pub fn with_service_class_name<S: Into<String>>(mut self, service_class_name: S) -> Self {
        self.service_class_name = service_class_name.into();
        self
    }
}

/// Configuration for the Unix socket service host
#[derive(Debug, Clone)]
pub struct SocketHostConfig {
    /// Directory where admin services publish their sockets
    pub socket_dir:      PathBuf,
    /// Packages installed even while their service is not running
    pub packages:        Vec<String>,
    /// Program started when the admin socket is missing; receives the
    /// package name as its only argument
    pub launch_command:  Option<PathBuf>,
    /// How long a bind waits for a freshly started service's socket
    pub startup_timeout: Duration,
}

impl Default for SocketHostConfig {
    fn default() -> Self {
        Self {
            socket_dir:      socket_dir(),
            packages:        Vec::new(),
            launch_command:  None,
            startup_timeout: Duration::from_secs(5),
        }
    }
}

impl SocketHostConfig {
    /// Creates a host configuration rooted at `KIOSK_ADMIN_SOCKET_DIR`
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the socket directory
    pub fn with_socket_dir<P: Into<PathBuf>>(mut self, socket_dir: P) -> Self {
        self.socket_dir = socket_dir.into();
        self
    }

    /// Set the installed packages
    pub fn with_packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages = packages.into_iter().map(Into::into).collect();
        self
    }

    /// Set the admin launch command
    pub fn with_launch_command<P: Into<PathBuf>>(mut self, launch_command: P) -> Self {
        self.launch_command = Some(launch_command.into());
        self
    }

    /// Set how long to wait for a started service's socket
    pub fn with_startup_timeout(mut self, startup_timeout: Duration) -> Self {
        self.startup_timeout = startup_timeout;
        self
    }
}
