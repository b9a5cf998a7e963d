use std::path::PathBuf;

use kiosk_common::config::{socket_dir, ADMIN_PACKAGE_PREFIX};

/// Configuration for the admin service
#[derive(Debug, Clone)]
pub struct AdminServerConfig {
    /// Directory the socket is published in
    pub socket_dir:     PathBuf,
    /// Package name the socket is published under
    pub package:        String,
    /// Reject launchers running as a different user
    pub same_user_only: bool,
}

impl Default for AdminServerConfig {
    fn default() -> Self {
        Self {
            socket_dir:     socket_dir(),
            package:        ADMIN_PACKAGE_PREFIX.to_string(),
            same_user_only: true,
        }
    }
}

impl AdminServerConfig {
    /// Creates an admin configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the socket directory
    pub fn with_socket_dir<P: Into<PathBuf>>(mut self, socket_dir: P) -> Self {
        self.socket_dir = socket_dir.into();
        self
    }

    /// Set the package name
    pub fn with_package<S: Into<String>>(mut self, package: S) -> Self {
        self.package = package.into();
        self
    }

    /// Require launchers to run as the same user as the admin service
    pub fn with_same_user_only(mut self, same_user_only: bool) -> Self {
        self.same_user_only = same_user_only;
        self
    }
}
