//! Locating the admin service among installed packages.

use std::fmt;

use kiosk_common::{
    envelope::{Envelope, Messenger},
    error::{BindError, DiscoveryError},
};
use tokio::sync::mpsc;

use crate::config::ManagerConfig;

/// The admin service to bind to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceComponent {
    pub package:    String,
    pub class_name: String,
}

impl fmt::Display for ServiceComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.class_name)
    }
}

/// Picks the first package that follows the admin naming convention and is
/// not a pre-release or test build.
pub fn find_admin_component(
    packages: &[String],
    config: &ManagerConfig,
) -> Result<ServiceComponent, DiscoveryError> {
    packages
        .iter()
        .find(|package| {
            package.starts_with(&config.package_prefix)
                && !config
                    .excluded_markers
                    .iter()
                    .any(|marker| package.contains(marker.as_str()))
        })
        .map(|package| ServiceComponent {
            package:    package.clone(),
            class_name: config.service_class_name.clone(),
        })
        .ok_or_else(|| DiscoveryError::NotInstalled {
            prefix: config.package_prefix.clone(),
        })
}

/// What happened to a binding, reported by the host.
///
/// Connection changes and inbound envelopes share one channel so the manager
/// sees them in the order the transport produced them.
#[derive(Debug)]
pub(crate) enum BindEvent {
    Connected { binding: u64, remote: Messenger },
    BindFailed { binding: u64, error: BindError },
    Inbound { binding: u64, envelope: Envelope },
    Disconnected { binding: u64 },
}

/// Handed to [`ServiceHost::bind`]; reports how the binding evolves and
/// forwards inbound envelopes to the connection manager.
///
/// Callbacks from a binding that has since been replaced are ignored.
#[derive(Clone)]
pub struct BindCallbacks {
    binding: u64,
    events:  mpsc::UnboundedSender<BindEvent>,
}

impl BindCallbacks {
    pub(crate) fn new(binding: u64, events: mpsc::UnboundedSender<BindEvent>) -> Self {
        Self { binding, events }
    }

    /// The remote service accepted the binding; `remote` reaches it
    pub fn connected(&self, remote: Messenger) {
        self.report(BindEvent::Connected {
            binding: self.binding,
            remote,
        });
    }

    pub fn bind_failed(&self, error: BindError) {
        self.report(BindEvent::BindFailed {
            binding: self.binding,
            error,
        });
    }

    pub fn disconnected(&self) {
        self.report(BindEvent::Disconnected {
            binding: self.binding,
        });
    }

    /// Hands an envelope received from the remote service to the manager.
    ///
    /// Returns false once the manager has stopped.
    pub fn deliver(&self, envelope: Envelope) -> bool {
        self.events
            .send(BindEvent::Inbound {
                binding: self.binding,
                envelope,
            })
            .is_ok()
    }

    fn report(&self, event: BindEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Connection manager stopped, dropping bind event");
        }
    }
}

/// Platform services the connection manager relies on
pub trait ServiceHost: Send {
    /// Names of the installed packages
    fn installed_packages(&self) -> Result<Vec<String>, DiscoveryError>;

    /// Starts the admin service if it is not already running
    fn ensure_running(&mut self, component: &ServiceComponent) -> Result<(), BindError>;

    /// Issues an asynchronous bind request; the outcome arrives through
    /// `callbacks`
    fn bind(&mut self, component: &ServiceComponent, callbacks: BindCallbacks)
        -> Result<(), BindError>;

    /// Releases the current binding, if any
    fn unbind(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packages(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn picks_first_matching_release_package() {
        let installed = packages(&[
            "com.example.browser",
            "com.mightyimmersion.mightyplatform.adminapp.preload",
            "com.mightyimmersion.mightyplatform.adminapp.test",
            "com.mightyimmersion.mightyplatform.adminapp",
            "com.mightyimmersion.mightyplatform.adminapp.beta",
        ]);

        let component = find_admin_component(&installed, &ManagerConfig::default()).unwrap();
        assert_eq!(
            component.package,
            "com.mightyimmersion.mightyplatform.adminapp"
        );
        assert_eq!(
            component.class_name,
            "com.mightyimmersion.mightyplatform.AdminService"
        );
    }

    #[test]
    fn only_excluded_variants_means_not_installed() {
        let installed = packages(&[
            "com.mightyimmersion.mightyplatform.adminapp.preload",
            "com.mightyimmersion.mightyplatform.adminapptest",
        ]);

        assert!(matches!(
            find_admin_component(&installed, &ManagerConfig::default()),
            Err(DiscoveryError::NotInstalled { .. })
        ));
    }

    #[test]
    fn prefix_and_markers_are_configurable() {
        let config = ManagerConfig::new()
            .with_package_prefix("org.kiosk.admin")
            .with_excluded_markers(["staging"]);
        let installed = packages(&["org.kiosk.admin.staging", "org.kiosk.admin.test"]);

        let component = find_admin_component(&installed, &config).unwrap();
        assert_eq!(component.package, "org.kiosk.admin.test");
    }
}
