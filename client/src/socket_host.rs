use std::{io, path::Path, time::Duration};

use kiosk_common::{
    error::{BindError, DiscoveryError},
    platform_socket::{connect_socket, package_of, socket_path},
    wire::{pump_frames, spawn_writer},
};
use tokio::{task::JoinHandle, time};

use crate::{
    config::SocketHostConfig,
    discovery::{BindCallbacks, ServiceComponent, ServiceHost},
};

const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Reaches admin services through Unix sockets.
///
/// Every running admin service publishes `<package>.sock` in the socket
/// directory. Installed packages are the configured ones plus any package
/// with a live socket; a configured package without a socket is started with
/// the launch command.
pub struct SocketServiceHost {
    config:     SocketHostConfig,
    connection: Option<JoinHandle<()>>,
    /// Waits on the last started admin service
    launched:   Option<JoinHandle<()>>,
}

impl SocketServiceHost {
    pub fn new(config: SocketHostConfig) -> Self {
        Self {
            config,
            connection: None,
            launched: None,
        }
    }

    fn is_launching(&self) -> bool {
        self.launched
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl ServiceHost for SocketServiceHost {
    fn installed_packages(&self) -> Result<Vec<String>, DiscoveryError> {
        let entries = match std::fs::read_dir(&self.config.socket_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let mut packages = self.config.packages.clone();
                packages.sort();
                packages.dedup();
                return Ok(packages);
            }
            Err(e) => {
                return Err(DiscoveryError::Enumeration(format!(
                    "{}: {}",
                    self.config.socket_dir.display(),
                    e
                )))
            }
        };

        let mut packages: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| package_of(&entry.path()))
            .chain(self.config.packages.iter().cloned())
            .collect();
        packages.sort();
        packages.dedup();
        Ok(packages)
    }

    fn ensure_running(&mut self, component: &ServiceComponent) -> Result<(), BindError> {
        let path = socket_path(&self.config.socket_dir, &component.package);
        if path.exists() {
            return Ok(());
        }
        if self.is_launching() {
            tracing::debug!("Admin service {} is still starting", component);
            return Ok(());
        }

        let Some(command) = &self.config.launch_command else {
            return Err(BindError::StartFailed {
                component: component.to_string(),
                reason:    format!("no socket at {}", path.display()),
            });
        };

        tracing::info!("Starting admin service with {}", command.display());
        let mut child = tokio::process::Command::new(command)
            .arg(&component.package)
            .spawn()
            .map_err(|e| BindError::StartFailed {
                component: component.to_string(),
                reason:    e.to_string(),
            })?;

        self.launched = Some(tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::info!("Admin service exited with {}", status),
                Err(e) => tracing::warn!("Failed to wait for admin service: {}", e),
            }
        }));
        Ok(())
    }

    fn bind(
        &mut self,
        component: &ServiceComponent,
        callbacks: BindCallbacks,
    ) -> Result<(), BindError> {
        self.unbind();

        let path = socket_path(&self.config.socket_dir, &component.package);
        let component = component.to_string();
        let startup_timeout = self.config.startup_timeout;

        let task = tokio::spawn(async move {
            if time::timeout(startup_timeout, wait_for_socket(&path)).await.is_err() {
                tracing::debug!("No socket at {} after {:?}", path.display(), startup_timeout);
            }
            let stream = match connect_socket(&path).await {
                Ok(stream) => stream,
                Err(e) => {
                    callbacks.bind_failed(BindError::Rejected {
                        component,
                        reason: format!("{e:#}"),
                    });
                    return;
                }
            };

            let (mut reader, writer) = stream.into_split();
            let (remote, writer_task) = spawn_writer(writer);
            callbacks.connected(remote.clone());

            if let Err(e) = pump_frames(&mut reader, &remote, |envelope| callbacks.deliver(envelope)).await
            {
                tracing::warn!("Connection to {} failed: {:#}", component, e);
            }

            writer_task.abort();
            callbacks.disconnected();
        });

        self.connection = Some(task);
        Ok(())
    }

    fn unbind(&mut self) {
        if let Some(task) = self.connection.take() {
            task.abort();
        }
    }
}

async fn wait_for_socket(path: &Path) {
    while !path.exists() {
        time::sleep(SOCKET_POLL_INTERVAL).await;
    }
}

impl Drop for SocketServiceHost {
    fn drop(&mut self) {
        self.unbind();
    }
}

#[cfg(test)]
mod tests {
    use kiosk_common::{
        codes,
        envelope::Envelope,
        platform_socket::bind_listener,
        wire::{read_frame, write_frame, Frame},
    };

    use super::*;
    use crate::{
        connection::{ConnectionBuilder, ConnectionState},
        listener::{ChannelListener, LauncherEvent},
    };

    const ADMIN: &str = "com.mightyimmersion.mightyplatform.adminapp";

    #[test]
    fn sockets_list_as_sorted_packages() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.sock", "a.sock", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let host = SocketServiceHost::new(SocketHostConfig::new().with_socket_dir(dir.path()));
        assert_eq!(host.installed_packages().unwrap(), vec!["a", "b"]);

        let missing = SocketServiceHost::new(
            SocketHostConfig::new().with_socket_dir(dir.path().join("absent")),
        );
        assert!(missing.installed_packages().unwrap().is_empty());
    }

    #[test]
    fn configured_packages_are_installed_without_socket() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.sock"), b"").unwrap();
        let host = SocketServiceHost::new(
            SocketHostConfig::new()
                .with_socket_dir(dir.path())
                .with_packages([ADMIN, "b"]),
        );
        assert_eq!(host.installed_packages().unwrap(), vec!["b", ADMIN]);

        let missing = SocketServiceHost::new(
            SocketHostConfig::new()
                .with_socket_dir(dir.path().join("absent"))
                .with_packages([ADMIN]),
        );
        assert_eq!(missing.installed_packages().unwrap(), vec![ADMIN]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_socket_runs_launch_command_once() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let sockets = dir.path().join("sockets");
        let marker = dir.path().join("launched");
        let script = dir.path().join("start-admin.sh");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho \"$1\" >> '{}'\nsleep 1\n", marker.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let host = SocketServiceHost::new(
            SocketHostConfig::new()
                .with_socket_dir(&sockets)
                .with_packages([ADMIN])
                .with_launch_command(&script)
                .with_startup_timeout(Duration::from_millis(200)),
        );
        let (listener, _events) = ChannelListener::channel();
        let (handle, _task) = ConnectionBuilder::new(host, listener).spawn();
        handle.start();
        assert_eq!(handle.state().await, ConnectionState::Binding);

        let launched = time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(contents) = std::fs::read_to_string(&marker) {
                    if !contents.is_empty() {
                        return contents;
                    }
                }
                time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(launched, format!("{ADMIN}\n"));
        handle.shutdown().await;
    }

    #[test]
    fn missing_socket_without_launcher_cannot_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = SocketServiceHost::new(SocketHostConfig::new().with_socket_dir(dir.path()));
        let component = ServiceComponent {
            package:    ADMIN.into(),
            class_name: "svc".into(),
        };
        assert!(matches!(
            host.ensure_running(&component),
            Err(BindError::StartFailed { .. })
        ));
    }

    #[tokio::test]
    async fn binds_registers_and_receives_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let listener = bind_listener(&socket_path(dir.path(), ADMIN)).unwrap();

        let host = SocketServiceHost::new(SocketHostConfig::new().with_socket_dir(dir.path()));
        let (events_listener, mut events) = ChannelListener::channel();
        let (handle, _task) = ConnectionBuilder::new(host, events_listener).spawn();
        handle.start();

        let (mut admin, _) = listener.accept().await.unwrap();
        let register = read_frame(&mut admin).await.unwrap().unwrap();
        assert_eq!(register.what, codes::REGISTER_CLIENT);
        assert!(register.reply_to);
        assert_eq!(
            events.recv().await,
            Some(LauncherEvent::BindStatusChanged(true))
        );

        assert!(handle.enable_kiosk_mode().await);
        assert_eq!(
            read_frame(&mut admin).await.unwrap().unwrap().what,
            codes::ENABLE_KIOSK_MODE
        );

        let push = Frame::from_envelope(&Envelope::new(
            codes::DEVICE_STATUS,
            Some(r#"{"battery":80}"#.into()),
        ));
        write_frame(&mut admin, &push).await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(LauncherEvent::MessageReceived {
                command_code: codes::DEVICE_STATUS,
                payload:      Some(r#"{"battery":80}"#.into()),
            })
        );

        drop(admin);
        assert_eq!(
            events.recv().await,
            Some(LauncherEvent::BindStatusChanged(false))
        );
        assert_eq!(handle.state().await, ConnectionState::Unbound);
    }
}
