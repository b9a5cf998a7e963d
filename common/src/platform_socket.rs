use std::{
    io,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Result};
use tokio::net::{UnixListener, UnixStream};

/// Socket path for the admin service published by `package`
pub fn socket_path(dir: &Path, package: &str) -> PathBuf {
    dir.join(format!("{package}.sock"))
}

/// Package name advertised by a socket file, if it looks like one of ours
pub fn package_of(path: &Path) -> Option<String> {
    if path.extension()? != "sock" {
        return None;
    }
    path.file_stem()?.to_str().map(str::to_string)
}

/// Binds a Unix listener at `path`, replacing a stale socket file.
///
/// Must be called from within a tokio runtime.
pub fn bind_listener(path: &Path) -> Result<UnixListener> {
    tracing::info!("Setting up Unix socket server at {}", path.display());

    if path.exists() {
        tracing::warn!("Existing socket file found, removing it...");
        match std::fs::remove_file(path) {
            Ok(_) => tracing::info!("Old socket file removed successfully"),
            Err(e) => {
                tracing::error!("Failed to remove old socket file: {}", e);
                return Err(anyhow!(
                    "Could not remove existing socket file '{}': {}. You may need to stop the \
                     existing server or remove the file manually.",
                    path.display(),
                    e
                ));
            }
        }
    } else {
        tracing::debug!("No existing socket file found");
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            anyhow!(
                "Cannot create socket directory '{}': {}",
                parent.display(),
                e
            )
        })?;
    }

    let listener = match UnixListener::bind(path) {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind to socket: {} (kind: {:?})", e, e.kind());
            return Err(describe_bind_error(path, &e));
        }
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        // Owner read/write only
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
            tracing::warn!("Failed to set socket permissions: {}", e);
        }
    }

    tracing::info!("Unix socket server listening on {}", path.display());
    Ok(listener)
}

fn describe_bind_error(path: &Path, e: &io::Error) -> anyhow::Error {
    let socket_path = path.display();
    let detailed_error = match e.kind() {
        io::ErrorKind::PermissionDenied => format!(
            "Permission denied creating socket '{socket_path}'. Check the socket directory \
             permissions."
        ),
        io::ErrorKind::AddrInUse | io::ErrorKind::AlreadyExists => format!(
            "Socket '{socket_path}' already exists. Another admin instance may be running."
        ),
        io::ErrorKind::InvalidInput => format!(
            "Invalid socket path '{socket_path}'. Check that the path is valid and not too long."
        ),
        _ => format!(
            "Unexpected error binding to socket '{}': {} (kind: {:?})",
            socket_path,
            e,
            e.kind()
        ),
    };

    anyhow!(
        "{}\n\nOS Error Code: {}",
        detailed_error,
        e.raw_os_error().unwrap_or(-1)
    )
}

/// Connects to the Unix socket at `path`
pub async fn connect_socket(path: &Path) -> Result<UnixStream> {
    tracing::debug!("Attempting to connect to Unix socket {}", path.display());

    if let Err(e) = tokio::fs::metadata(path).await {
        return Err(anyhow!(
            "Socket file '{}' does not exist. The admin service is not running or is \
             publishing a different socket path.\n\nOriginal error: {}",
            path.display(),
            e
        ));
    }

    match UnixStream::connect(path).await {
        Ok(stream) => {
            tracing::debug!("Connected to Unix socket {}", path.display());
            Ok(stream)
        }
        Err(e) => {
            tracing::error!("Connection failed: {} (kind: {:?})", e, e.kind());

            let socket_path = path.display();
            let detailed_error = match e.kind() {
                io::ErrorKind::NotFound => format!(
                    "Socket file not found at '{socket_path}'. The admin service may have \
                     stopped or never started."
                ),
                io::ErrorKind::PermissionDenied => format!(
                    "Permission denied accessing socket '{socket_path}'. Check socket permissions."
                ),
                io::ErrorKind::ConnectionRefused => format!(
                    "Connection refused to socket '{socket_path}'. The admin service may be \
                     starting up or shutting down."
                ),
                _ => format!(
                    "Unexpected error connecting to socket '{}': {} (kind: {:?})",
                    socket_path,
                    e,
                    e.kind()
                ),
            };

            Err(anyhow!(
                "{}\n\nOS Error Code: {}",
                detailed_error,
                e.raw_os_error().unwrap_or(-1)
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_names_map_to_packages() {
        let dir = Path::new("/run/kiosk");
        let path = socket_path(dir, "com.example.admin");
        assert_eq!(path, Path::new("/run/kiosk/com.example.admin.sock"));
        assert_eq!(package_of(&path).as_deref(), Some("com.example.admin"));
        assert_eq!(package_of(Path::new("/run/kiosk/notes.txt")), None);
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket_and_accepts() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_path(dir.path(), "pkg");
        std::fs::write(&path, b"stale").unwrap();

        let listener = bind_listener(&path).unwrap();
        let (client, server) = tokio::join!(connect_socket(&path), listener.accept());
        client.unwrap();
        server.unwrap();
    }

    #[tokio::test]
    async fn connect_to_missing_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = connect_socket(&dir.path().join("absent.sock"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
