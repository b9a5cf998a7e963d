use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kiosk_common::{
    config::{StoreConfig, ADMIN_PACKAGE_PREFIX},
    EncryptedFileStore, NamespacedSecrets, SecretStore, SecureStringHandler,
};
use kiosk_launcher::{
    push::DedupListener, ChannelListener, ConnectionBuilder, ConnectionHandle, ConnectionState,
    LauncherEvent, ManagerConfig, SocketHostConfig, SocketServiceHost,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kiosk-launcher")]
#[command(about = "Kiosk launcher link to the admin service")]
struct Args {
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Directory where admin services publish their sockets
    #[arg(long)]
    socket_dir: Option<PathBuf>,

    /// Seconds between bind attempts
    #[arg(long, default_value_t = 10)]
    bind_interval: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stay bound to the admin service and print everything it sends
    Run {
        /// Program that starts the admin service when its socket is missing
        #[arg(long)]
        launch_command: Option<PathBuf>,

        /// Admin package installed on this device; repeat for several.
        /// Defaults to the standard admin package with --launch-command
        #[arg(long = "package")]
        packages: Vec<String>,

        /// Directory of the encrypted secret store
        #[arg(long)]
        store_dir: Option<PathBuf>,
    },
    /// Send one command once bound
    Send {
        /// Command code
        #[arg(allow_negative_numbers = true)]
        code: i32,

        /// JSON payload
        payload: Option<String>,

        /// Seconds to wait for the binding
        #[arg(short, long, default_value_t = 30)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    info!("Starting kiosk launcher link...");

    let mut host_config = SocketHostConfig::new();
    if let Some(dir) = args.socket_dir {
        host_config = host_config.with_socket_dir(dir);
    }
    let config = ManagerConfig::new().with_bind_interval(Duration::from_secs(args.bind_interval));

    match args.command {
        Commands::Run {
            launch_command,
            mut packages,
            store_dir,
        } => {
            if let Some(command) = launch_command {
                if packages.is_empty() {
                    packages.push(ADMIN_PACKAGE_PREFIX.to_string());
                }
                host_config = host_config.with_launch_command(command);
            }
            host_config = host_config.with_packages(packages);
            let store_config = match store_dir {
                Some(dir) => StoreConfig::in_dir(dir),
                None => StoreConfig::new(),
            };
            run(config, host_config, store_config).await
        }
        Commands::Send {
            code,
            payload,
            timeout,
        } => send(config, host_config, code, payload, Duration::from_secs(timeout)).await,
    }
}

async fn run(
    config: ManagerConfig,
    host_config: SocketHostConfig,
    store_config: StoreConfig,
) -> Result<()> {
    let store: Arc<dyn SecretStore> = Arc::new(EncryptedFileStore::new(&store_config));
    let handler = SecureStringHandler::new(NamespacedSecrets::with_qualifier(
        store,
        store_config.qualifier.clone(),
    ));

    let (listener, mut events) = ChannelListener::channel();
    let (handle, task) = ConnectionBuilder::new(
        SocketServiceHost::new(host_config),
        DedupListener::new(listener),
    )
    .with_config(config)
    .with_secure_strings(handler)
    .spawn();
    handle.start();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(LauncherEvent::BindStatusChanged(bound)) => {
                    println!("Bound to admin service: {bound}");
                }
                Some(LauncherEvent::MessageReceived { command_code, payload }) => {
                    println!("{command_code}: {}", payload.unwrap_or_default());
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt, shutting down");
                break;
            }
        }
    }

    handle.shutdown().await;
    task.await.context("Connection manager task failed")?;
    Ok(())
}

async fn send(
    config: ManagerConfig,
    host_config: SocketHostConfig,
    code: i32,
    payload: Option<String>,
    timeout: Duration,
) -> Result<()> {
    let (listener, mut events) = ChannelListener::channel();
    let (handle, task) = ConnectionBuilder::new(SocketServiceHost::new(host_config), listener)
        .with_config(config)
        .spawn();
    handle.start();

    tokio::time::timeout(timeout, wait_until_bound(&handle, &mut events))
        .await
        .context("Timed out waiting for the admin service")?;

    if !handle.send(code, payload).await {
        bail!("Failed to send command {code}");
    }
    println!("Sent command {code}");

    handle.shutdown().await;
    task.await.context("Connection manager task failed")?;
    Ok(())
}

async fn wait_until_bound(
    handle: &ConnectionHandle,
    events: &mut tokio::sync::mpsc::UnboundedReceiver<LauncherEvent>,
) {
    if handle.state().await == ConnectionState::Bound {
        return;
    }
    while let Some(event) = events.recv().await {
        if event == LauncherEvent::BindStatusChanged(true) {
            return;
        }
    }
}
