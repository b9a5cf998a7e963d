use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use kiosk_admin::{AdminServer, AdminServerConfig, LoggingHandler};
use kiosk_common::{
    config::StoreConfig, EncryptedFileStore, NamespacedSecrets, SecretStore, SecureStringHandler,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kiosk-admin")]
#[command(about = "Kiosk admin service")]
struct Args {
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Directory the socket is published in
    #[arg(long)]
    socket_dir: Option<PathBuf>,

    /// Package name to publish the socket under
    #[arg(long)]
    package: Option<String>,

    /// Accept launchers running as other users
    #[arg(long)]
    allow_other_users: bool,

    /// Answer launcher secure-string requests from an encrypted store here
    #[arg(long)]
    store_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    info!("Starting kiosk admin service...");

    let mut config = AdminServerConfig::new().with_same_user_only(!args.allow_other_users);
    if let Some(dir) = args.socket_dir {
        config = config.with_socket_dir(dir);
    }
    if let Some(package) = args.package {
        config = config.with_package(package);
    }
    if !config.same_user_only {
        warn!("Accepting launchers running as any user");
    }

    let server = match args.store_dir {
        Some(dir) => {
            let store_config = StoreConfig::in_dir(dir);
            let store: Arc<dyn SecretStore> = Arc::new(EncryptedFileStore::new(&store_config));
            let secure_strings = SecureStringHandler::new(NamespacedSecrets::with_qualifier(
                store,
                store_config.qualifier.clone(),
            ));
            AdminServer::with_secure_strings(config, LoggingHandler, secure_strings)
        }
        None => AdminServer::new(config, LoggingHandler),
    };

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for interrupt: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received interrupt");
        })
        .await
}
