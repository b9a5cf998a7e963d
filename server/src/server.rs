use std::{future::Future, sync::Arc};

use anyhow::{anyhow, Context, Result};
use kiosk_common::{
    codes,
    envelope::{Envelope, Messenger},
    platform_socket::{bind_listener, socket_path},
    wire::{read_frame, spawn_writer},
    SecretStore, SecureStringHandler, SecureStringRequest,
};
use tokio::{net::UnixStream, task::JoinSet};

use crate::{
    config::AdminServerConfig,
    dispatcher::{AdminDispatcher, AdminHandler, ClientRegistry},
    peer::{is_peer_allowed, peer_identity},
};

/// Admin service accepting launcher connections on a Unix socket
pub struct AdminServer<H> {
    config:     AdminServerConfig,
    dispatcher: Arc<AdminDispatcher<H>>,
}

impl<H: AdminHandler> AdminServer<H> {
    pub fn new(config: AdminServerConfig, handler: H) -> Self {
        Self {
            config,
            dispatcher: Arc::new(AdminDispatcher::new(handler)),
        }
    }

    /// Creates a server that also answers secure-string requests from a
    /// local store
    pub fn with_secure_strings(
        config: AdminServerConfig,
        handler: H,
        secure_strings: SecureStringHandler<Arc<dyn SecretStore>>,
    ) -> Self {
        Self {
            config,
            dispatcher: Arc::new(AdminDispatcher::new(handler).with_secure_strings(secure_strings)),
        }
    }

    /// Handle for pushing to registered launchers
    pub fn handle(&self) -> AdminHandle {
        AdminHandle {
            clients: self.dispatcher.clients(),
        }
    }

    pub fn dispatcher(&self) -> &AdminDispatcher<H> {
        &self.dispatcher
    }

    /// Serves launchers until the process ends
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serves launchers until `shutdown` completes, then removes the socket
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let path = socket_path(&self.config.socket_dir, &self.config.package);
        let listener = bind_listener(&path)
            .with_context(|| format!("Failed to bind to socket: {}", path.display()))?;

        tracing::info!("Admin service listening on: {}", path.display());

        tokio::pin!(shutdown);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                Some(finished) = connections.join_next() => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            tracing::error!("Connection task panicked: {}", e);
                        }
                    }
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        tracing::info!("New connection received");
                        let dispatcher = self.dispatcher.clone();
                        let same_user_only = self.config.same_user_only;
                        connections.spawn(async move {
                            if let Err(e) = serve_connection(stream, dispatcher, same_user_only).await {
                                tracing::error!("Client error: {:#}", e);
                            }
                        });
                    }
                    Err(e) => tracing::error!("Connection error: {}", e),
                },
            }
        }

        tracing::info!("Admin service shutting down");
        connections.abort_all();
        while connections.join_next().await.is_some() {}
        // Registered routes keep their writers, and so the sockets, alive
        self.dispatcher.clients().lock().await.clear();

        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!("Failed to remove socket file: {}", e);
        }
        Ok(())
    }
}

async fn serve_connection<H: AdminHandler>(
    stream: UnixStream,
    dispatcher: Arc<AdminDispatcher<H>>,
    same_user_only: bool,
) -> Result<()> {
    let peer = peer_identity(&stream)?;
    tracing::info!("Client PID: {:?}, UID: {}", peer.pid, peer.uid);

    if same_user_only && !is_peer_allowed(&peer) {
        return Err(anyhow!("Client user verification failed"));
    }

    let (mut reader, writer) = stream.into_split();
    let (route, writer_task) = spawn_writer(writer);

    let result = async {
        while let Some(frame) = read_frame(&mut reader).await? {
            dispatcher.dispatch(frame.into_envelope(&route)).await;
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;

    dispatcher.forget(&route).await;
    writer_task.abort();
    result
}

/// Sends envelopes to every registered launcher
#[derive(Clone)]
pub struct AdminHandle {
    clients: ClientRegistry,
}

impl AdminHandle {
    /// Number of registered launchers
    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Pushes an envelope to every launcher, dropping the ones that are gone.
    ///
    /// Returns how many launchers it reached.
    pub async fn push(&self, command_code: i32, payload: Option<String>) -> usize {
        self.broadcast(command_code, payload, false).await
    }

    /// Asks every launcher's secure-string store; answers arrive through
    /// [`AdminHandler::on_secure_string_response`]
    pub async fn request_secure_string(&self, request: &SecureStringRequest) -> usize {
        tracing::debug!("Secure String Request to launchers: {:?}", request);
        self.broadcast(codes::SECURE_STRING_REQUEST, Some(request.to_json()), true)
            .await
    }

    async fn broadcast(&self, command_code: i32, payload: Option<String>, expect_reply: bool) -> usize {
        let mut clients = self.clients.lock().await;
        let mut delivered = 0;

        clients.retain(|id, route: &mut Messenger| {
            let mut envelope = Envelope::new(command_code, payload.clone());
            if expect_reply {
                // Replies come back on the same connection
                envelope = envelope.with_reply_route(route.clone());
            }
            match route.send(envelope) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(e) => {
                    tracing::warn!("Dropping client {}: {}", id, e);
                    false
                }
            }
        });

        delivered
    }
}
