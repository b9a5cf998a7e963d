use std::{collections::HashMap, sync::Arc};

use kiosk_common::{
    codec::{self, SecureStringResponse},
    codes,
    command::Command,
    dispatch::{self, Route},
    envelope::{Envelope, Messenger},
    store::SecretStore,
    SecureStringHandler,
};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Launchers currently registered, keyed by the id of their reply route
pub type ClientRegistry = Arc<Mutex<HashMap<Uuid, Messenger>>>;

/// Application logic of the admin service
pub trait AdminHandler: Send + Sync + 'static {
    /// Handles a command from a launcher. A returned envelope is sent back on
    /// the command's reply route.
    fn handle_command(&self, command: Command) -> Option<Envelope>;

    /// A launcher answered one of this service's secure-string requests
    fn on_secure_string_response(&self, response: SecureStringResponse) {
        tracing::debug!(
            "Unhandled secure-string response for {:?}",
            response.for_request_kind
        );
    }
}

impl<H: AdminHandler + ?Sized> AdminHandler for Arc<H> {
    fn handle_command(&self, command: Command) -> Option<Envelope> {
        (**self).handle_command(command)
    }

    fn on_secure_string_response(&self, response: SecureStringResponse) {
        (**self).on_secure_string_response(response)
    }
}

/// Handler that only logs what it receives
#[derive(Debug, Default)]
pub struct LoggingHandler;

impl AdminHandler for LoggingHandler {
    fn handle_command(&self, command: Command) -> Option<Envelope> {
        tracing::info!("Command from launcher: {:?}", command);
        None
    }

    fn on_secure_string_response(&self, response: SecureStringResponse) {
        tracing::info!(
            "Secure-string response for {:?} (error: {})",
            response.for_request_kind,
            response.is_error
        );
    }
}

/// Routes envelopes arriving from launchers
pub struct AdminDispatcher<H> {
    handler:        H,
    clients:        ClientRegistry,
    secure_strings: Option<SecureStringHandler<Arc<dyn SecretStore>>>,
}

impl<H: AdminHandler> AdminDispatcher<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            clients: ClientRegistry::default(),
            secure_strings: None,
        }
    }

    /// Serve secure-string requests from launchers out of a local store
    pub fn with_secure_strings(mut self, handler: SecureStringHandler<Arc<dyn SecretStore>>) -> Self {
        self.secure_strings = Some(handler);
        self
    }

    pub fn clients(&self) -> ClientRegistry {
        self.clients.clone()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub async fn dispatch(&self, envelope: Envelope) {
        tracing::debug!("Dispatching command {}", envelope.command_code);

        match dispatch::route(envelope.command_code) {
            Route::Control => self.on_control(envelope).await,
            Route::SecureString => self.on_secure_string(envelope),
            Route::Listener => self.on_command(envelope),
        }
    }

    /// Drops a launcher whose connection went away without unregistering
    pub async fn forget(&self, route: &Messenger) {
        if self.clients.lock().await.remove(&route.id()).is_some() {
            tracing::info!("Client {} disconnected", route.id());
        }
    }

    async fn on_control(&self, envelope: Envelope) {
        let Some(route) = envelope.reply_route else {
            tracing::warn!(
                "Control command {} without reply route",
                envelope.command_code
            );
            return;
        };

        let mut clients = self.clients.lock().await;
        if envelope.command_code == codes::REGISTER_CLIENT {
            tracing::info!("Client {} registered", route.id());
            clients.insert(route.id(), route);
        } else if clients.remove(&route.id()).is_some() {
            tracing::info!("Client {} unregistered", route.id());
        }
    }

    /// Answers from launchers go to the handler; anything else is a request
    /// for the local store, which replies with an error if it cannot parse it.
    fn on_secure_string(&self, envelope: Envelope) {
        if let Some(Ok(response)) = envelope.payload().map(codec::parse_secure_string_response) {
            self.handler.on_secure_string_response(response);
            return;
        }

        match &self.secure_strings {
            Some(handler) => {
                handler.handle(&envelope);
            }
            None => tracing::warn!("No secure-string store, dropping request"),
        }
    }

    fn on_command(&self, envelope: Envelope) {
        let command = match Command::decode(envelope.command_code, envelope.payload()) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("Rejected command {}: {}", envelope.command_code, e);
                return;
            }
        };

        let Some(reply) = self.handler.handle_command(command) else {
            return;
        };
        match &envelope.reply_route {
            Some(route) => {
                if let Err(e) = route.send(reply) {
                    tracing::warn!("Error replying to command {}: {}", envelope.command_code, e);
                }
            }
            None => tracing::warn!(
                "No reply route on command {}, dropping reply",
                envelope.command_code
            ),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex as StdMutex;

    use kiosk_common::{
        MemorySecretStore, NamespacedSecrets, SecureStringRequest, SecureStringRequestKind,
    };
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;

    /// Records everything and answers GET_DEVICE_STATUS with a push
    #[derive(Default)]
    pub(crate) struct RecordingHandler {
        pub(crate) commands:  StdMutex<Vec<Command>>,
        pub(crate) responses: StdMutex<Vec<SecureStringResponse>>,
    }

    impl AdminHandler for RecordingHandler {
        fn handle_command(&self, command: Command) -> Option<Envelope> {
            let reply = (command == Command::GetDeviceStatus)
                .then(|| Envelope::new(codes::DEVICE_STATUS, Some(r#"{"battery":80}"#.into())));
            self.commands.lock().unwrap().push(command);
            reply
        }

        fn on_secure_string_response(&self, response: SecureStringResponse) {
            self.responses.lock().unwrap().push(response);
        }
    }

    fn client() -> (Messenger, UnboundedReceiver<Envelope>) {
        Messenger::channel()
    }

    #[tokio::test]
    async fn register_and_unregister_track_clients() {
        let dispatcher = AdminDispatcher::new(RecordingHandler::default());
        let (route, _rx) = client();

        dispatcher
            .dispatch(Envelope::new(codes::REGISTER_CLIENT, None).with_reply_route(route.clone()))
            .await;
        assert!(dispatcher.clients().lock().await.contains_key(&route.id()));

        dispatcher
            .dispatch(Envelope::new(codes::UNREGISTER_CLIENT, None).with_reply_route(route.clone()))
            .await;
        assert!(dispatcher.clients().lock().await.is_empty());

        dispatcher.dispatch(Envelope::new(codes::REGISTER_CLIENT, None)).await;
        assert!(dispatcher.clients().lock().await.is_empty());
    }

    #[tokio::test]
    async fn commands_reach_handler_and_replies_use_route() {
        let dispatcher = AdminDispatcher::new(RecordingHandler::default());
        let (route, mut rx) = client();

        dispatcher
            .dispatch(Envelope::new(codes::GET_DEVICE_STATUS, None).with_reply_route(route.clone()))
            .await;
        dispatcher
            .dispatch(Envelope::new(
                codes::KILL_APP,
                Some(r#"{"packageName":"com.example.game"}"#.into()),
            ))
            .await;

        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.command_code, codes::DEVICE_STATUS);
        assert_eq!(reply.payload(), Some(r#"{"battery":80}"#));

        let commands = dispatcher.handler().commands.lock().unwrap().clone();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0], Command::GetDeviceStatus);
    }

    #[tokio::test]
    async fn invalid_commands_are_rejected() {
        let dispatcher = AdminDispatcher::new(RecordingHandler::default());

        dispatcher
            .dispatch(Envelope::new(codes::KILL_APP, None))
            .await;
        dispatcher
            .dispatch(Envelope::new(codes::REBOOT, Some("{}".into())))
            .await;
        dispatcher.dispatch(Envelope::new(77, None)).await;

        assert!(dispatcher.handler().commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn secure_string_responses_go_to_handler() {
        let dispatcher = AdminDispatcher::new(RecordingHandler::default());

        dispatcher
            .dispatch(Envelope::new(
                codes::SECURE_STRING_REQUEST,
                Some(r#"{"response":"GET","error":"no value"}"#.into()),
            ))
            .await;

        let responses = dispatcher.handler().responses.lock().unwrap().clone();
        assert_eq!(
            responses,
            vec![SecureStringResponse::error(
                Some(SecureStringRequestKind::Get),
                "no value"
            )]
        );
    }

    #[tokio::test]
    async fn secure_string_requests_use_local_store() {
        let store: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
        let dispatcher = AdminDispatcher::new(RecordingHandler::default()).with_secure_strings(
            SecureStringHandler::new(NamespacedSecrets::with_qualifier(store, "svc")),
        );
        let (route, mut rx) = client();

        dispatcher
            .dispatch(
                Envelope::new(
                    codes::SECURE_STRING_REQUEST,
                    Some(SecureStringRequest::exists("token").to_json()),
                )
                .with_reply_route(route),
            )
            .await;

        assert_eq!(
            rx.try_recv().unwrap().payload(),
            Some(r#"{"response":"EXISTS","result":"false"}"#)
        );
        assert!(dispatcher.handler().responses.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn secure_string_request_without_payload_gets_parse_error() {
        let store: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
        let dispatcher = AdminDispatcher::new(RecordingHandler::default()).with_secure_strings(
            SecureStringHandler::new(NamespacedSecrets::with_qualifier(store, "svc")),
        );
        let (route, mut rx) = client();

        dispatcher
            .dispatch(Envelope::new(codes::SECURE_STRING_REQUEST, None).with_reply_route(route))
            .await;

        assert_eq!(
            rx.try_recv().unwrap().payload(),
            Some(r#"{"error":"Error parsing json"}"#)
        );
        assert!(dispatcher.handler().responses.lock().unwrap().is_empty());
    }
}
