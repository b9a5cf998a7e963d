//! Connection manager: keeps the launcher bound to the admin service.
//!
//! All state lives on a single tokio task. Bind outcomes, inbound envelopes,
//! caller requests and the retry timer arrive on that task as events, so the
//! connection state is never touched concurrently.

use std::{future, ops::ControlFlow, sync::Arc};

use kiosk_common::{
    codes,
    command::{AppTarget, Command, WifiCredentials},
    dispatch::{self, Route},
    envelope::{Envelope, Messenger},
    error::{BindError, DispatchError},
    secure_string::SecureStringHandler,
    store::SecretStore,
};
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{self, Instant, Interval, MissedTickBehavior},
};

use crate::{
    config::ManagerConfig,
    discovery::{find_admin_component, BindCallbacks, BindEvent, ServiceHost},
    listener::ConnectionListener,
};

/// Binding state towards the admin service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unbound,
    Binding,
    Bound,
}

/// Secure-string handler backed by any secret store
pub type SecureStrings = SecureStringHandler<Arc<dyn SecretStore>>;

enum Request {
    Start,
    Send {
        command_code: i32,
        payload:      Option<String>,
        reply:        oneshot::Sender<bool>,
    },
    State(oneshot::Sender<ConnectionState>),
    Shutdown(oneshot::Sender<()>),
}

/// Receivers drained by the event loop
pub(crate) struct Inbox {
    /// Binding changes and envelopes delivered by the host, in transport order
    bind_events: mpsc::UnboundedReceiver<BindEvent>,
    /// Envelopes sent straight to the manager's reply route
    incoming:    mpsc::UnboundedReceiver<Envelope>,
}

/// Builds and spawns a connection manager
pub struct ConnectionBuilder {
    config:         ManagerConfig,
    host:           Box<dyn ServiceHost>,
    listener:       Box<dyn ConnectionListener>,
    secure_strings: Option<SecureStrings>,
}

impl ConnectionBuilder {
    pub fn new(host: impl ServiceHost + 'static, listener: impl ConnectionListener + 'static) -> Self {
        Self {
            config:         ManagerConfig::default(),
            host:           Box::new(host),
            listener:       Box::new(listener),
            secure_strings: None,
        }
    }

    /// Set the manager configuration
    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Answer secure-string requests from the admin service with `handler`
    /// instead of passing them to the listener
    pub fn with_secure_strings(mut self, handler: SecureStrings) -> Self {
        self.secure_strings = Some(handler);
        self
    }

    pub(crate) fn build(self) -> (ConnectionManager, Inbox) {
        let (bind_events_tx, bind_events) = mpsc::unbounded_channel();
        let (endpoint, incoming) = Messenger::channel();

        let manager = ConnectionManager {
            config: self.config,
            host: self.host,
            listener: self.listener,
            secure_strings: self.secure_strings,
            state: ConnectionState::Unbound,
            remote: None,
            endpoint,
            bind_events: bind_events_tx,
            binding: 0,
            started: false,
            attempted_this_tick: false,
        };
        let inbox = Inbox {
            bind_events,
            incoming,
        };
        (manager, inbox)
    }

    /// Spawns the event loop on the current tokio runtime.
    ///
    /// Nothing is attempted until [`ConnectionHandle::start`] is called. The
    /// loop shuts down when every handle has been dropped.
    pub fn spawn(self) -> (ConnectionHandle, JoinHandle<()>) {
        let (manager, inbox) = self.build();
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let task = tokio::spawn(manager.run(inbox, requests));
        (
            ConnectionHandle {
                requests: requests_tx,
            },
            task,
        )
    }
}

pub(crate) struct ConnectionManager {
    config:              ManagerConfig,
    host:                Box<dyn ServiceHost>,
    listener:            Box<dyn ConnectionListener>,
    secure_strings:      Option<SecureStrings>,
    state:               ConnectionState,
    remote:              Option<Messenger>,
    /// This manager's own inbound endpoint, used as reply route
    endpoint:            Messenger,
    bind_events:         mpsc::UnboundedSender<BindEvent>,
    /// Identifies the current bind request; older callbacks are stale
    binding:             u64,
    started:             bool,
    attempted_this_tick: bool,
}

impl ConnectionManager {
    async fn run(mut self, mut inbox: Inbox, mut requests: mpsc::UnboundedReceiver<Request>) {
        let mut ticker: Option<Interval> = None;

        loop {
            tokio::select! {
                biased;

                Some(event) = inbox.bind_events.recv() => self.on_bind_event(event),

                Some(envelope) = inbox.incoming.recv() => self.on_inbound(envelope),

                request = requests.recv() => {
                    let Some(request) = request else {
                        tracing::debug!("All connection handles dropped");
                        self.shutdown();
                        break;
                    };
                    if matches!(request, Request::Start) && ticker.is_none() {
                        let period = self.config.bind_interval;
                        let mut interval = time::interval_at(Instant::now() + period, period);
                        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        ticker = Some(interval);
                    }
                    if self.on_request(request).is_break() {
                        break;
                    }
                }

                _ = next_tick(&mut ticker) => self.on_tick(),
            }
        }

        tracing::info!("Connection manager stopped");
    }

    fn on_request(&mut self, request: Request) -> ControlFlow<()> {
        match request {
            Request::Start => self.start(),
            Request::Send {
                command_code,
                payload,
                reply,
            } => {
                let sent = self.send(command_code, payload);
                let _ = reply.send(sent);
            }
            Request::State(reply) => {
                let _ = reply.send(self.state);
            }
            Request::Shutdown(done) => {
                self.shutdown();
                let _ = done.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        tracing::info!(
            "Connection manager started, retrying every {:?}",
            self.config.bind_interval
        );
        self.try_bind();
    }

    fn on_tick(&mut self) {
        self.attempted_this_tick = false;
        self.try_bind();
    }

    /// Starts one bind attempt unless one already ran during this tick while
    /// unbound.
    fn try_bind(&mut self) {
        if !self.started || self.state != ConnectionState::Unbound {
            return;
        }
        if self.attempted_this_tick {
            tracing::debug!("Bind already attempted this tick");
            return;
        }
        self.attempted_this_tick = true;

        let component = match self
            .host
            .installed_packages()
            .and_then(|packages| find_admin_component(&packages, &self.config))
        {
            Ok(component) => component,
            Err(e) => {
                tracing::warn!("Admin service not found: {}", e);
                return;
            }
        };

        if let Err(e) = self.host.ensure_running(&component) {
            tracing::warn!("Could not start admin service: {}", e);
            return;
        }

        self.binding += 1;
        let callbacks = BindCallbacks::new(self.binding, self.bind_events.clone());
        match self.host.bind(&component, callbacks) {
            Ok(()) => {
                tracing::info!("Binding to {}", component);
                self.state = ConnectionState::Binding;
            }
            Err(e) => tracing::warn!("Bind request to {} failed: {}", component, e),
        }
    }

    fn on_bind_event(&mut self, event: BindEvent) {
        match event {
            BindEvent::Connected { binding, remote } => self.on_connected(binding, remote),
            BindEvent::BindFailed { binding, error } => self.on_bind_failed(binding, error),
            BindEvent::Inbound { binding, envelope } => {
                if self.is_current(binding) && self.state == ConnectionState::Bound {
                    self.on_inbound(envelope);
                } else {
                    tracing::debug!(
                        "Dropping command {} from released binding {}",
                        envelope.command_code,
                        binding
                    );
                }
            }
            BindEvent::Disconnected { binding } => self.on_disconnected(binding),
        }
    }

    fn is_current(&self, binding: u64) -> bool {
        if binding != self.binding {
            tracing::debug!("Ignoring callback from stale binding {}", binding);
            return false;
        }
        true
    }

    fn on_connected(&mut self, binding: u64, remote: Messenger) {
        if !self.is_current(binding) || self.state != ConnectionState::Binding {
            return;
        }

        self.state = ConnectionState::Bound;
        self.remote = Some(remote);

        if let Err(e) = self.dispatch(codes::REGISTER_CLIENT, None) {
            tracing::error!("{}", BindError::Registration(e));
            self.release_binding();
            return;
        }

        tracing::info!("Bound to admin service");
        // A later disconnect may rebind right away on the next send
        self.attempted_this_tick = false;
        self.listener.on_bind_status_changed(true);
    }

    fn on_bind_failed(&mut self, binding: u64, error: BindError) {
        if !self.is_current(binding) || self.state != ConnectionState::Binding {
            return;
        }
        tracing::warn!("Bind failed: {}", error);
        self.release_binding();
    }

    fn on_disconnected(&mut self, binding: u64) {
        if !self.is_current(binding) {
            return;
        }
        let was_bound = self.state == ConnectionState::Bound;
        self.release_binding();
        if was_bound {
            tracing::info!("Disconnected from admin service");
            self.listener.on_bind_status_changed(false);
        }
    }

    fn release_binding(&mut self) {
        self.state = ConnectionState::Unbound;
        self.remote = None;
        self.host.unbind();
    }

    fn dispatch(
        &self,
        command_code: i32,
        payload: Option<String>,
    ) -> Result<(), DispatchError> {
        let remote = self.remote.as_ref().ok_or(DispatchError::NotBound)?;
        let envelope = Envelope::new(command_code, payload).with_reply_route(self.endpoint.clone());
        remote.send(envelope)
    }

    /// Sends a command if bound. Otherwise kicks off a bind attempt and
    /// returns false; nothing is queued.
    fn send(&mut self, command_code: i32, payload: Option<String>) -> bool {
        if self.state != ConnectionState::Bound {
            tracing::debug!("Not bound, dropping command {}", command_code);
            self.try_bind();
            return false;
        }

        match self.dispatch(command_code, payload) {
            Ok(()) => {
                tracing::debug!("Sent command {}", command_code);
                true
            }
            Err(e) => {
                tracing::warn!("Error sending command {}: {}", command_code, e);
                self.release_binding();
                self.listener.on_bind_status_changed(false);
                false
            }
        }
    }

    fn on_inbound(&mut self, envelope: Envelope) {
        tracing::debug!("Received command {}", envelope.command_code);

        match dispatch::route(envelope.command_code) {
            Route::SecureString => {
                if let Some(handler) = &self.secure_strings {
                    handler.handle(&envelope);
                    return;
                }
            }
            Route::Control => {
                tracing::warn!(
                    "Ignoring control command {} from admin service",
                    envelope.command_code
                );
                return;
            }
            Route::Listener => {}
        }

        self.listener
            .on_message_received(envelope.command_code, envelope.payload);
    }

    fn shutdown(&mut self) {
        if self.state == ConnectionState::Bound {
            if let Err(e) = self.dispatch(codes::UNREGISTER_CLIENT, None) {
                tracing::warn!("Could not unregister from admin service: {}", e);
            }
            self.release_binding();
            self.listener.on_bind_status_changed(false);
        } else if self.state == ConnectionState::Binding {
            self.release_binding();
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

/// Cloneable handle to a running connection manager
#[derive(Clone)]
pub struct ConnectionHandle {
    requests: mpsc::UnboundedSender<Request>,
}

impl ConnectionHandle {
    /// Begins periodic bind attempts; calling it again has no effect
    pub fn start(&self) {
        let _ = self.requests.send(Request::Start);
    }

    /// Current connection state, `Unbound` once the manager has stopped
    pub async fn state(&self) -> ConnectionState {
        let (reply, rx) = oneshot::channel();
        if self.requests.send(Request::State(reply)).is_err() {
            return ConnectionState::Unbound;
        }
        rx.await.unwrap_or(ConnectionState::Unbound)
    }

    /// Sends a command to the admin service.
    ///
    /// Returns whether it was dispatched. While unbound this returns false
    /// and triggers a bind attempt; callers retry.
    pub async fn send(&self, command_code: i32, payload: Option<String>) -> bool {
        let (reply, rx) = oneshot::channel();
        let request = Request::Send {
            command_code,
            payload,
            reply,
        };
        if self.requests.send(request).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn send_command(&self, command: &Command) -> bool {
        self.send(command.code(), command.payload()).await
    }

    /// Unregisters, releases the binding and stops the manager
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.requests.send(Request::Shutdown(done)).is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn get_wifi_networks(&self) -> bool {
        self.send_command(&Command::GetWifiNetworks).await
    }

    pub async fn connect_to_wifi_network(&self, ssid: &str, password: &str) -> bool {
        self.send_command(&Command::ConnectToWifiNetwork(WifiCredentials {
            ssid:     ssid.to_string(),
            password: password.to_string(),
        }))
        .await
    }

    /// Enterprise networks take the full configuration object
    pub async fn connect_to_enterprise_wifi_network(&self, config: Value) -> bool {
        self.send_command(&Command::ConnectToEnterpriseWifiNetwork(config))
            .await
    }

    pub async fn forget_wifi_network(&self, ssid: &str) -> bool {
        self.send_command(&Command::ForgetWifiNetwork {
            ssid: ssid.to_string(),
        })
        .await
    }

    pub async fn get_wifi_connection_status(&self) -> bool {
        self.send_command(&Command::GetWifiConnectionStatus).await
    }

    pub async fn enable_wifi(&self) -> bool {
        self.send_command(&Command::EnableWifi).await
    }

    pub async fn disable_wifi(&self) -> bool {
        self.send_command(&Command::DisableWifi).await
    }

    pub async fn get_runtime_settings(&self) -> bool {
        self.send_command(&Command::GetRuntimeSettings).await
    }

    pub async fn get_device_status(&self) -> bool {
        self.send_command(&Command::GetDeviceStatus).await
    }

    pub async fn get_device_data(&self) -> bool {
        self.send_command(&Command::GetDeviceData).await
    }

    pub async fn enable_kiosk_mode(&self) -> bool {
        self.send_command(&Command::EnableKioskMode).await
    }

    pub async fn disable_kiosk_mode(&self) -> bool {
        self.send_command(&Command::DisableKioskMode).await
    }

    pub async fn exit_launcher(&self) -> bool {
        self.send_command(&Command::ExitLauncher).await
    }

    pub async fn check_db(&self) -> bool {
        self.send_command(&Command::CheckDb).await
    }

    pub async fn enable_tutorial_mode(&self) -> bool {
        self.send_command(&Command::EnableTutorialMode).await
    }

    pub async fn disable_tutorial_mode(&self) -> bool {
        self.send_command(&Command::DisableTutorialMode).await
    }

    pub async fn send_home_screen_state(&self, state: Value) -> bool {
        self.send_command(&Command::HomeScreenState(state)).await
    }

    pub async fn override_kiosk_app(&self, package_name: &str) -> bool {
        self.send_command(&Command::OverrideKioskApp(app(package_name)))
            .await
    }

    pub async fn kill_app(&self, package_name: &str) -> bool {
        self.send_command(&Command::KillApp(app(package_name))).await
    }

    pub async fn restart_app(&self, package_name: &str) -> bool {
        self.send_command(&Command::RestartApp(app(package_name))).await
    }

    pub async fn power_off(&self) -> bool {
        self.send_command(&Command::PowerOff).await
    }

    pub async fn reboot(&self) -> bool {
        self.send_command(&Command::Reboot).await
    }

    pub async fn get_casting_code(&self) -> bool {
        self.send_command(&Command::GetCastingCode).await
    }

    pub async fn stop_casting(&self) -> bool {
        self.send_command(&Command::StopCasting).await
    }

    pub async fn upload_device_logs(&self) -> bool {
        self.send_command(&Command::UploadDeviceLogs).await
    }
}

fn app(package_name: &str) -> AppTarget {
    AppTarget {
        package_name: package_name.to_string(),
    }
}
