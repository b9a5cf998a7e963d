use tokio::sync::mpsc;

/// Receives connection status changes and inbound messages.
///
/// Called from the connection manager's event loop, one call at a time.
pub trait ConnectionListener: Send {
    /// Fires on every transition between unbound and bound
    fn on_bind_status_changed(&mut self, bound: bool);

    /// Fires for every inbound envelope not answered by the manager itself
    fn on_message_received(&mut self, command_code: i32, payload: Option<String>);
}

impl<L: ConnectionListener + ?Sized> ConnectionListener for Box<L> {
    fn on_bind_status_changed(&mut self, bound: bool) {
        (**self).on_bind_status_changed(bound)
    }

    fn on_message_received(&mut self, command_code: i32, payload: Option<String>) {
        (**self).on_message_received(command_code, payload)
    }
}

/// What a [`ChannelListener`] forwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LauncherEvent {
    BindStatusChanged(bool),
    MessageReceived {
        command_code: i32,
        payload:      Option<String>,
    },
}

/// Forwards listener calls into a channel
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<LauncherEvent>,
}

impl ChannelListener {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LauncherEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: LauncherEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Launcher event receiver dropped");
        }
    }
}

impl ConnectionListener for ChannelListener {
    fn on_bind_status_changed(&mut self, bound: bool) {
        self.forward(LauncherEvent::BindStatusChanged(bound));
    }

    fn on_message_received(&mut self, command_code: i32, payload: Option<String>) {
        self.forward(LauncherEvent::MessageReceived {
            command_code,
            payload,
        });
    }
}
