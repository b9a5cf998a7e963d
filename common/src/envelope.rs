use std::fmt;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::DispatchError;

/// A handle to an endpoint's inbound queue.
///
/// Cloning a messenger yields another handle to the same endpoint. Sending
/// never blocks; it fails once the receiving side has been dropped, which is
/// how a dead or disconnected endpoint shows up.
#[derive(Clone)]
pub struct Messenger {
    id: Uuid,
    tx: mpsc::UnboundedSender<Envelope>,
}

/// Opaque handle identifying where a reply should be delivered
pub type ReplyRoute = Messenger;

impl Messenger {
    /// Creates an endpoint and returns its handle together with the queue
    /// that receives everything sent to it
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::from_sender(tx), rx)
    }

    /// Wraps an existing sender as an endpoint handle
    pub fn from_sender(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    /// Identifier used in logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the receiving side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Delivers an envelope to this endpoint
    pub fn send(&self, envelope: Envelope) -> Result<(), DispatchError> {
        tracing::trace!(
            "Dispatching command {} to endpoint {}",
            envelope.command_code,
            self.id
        );
        self.tx
            .send(envelope)
            .map_err(|_| DispatchError::EndpointClosed(self.id.to_string()))
    }
}

impl fmt::Debug for Messenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Messenger").field("id", &self.id).finish()
    }
}

impl PartialEq for Messenger {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Messenger {}

/// The unit of IPC exchange
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Integer command code; negative codes are control commands
    pub command_code: i32,
    /// UTF-8 JSON payload, if the command carries one
    pub payload:      Option<String>,
    /// Where a reply should be sent; absent on fire-and-forget commands
    pub reply_route:  Option<ReplyRoute>,
}

impl Envelope {
    /// Creates an envelope without a reply route
    pub fn new(command_code: i32, payload: Option<String>) -> Self {
        Self {
            command_code,
            payload,
            reply_route: None,
        }
    }

    /// Attaches the endpoint replies should be addressed to
    pub fn with_reply_route(mut self, route: ReplyRoute) -> Self {
        self.reply_route = Some(route);
        self
    }

    /// Payload as a string slice
    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    /// Sends `payload` back along this envelope's reply route using the same
    /// command code. Returns `false` when there is no route or delivery fails.
    pub fn reply(&self, payload: String) -> bool {
        let Some(route) = &self.reply_route else {
            tracing::warn!(
                "No reply route on command {}, dropping reply",
                self.command_code
            );
            return false;
        };

        match route.send(Envelope::new(self.command_code, Some(payload))) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Error replying to command {}: {}", self.command_code, e);
                false
            }
        }
    }
}
