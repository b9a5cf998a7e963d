//! Admin side of the kiosk admin link
//!
//! Publishes a Unix socket launchers bind to, keeps a registry of the
//! launchers that registered, routes their commands to an [`AdminHandler`]
//! and lets the admin push updates or issue secure-string requests back.

mod config;
mod dispatcher;
mod peer;
mod server;

pub use config::AdminServerConfig;
pub use dispatcher::{AdminDispatcher, AdminHandler, ClientRegistry, LoggingHandler};
pub use peer::{is_peer_allowed, peer_identity, PeerIdentity};
pub use server::{AdminHandle, AdminServer};
