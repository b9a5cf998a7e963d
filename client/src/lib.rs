//! Kiosk launcher side of the admin link
//!
//! Keeps the launcher bound to the admin service over a local socket,
//! retrying on a fixed interval, and exposes a handle for sending commands.
//! Secure-string requests from the admin service can be answered from a local
//! encrypted store.
//!
//! # Example
//!
//! ```no_run
//! use kiosk_launcher::{ChannelListener, ConnectionBuilder, SocketHostConfig, SocketServiceHost};
//!
//! # async fn run() {
//! let host = SocketServiceHost::new(SocketHostConfig::new());
//! let (listener, mut events) = ChannelListener::channel();
//! let (handle, _task) = ConnectionBuilder::new(host, listener).spawn();
//! handle.start();
//!
//! if !handle.get_device_status().await {
//!     // Not bound yet; a bind attempt is under way
//! }
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # }
//! ```

mod config;
mod connection;
mod discovery;
mod listener;
pub mod push;
mod socket_host;

pub use config::{ManagerConfig, SocketHostConfig};
pub use connection::{ConnectionBuilder, ConnectionHandle, ConnectionState, SecureStrings};
pub use discovery::{find_admin_component, BindCallbacks, ServiceComponent, ServiceHost};
pub use listener::{ChannelListener, ConnectionListener, LauncherEvent};
pub use socket_host::SocketServiceHost;
// Re-export important types from kiosk-common for convenience
pub use kiosk_common::{codes, Command};
