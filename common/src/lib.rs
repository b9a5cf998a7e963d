//! Kiosk admin link common library
//!
//! Shared between the kiosk launcher and the admin service:
//!
//! - Envelopes, messengers and the command code space
//! - The message codec and socket wire framing
//! - The secure-string protocol handler and the secret stores behind it
//! - Error types and configuration constants

/// Command codes and typed commands
pub mod command;

/// Envelope payload codec and secure-string JSON
pub mod codec;

/// Configuration constants and store configuration
pub mod config;

/// Inbound envelope routing
pub mod dispatch;

/// AES-GCM encrypted, file-backed secret store
pub mod encrypted_store;

/// Envelopes and reply routes
pub mod envelope;

pub mod error;

/// Unix socket helpers
pub mod platform_socket;

/// Secure-string request handling
pub mod secure_string;

/// Secret store trait and adapters
pub mod store;

/// Socket framing
pub mod wire;

// Re-export commonly used types for convenience
pub use codec::{SecureStringRequest, SecureStringRequestKind, SecureStringResponse};
pub use command::{codes, Command};
pub use config::StoreConfig;
pub use encrypted_store::EncryptedFileStore;
pub use envelope::{Envelope, Messenger, ReplyRoute};
pub use error::{BindError, DiscoveryError, DispatchError, ParseError, StoreError};
pub use secure_string::SecureStringHandler;
pub use store::{MemorySecretStore, NamespacedSecrets, SecretStore};
