use thiserror::Error;

use crate::codec::SecureStringRequestKind;

/// The admin app could not be located among the installed components
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// No installed component matched the naming convention
    #[error("admin service not installed (prefix {prefix})")]
    NotInstalled {
        /// Package prefix that was searched for
        prefix: String,
    },
    /// Enumerating installed components failed
    #[error("failed to enumerate installed components: {0}")]
    Enumeration(String),
}

/// Connecting to or registering with the admin service failed
#[derive(Debug, Error)]
pub enum BindError {
    /// The remote service could not be started
    #[error("failed to start service {component}: {reason}")]
    StartFailed {
        /// Component that was being started
        component: String,
        /// Underlying reason
        reason:    String,
    },
    /// The bind request itself was rejected
    #[error("bind to {component} rejected: {reason}")]
    Rejected {
        /// Component that was being bound
        component: String,
        /// Underlying reason
        reason:    String,
    },
    /// Client registration could not be dispatched after connect
    #[error("client registration failed: {0}")]
    Registration(#[from] DispatchError),
}

/// An envelope could not be delivered to its endpoint
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The receiving side of the endpoint has gone away
    #[error("endpoint {0} is closed")]
    EndpointClosed(String),
    /// No endpoint is bound
    #[error("not bound to the admin service")]
    NotBound,
}

/// A payload failed to parse according to the protocol
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The payload is absent, not JSON, or not a JSON object
    #[error("Error parsing json")]
    InvalidJson,
    /// The `request` field is missing or empty
    #[error("Error getting request string")]
    MissingRequest,
    /// The `request` field does not name a known request kind
    #[error("Error identifying request")]
    UnknownRequest(String),
    /// The `key` field is missing or empty
    #[error("Error getting key")]
    MissingKey(SecureStringRequestKind),
    /// A SET request is missing its `value`
    #[error("Error identifying string to save")]
    MissingValue(SecureStringRequestKind),
    /// A secure-string response carries neither `result` nor `error`
    #[error("Error identifying response body")]
    MissingResponseBody,
    /// A command payload was required but absent
    #[error("command {code} requires a payload")]
    MissingPayload {
        /// Command code
        code: i32,
    },
    /// A command payload was present where none is allowed
    #[error("command {code} does not take a payload")]
    UnexpectedPayload {
        /// Command code
        code: i32,
    },
    /// The payload does not match the command's schema
    #[error("invalid payload for command {code}: {reason}")]
    InvalidPayload {
        /// Command code
        code:   i32,
        /// Schema violation
        reason: String,
    },
    /// The command code is not part of the protocol
    #[error("unknown command code {0}")]
    UnknownCommand(i32),
}

impl ParseError {
    /// Request kind already identified when the failure happened, if any
    pub fn request_kind(&self) -> Option<SecureStringRequestKind> {
        match self {
            ParseError::MissingKey(kind) | ParseError::MissingValue(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// The encrypted secret store is unavailable or an operation failed
#[derive(Debug, Error)]
pub enum StoreError {
    /// Key material or the backing file could not be initialized
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
    /// Reading or writing the backing file failed
    #[error("secret store I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The backing file is not valid
    #[error("secret store corrupted: {0}")]
    Corrupted(String),
    /// Encryption or decryption failed
    #[error("secret store crypto error: {0}")]
    Crypto(String),
}
