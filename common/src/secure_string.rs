//! Serves secure-string requests against a [`NamespacedSecrets`] store.

use crate::{
    codec::{self, SecureStringRequest, SecureStringRequestKind, SecureStringResponse},
    envelope::Envelope,
    error::ParseError,
    store::{NamespacedSecrets, SecretStore},
};

pub const NO_VALUE: &str = "no value";
pub const FAILED_TO_SAVE: &str = "failed to save";
pub const FAILED_TO_DELETE: &str = "failed to delete";

const TRUE: &str = "true";
const FALSE: &str = "false";

/// Answers GET / SET / EXISTS / DELETE requests.
///
/// Holds no state between requests apart from the store itself.
pub struct SecureStringHandler<S> {
    secrets: NamespacedSecrets<S>,
}

impl<S: SecretStore> SecureStringHandler<S> {
    pub fn new(secrets: NamespacedSecrets<S>) -> Self {
        Self { secrets }
    }

    pub fn secrets(&self) -> &NamespacedSecrets<S> {
        &self.secrets
    }

    /// Handles one request envelope and replies on its reply route.
    ///
    /// Returns false when no reply could be delivered.
    pub fn handle(&self, envelope: &Envelope) -> bool {
        let response = self.process(envelope.payload());
        envelope.reply(response.to_json())
    }

    /// Computes the reply for a raw request payload
    pub fn process(&self, payload: Option<&str>) -> SecureStringResponse {
        let request = match payload
            .ok_or(ParseError::InvalidJson)
            .and_then(codec::parse_secure_string_request)
        {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Secure String Request rejected: {}", e);
                return SecureStringResponse::error(e.request_kind(), e.to_string());
            }
        };

        tracing::debug!("Secure String Request: {:?}", request);
        self.execute(&request)
    }

    fn execute(&self, request: &SecureStringRequest) -> SecureStringResponse {
        let kind = request.kind;
        let key = request.key.as_str();

        match kind {
            SecureStringRequestKind::Get => match self.secrets.get(key) {
                Some(value) if !value.is_empty() => SecureStringResponse::success(kind, value),
                _ => SecureStringResponse::error(Some(kind), NO_VALUE),
            },
            SecureStringRequestKind::Set => {
                let value = request.value.as_deref().unwrap_or_default();
                if self.secrets.set(key, value) {
                    SecureStringResponse::success(kind, TRUE)
                } else {
                    SecureStringResponse::error(Some(kind), FAILED_TO_SAVE)
                }
            }
            SecureStringRequestKind::Exists => {
                let exists = self.secrets.exists_non_empty(key);
                SecureStringResponse::success(kind, if exists { TRUE } else { FALSE })
            }
            SecureStringRequestKind::Delete => {
                if self.secrets.delete(key) {
                    SecureStringResponse::success(kind, TRUE)
                } else {
                    SecureStringResponse::error(Some(kind), FAILED_TO_DELETE)
                }
            }
        }
    }
}
