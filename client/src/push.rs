//! Helpers for pushes sent by the admin app (codes >= 1000).

use std::collections::HashMap;

use kiosk_common::command::{codes, is_push_code};
use serde_json::Value;

use crate::listener::ConnectionListener;

/// Known push codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushKind {
    WifiNetworks,
    WifiConnectionStatus,
    RuntimeSettings,
    DeviceStatus,
    HandleCommand,
    GetHomeScreenState,
    DeviceData,
    CastingCode,
}

impl PushKind {
    pub fn from_code(command_code: i32) -> Option<Self> {
        let kind = match command_code {
            codes::WIFI_NETWORKS => PushKind::WifiNetworks,
            codes::WIFI_CONNECTION_STATUS => PushKind::WifiConnectionStatus,
            codes::RUNTIME_SETTINGS => PushKind::RuntimeSettings,
            codes::DEVICE_STATUS => PushKind::DeviceStatus,
            codes::HANDLE_COMMAND => PushKind::HandleCommand,
            codes::GET_HOME_SCREEN_STATE => PushKind::GetHomeScreenState,
            codes::DEVICE_DATA => PushKind::DeviceData,
            codes::CASTING_CODE => PushKind::CastingCode,
            _ => return None,
        };
        Some(kind)
    }

    pub fn code(&self) -> i32 {
        match self {
            PushKind::WifiNetworks => codes::WIFI_NETWORKS,
            PushKind::WifiConnectionStatus => codes::WIFI_CONNECTION_STATUS,
            PushKind::RuntimeSettings => codes::RUNTIME_SETTINGS,
            PushKind::DeviceStatus => codes::DEVICE_STATUS,
            PushKind::HandleCommand => codes::HANDLE_COMMAND,
            PushKind::GetHomeScreenState => codes::GET_HOME_SCREEN_STATE,
            PushKind::DeviceData => codes::DEVICE_DATA,
            PushKind::CastingCode => codes::CASTING_CODE,
        }
    }
}

/// Unwraps a payload that was JSON-encoded twice.
///
/// `"{\"a\":1}"` becomes `{"a":1}`; anything else is returned unchanged.
pub fn normalize_payload(payload: &str) -> String {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::String(inner)) if serde_json::from_str::<Value>(&inner).is_ok() => inner,
        _ => payload.to_string(),
    }
}

/// Listener adapter that normalizes push payloads and drops a push identical
/// to the previous one with the same code
pub struct DedupListener<L> {
    inner: L,
    last:  HashMap<i32, Option<String>>,
}

impl<L: ConnectionListener> DedupListener<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            last: HashMap::new(),
        }
    }

    pub fn into_inner(self) -> L {
        self.inner
    }
}

impl<L: ConnectionListener> ConnectionListener for DedupListener<L> {
    fn on_bind_status_changed(&mut self, bound: bool) {
        if !bound {
            // The admin app re-sends its state after a rebind
            self.last.clear();
        }
        self.inner.on_bind_status_changed(bound);
    }

    fn on_message_received(&mut self, command_code: i32, payload: Option<String>) {
        if !is_push_code(command_code) {
            self.inner.on_message_received(command_code, payload);
            return;
        }

        let payload = payload.as_deref().map(normalize_payload);
        if self.last.get(&command_code) == Some(&payload) {
            tracing::debug!("Dropping repeated push {}", command_code);
            return;
        }
        self.last.insert(command_code, payload.clone());
        self.inner.on_message_received(command_code, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{ChannelListener, LauncherEvent};

    #[test]
    fn push_kinds_cover_push_codes() {
        for code in [1000, 3000, 4000, 5000, 6000, 15000, 19000, 21000] {
            let kind = PushKind::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert_eq!(PushKind::from_code(codes::REBOOT), None);
        assert_eq!(PushKind::from_code(2000), None);
    }

    #[test]
    fn double_encoded_payloads_are_unwrapped() {
        assert_eq!(normalize_payload(r#""{\"battery\":80}""#), r#"{"battery":80}"#);
        assert_eq!(normalize_payload(r#"{"battery":80}"#), r#"{"battery":80}"#);
        assert_eq!(normalize_payload(r#""plain text""#), r#""plain text""#);
        assert_eq!(normalize_payload("not json"), "not json");
    }

    #[test]
    fn identical_pushes_are_dropped() {
        let (inner, mut events) = ChannelListener::channel();
        let mut listener = DedupListener::new(inner);
        let status = Some(r#"{"battery":80}"#.to_string());

        listener.on_message_received(codes::DEVICE_STATUS, status.clone());
        listener.on_message_received(codes::DEVICE_STATUS, Some(r#""{\"battery\":80}""#.into()));
        listener.on_message_received(codes::DEVICE_STATUS, Some(r#"{"battery":79}"#.into()));
        listener.on_message_received(codes::WIFI_NETWORKS, status.clone());

        let received: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(
            received,
            vec![
                LauncherEvent::MessageReceived {
                    command_code: codes::DEVICE_STATUS,
                    payload:      status.clone(),
                },
                LauncherEvent::MessageReceived {
                    command_code: codes::DEVICE_STATUS,
                    payload:      Some(r#"{"battery":79}"#.into()),
                },
                LauncherEvent::MessageReceived {
                    command_code: codes::WIFI_NETWORKS,
                    payload:      status,
                },
            ]
        );
    }

    #[test]
    fn rebind_and_non_push_codes_pass_through() {
        let (inner, mut events) = ChannelListener::channel();
        let mut listener = DedupListener::new(inner);
        let reply = Some(r#"{"response":"GET","result":"x"}"#.to_string());

        listener.on_message_received(codes::SECURE_STRING_REQUEST, reply.clone());
        listener.on_message_received(codes::SECURE_STRING_REQUEST, reply);
        listener.on_message_received(codes::CASTING_CODE, Some("1234".into()));
        listener.on_bind_status_changed(false);
        listener.on_message_received(codes::CASTING_CODE, Some("1234".into()));

        let received: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(received.len(), 5);
        assert_eq!(received[3], LauncherEvent::BindStatusChanged(false));
    }
}
