//! The closed set of command codes and their typed payloads.
//!
//! Codes must stay in sync with the admin app: `>= 0` are requests and
//! commands sent by the launcher, negative codes are control commands, and
//! codes `>= 1000` are pushes from the admin app to the launcher.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::{envelope::Envelope, error::ParseError};

/// Integer command codes shared with the admin app
pub mod codes {
    pub const UNREGISTER_CLIENT: i32 = -1;
    pub const REGISTER_CLIENT: i32 = 0;
    pub const GET_WIFI_NETWORKS: i32 = 1;
    pub const CONNECT_TO_WIFI_NETWORK: i32 = 2;
    pub const GET_WIFI_CONNECTION_STATUS: i32 = 3;
    pub const GET_RUNTIME_SETTINGS: i32 = 4;
    pub const GET_DEVICE_STATUS: i32 = 5;
    pub const ENABLE_KIOSK_MODE: i32 = 6;
    pub const DISABLE_KIOSK_MODE: i32 = 7;
    pub const EXIT_LAUNCHER: i32 = 8;
    pub const CHECK_DB: i32 = 9;
    pub const ENABLE_TUTORIAL_MODE: i32 = 10;
    pub const DISABLE_TUTORIAL_MODE: i32 = 11;
    pub const FORGET_WIFI_NETWORK: i32 = 12;
    pub const ENABLE_WIFI: i32 = 13;
    pub const DISABLE_WIFI: i32 = 14;
    pub const HOME_SCREEN_STATE: i32 = 15;
    // Assigned here; the admin app's own table ends at HOME_SCREEN_STATE
    pub const OVERRIDE_KIOSK_APP: i32 = 16;
    pub const KILL_APP: i32 = 17;
    pub const RESTART_APP: i32 = 18;
    pub const GET_DEVICE_DATA: i32 = 19;
    pub const POWER_OFF: i32 = 20;
    pub const GET_CASTING_CODE: i32 = 21;
    pub const STOP_CASTING: i32 = 22;
    pub const REBOOT: i32 = 23;
    pub const UPLOAD_DEVICE_LOGS: i32 = 24;
    pub const SECURE_STRING_REQUEST: i32 = 25;

    // Pushes from the admin app; 6000 and up are assigned here as well
    pub const WIFI_NETWORKS: i32 = 1000;
    pub const WIFI_CONNECTION_STATUS: i32 = 3000;
    pub const RUNTIME_SETTINGS: i32 = 4000;
    pub const DEVICE_STATUS: i32 = 5000;
    pub const HANDLE_COMMAND: i32 = 6000;
    pub const GET_HOME_SCREEN_STATE: i32 = 15000;
    pub const DEVICE_DATA: i32 = 19000;
    pub const CASTING_CODE: i32 = 21000;

    /// First code of the push range
    pub const PUSH_BASE: i32 = 1000;
}

/// Codes routed to the secure-string protocol rather than to listeners
pub const SECURE_STRING_CODES: &[i32] = &[codes::SECURE_STRING_REQUEST];

/// Whether the code is a control command (register/unregister)
pub fn is_control_code(code: i32) -> bool {
    code == codes::REGISTER_CLIENT || code == codes::UNREGISTER_CLIENT
}

/// Whether the code is a push from the admin app
pub fn is_push_code(code: i32) -> bool {
    code >= codes::PUSH_BASE
}

/// Whether the code belongs to the secure-string family
pub fn is_secure_string_code(code: i32) -> bool {
    SECURE_STRING_CODES.contains(&code)
}

/// Whether a command code carries a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadRule {
    /// The envelope must not carry a payload
    Forbidden,
    /// A payload may or may not be present
    Optional,
    /// The envelope must carry a payload
    Required,
}

/// Payload rule for a command code, `None` for codes outside the protocol
pub fn payload_rule(code: i32) -> Option<PayloadRule> {
    use codes::*;
    match code {
        CONNECT_TO_WIFI_NETWORK | FORGET_WIFI_NETWORK | HOME_SCREEN_STATE | OVERRIDE_KIOSK_APP
        | KILL_APP | RESTART_APP | SECURE_STRING_REQUEST => Some(PayloadRule::Required),
        UNREGISTER_CLIENT..=UPLOAD_DEVICE_LOGS => Some(PayloadRule::Forbidden),
        c if is_push_code(c) => Some(PayloadRule::Optional),
        _ => None,
    }
}

/// Checks a payload against the rule for its command code
pub fn check_payload(code: i32, payload: Option<&str>) -> Result<(), ParseError> {
    match (payload_rule(code), payload) {
        (None, _) => Err(ParseError::UnknownCommand(code)),
        (Some(PayloadRule::Required), None) => Err(ParseError::MissingPayload { code }),
        (Some(PayloadRule::Forbidden), Some(_)) => Err(ParseError::UnexpectedPayload { code }),
        _ => Ok(()),
    }
}

/// Credentials for a WPA/open network
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WifiCredentials {
    pub ssid:     String,
    #[serde(default)]
    pub password: String,
}

/// Targets an app by its package name
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppTarget {
    pub package_name: String,
}

/// Every command the launcher can send to the admin app
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    UnregisterClient,
    RegisterClient,
    GetWifiNetworks,
    ConnectToWifiNetwork(WifiCredentials),
    /// Enterprise networks carry an opaque configuration object
    ConnectToEnterpriseWifiNetwork(Value),
    GetWifiConnectionStatus,
    GetRuntimeSettings,
    GetDeviceStatus,
    EnableKioskMode,
    DisableKioskMode,
    ExitLauncher,
    CheckDb,
    EnableTutorialMode,
    DisableTutorialMode,
    ForgetWifiNetwork { ssid: String },
    EnableWifi,
    DisableWifi,
    HomeScreenState(Value),
    OverrideKioskApp(AppTarget),
    KillApp(AppTarget),
    RestartApp(AppTarget),
    GetDeviceData,
    PowerOff,
    GetCastingCode,
    StopCasting,
    Reboot,
    UploadDeviceLogs,
}

impl Command {
    /// Wire code of this command
    pub fn code(&self) -> i32 {
        use codes::*;
        match self {
            Command::UnregisterClient => UNREGISTER_CLIENT,
            Command::RegisterClient => REGISTER_CLIENT,
            Command::GetWifiNetworks => GET_WIFI_NETWORKS,
            Command::ConnectToWifiNetwork(_) | Command::ConnectToEnterpriseWifiNetwork(_) => {
                CONNECT_TO_WIFI_NETWORK
            }
            Command::GetWifiConnectionStatus => GET_WIFI_CONNECTION_STATUS,
            Command::GetRuntimeSettings => GET_RUNTIME_SETTINGS,
            Command::GetDeviceStatus => GET_DEVICE_STATUS,
            Command::EnableKioskMode => ENABLE_KIOSK_MODE,
            Command::DisableKioskMode => DISABLE_KIOSK_MODE,
            Command::ExitLauncher => EXIT_LAUNCHER,
            Command::CheckDb => CHECK_DB,
            Command::EnableTutorialMode => ENABLE_TUTORIAL_MODE,
            Command::DisableTutorialMode => DISABLE_TUTORIAL_MODE,
            Command::ForgetWifiNetwork { .. } => FORGET_WIFI_NETWORK,
            Command::EnableWifi => ENABLE_WIFI,
            Command::DisableWifi => DISABLE_WIFI,
            Command::HomeScreenState(_) => HOME_SCREEN_STATE,
            Command::OverrideKioskApp(_) => OVERRIDE_KIOSK_APP,
            Command::KillApp(_) => KILL_APP,
            Command::RestartApp(_) => RESTART_APP,
            Command::GetDeviceData => GET_DEVICE_DATA,
            Command::PowerOff => POWER_OFF,
            Command::GetCastingCode => GET_CASTING_CODE,
            Command::StopCasting => STOP_CASTING,
            Command::Reboot => REBOOT,
            Command::UploadDeviceLogs => UPLOAD_DEVICE_LOGS,
        }
    }

    /// JSON payload for this command, if it carries one
    pub fn payload(&self) -> Option<String> {
        match self {
            Command::ConnectToWifiNetwork(creds) => Some(
                json!({ "ssid": creds.ssid, "password": creds.password }).to_string(),
            ),
            Command::ConnectToEnterpriseWifiNetwork(config) => Some(config.to_string()),
            Command::ForgetWifiNetwork { ssid } => Some(json!({ "ssid": ssid }).to_string()),
            Command::HomeScreenState(state) => Some(state.to_string()),
            Command::OverrideKioskApp(target)
            | Command::KillApp(target)
            | Command::RestartApp(target) => {
                Some(json!({ "packageName": target.package_name }).to_string())
            }
            _ => None,
        }
    }

    /// Builds the envelope carrying this command
    pub fn to_envelope(&self) -> Envelope {
        Envelope::new(self.code(), self.payload())
    }

    /// Decodes a command received on the wire, validating its payload
    pub fn decode(code: i32, payload: Option<&str>) -> Result<Self, ParseError> {
        use codes::*;
        check_payload(code, payload)?;

        let command = match code {
            UNREGISTER_CLIENT => Command::UnregisterClient,
            REGISTER_CLIENT => Command::RegisterClient,
            GET_WIFI_NETWORKS => Command::GetWifiNetworks,
            CONNECT_TO_WIFI_NETWORK => {
                let object = parse_object(code, payload)?;
                let simple = object.keys().all(|k| k == "ssid" || k == "password");
                if simple {
                    Command::ConnectToWifiNetwork(from_object(code, object)?)
                } else {
                    Command::ConnectToEnterpriseWifiNetwork(Value::Object(object))
                }
            }
            GET_WIFI_CONNECTION_STATUS => Command::GetWifiConnectionStatus,
            GET_RUNTIME_SETTINGS => Command::GetRuntimeSettings,
            GET_DEVICE_STATUS => Command::GetDeviceStatus,
            ENABLE_KIOSK_MODE => Command::EnableKioskMode,
            DISABLE_KIOSK_MODE => Command::DisableKioskMode,
            EXIT_LAUNCHER => Command::ExitLauncher,
            CHECK_DB => Command::CheckDb,
            ENABLE_TUTORIAL_MODE => Command::EnableTutorialMode,
            DISABLE_TUTORIAL_MODE => Command::DisableTutorialMode,
            FORGET_WIFI_NETWORK => {
                #[derive(Deserialize)]
                struct Forget {
                    ssid: String,
                }
                let forget: Forget = from_object(code, parse_object(code, payload)?)?;
                Command::ForgetWifiNetwork { ssid: forget.ssid }
            }
            ENABLE_WIFI => Command::EnableWifi,
            DISABLE_WIFI => Command::DisableWifi,
            HOME_SCREEN_STATE => Command::HomeScreenState(Value::Object(parse_object(code, payload)?)),
            OVERRIDE_KIOSK_APP => {
                Command::OverrideKioskApp(from_object(code, parse_object(code, payload)?)?)
            }
            KILL_APP => Command::KillApp(from_object(code, parse_object(code, payload)?)?),
            RESTART_APP => Command::RestartApp(from_object(code, parse_object(code, payload)?)?),
            GET_DEVICE_DATA => Command::GetDeviceData,
            POWER_OFF => Command::PowerOff,
            GET_CASTING_CODE => Command::GetCastingCode,
            STOP_CASTING => Command::StopCasting,
            REBOOT => Command::Reboot,
            UPLOAD_DEVICE_LOGS => Command::UploadDeviceLogs,
            // Pushes and secure-string traffic are not launcher commands
            other => return Err(ParseError::UnknownCommand(other)),
        };
        Ok(command)
    }
}

fn parse_object(code: i32, payload: Option<&str>) -> Result<Map<String, Value>, ParseError> {
    let raw = payload.ok_or(ParseError::MissingPayload { code })?;
    match serde_json::from_str(raw) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err(ParseError::InvalidPayload {
            code,
            reason: "expected a JSON object".to_string(),
        }),
        Err(e) => Err(ParseError::InvalidPayload {
            code,
            reason: e.to_string(),
        }),
    }
}

fn from_object<T: serde::de::DeserializeOwned>(
    code: i32,
    object: Map<String, Value>,
) -> Result<T, ParseError> {
    serde_json::from_value(Value::Object(object)).map_err(|e| ParseError::InvalidPayload {
        code,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_codes_keep_their_range() {
        assert!(is_push_code(codes::DEVICE_STATUS));
        assert!(is_push_code(codes::WIFI_NETWORKS));
        assert!(!is_push_code(codes::UPLOAD_DEVICE_LOGS));
        assert!(is_control_code(codes::UNREGISTER_CLIENT));
        assert!(is_control_code(codes::REGISTER_CLIENT));
        assert!(is_secure_string_code(codes::SECURE_STRING_REQUEST));
    }

    #[test]
    fn wifi_payload_is_escaped() {
        let command = Command::ConnectToWifiNetwork(WifiCredentials {
            ssid:     "Cafe \"Guest\"".to_string(),
            password: "p\\w".to_string(),
        });
        let envelope = command.to_envelope();
        assert_eq!(envelope.command_code, codes::CONNECT_TO_WIFI_NETWORK);

        let decoded = Command::decode(envelope.command_code, envelope.payload()).unwrap();
        assert_eq!(decoded, command);
    }

    #[test]
    fn enterprise_config_is_kept_opaque() {
        let payload = r#"{"ssid":"corp","eapMethod":"PEAP","identity":"kiosk"}"#;
        let decoded = Command::decode(codes::CONNECT_TO_WIFI_NETWORK, Some(payload)).unwrap();
        assert!(matches!(decoded, Command::ConnectToEnterpriseWifiNetwork(_)));
    }

    #[test]
    fn package_payload_uses_camel_case() {
        let command = Command::KillApp(AppTarget {
            package_name: "com.example.game".to_string(),
        });
        assert_eq!(
            command.payload().as_deref(),
            Some(r#"{"packageName":"com.example.game"}"#)
        );
    }

    #[test]
    fn payload_rules_are_enforced() {
        assert_eq!(
            Command::decode(codes::KILL_APP, None),
            Err(ParseError::MissingPayload { code: codes::KILL_APP })
        );
        assert_eq!(
            Command::decode(codes::REBOOT, Some("{}")),
            Err(ParseError::UnexpectedPayload { code: codes::REBOOT })
        );
        assert_eq!(Command::decode(999, None), Err(ParseError::UnknownCommand(999)));
        assert!(matches!(
            Command::decode(codes::FORGET_WIFI_NETWORK, Some("[1,2]")),
            Err(ParseError::InvalidPayload { .. })
        ));
        assert_eq!(Command::decode(codes::REBOOT, None), Ok(Command::Reboot));
        assert!(check_payload(codes::DEVICE_STATUS, None).is_ok());
        assert!(check_payload(codes::DEVICE_STATUS, Some("{}")).is_ok());
    }
}
