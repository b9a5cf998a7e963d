//! Envelope encoding and the secure-string JSON payloads.

use std::{fmt, str::FromStr};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{envelope::Envelope, error::ParseError};

const REQUEST: &str = "request";
const KEY: &str = "key";
const VALUE: &str = "value";
const RESPONSE: &str = "response";
const RESULT: &str = "result";
const ERROR: &str = "error";

/// Builds an envelope from a command code and optional JSON payload
pub fn encode(command_code: i32, json_payload: Option<String>) -> Envelope {
    Envelope::new(command_code, json_payload)
}

/// Splits an envelope back into its command code and payload
pub fn decode(envelope: &Envelope) -> (i32, Option<&str>) {
    (envelope.command_code, envelope.payload())
}

/// The operations of the secure-string protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecureStringRequestKind {
    Get,
    Set,
    Exists,
    Delete,
}

impl SecureStringRequestKind {
    pub const ALL: [SecureStringRequestKind; 4] = [
        SecureStringRequestKind::Get,
        SecureStringRequestKind::Set,
        SecureStringRequestKind::Exists,
        SecureStringRequestKind::Delete,
    ];

    /// Upper-case wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            SecureStringRequestKind::Get => "GET",
            SecureStringRequestKind::Set => "SET",
            SecureStringRequestKind::Exists => "EXISTS",
            SecureStringRequestKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for SecureStringRequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecureStringRequestKind {
    type Err = ParseError;

    /// Case-insensitive match against the wire names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseError::UnknownRequest(s.to_string()))
    }
}

impl Serialize for SecureStringRequestKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A parsed secure-string request
#[derive(Clone, PartialEq, Eq)]
pub struct SecureStringRequest {
    pub kind:  SecureStringRequestKind,
    /// Caller-supplied key, never empty
    pub key:   String,
    /// Value to store, present iff `kind` is `Set`
    pub value: Option<String>,
}

impl SecureStringRequest {
    pub fn get(key: impl Into<String>) -> Self {
        Self::without_value(SecureStringRequestKind::Get, key)
    }

    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind:  SecureStringRequestKind::Set,
            key:   key.into(),
            value: Some(value.into()),
        }
    }

    pub fn exists(key: impl Into<String>) -> Self {
        Self::without_value(SecureStringRequestKind::Exists, key)
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::without_value(SecureStringRequestKind::Delete, key)
    }

    fn without_value(kind: SecureStringRequestKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            value: None,
        }
    }

    /// JSON payload for this request
    pub fn to_json(&self) -> String {
        let mut object = Map::new();
        object.insert(REQUEST.into(), Value::from(self.kind.as_str()));
        object.insert(KEY.into(), Value::from(self.key.as_str()));
        if let Some(value) = &self.value {
            object.insert(VALUE.into(), Value::from(value.as_str()));
        }
        Value::Object(object).to_string()
    }
}

// Values are secrets and must not end up in logs
impl fmt::Debug for SecureStringRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureStringRequest")
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("value", &self.value.as_ref().map(|_| "***"))
            .finish()
    }
}

/// A secure-string reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureStringResponse {
    /// Request kind being answered, when it could be determined
    pub for_request_kind: Option<SecureStringRequestKind>,
    pub is_error:         bool,
    pub payload:          String,
}

impl SecureStringResponse {
    pub fn success(kind: SecureStringRequestKind, payload: impl Into<String>) -> Self {
        Self {
            for_request_kind: Some(kind),
            is_error:         false,
            payload:          payload.into(),
        }
    }

    pub fn error(kind: Option<SecureStringRequestKind>, payload: impl Into<String>) -> Self {
        Self {
            for_request_kind: kind,
            is_error:         true,
            payload:          payload.into(),
        }
    }

    /// JSON payload for this response
    pub fn to_json(&self) -> String {
        format_secure_string_response(self.for_request_kind, &self.payload, self.is_error)
    }
}

fn non_empty_string<'a>(object: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    match object.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => {
            tracing::debug!("Secure String Request - did not find {}", field);
            None
        }
    }
}

/// Parses a secure-string request payload
pub fn parse_secure_string_request(json_payload: &str) -> Result<SecureStringRequest, ParseError> {
    let object = match serde_json::from_str::<Value>(json_payload) {
        Ok(Value::Object(object)) => object,
        _ => return Err(ParseError::InvalidJson),
    };

    let kind: SecureStringRequestKind = non_empty_string(&object, REQUEST)
        .ok_or(ParseError::MissingRequest)?
        .parse()?;

    let key = non_empty_string(&object, KEY).ok_or(ParseError::MissingKey(kind))?;

    let value = match kind {
        SecureStringRequestKind::Set => Some(
            non_empty_string(&object, VALUE)
                .ok_or(ParseError::MissingValue(kind))?
                .to_string(),
        ),
        _ => None,
    };

    Ok(SecureStringRequest {
        kind,
        key: key.to_string(),
        value,
    })
}

#[derive(Serialize)]
struct ResponseBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<SecureStringRequestKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result:   Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error:    Option<&'a str>,
}

/// Formats a secure-string response payload.
///
/// Never fails: if serialization breaks, a minimal hand-built object with a
/// generic error is returned so the peer always receives parseable JSON.
pub fn format_secure_string_response(
    kind: Option<SecureStringRequestKind>,
    body: &str,
    is_error: bool,
) -> String {
    let response = ResponseBody {
        response: kind,
        result:   (!is_error).then_some(body),
        error:    is_error.then_some(body),
    };

    match serde_json::to_string(&response) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Secure String Request error in forming response: {}", e);
            fallback_response(kind)
        }
    }
}

fn fallback_response(kind: Option<SecureStringRequestKind>) -> String {
    let mut json = String::from("{");
    if let Some(kind) = kind {
        json.push_str(&format!("\"{RESPONSE}\":\"{kind}\","));
    }
    json.push_str(&format!("\"{ERROR}\":\"Unknown error\"}}"));
    json
}

/// Parses a secure-string response payload received by the requesting side
pub fn parse_secure_string_response(json_payload: &str) -> Result<SecureStringResponse, ParseError> {
    let object = match serde_json::from_str::<Value>(json_payload) {
        Ok(Value::Object(object)) => object,
        _ => return Err(ParseError::InvalidJson),
    };

    let kind = match object.get(RESPONSE) {
        Some(Value::String(name)) => Some(name.parse::<SecureStringRequestKind>()?),
        _ => None,
    };

    let field = |name: &str| match object.get(name) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };

    if let Some(error) = field(ERROR) {
        return Ok(SecureStringResponse::error(kind, error));
    }
    match (kind, field(RESULT)) {
        (Some(kind), Some(result)) => Ok(SecureStringResponse::success(kind, result)),
        _ => Err(ParseError::MissingResponseBody),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_kind_is_case_insensitive() {
        assert_eq!(
            "exists".parse::<SecureStringRequestKind>(),
            Ok(SecureStringRequestKind::Exists)
        );
        assert_eq!(
            "Delete".parse::<SecureStringRequestKind>(),
            Ok(SecureStringRequestKind::Delete)
        );
        assert_eq!(
            "FETCH".parse::<SecureStringRequestKind>(),
            Err(ParseError::UnknownRequest("FETCH".to_string()))
        );
    }

    #[test]
    fn parses_well_formed_requests() {
        let request =
            parse_secure_string_request(r#"{"request":"set","key":"wifiPassword","value":"abc123"}"#)
                .unwrap();
        assert_eq!(request, SecureStringRequest::set("wifiPassword", "abc123"));

        let request = parse_secure_string_request(r#"{"request":"GET","key":"k","value":"x"}"#)
            .unwrap();
        assert_eq!(request.value, None);
    }

    #[test]
    fn each_parse_failure_is_reported() {
        let cases = [
            ("not json", ParseError::InvalidJson),
            ("[1,2,3]", ParseError::InvalidJson),
            (r#"{"key":"k"}"#, ParseError::MissingRequest),
            (r#"{"request":"","key":"k"}"#, ParseError::MissingRequest),
            (
                r#"{"request":"FETCH","key":"k"}"#,
                ParseError::UnknownRequest("FETCH".to_string()),
            ),
            (
                r#"{"request":"GET"}"#,
                ParseError::MissingKey(SecureStringRequestKind::Get),
            ),
            (
                r#"{"request":"EXISTS","key":""}"#,
                ParseError::MissingKey(SecureStringRequestKind::Exists),
            ),
            (
                r#"{"request":"SET","key":"k"}"#,
                ParseError::MissingValue(SecureStringRequestKind::Set),
            ),
            (
                r#"{"request":"SET","key":"k","value":""}"#,
                ParseError::MissingValue(SecureStringRequestKind::Set),
            ),
        ];

        for (payload, expected) in cases {
            assert_eq!(parse_secure_string_request(payload), Err(expected), "{payload}");
        }
    }

    #[test]
    fn formats_success_and_error_shapes() {
        assert_eq!(
            format_secure_string_response(Some(SecureStringRequestKind::Get), "abc123", false),
            r#"{"response":"GET","result":"abc123"}"#
        );
        assert_eq!(
            format_secure_string_response(Some(SecureStringRequestKind::Get), "no value", true),
            r#"{"response":"GET","error":"no value"}"#
        );
        assert_eq!(
            format_secure_string_response(None, "Error parsing json", true),
            r#"{"error":"Error parsing json"}"#
        );
    }

    #[test]
    fn body_with_quotes_stays_parseable() {
        let json =
            format_secure_string_response(Some(SecureStringRequestKind::Get), "a\"b\\c", false);
        let parsed = parse_secure_string_response(&json).unwrap();
        assert_eq!(parsed.payload, "a\"b\\c");
    }

    #[test]
    fn fallback_response_is_valid_json() {
        let parsed: Value =
            serde_json::from_str(&fallback_response(Some(SecureStringRequestKind::Set))).unwrap();
        assert_eq!(parsed["response"], "SET");
        assert_eq!(parsed["error"], "Unknown error");

        let parsed: Value = serde_json::from_str(&fallback_response(None)).unwrap();
        assert!(parsed.get("response").is_none());
    }

    #[test]
    fn parses_responses() {
        assert_eq!(
            parse_secure_string_response(r#"{"response":"EXISTS","result":"true"}"#),
            Ok(SecureStringResponse::success(
                SecureStringRequestKind::Exists,
                "true"
            ))
        );
        assert_eq!(
            parse_secure_string_response(r#"{"error":"Error parsing json"}"#),
            Ok(SecureStringResponse::error(None, "Error parsing json"))
        );
        assert_eq!(
            parse_secure_string_response(r#"{"response":"GET"}"#),
            Err(ParseError::MissingResponseBody)
        );
    }

    #[test]
    fn request_json_round_trips_through_parser() {
        let request = SecureStringRequest::set("token", "s3cr3t");
        assert_eq!(parse_secure_string_request(&request.to_json()), Ok(request));
    }

    #[test]
    fn debug_output_hides_value() {
        let rendered = format!("{:?}", SecureStringRequest::set("token", "s3cr3t"));
        assert!(!rendered.contains("s3cr3t"));
    }
}
