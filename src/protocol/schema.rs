//! Gateway protocol schema
//!
//! Status envelopes, response codes and protocol versioning shared by
//! every wire call.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Protocol version assumed when the gateway does not report one
pub const DEFAULT_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(2, 6, 0);

/// First protocol revision whose `recall` call needs the conversation id
pub const RECALL_TARGET_SINCE: ProtocolVersion = ProtocolVersion::new(2, 6, 0);

/// Gateway protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolVersion {
    /// Major version
    pub major: u32,
    /// Minor version
    pub minor: u32,
    /// Patch version
    pub patch: u32,
}

impl ProtocolVersion {
    /// Create a version from its parts
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        ProtocolVersion {
            major,
            minor,
            patch,
        }
    }

    /// 1.x gateways use `/auth` + `/verify` instead of `/verify` + `/bind`
    pub fn is_legacy(&self) -> bool {
        self.major < 2
    }

    /// Whether `recall` must name the conversation alongside the message id
    pub fn recall_requires_target(&self) -> bool {
        *self >= RECALL_TARGET_SINCE
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        DEFAULT_PROTOCOL_VERSION
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ProtocolVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_start_matches('v');
        // Pre-release suffixes such as `2.6.0-rc1` are ignored.
        let core = trimmed.split(['-', '+']).next().unwrap_or_default();
        let mut parts = core.split('.');
        let mut next = |name: &str, required: bool| -> Result<u32> {
            match parts.next() {
                Some(part) => part.parse().map_err(|_| {
                    Error::Config(format!("Invalid {} in protocol version '{}'", name, s))
                }),
                None if required => Err(Error::Config(format!(
                    "Protocol version '{}' is missing its {} number",
                    s, name
                ))),
                None => Ok(0),
            }
        };
        let major = next("major", true)?;
        let minor = next("minor", false)?;
        let patch = next("patch", false)?;
        Ok(ProtocolVersion::new(major, minor, patch))
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ProtocolVersion> for String {
    fn from(version: ProtocolVersion) -> Self {
        version.to_string()
    }
}

/// Standard gateway status codes
pub mod status_codes {
    /// Success
    pub const SUCCESS: i64 = 0;
    /// Wrong verify/auth key
    pub const VERIFY_KEY_ERROR: i64 = 1;
    /// The bot account does not exist on the gateway
    pub const BOT_NOT_EXIST: i64 = 2;
    /// Session key invalid or expired
    pub const SESSION_INVALID: i64 = 3;
    /// Session not bound to an account
    pub const SESSION_NOT_AUTH: i64 = 4;
    /// Target not found
    pub const TARGET_NOT_EXIST: i64 = 5;
    /// File not found
    pub const FILE_NOT_EXIST: i64 = 6;
    /// Bot lacks permission
    pub const NOT_PERMISSION: i64 = 10;
    /// Bot is muted in the target group
    pub const BOT_MUTED: i64 = 20;
    /// Message too long
    pub const MESSAGE_TOO_LONG: i64 = 30;
    /// Bad parameters
    pub const PARAM_ERROR: i64 = 400;
}

/// A `{code, msg}` envelope carrying a non-zero status
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEnvelope {
    /// Status code reported by the gateway
    pub code: i64,
    /// Human-readable message, empty when absent
    pub msg: String,
    /// The untouched envelope
    pub raw: Value,
}

impl StatusEnvelope {
    /// Create an envelope from a code and message
    pub fn new(code: i64, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        StatusEnvelope {
            code,
            raw: serde_json::json!({ "code": code, "msg": msg }),
            msg,
        }
    }

    /// Build an envelope from a raw reply
    pub fn from_value(raw: Value) -> Self {
        let code = raw.get("code").and_then(Value::as_i64).unwrap_or(-1);
        let msg = raw
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        StatusEnvelope { code, msg, raw }
    }
}

impl fmt::Display for StatusEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.msg.is_empty() {
            write!(f, "code {}", self.code)
        } else {
            write!(f, "code {}: {}", self.code, self.msg)
        }
    }
}

/// Outcome of a call that reached the gateway
///
/// A rejection is a value, not an error: callers inspect the provider
/// specific status code themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiReply<T = Value> {
    /// Status zero, unwrapped payload
    Success(T),
    /// Non-zero status, raw envelope
    Rejected(StatusEnvelope),
}

impl<T> ApiReply<T> {
    /// Whether the gateway accepted the call
    pub fn is_success(&self) -> bool {
        matches!(self, ApiReply::Success(_))
    }

    /// Transform the success payload
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiReply<U> {
        match self {
            ApiReply::Success(value) => ApiReply::Success(f(value)),
            ApiReply::Rejected(envelope) => ApiReply::Rejected(envelope),
        }
    }

    /// The success payload, if any
    pub fn success(self) -> Option<T> {
        match self {
            ApiReply::Success(value) => Some(value),
            ApiReply::Rejected(_) => None,
        }
    }

    /// The rejection envelope, if any
    pub fn rejection(&self) -> Option<&StatusEnvelope> {
        match self {
            ApiReply::Success(_) => None,
            ApiReply::Rejected(envelope) => Some(envelope),
        }
    }

    /// Turn a rejection into [`Error::Rejected`]
    pub fn into_result(self) -> Result<T> {
        match self {
            ApiReply::Success(value) => Ok(value),
            ApiReply::Rejected(envelope) => Err(Error::Rejected(envelope)),
        }
    }
}

/// Unwrap a reply following the gateway's `{code, data}` convention
///
/// - `{code: 0, data: X}` becomes `Success(X)`
/// - `{code: 0, ...}` without `data` is returned whole (send replies carry
///   `messageId` next to `code`)
/// - replies without `code` are returned whole
/// - any other code is a rejection
pub fn unwrap_envelope(reply: Value) -> ApiReply<Value> {
    match reply.get("code").and_then(Value::as_i64) {
        None => ApiReply::Success(reply),
        Some(status_codes::SUCCESS) => match reply {
            Value::Object(mut map) => match map.remove("data") {
                Some(data) => ApiReply::Success(data),
                None => ApiReply::Success(Value::Object(map)),
            },
            other => ApiReply::Success(other),
        },
        Some(_) => ApiReply::Rejected(StatusEnvelope::from_value(reply)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_version_parsing() {
        assert_eq!(
            "2.6.2".parse::<ProtocolVersion>().unwrap(),
            ProtocolVersion::new(2, 6, 2)
        );
        assert_eq!(
            "v1.12".parse::<ProtocolVersion>().unwrap(),
            ProtocolVersion::new(1, 12, 0)
        );
        assert_eq!(
            "2.7.0-rc.1".parse::<ProtocolVersion>().unwrap(),
            ProtocolVersion::new(2, 7, 0)
        );
        assert!("".parse::<ProtocolVersion>().is_err());
        assert!("two.six".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn test_version_gates() {
        assert!(ProtocolVersion::new(1, 12, 0).is_legacy());
        assert!(!ProtocolVersion::new(2, 0, 0).is_legacy());
        assert!(!ProtocolVersion::new(2, 5, 9).recall_requires_target());
        assert!(ProtocolVersion::new(2, 6, 0).recall_requires_target());
        assert!(ProtocolVersion::new(3, 0, 0).recall_requires_target());
    }

    #[test]
    fn test_version_serde_as_string() {
        let version: ProtocolVersion = serde_json::from_value(json!("2.4.1")).unwrap();
        assert_eq!(version, ProtocolVersion::new(2, 4, 1));
        assert_eq!(serde_json::to_value(version).unwrap(), json!("2.4.1"));
    }

    #[test]
    fn test_unwrap_envelope() {
        assert_eq!(
            unwrap_envelope(json!({"code": 0, "msg": "", "data": [1, 2]})),
            ApiReply::Success(json!([1, 2]))
        );
        assert_eq!(
            unwrap_envelope(json!({"code": 0, "msg": "success", "messageId": 42})),
            ApiReply::Success(json!({"code": 0, "msg": "success", "messageId": 42}))
        );
        assert_eq!(
            unwrap_envelope(json!({"type": "FriendMessage"})),
            ApiReply::Success(json!({"type": "FriendMessage"}))
        );

        let rejected = unwrap_envelope(json!({"code": 5, "msg": "target not found"}));
        let envelope = rejected.rejection().unwrap();
        assert_eq!(envelope.code, status_codes::TARGET_NOT_EXIST);
        assert_eq!(envelope.msg, "target not found");
        assert_eq!(envelope.raw, json!({"code": 5, "msg": "target not found"}));
    }

    #[test]
    fn test_reply_into_result() {
        let ok: ApiReply<i32> = ApiReply::Success(1);
        assert_eq!(ok.into_result().unwrap(), 1);

        let rejected: ApiReply<i32> = ApiReply::Rejected(StatusEnvelope::new(3, "expired"));
        assert!(matches!(rejected.into_result(), Err(Error::Rejected(env)) if env.code == 3));
    }
}
