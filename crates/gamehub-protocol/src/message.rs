//! Request and response envelopes.
//!
//! Every client request is a [`Message`] addressed by a `(category, action)`
//! pair; the server answers each one with exactly one [`Response`] carrying
//! the same correlation id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::code::ResponseCode;

/// Current server time in unix seconds.
#[must_use]
pub fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Current server time in unix milliseconds.
#[must_use]
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// A client request.
///
/// Every field defaults when missing so that structural validation can
/// report exactly which one is absent instead of failing the whole decode.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Routing namespace, e.g. `auth` or `player`.
    #[serde(default)]
    pub category: String,
    /// Verb within the category, e.g. `login`.
    #[serde(default)]
    pub action: String,
    /// Opaque request body handed to the handler.
    #[serde(default)]
    pub payload: Value,
    /// Caller-supplied token echoed in the response.
    #[serde(default)]
    pub correlation_id: String,
    /// Client clock at send time (unix seconds), informational only.
    #[serde(default)]
    pub client_timestamp: i64,
}

impl Message {
    /// Create a message with an empty payload.
    #[must_use]
    pub fn new(
        category: impl Into<String>,
        action: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            action: action.into(),
            payload: Value::Null,
            correlation_id: correlation_id.into(),
            client_timestamp: unix_seconds(),
        }
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// `category:action`, used in logs and error messages.
    #[must_use]
    pub fn route_name(&self) -> String {
        format!("{}:{}", self.category, self.action)
    }
}

/// The server's answer to a [`Message`].
///
/// Only constructible through [`Response::ok`] and [`Response::error`], which
/// keep `code == 0` and `success == true` equivalent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    success: bool,
    code: ResponseCode,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    #[serde(default)]
    correlation_id: String,
    #[serde(default)]
    server_timestamp: i64,
}

impl Response {
    /// A successful response.
    #[must_use]
    pub fn ok(correlation_id: impl Into<String>, payload: Value) -> Self {
        Self {
            success: true,
            code: ResponseCode::Success,
            message: "Success".to_string(),
            payload: (!payload.is_null()).then_some(payload),
            correlation_id: correlation_id.into(),
            server_timestamp: unix_seconds(),
        }
    }

    /// A failed response.
    ///
    /// `ResponseCode::Success` is not a failure code and is coerced to
    /// `ResponseCode::Internal`.
    #[must_use]
    pub fn error(
        correlation_id: impl Into<String>,
        code: ResponseCode,
        message: impl Into<String>,
    ) -> Self {
        let code = if code.is_success() {
            ResponseCode::Internal
        } else {
            code
        };
        Self {
            success: false,
            code,
            message: message.into(),
            payload: None,
            correlation_id: correlation_id.into(),
            server_timestamp: unix_seconds(),
        }
    }

    /// Refresh the server timestamp to now.
    #[must_use]
    pub fn stamped(mut self) -> Self {
        self.server_timestamp = unix_seconds();
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success
    }

    #[must_use]
    pub fn code(&self) -> ResponseCode {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    #[must_use]
    pub fn server_timestamp(&self) -> i64 {
        self.server_timestamp
    }
}
