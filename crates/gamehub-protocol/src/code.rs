//! Numeric response codes.

use serde::{Deserialize, Serialize};

/// Response code carried in every [`Response`](crate::Response).
///
/// `0` is the only success code. The remaining values are grouped by the
/// kind of failure the client should react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", from = "u16")]
#[repr(u16)]
pub enum ResponseCode {
    Success = 0,
    /// Malformed frame, missing field or unknown route.
    BadRequest = 1001,
    Unauthorized = 1002,
    Forbidden = 1003,
    NotFound = 1004,
    Conflict = 1005,
    Validation = 1006,
    RateLimited = 1007,
    Internal = 5000,
}

impl ResponseCode {
    #[must_use]
    pub fn is_success(self) -> bool {
        self == ResponseCode::Success
    }

    /// Short label used for logs and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseCode::Success => "success",
            ResponseCode::BadRequest => "bad_request",
            ResponseCode::Unauthorized => "unauthorized",
            ResponseCode::Forbidden => "forbidden",
            ResponseCode::NotFound => "not_found",
            ResponseCode::Conflict => "conflict",
            ResponseCode::Validation => "validation",
            ResponseCode::RateLimited => "rate_limited",
            ResponseCode::Internal => "internal",
        }
    }
}

impl From<ResponseCode> for u16 {
    fn from(code: ResponseCode) -> u16 {
        code as u16
    }
}

impl From<u16> for ResponseCode {
    fn from(value: u16) -> Self {
        match value {
            0 => ResponseCode::Success,
            1001 => ResponseCode::BadRequest,
            1002 => ResponseCode::Unauthorized,
            1003 => ResponseCode::Forbidden,
            1004 => ResponseCode::NotFound,
            1005 => ResponseCode::Conflict,
            1006 => ResponseCode::Validation,
            1007 => ResponseCode::RateLimited,
            // Anything unrecognised is still a failure.
            _ => ResponseCode::Internal,
        }
    }
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", u16::from(*self), self.as_str())
    }
}
