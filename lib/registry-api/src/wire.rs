//! Wire conventions of the registry protocol
//!
//! Calls are HTTP/2 `POST` requests with JSON bodies. Failures travel as a
//! non-2xx status carrying an [`ErrorBody`].

use serde::{Deserialize, Serialize};
use std::fmt;

pub const REGISTER_PATH: &str = "/registry.NetworkServiceEndpointRegistry/Register";
pub const FIND_PATH: &str = "/registry.NetworkServiceEndpointRegistry/Find";
pub const UNREGISTER_PATH: &str = "/registry.NetworkServiceEndpointRegistry/Unregister";

pub const CONTENT_TYPE: &str = "application/json";

/// Status codes carried in error bodies
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Code {
    InvalidArgument,
    NotFound,
    PermissionDenied,
    Unavailable,
    Unimplemented,
    Internal,
}

impl Code {
    /// HTTP status used to carry this code
    pub fn http_status(self) -> u16 {
        match self {
            Code::InvalidArgument => 400,
            Code::PermissionDenied => 403,
            Code::NotFound => 404,
            Code::Internal => 500,
            Code::Unimplemented => 501,
            Code::Unavailable => 503,
        }
    }

    /// Best-effort code for a status without a decodable body
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => Code::InvalidArgument,
            403 => Code::PermissionDenied,
            404 => Code::NotFound,
            501 => Code::Unimplemented,
            502..=504 => Code::Unavailable,
            _ => Code::Internal,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Body of a failed call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: Code,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
