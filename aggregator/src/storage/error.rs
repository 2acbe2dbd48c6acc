//! Table store error types

use serde::Deserialize;
use thiserror::Error;

/// Error code the service returns when creating a table that exists
pub const TABLE_ALREADY_EXISTS: &str = "TableAlreadyExists";

#[derive(Debug, Error)]
pub enum TableError {
    /// Non-success response from the service
    #[error("table store returned {status} ({code}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("malformed account key: {0}")]
    InvalidKey(#[from] base64::DecodeError),

    #[error("invalid request url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("entity serialization failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Request rejected before reaching the service
    #[error("invalid batch: {0}")]
    InvalidBatch(String),
}

#[derive(Debug, Deserialize)]
struct ODataErrorBody {
    #[serde(rename = "odata.error")]
    error: ODataError,
}

#[derive(Debug, Deserialize)]
struct ODataError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: ODataMessage,
}

#[derive(Debug, Default, Deserialize)]
struct ODataMessage {
    #[serde(default)]
    value: String,
}

impl TableError {
    /// Build a service error from a response status and body. Bodies that
    /// are not an OData error payload keep their text as the message.
    pub fn from_response(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ODataErrorBody>(body.trim()) {
            Ok(parsed) => TableError::Service {
                status,
                code: parsed.error.code,
                message: parsed.error.message.value,
            },
            Err(_) => TableError::Service {
                status,
                code: String::new(),
                message: if body.trim().is_empty() {
                    "service returned without a response body".to_string()
                } else {
                    body.trim().to_string()
                },
            },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TableError::Service { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            TableError::Service { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        self.code() == Some(TABLE_ALREADY_EXISTS)
    }
}
