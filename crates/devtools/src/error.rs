//! Error types for DevTools operations
//!
//! One flat enum. Connection, timeout and evaluation failures are the
//! protocol errors; scheme and URL rejections are caller misuse and are
//! raised before anything touches the network.

use std::time::Duration;
use thiserror::Error;

use crate::cdp::protocol::RequestId;

pub type Result<T> = std::result::Result<T, CDPError>;

#[derive(Error, Debug)]
pub enum CDPError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request '{method}' (id {id}) timed out after {timeout:?}")]
    RequestTimeout {
        method: String,
        id: RequestId,
        timeout: Duration,
    },

    #[error("Timed out after {timeout:?} waiting for event '{event}'")]
    EventTimeout { event: String, timeout: Duration },

    #[error("Condition '{expression}' not met within {timeout:?}")]
    ConditionTimeout {
        expression: String,
        timeout: Duration,
    },

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Unsupported URL scheme '{0}': only http and https are allowed")]
    UnsupportedScheme(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CDPError {
    pub(crate) fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Connection, timeout or evaluation failure reported by the protocol layer.
    pub fn is_protocol(&self) -> bool {
        !self.is_validation() && !matches!(self, Self::Json(_))
    }

    /// Caller misuse rejected before any network activity.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::UnsupportedScheme(_) | Self::InvalidUrl(_))
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::RequestTimeout { .. } | Self::EventTimeout { .. } | Self::ConditionTimeout { .. }
        )
    }
}
