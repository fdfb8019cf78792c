//! Error taxonomy shared by sources, backends and sinks.
//!
//! Only `Config` is ever fatal. The controller recovers everything else
//! locally: the cycle is aborted, the failure is logged and the loop goes on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Network or broker unreachable, timeouts, non-success status codes.
    #[error("transport failure for {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// Malformed image payload or response body.
    #[error("failed to decode {what}: {message}")]
    Decode { what: &'static str, message: String },

    /// Backend-specific inference failure.
    #[error("inference backend '{backend}' failed: {message}")]
    Inference {
        backend: &'static str,
        message: String,
    },

    /// Missing startup dependency (model file, runner, broker).
    #[error("configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    pub fn transport(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    pub fn decode(what: &'static str, message: impl ToString) -> Self {
        Self::Decode {
            what,
            message: message.to_string(),
        }
    }

    pub fn inference(backend: &'static str, message: impl ToString) -> Self {
        Self::Inference {
            backend,
            message: message.to_string(),
        }
    }

    /// True for errors that must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Map a ureq failure onto the transport variant, keeping status and body text.
pub(crate) fn from_ureq(endpoint: &str, err: ureq::Error) -> BridgeError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            BridgeError::transport(endpoint, format!("HTTP {}: {}", code, body.trim()))
        }
        ureq::Error::Transport(t) => BridgeError::transport(endpoint, t),
    }
}
