use serde::Deserialize;
use thiserror::Error;

/// Errors surfaced by the futures REST client.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BinanceError {
    /// Network failure or the request exceeded its timeout.
    #[error("transport error: {message}")]
    Transport { message: String, timed_out: bool },

    /// The exchange rejected the request with a structured `{code, msg}` body.
    #[error("Binance API error (code: {code}): {msg}")]
    Api { code: i64, msg: String },

    /// Non-success status without a structured error body.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Success status, but the JSON is not the documented array/object.
    #[error("unexpected response shape, expected {expected}: {body}")]
    UnexpectedShape { expected: &'static str, body: String },

    /// The JSON had the right shape but a field could not be decoded.
    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },
}

impl BinanceError {
    pub fn transport(err: impl std::fmt::Display, timed_out: bool) -> Self {
        Self::Transport {
            message: err.to_string(),
            timed_out,
        }
    }

    /// Exchange error code, when the exchange reported one.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Structured error body returned by the exchange.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

impl ApiErrorBody {
    /// Try to read `{code, msg}` from a raw body.
    pub(crate) fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }

    pub(crate) fn into_error(self) -> BinanceError {
        BinanceError::Api {
            code: self.code,
            msg: self.msg,
        }
    }
}
