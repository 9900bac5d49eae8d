//! Probe failure taxonomy

use thiserror::Error;

/// Why a single probe (and therefore a classification) failed.
///
/// None of these abort a run; a failed probe just marks its candidate dead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("Request timeout")]
    RequestTimeout,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ProbeError {
    pub fn connection(err: impl std::fmt::Display) -> Self {
        Self::Connection(err.to_string())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout)
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedResponse(err.to_string())
    }
}
