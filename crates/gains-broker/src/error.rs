use std::fmt;

/// Failures of a brokerage or token-endpoint call.
///
/// Only [`BrokerError::Unauthorized`] is actionable (it triggers a credential
/// refresh); every other variant is transient from the caller's point of view
/// and is retried on the next natural tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Connection, TLS or protocol failure before a response arrived.
    Transport(String),
    /// The call exceeded the configured request timeout.
    Timeout,
    /// 401 / 403: the bearer (or refresh) token was rejected.
    Unauthorized { status: u16, message: String },
    /// Any other non-success status.
    Api { status: u16, message: String },
    /// The response body could not be decoded.
    Decode(String),
}

impl BrokerError {
    pub fn is_auth(&self) -> bool {
        matches!(self, BrokerError::Unauthorized { .. })
    }

    pub(crate) fn from_status(status: u16, message: String) -> Self {
        if status == 401 || status == 403 {
            BrokerError::Unauthorized { status, message }
        } else {
            BrokerError::Api { status, message }
        }
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BrokerError::Timeout
        } else if e.is_decode() {
            BrokerError::Decode(e.to_string())
        } else {
            BrokerError::Transport(e.to_string())
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::Transport(msg) => write!(f, "broker transport error: {msg}"),
            BrokerError::Timeout => write!(f, "broker request timed out"),
            BrokerError::Unauthorized { status, message } => {
                write!(f, "broker rejected credentials status={status} message={message}")
            }
            BrokerError::Api { status, message } => {
                write!(f, "broker http error status={status} message={message}")
            }
            BrokerError::Decode(msg) => write!(f, "broker response decode failed: {msg}"),
        }
    }
}

impl std::error::Error for BrokerError {}
