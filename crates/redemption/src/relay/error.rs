//! Relay errors and the message classification table.
//!
//! Bundlers do not expose stable structured error codes for the failures the
//! submitter cares about, so classification is a substring match over the
//! relay's message. The table below is the only place these patterns live and
//! has to be revalidated whenever the relay in use changes.

use std::fmt;

use alloy_primitives::B256;
use alloy_transport::TransportError;
use thiserror::Error;

/// Lowercased substring to error kind. First match wins.
const CLASSIFICATION_TABLE: &[(&str, RelayErrorKind)] = &[
    ("invalid smart account nonce", RelayErrorKind::NonceConflict),
    ("invalid account nonce", RelayErrorKind::NonceConflict),
    ("invalidaccountnonceerror", RelayErrorKind::NonceConflict),
    ("aa25", RelayErrorKind::NonceConflict),
    ("transfer-amount-exceeded", RelayErrorKind::PeriodAllowanceExceeded),
    ("erc20periodtransferenforcer", RelayErrorKind::PeriodAllowanceExceeded),
    ("prefund", RelayErrorKind::InsufficientPrefund),
    ("aa21", RelayErrorKind::InsufficientPrefund),
    ("erc1271", RelayErrorKind::InvalidSignature),
    ("aa24", RelayErrorKind::InvalidSignature),
    ("maxpriorityfeepergas", RelayErrorKind::GasParameters),
    ("maxfeepergas", RelayErrorKind::GasParameters),
    ("timed out", RelayErrorKind::Timeout),
    ("timeout", RelayErrorKind::Timeout),
];

/// Classifies a relay message against the known error patterns.
pub fn classify_relay_message(message: &str) -> RelayErrorKind {
    let message = message.to_ascii_lowercase();
    CLASSIFICATION_TABLE
        .iter()
        .find(|(pattern, _)| message.contains(pattern))
        .map(|(_, kind)| *kind)
        .unwrap_or(RelayErrorKind::Other)
}

/// Coarse class of a relay failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayErrorKind {
    /// The nonce is stale or already held by a pending operation.
    NonceConflict,
    /// The account cannot prefund the operation.
    InsufficientPrefund,
    /// The account rejected the signature.
    InvalidSignature,
    /// Fee fields were rejected.
    GasParameters,
    /// The period transfer enforcer rejected the amount.
    PeriodAllowanceExceeded,
    /// The relay gave up waiting.
    Timeout,
    /// The relay could not be reached.
    Transport,
    /// Anything not in the table.
    Other,
}

impl RelayErrorKind {
    /// Short stable name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NonceConflict => "nonce conflict",
            Self::InsufficientPrefund => "insufficient prefund",
            Self::InvalidSignature => "invalid signature",
            Self::GasParameters => "gas parameters rejected",
            Self::PeriodAllowanceExceeded => "period allowance exceeded",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::Other => "other",
        }
    }

    /// Operator guidance for this kind of failure.
    pub const fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::NonceConflict => Some(
                "Another operation from this account is pending. Wait for it to land and retry.",
            ),
            Self::InsufficientPrefund => {
                Some("Fund the delegate smart account with more native currency for gas.")
            }
            Self::InvalidSignature => {
                Some("The delegation signature is invalid. Recreate the permission.")
            }
            Self::GasParameters => Some("The relay rejected the fee values. Retry shortly."),
            Self::PeriodAllowanceExceeded => Some(
                "The amount exceeds the period allowance. Request less or recreate the permission with a higher limit.",
            ),
            Self::Timeout | Self::Transport | Self::Other => None,
        }
    }
}

impl fmt::Display for RelayErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by a [`RelayClient`](super::RelayClient).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The relay answered with a JSON-RPC error.
    #[error("relay error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message.
        message: String,
        /// Raw `data` member, if present.
        data: Option<String>,
    },

    /// The relay could not be reached.
    #[error("relay transport error: {0}")]
    Transport(String),

    /// Waiting for a receipt exceeded its deadline.
    #[error("timed out waiting for receipt of {0}")]
    Timeout(B256),

    /// The relay answered with something that could not be decoded.
    #[error("invalid relay response: {0}")]
    InvalidResponse(String),
}

impl RelayError {
    /// Creates a JSON-RPC error without data.
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc { code, message: message.into(), data: None }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Message text including any error data, used for classification.
    pub fn message(&self) -> String {
        match self {
            Self::Rpc { message, data: Some(data), .. } => format!("{message} {data}"),
            Self::Rpc { message, data: None, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Classifies this error.
    pub fn kind(&self) -> RelayErrorKind {
        match self {
            Self::Timeout(_) => RelayErrorKind::Timeout,
            Self::Transport(message) => match classify_relay_message(message) {
                RelayErrorKind::Timeout => RelayErrorKind::Timeout,
                _ => RelayErrorKind::Transport,
            },
            Self::Rpc { .. } | Self::InvalidResponse(_) => classify_relay_message(&self.message()),
        }
    }

    /// Returns true for invalid or duplicate nonce errors.
    pub fn is_nonce_conflict(&self) -> bool {
        self.kind() == RelayErrorKind::NonceConflict
    }

    /// Returns true if the error means "gave up waiting".
    pub fn is_timeout(&self) -> bool {
        self.kind() == RelayErrorKind::Timeout
    }
}

impl From<TransportError> for RelayError {
    fn from(err: TransportError) -> Self {
        if let Some(payload) = err.as_error_resp() {
            return Self::Rpc {
                code: payload.code,
                message: payload.message.to_string(),
                data: payload.data.as_ref().map(|data| data.get().to_string()),
            };
        }
        if err.is_transport_error() {
            return Self::Transport(err.to_string());
        }
        Self::InvalidResponse(err.to_string())
    }
}
