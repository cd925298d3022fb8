//! Error taxonomy for a single redemption attempt.
//!
//! Each variant of [`RedemptionError`] maps to one user-facing outcome class.
//! [`UnconfirmedError`] and [`RevertedError`] are never rendered the same way:
//! one means "check again later", the other means "this failed on-chain".

use alloy_primitives::{Address, B256, U256};
use thiserror::Error;

use crate::{
    chain::ChainError, config::ConfigError, confirmation::ConfirmationTier,
    relay::RelayErrorKind, source::SourceError,
};

/// Result alias used across the crate.
pub type Result<T, E = RedemptionError> = std::result::Result<T, E>;

/// Top-level error for the redemption pipeline.
#[derive(Debug, Error)]
pub enum RedemptionError {
    /// The permission record or caller input is malformed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A precondition for submission does not hold.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// The relay rejected the operation.
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    /// No confirmation tier produced a definitive receipt.
    #[error(transparent)]
    Unconfirmed(#[from] UnconfirmedError),

    /// The operation was included and failed on-chain.
    #[error(transparent)]
    Reverted(#[from] RevertedError),

    /// A ledger read failed before anything was submitted.
    #[error("ledger read failed: {0}")]
    Chain(#[from] ChainError),

    /// The permission store could not be read.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RedemptionError {
    /// Returns true if the outcome of the operation is still unknown.
    pub const fn is_unconfirmed(&self) -> bool {
        matches!(self, Self::Unconfirmed(_))
    }

    /// Returns true if the operation is known to have failed on-chain.
    pub const fn is_reverted(&self) -> bool {
        matches!(self, Self::Reverted(_))
    }

    /// Returns true if no relay call could have been made for this error.
    pub const fn is_pre_submission(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Precondition(_) | Self::Source(_) | Self::Config(_)
        )
    }

    /// Guidance for the operator, if there is any beyond the message itself.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::Precondition(err) => Some(err.remediation()),
            Self::Submission(err) => err.kind.remediation(),
            Self::Reverted(err) => err.remediation,
            Self::Unconfirmed(_) => {
                Some("The operation may still land. Recheck it later instead of resubmitting.")
            }
            Self::Validation(_) | Self::Chain(_) | Self::Source(_) | Self::Config(_) => None,
        }
    }
}

/// Malformed or mismatched permission input. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is absent.
    #[error("permission field `{0}` is missing")]
    MissingField(&'static str),

    /// An address field could not be parsed as a 20-byte address.
    #[error("permission field `{field}` is not a valid address: {value}")]
    InvalidAddress {
        /// Name of the offending field.
        field: &'static str,
        /// Raw value as stored.
        value: String,
    },

    /// A byte field is not valid hex or exceeds its fixed width.
    #[error("permission field `{field}` is not valid: {reason}")]
    InvalidBytes {
        /// Name of the offending field.
        field: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The permission carries no signature.
    #[error("permission is not signed")]
    MissingSignature,

    /// The caller's active account is not the permission's delegate.
    #[error("active account {active} is not the permission delegate {delegate}")]
    DelegateMismatch {
        /// Account currently acting.
        active: Address,
        /// Delegate named in the permission.
        delegate: Address,
    },

    /// The requested token differs from the token the permission covers.
    #[error("permission covers token {permitted}, not {requested}")]
    TokenMismatch {
        /// Token the caveat restricts transfers to.
        permitted: Address,
        /// Token the caller asked for.
        requested: Address,
    },

    /// The requested amount exceeds what one period allows.
    #[error("requested amount {requested} exceeds the period allowance {allowance}")]
    AmountExceedsAllowance {
        /// Amount the caller asked for.
        requested: U256,
        /// Period amount encoded in the caveat.
        allowance: U256,
    },

    /// A zero amount was requested.
    #[error("requested amount must be greater than zero")]
    ZeroAmount,
}

/// A condition that must hold before anything is sent to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    /// The delegate smart account cannot pay for gas.
    #[error("delegate smart account {account} has zero native balance")]
    ZeroBalance {
        /// The smart account that would pay for gas.
        account: Address,
    },

    /// The DelegationManager is not configured for the chain.
    #[error("no DelegationManager address is configured for chain {chain_id}")]
    ContractAddressMissing {
        /// Active chain id.
        chain_id: u64,
    },

    /// The chain is not in the registry at all.
    #[error("chain {chain_id} is not supported")]
    UnsupportedChain {
        /// Active chain id.
        chain_id: u64,
    },

    /// The permission source has no active record for the pair.
    #[error("no active permission from {delegator} to {delegate}")]
    NoActivePermission {
        /// Granting account.
        delegator: Address,
        /// Redeeming account.
        delegate: Address,
    },

    /// The delegate smart account has no code and no deployment data.
    #[error("delegate smart account {account} is not deployed")]
    AccountNotDeployed {
        /// The smart account address.
        account: Address,
    },
}

impl PreconditionError {
    /// Operator guidance for the failed precondition.
    pub const fn remediation(&self) -> &'static str {
        match self {
            Self::ZeroBalance { .. } => {
                "Fund the delegate smart account with native currency to pay for gas."
            }
            Self::ContractAddressMissing { .. } | Self::UnsupportedChain { .. } => {
                "Configure the DelegationManager deployment for this chain."
            }
            Self::NoActivePermission { .. } => {
                "Ask the delegator to create a new permission for this delegate."
            }
            Self::AccountNotDeployed { .. } => {
                "Deploy the delegate smart account or supply its factory data."
            }
        }
    }
}

/// The relay refused the operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("relay rejected the operation after {attempts} attempt(s) ({kind}): {message}")]
pub struct SubmissionError {
    /// Number of send attempts made.
    pub attempts: u32,
    /// Classification of the last relay error.
    pub kind: RelayErrorKind,
    /// Nonce that every attempt used.
    pub nonce: U256,
    /// Last message returned by the relay.
    pub message: String,
}

/// Every confirmation tier ran without a definitive receipt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.describe())]
pub struct UnconfirmedError {
    /// Hash of the submitted operation.
    pub user_op_hash: B256,
    /// Last tier that ran.
    pub tier_reached: ConfirmationTier,
    /// Last message seen from the relay, if any.
    pub last_relay_message: Option<String>,
    /// Where to look the operation up manually.
    pub explorer_url: Option<String>,
}

impl UnconfirmedError {
    fn describe(&self) -> String {
        let mut out = format!(
            "operation {} is not confirmed (stopped at {})",
            self.user_op_hash, self.tier_reached
        );
        if let Some(message) = &self.last_relay_message {
            out.push_str(&format!("; last relay message: {message}"));
        }
        if let Some(url) = &self.explorer_url {
            out.push_str(&format!("; verify at {url}"));
        }
        out
    }
}

/// The operation was included and reported failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("operation {user_op_hash} reverted: {reason}")]
pub struct RevertedError {
    /// Hash of the operation.
    pub user_op_hash: B256,
    /// Bundle transaction hash, if known.
    pub transaction_hash: Option<B256>,
    /// Decoded or raw revert reason.
    pub reason: String,
    /// Suggested fix for known reasons.
    pub remediation: Option<&'static str>,
}
