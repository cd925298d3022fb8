//! The record produced once per redemption attempt.

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{confirmation::ConfirmationTier, error::RevertedError, outcome::Interpretation};

/// Outcome of one redemption, handed to the history collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionResult {
    /// Transaction hash, or the operation hash when there is none.
    pub id: B256,
    pub delegator: Address,
    pub delegate: Address,
    pub token: Address,
    /// Amount in the token's base units.
    pub requested_amount: U256,
    pub user_op_hash: B256,
    pub transaction_hash: Option<B256>,
    pub block_number: Option<u64>,
    pub gas_used: U256,
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert_reason: Option<String>,
    pub confirmed_by: ConfirmationTier,
    pub timestamp: DateTime<Utc>,
    /// Always true here; the direct-transfer path records `false`.
    pub gasless: bool,
}

/// Who and what a redemption was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedemptionParties {
    pub delegator: Address,
    pub delegate: Address,
    pub token: Address,
    pub amount: U256,
}

impl RedemptionResult {
    /// Assembles the record from an interpreted receipt.
    pub fn new(
        parties: RedemptionParties,
        user_op_hash: B256,
        confirmed_by: ConfirmationTier,
        interpretation: Interpretation,
    ) -> Self {
        Self {
            id: interpretation.transaction_hash.unwrap_or(user_op_hash),
            delegator: parties.delegator,
            delegate: parties.delegate,
            token: parties.token,
            requested_amount: parties.amount,
            user_op_hash,
            transaction_hash: interpretation.transaction_hash,
            block_number: interpretation.block_number,
            gas_used: interpretation.gas_used,
            success: interpretation.success,
            message: interpretation.message,
            revert_reason: interpretation.revert_reason,
            confirmed_by,
            timestamp: Utc::now(),
            gasless: true,
        }
    }

    /// The on-chain failure as an error, or `None` for a success.
    pub fn reverted_error(&self) -> Option<RevertedError> {
        if self.success {
            return None;
        }
        let reason = self.revert_reason.clone().unwrap_or_else(|| self.message.clone());
        Some(RevertedError {
            user_op_hash: self.user_op_hash,
            transaction_hash: self.transaction_hash,
            remediation: crate::relay::classify_relay_message(&reason).remediation(),
            reason,
        })
    }
}
