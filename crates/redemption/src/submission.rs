//! Signs and sends a user operation, outbidding nonce conflicts.
//!
//! Every attempt uses the same nonce. A nonce conflict means another operation
//! from the account holds that nonce in the relay's pool, so the retry raises
//! both fees to replace it rather than moving to a new nonce.

use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, B256};
use tracing::{info, warn};

use crate::{
    error::SubmissionError,
    estimation::FeeQuote,
    relay::{RelayClient, RelayError, RelayErrorKind, UserOperation},
    signer::OperationSigner,
};

/// Total send attempts, including the first.
pub const DEFAULT_MAX_SUBMISSION_ATTEMPTS: u32 = 3;

/// Fee increase per nonce-conflict retry.
pub const DEFAULT_FEE_BUMP_PERCENT: u64 = 20;

/// Pause before a retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Retry policy for submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionConfig {
    pub max_attempts: u32,
    pub fee_bump_percent: u64,
    pub retry_delay: Duration,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_SUBMISSION_ATTEMPTS,
            fee_bump_percent: DEFAULT_FEE_BUMP_PERCENT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Result of one send.
#[derive(Debug)]
enum SendOutcome {
    Accepted(B256),
    NonceConflict(RelayError),
    Fatal(RelayError),
}

impl From<Result<B256, RelayError>> for SendOutcome {
    fn from(result: Result<B256, RelayError>) -> Self {
        match result {
            Ok(hash) => Self::Accepted(hash),
            Err(err) if err.is_nonce_conflict() => Self::NonceConflict(err),
            Err(err) => Self::Fatal(err),
        }
    }
}

/// An operation the relay accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedOperation {
    pub user_op_hash: B256,
    pub entry_point: Address,
    /// The operation as last sent, with its final fees and signature.
    pub user_operation: UserOperation,
    pub attempts: u32,
}

/// Sends user operations through a relay.
#[derive(Debug)]
pub struct OperationSubmitter<R, S> {
    relay: Arc<R>,
    signer: Arc<S>,
    config: SubmissionConfig,
}

impl<R, S> OperationSubmitter<R, S>
where
    R: RelayClient,
    S: OperationSigner,
{
    /// Creates a submitter.
    pub const fn new(relay: Arc<R>, signer: Arc<S>, config: SubmissionConfig) -> Self {
        Self { relay, signer, config }
    }

    /// Signs and sends `user_operation`, retrying nonce conflicts with bumped
    /// fees until the attempts run out.
    pub async fn submit(
        &self,
        mut user_operation: UserOperation,
        entry_point: Address,
        chain_id: u64,
    ) -> Result<SubmittedOperation, SubmissionError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let local_hash = user_operation.hash(entry_point, chain_id);
            user_operation.signature =
                self.signer.sign_user_operation_hash(local_hash).await.map_err(|err| {
                    SubmissionError {
                        attempts: attempt,
                        kind: RelayErrorKind::Other,
                        nonce: user_operation.nonce,
                        message: err.to_string(),
                    }
                })?;

            info!(
                target: "redeem-submit",
                attempt,
                max_attempts,
                sender = %user_operation.sender,
                nonce = %user_operation.nonce,
                max_fee_per_gas = %user_operation.max_fee_per_gas,
                max_priority_fee_per_gas = %user_operation.max_priority_fee_per_gas,
                "sending user operation"
            );

            let outcome =
                SendOutcome::from(self.relay.send_user_operation(&user_operation, entry_point).await);

            match outcome {
                SendOutcome::Accepted(user_op_hash) => {
                    if user_op_hash != local_hash {
                        warn!(
                            target: "redeem-submit",
                            relay_hash = %user_op_hash,
                            %local_hash,
                            "relay returned a different operation hash"
                        );
                    }
                    info!(target: "redeem-submit", %user_op_hash, attempt, "user operation accepted");
                    return Ok(SubmittedOperation {
                        user_op_hash,
                        entry_point,
                        user_operation,
                        attempts: attempt,
                    });
                }
                SendOutcome::NonceConflict(err) if attempt < max_attempts => {
                    let fees = FeeQuote {
                        max_fee_per_gas: user_operation.max_fee_per_gas,
                        max_priority_fee_per_gas: user_operation.max_priority_fee_per_gas,
                    }
                    .bumped(self.config.fee_bump_percent);
                    warn!(
                        target: "redeem-submit",
                        attempt,
                        error = %err,
                        new_max_fee_per_gas = %fees.max_fee_per_gas,
                        new_max_priority_fee_per_gas = %fees.max_priority_fee_per_gas,
                        "nonce conflict, bumping fees"
                    );
                    user_operation.max_fee_per_gas = fees.max_fee_per_gas;
                    user_operation.max_priority_fee_per_gas = fees.max_priority_fee_per_gas;
                    tokio::time::sleep(self.config.retry_delay).await;
                    attempt += 1;
                }
                SendOutcome::NonceConflict(err) | SendOutcome::Fatal(err) => {
                    warn!(target: "redeem-submit", attempt, error = %err, "submission failed");
                    return Err(SubmissionError {
                        attempts: attempt,
                        kind: err.kind(),
                        nonce: user_operation.nonce,
                        message: err.message(),
                    });
                }
            }
        }
    }
}
