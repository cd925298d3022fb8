//! Determines the final on-chain outcome of a submitted operation.
//!
//! Three tiers run strictly in order and stop at the first receipt:
//!
//! 1. **Primary**: the relay's wait-for-receipt call, bounded by a timeout.
//! 2. **Polling**: `eth_getUserOperationReceipt` on a fixed interval, entered
//!    only when the primary wait timed out. Gives up early after consecutive
//!    transport failures.
//! 3. **Ledger recovery**: a bounded `eth_getLogs` scan for the operation's
//!    `UserOperationEvent`, followed by the bundle transaction receipt.
//!
//! When all three come back empty the result is [`UnconfirmedError`], which
//! is not a failure: the operation may still land.

use std::{fmt, sync::Arc, time::Duration};

use alloy_primitives::{Address, B256, U256};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    chain::{ChainClient, ChainError},
    error::UnconfirmedError,
    relay::{LooseFlag, RelayClient, UserOperationReceipt},
};

mod ledger;
pub use ledger::{
    EVENT_REPORTED_FAILURE, UserOperationOutcome, find_user_operation_event,
    revert_reason_from_logs, user_operation_event_filter,
};

/// Ceiling of the primary wait.
pub const DEFAULT_PRIMARY_TIMEOUT: Duration = Duration::from_secs(90);
/// Receipt query interval inside the primary wait.
pub const DEFAULT_PRIMARY_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Interval between manual polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Ceiling of manual polling.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(120);
/// Consecutive failed polls that end manual polling.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;
/// Interval of the "still waiting" log line.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
/// Blocks scanned behind the chain head during ledger recovery.
pub const DEFAULT_LOG_LOOKBACK_BLOCKS: u64 = 1000;

/// Timing of the confirmation tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationConfig {
    pub primary_timeout: Duration,
    pub primary_poll_interval: Duration,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub max_consecutive_failures: u32,
    pub heartbeat_interval: Duration,
    pub log_lookback_blocks: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            primary_timeout: DEFAULT_PRIMARY_TIMEOUT,
            primary_poll_interval: DEFAULT_PRIMARY_POLL_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            log_lookback_blocks: DEFAULT_LOG_LOOKBACK_BLOCKS,
        }
    }
}

/// A confirmation tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationTier {
    Primary,
    Polling,
    LedgerRecovery,
}

impl fmt::Display for ConfirmationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary wait",
            Self::Polling => "manual polling",
            Self::LedgerRecovery => "ledger recovery",
        })
    }
}

/// A receipt from whichever tier produced it, with loose fields preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReceipt {
    pub user_op_hash: B256,
    pub tier: ConfirmationTier,
    /// Operation-level success flag as reported.
    pub success: Option<LooseFlag>,
    /// Bundle transaction status as reported.
    pub status: Option<LooseFlag>,
    pub transaction_hash: Option<B256>,
    pub block_number: Option<u64>,
    /// Gas used by the bundle transaction.
    pub gas_used: Option<U256>,
    /// Gas charged to the operation.
    pub actual_gas_used: Option<U256>,
    pub actual_gas_cost: Option<U256>,
    /// Revert data (hex) or message.
    pub reason: Option<String>,
}

impl ResolvedReceipt {
    /// Wraps a relay receipt.
    pub fn from_relay(
        receipt: UserOperationReceipt,
        user_op_hash: B256,
        tier: ConfirmationTier,
    ) -> Self {
        let bundle = receipt.receipt.unwrap_or_default();
        Self {
            user_op_hash,
            tier,
            success: receipt.success,
            status: bundle.status,
            transaction_hash: bundle.transaction_hash,
            block_number: bundle.block_number.and_then(|block| u64::try_from(block).ok()),
            gas_used: bundle.gas_used,
            actual_gas_used: receipt.actual_gas_used,
            actual_gas_cost: receipt.actual_gas_cost,
            reason: receipt.reason,
        }
    }
}

/// Result of manual polling.
#[derive(Debug)]
enum PollOutcome {
    Found(UserOperationReceipt),
    /// Ceiling reached without a receipt.
    Exhausted { last_error: Option<String> },
    /// Too many consecutive failures.
    Unreachable { last_error: String },
}

/// Runs the confirmation tiers for submitted operations.
#[derive(Debug)]
pub struct ConfirmationResolver<C, R> {
    chain: Arc<C>,
    relay: Arc<R>,
    config: ConfirmationConfig,
}

impl<C, R> ConfirmationResolver<C, R>
where
    C: ChainClient,
    R: RelayClient,
{
    /// Creates a resolver.
    pub const fn new(chain: Arc<C>, relay: Arc<R>, config: ConfirmationConfig) -> Self {
        Self { chain, relay, config }
    }

    /// Resolves `user_op_hash`. `explorer_url` is attached to the error when
    /// no tier produced a receipt.
    ///
    /// Reads only; calling it again for the same hash observes the same
    /// chain state and yields the same receipt.
    pub async fn resolve(
        &self,
        user_op_hash: B256,
        entry_point: Address,
        explorer_url: Option<String>,
    ) -> Result<ResolvedReceipt, UnconfirmedError> {
        let unconfirmed = |tier_reached, last_relay_message| UnconfirmedError {
            user_op_hash,
            tier_reached,
            last_relay_message,
            explorer_url: explorer_url.clone(),
        };

        info!(target: "redeem-confirm", %user_op_hash, "waiting for relay receipt");
        let primary = self
            .relay
            .wait_for_user_operation_receipt(
                user_op_hash,
                self.config.primary_timeout,
                self.config.primary_poll_interval,
            )
            .await;
        let mut last_relay_message = match primary {
            Ok(receipt) => {
                info!(target: "redeem-confirm", %user_op_hash, tier = %ConfirmationTier::Primary, "receipt found");
                return Ok(ResolvedReceipt::from_relay(receipt, user_op_hash, ConfirmationTier::Primary));
            }
            Err(err) if err.is_timeout() => {
                warn!(target: "redeem-confirm", %user_op_hash, error = %err, "primary wait timed out, polling manually");
                Some(err.message())
            }
            Err(err) => {
                warn!(target: "redeem-confirm", %user_op_hash, error = %err, "primary wait failed");
                return Err(unconfirmed(ConfirmationTier::Primary, Some(err.message())));
            }
        };

        match self.poll(user_op_hash).await {
            PollOutcome::Found(receipt) => {
                info!(target: "redeem-confirm", %user_op_hash, tier = %ConfirmationTier::Polling, "receipt found");
                return Ok(ResolvedReceipt::from_relay(receipt, user_op_hash, ConfirmationTier::Polling));
            }
            PollOutcome::Exhausted { last_error } => {
                last_relay_message = last_error.or(last_relay_message);
            }
            PollOutcome::Unreachable { last_error } => {
                warn!(target: "redeem-confirm", %user_op_hash, error = %last_error, "relay unreachable, stopped polling");
                last_relay_message = Some(last_error);
            }
        }

        info!(target: "redeem-confirm", %user_op_hash, "scanning ledger logs");
        match self.recover_from_ledger(user_op_hash, entry_point).await {
            Ok(Some(receipt)) => {
                info!(target: "redeem-confirm", %user_op_hash, tier = %ConfirmationTier::LedgerRecovery, "receipt found");
                Ok(receipt)
            }
            Ok(None) => Err(unconfirmed(ConfirmationTier::LedgerRecovery, last_relay_message)),
            Err(err) => {
                warn!(target: "redeem-confirm", %user_op_hash, error = %err, "ledger recovery failed");
                Err(unconfirmed(ConfirmationTier::LedgerRecovery, last_relay_message))
            }
        }
    }

    async fn poll(&self, user_op_hash: B256) -> PollOutcome {
        let started = Instant::now();
        let deadline = started + self.config.poll_timeout;
        let mut last_heartbeat = started;
        let mut consecutive_failures = 0;
        let mut last_error = None;

        while Instant::now() < deadline {
            match self.relay.get_user_operation_receipt(user_op_hash).await {
                Ok(Some(receipt)) => return PollOutcome::Found(receipt),
                Ok(None) => consecutive_failures = 0,
                Err(err) => {
                    consecutive_failures += 1;
                    debug!(target: "redeem-confirm", consecutive_failures, error = %err, "receipt poll failed");
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        return PollOutcome::Unreachable { last_error: err.message() };
                    }
                    last_error = Some(err.message());
                }
            }

            let now = Instant::now();
            if now.duration_since(last_heartbeat) >= self.config.heartbeat_interval {
                info!(
                    target: "redeem-confirm",
                    %user_op_hash,
                    elapsed_secs = now.duration_since(started).as_secs(),
                    "still waiting for receipt"
                );
                last_heartbeat = now;
            }

            let remaining = deadline.saturating_duration_since(now);
            tokio::time::sleep(self.config.poll_interval.min(remaining)).await;
        }

        PollOutcome::Exhausted { last_error }
    }

    async fn recover_from_ledger(
        &self,
        user_op_hash: B256,
        entry_point: Address,
    ) -> Result<Option<ResolvedReceipt>, ChainError> {
        let latest = self.chain.block_number().await?;
        let from_block = latest.saturating_sub(self.config.log_lookback_blocks);
        debug!(target: "redeem-confirm", %user_op_hash, from_block, to_block = latest, "querying UserOperationEvent logs");

        let filter = user_operation_event_filter(entry_point, user_op_hash, from_block, latest);
        let logs = self.chain.logs(&filter).await?;
        let Some(outcome) = find_user_operation_event(&logs, user_op_hash) else {
            debug!(target: "redeem-confirm", %user_op_hash, logs = logs.len(), "no matching event in window");
            return Ok(None);
        };
        debug!(
            target: "redeem-confirm",
            %user_op_hash,
            success = outcome.success,
            actual_gas_used = %outcome.actual_gas_used,
            effective_gas_price = ?outcome.effective_gas_price(),
            "decoded UserOperationEvent"
        );

        let Some(transaction_hash) = outcome.transaction_hash else {
            return Err(ChainError::Decode("event log has no transaction hash".to_string()));
        };
        let receipt = self.chain.transaction_receipt(transaction_hash).await?;
        if receipt.is_none() {
            warn!(target: "redeem-confirm", %transaction_hash, "bundle receipt unavailable, using event data");
        }

        let revert_data = receipt
            .as_ref()
            .and_then(|receipt| revert_reason_from_logs(&receipt.logs, user_op_hash))
            .filter(|data| !data.is_empty());
        let reason = match (outcome.success, revert_data) {
            (true, _) => None,
            (false, Some(data)) => Some(data.to_string()),
            (false, None) => Some(EVENT_REPORTED_FAILURE.to_string()),
        };

        // The bundle status describes handleOps, not this operation.
        Ok(Some(ResolvedReceipt {
            user_op_hash,
            tier: ConfirmationTier::LedgerRecovery,
            success: Some(LooseFlag::Bool(outcome.success)),
            status: None,
            transaction_hash: Some(transaction_hash),
            block_number: receipt.as_ref().and_then(|receipt| receipt.block_number).or(outcome.block_number),
            gas_used: receipt.as_ref().map(|receipt| U256::from(receipt.gas_used)),
            actual_gas_used: Some(outcome.actual_gas_used),
            actual_gas_cost: Some(outcome.actual_gas_cost),
            reason,
        }))
    }
}
