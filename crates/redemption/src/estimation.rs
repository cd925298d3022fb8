//! Gas limits and fees for a redemption.
//!
//! Limits come from a relay estimation pass without paymaster data, padded by
//! a fixed buffer. When the relay cannot estimate, conservative fixed limits
//! are used instead: an overestimate only reserves unused gas, an
//! underestimate guarantees rejection.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use tracing::{debug, info, warn};

use crate::{
    chain::{ChainClient, ChainError},
    error::{PreconditionError, RedemptionError},
    relay::{RelayClient, UserOperation, UserOperationGasEstimate},
};

/// Percentage added on top of every estimated limit.
pub const DEFAULT_GAS_BUFFER_PERCENT: u64 = 30;

/// Call gas limit used when estimation fails.
pub const FALLBACK_CALL_GAS_LIMIT: u64 = 600_000;

/// Verification gas limit used when estimation fails.
pub const FALLBACK_VERIFICATION_GAS_LIMIT: u64 = 1_500_000;

/// Pre-verification gas used when estimation fails.
pub const FALLBACK_PRE_VERIFICATION_GAS: u64 = 1_500_000;

/// The three user operation gas limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasLimits {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
}

impl GasLimits {
    /// Fixed conservative limits.
    pub fn fallback() -> Self {
        Self {
            call_gas_limit: U256::from(FALLBACK_CALL_GAS_LIMIT),
            verification_gas_limit: U256::from(FALLBACK_VERIFICATION_GAS_LIMIT),
            pre_verification_gas: U256::from(FALLBACK_PRE_VERIFICATION_GAS),
        }
    }

    /// Applies the same percentage buffer to every limit.
    pub fn with_buffer(self, percent: u64) -> Self {
        Self {
            call_gas_limit: apply_buffer(self.call_gas_limit, percent),
            verification_gas_limit: apply_buffer(self.verification_gas_limit, percent),
            pre_verification_gas: apply_buffer(self.pre_verification_gas, percent),
        }
    }
}

impl From<UserOperationGasEstimate> for GasLimits {
    fn from(estimate: UserOperationGasEstimate) -> Self {
        Self {
            call_gas_limit: estimate.call_gas_limit,
            verification_gas_limit: estimate.verification_gas_limit,
            pre_verification_gas: estimate.pre_verification_gas,
        }
    }
}

/// `value * (100 + percent) / 100`, rounded up.
pub fn apply_buffer(value: U256, percent: u64) -> U256 {
    let scaled = value.saturating_mul(U256::from(100 + percent));
    scaled.saturating_add(U256::from(99)) / U256::from(100)
}

/// EIP-1559 fee fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeQuote {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

impl FeeQuote {
    /// Both fees raised by `percent`, each strictly above its previous value.
    pub fn bumped(self, percent: u64) -> Self {
        let bump = |value: U256| {
            let raised = value.saturating_mul(U256::from(100 + percent)) / U256::from(100);
            raised.max(value.saturating_add(U256::from(1)))
        };
        Self {
            max_fee_per_gas: bump(self.max_fee_per_gas),
            max_priority_fee_per_gas: bump(self.max_priority_fee_per_gas),
        }
    }
}

/// Where the gas limits came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitSource {
    /// Relay estimate plus buffer.
    Estimated,
    /// Fixed fallback limits.
    Fallback,
}

/// Limits and fees chosen for a user operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPlan {
    pub limits: GasLimits,
    pub fees: FeeQuote,
    pub source: LimitSource,
}

impl GasPlan {
    /// Writes limits and fees into `user_operation`.
    pub fn apply(&self, user_operation: &mut UserOperation) {
        user_operation.call_gas_limit = self.limits.call_gas_limit;
        user_operation.verification_gas_limit = self.limits.verification_gas_limit;
        user_operation.pre_verification_gas = self.limits.pre_verification_gas;
        user_operation.max_fee_per_gas = self.fees.max_fee_per_gas;
        user_operation.max_priority_fee_per_gas = self.fees.max_priority_fee_per_gas;
    }
}

/// Configuration for gas estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimationConfig {
    /// Percentage buffer on estimated limits.
    pub gas_buffer_percent: u64,
    /// Limits used when estimation fails. Not buffered.
    pub fallback_limits: GasLimits,
    /// `maxFeePerGas = gasPrice * max_fee_multiplier`.
    pub max_fee_multiplier: u64,
    /// `maxPriorityFeePerGas = gasPrice * priority_fee_multiplier`.
    pub priority_fee_multiplier: u64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            gas_buffer_percent: DEFAULT_GAS_BUFFER_PERCENT,
            fallback_limits: GasLimits::fallback(),
            max_fee_multiplier: 2,
            priority_fee_multiplier: 1,
        }
    }
}

/// Chooses gas limits and fees, and checks the paying account is funded.
#[derive(Debug)]
pub struct GasEstimator<C, R> {
    chain: Arc<C>,
    relay: Arc<R>,
    config: EstimationConfig,
}

impl<C, R> GasEstimator<C, R>
where
    C: ChainClient,
    R: RelayClient,
{
    /// Creates an estimator.
    pub const fn new(chain: Arc<C>, relay: Arc<R>, config: EstimationConfig) -> Self {
        Self { chain, relay, config }
    }

    /// Fails with [`PreconditionError::ZeroBalance`] if `account` holds no
    /// native currency. Checked once, before anything reaches the relay.
    pub async fn ensure_funded(&self, account: Address) -> Result<U256, RedemptionError> {
        let balance = self.chain.balance(account).await?;
        debug!(target: "redeem-estimation", %account, %balance, "smart account balance");
        if balance.is_zero() {
            return Err(PreconditionError::ZeroBalance { account }.into());
        }
        Ok(balance)
    }

    /// Fees derived from the current network gas price.
    pub async fn quote_fees(&self) -> Result<FeeQuote, ChainError> {
        let gas_price = U256::from(self.chain.gas_price().await?);
        Ok(FeeQuote {
            max_fee_per_gas: gas_price.saturating_mul(U256::from(self.config.max_fee_multiplier)),
            max_priority_fee_per_gas: gas_price
                .saturating_mul(U256::from(self.config.priority_fee_multiplier)),
        })
    }

    /// Buffered relay estimate for `user_operation`, or the fallback limits.
    pub async fn estimate_limits(
        &self,
        user_operation: &UserOperation,
        entry_point: Address,
    ) -> (GasLimits, LimitSource) {
        match self.relay.estimate_user_operation_gas(user_operation, entry_point).await {
            Ok(estimate) => (
                GasLimits::from(estimate).with_buffer(self.config.gas_buffer_percent),
                LimitSource::Estimated,
            ),
            Err(err) => {
                warn!(
                    target: "redeem-estimation",
                    error = %err,
                    "gas estimation failed, using fallback limits"
                );
                (self.config.fallback_limits, LimitSource::Fallback)
            }
        }
    }

    /// Fees first, then limits estimated for an operation carrying those fees.
    pub async fn plan(
        &self,
        user_operation: &UserOperation,
        entry_point: Address,
    ) -> Result<GasPlan, ChainError> {
        let fees = self.quote_fees().await?;

        let mut probe = user_operation.clone();
        probe.max_fee_per_gas = fees.max_fee_per_gas;
        probe.max_priority_fee_per_gas = fees.max_priority_fee_per_gas;
        let (limits, source) = self.estimate_limits(&probe, entry_point).await;

        info!(
            target: "redeem-estimation",
            call_gas_limit = %limits.call_gas_limit,
            verification_gas_limit = %limits.verification_gas_limit,
            pre_verification_gas = %limits.pre_verification_gas,
            max_fee_per_gas = %fees.max_fee_per_gas,
            max_priority_fee_per_gas = %fees.max_priority_fee_per_gas,
            ?source,
            "gas plan"
        );

        Ok(GasPlan { limits, fees, source })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(7)]
    #[case(21_000)]
    #[case(123_457)]
    #[case(1_500_000)]
    fn buffer_is_at_least_thirty_percent(#[case] value: u64) {
        let value = U256::from(value);
        let buffered = apply_buffer(value, DEFAULT_GAS_BUFFER_PERCENT);
        assert!(buffered * U256::from(100) >= value * U256::from(130));
        assert!(buffered >= value);
    }

    #[test]
    fn buffer_is_applied_to_every_limit() {
        let limits = GasLimits {
            call_gas_limit: U256::from(100_000),
            verification_gas_limit: U256::from(200_000),
            pre_verification_gas: U256::from(50_000),
        };
        let buffered = limits.with_buffer(30);
        assert_eq!(buffered.call_gas_limit, U256::from(130_000));
        assert_eq!(buffered.verification_gas_limit, U256::from(260_000));
        assert_eq!(buffered.pre_verification_gas, U256::from(65_000));
    }

    #[test]
    fn buffer_is_monotone() {
        let mut previous = U256::ZERO;
        for value in (0u64..5_000).step_by(37) {
            let buffered = apply_buffer(U256::from(value), 30);
            assert!(buffered >= previous);
            previous = buffered;
        }
    }

    #[test]
    fn fee_bump_is_twenty_percent_and_strict() {
        let fees = FeeQuote {
            max_fee_per_gas: U256::from(100),
            max_priority_fee_per_gas: U256::from(1),
        };
        let bumped = fees.bumped(20);
        assert_eq!(bumped.max_fee_per_gas, U256::from(120));
        assert_eq!(bumped.max_priority_fee_per_gas, U256::from(2));
    }

    #[test]
    fn fallback_limits_match_defaults() {
        let config = EstimationConfig::default();
        assert_eq!(config.fallback_limits.call_gas_limit, U256::from(600_000));
        assert_eq!(config.fallback_limits.verification_gas_limit, U256::from(1_500_000));
        assert_eq!(config.fallback_limits.pre_verification_gas, U256::from(1_500_000));
    }
}
