//! Redemption configuration
//!
//! Endpoints, chain selection, deployment overrides and the timing of every
//! stage come from CLI flags, each with a `REDEEM_*` environment fallback.
//! [`RedeemArgs::validate`] must pass before the accessors are used.

use std::time::Duration;

use alloy_primitives::Address;
use thiserror::Error;
use url::Url;

use crate::{
    confirmation::{
        ConfirmationConfig, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_LOG_LOOKBACK_BLOCKS,
        DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT,
        DEFAULT_PRIMARY_TIMEOUT,
    },
    estimation::{DEFAULT_GAS_BUFFER_PERCENT, EstimationConfig},
    registry::{ChainRegistry, MONAD_TESTNET_CHAIN_ID},
    submission::{
        DEFAULT_FEE_BUMP_PERCENT, DEFAULT_MAX_SUBMISSION_ATTEMPTS, DEFAULT_RETRY_DELAY,
        SubmissionConfig,
    },
};

/// Errors that can occur when validating config
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config validation failed: {0}")]
    ValidationError(String),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

const DEFAULT_CHAIN_ID: u64 = MONAD_TESTNET_CHAIN_ID;
const DEFAULT_RETRY_DELAY_MS: u64 = DEFAULT_RETRY_DELAY.as_millis() as u64;
const DEFAULT_PRIMARY_TIMEOUT_SECS: u64 = DEFAULT_PRIMARY_TIMEOUT.as_secs();
const DEFAULT_POLL_INTERVAL_SECS: u64 = DEFAULT_POLL_INTERVAL.as_secs();
const DEFAULT_POLL_TIMEOUT_SECS: u64 = DEFAULT_POLL_TIMEOUT.as_secs();
const DEFAULT_HEARTBEAT_SECS: u64 = DEFAULT_HEARTBEAT_INTERVAL.as_secs();

/// Settings for every pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Chain the pipeline redeems on.
    pub chain_id: u64,
    pub estimation: EstimationConfig,
    pub submission: SubmissionConfig,
    pub confirmation: ConfirmationConfig,
}

impl PipelineConfig {
    /// Default stage settings for `chain_id`.
    pub fn for_chain(chain_id: u64) -> Self {
        Self {
            chain_id,
            estimation: EstimationConfig::default(),
            submission: SubmissionConfig::default(),
            confirmation: ConfirmationConfig::default(),
        }
    }
}

/// Redemption CLI arguments
///
/// # Example usage:
///
/// ```bash
/// redeemer redeem \
///     --rpc-url https://testnet-rpc.monad.xyz \
///     --bundler-url https://bundler.example/rpc \
///     --chain-id 10143 \
///     --delegator 0x... --delegate 0x... --amount 1000000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, clap::Args)]
#[command(next_help_heading = "Redemption")]
pub struct RedeemArgs {
    /// JSON-RPC endpoint of the chain node.
    #[arg(long = "rpc-url", env = "REDEEM_RPC_URL")]
    pub rpc_url: Option<String>,

    /// JSON-RPC endpoint of the ERC-4337 bundler.
    #[arg(long = "bundler-url", env = "REDEEM_BUNDLER_URL")]
    pub bundler_url: Option<String>,

    /// Chain to redeem on.
    #[arg(long = "chain-id", env = "REDEEM_CHAIN_ID", default_value_t = DEFAULT_CHAIN_ID)]
    pub chain_id: u64,

    /// DelegationManager override for the selected chain.
    #[arg(long = "delegation-manager", env = "REDEEM_DELEGATION_MANAGER")]
    pub delegation_manager: Option<Address>,

    /// EntryPoint override for the selected chain.
    #[arg(long = "entry-point", env = "REDEEM_ENTRY_POINT")]
    pub entry_point: Option<Address>,

    /// ERC20PeriodTransferEnforcer override for the selected chain.
    #[arg(long = "period-transfer-enforcer", env = "REDEEM_PERIOD_TRANSFER_ENFORCER")]
    pub period_transfer_enforcer: Option<Address>,

    /// Block explorer base URL override for the selected chain.
    #[arg(long = "explorer-url", env = "REDEEM_EXPLORER_URL")]
    pub explorer_url: Option<String>,

    /// Percentage added on top of the bundler's gas estimate.
    #[arg(long = "gas-buffer-percent", env = "REDEEM_GAS_BUFFER_PERCENT", default_value_t = DEFAULT_GAS_BUFFER_PERCENT)]
    pub gas_buffer_percent: u64,

    /// Send attempts, including the first.
    #[arg(long = "max-attempts", env = "REDEEM_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_SUBMISSION_ATTEMPTS)]
    pub max_attempts: u32,

    /// Fee increase applied on each nonce-conflict retry.
    #[arg(long = "fee-bump-percent", env = "REDEEM_FEE_BUMP_PERCENT", default_value_t = DEFAULT_FEE_BUMP_PERCENT)]
    pub fee_bump_percent: u64,

    /// Pause before each retry, in milliseconds.
    #[arg(long = "retry-delay-ms", env = "REDEEM_RETRY_DELAY_MS", default_value_t = DEFAULT_RETRY_DELAY_MS)]
    pub retry_delay_ms: u64,

    /// Ceiling of the bundler's wait-for-receipt, in seconds.
    #[arg(long = "primary-timeout-secs", env = "REDEEM_PRIMARY_TIMEOUT_SECS", default_value_t = DEFAULT_PRIMARY_TIMEOUT_SECS)]
    pub primary_timeout_secs: u64,

    /// Interval between manual receipt polls, in seconds.
    #[arg(long = "poll-interval-secs", env = "REDEEM_POLL_INTERVAL_SECS", default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    pub poll_interval_secs: u64,

    /// Ceiling of manual polling, in seconds.
    #[arg(long = "poll-timeout-secs", env = "REDEEM_POLL_TIMEOUT_SECS", default_value_t = DEFAULT_POLL_TIMEOUT_SECS)]
    pub poll_timeout_secs: u64,

    /// Consecutive poll failures that end manual polling.
    #[arg(long = "max-poll-failures", env = "REDEEM_MAX_POLL_FAILURES", default_value_t = DEFAULT_MAX_CONSECUTIVE_FAILURES)]
    pub max_poll_failures: u32,

    /// Interval of the "still waiting" log line, in seconds.
    #[arg(long = "heartbeat-secs", env = "REDEEM_HEARTBEAT_SECS", default_value_t = DEFAULT_HEARTBEAT_SECS)]
    pub heartbeat_secs: u64,

    /// Blocks scanned behind the head when recovering from event logs.
    #[arg(long = "log-lookback-blocks", env = "REDEEM_LOG_LOOKBACK_BLOCKS", default_value_t = DEFAULT_LOG_LOOKBACK_BLOCKS)]
    pub log_lookback_blocks: u64,
}

impl Default for RedeemArgs {
    fn default() -> Self {
        Self {
            rpc_url: None,
            bundler_url: None,
            chain_id: DEFAULT_CHAIN_ID,
            delegation_manager: None,
            entry_point: None,
            period_transfer_enforcer: None,
            explorer_url: None,
            gas_buffer_percent: DEFAULT_GAS_BUFFER_PERCENT,
            max_attempts: DEFAULT_MAX_SUBMISSION_ATTEMPTS,
            fee_bump_percent: DEFAULT_FEE_BUMP_PERCENT,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            primary_timeout_secs: DEFAULT_PRIMARY_TIMEOUT_SECS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            max_poll_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
            log_lookback_blocks: DEFAULT_LOG_LOOKBACK_BLOCKS,
        }
    }
}

fn parse_url(flag: &str, value: Option<&String>) -> Result<Url, ConfigError> {
    let value = value
        .ok_or_else(|| ConfigError::ValidationError(format!("{flag} is required")))?;
    if value.trim().is_empty() {
        return Err(ConfigError::ValidationError(format!("{flag} cannot be empty")));
    }
    Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl { url: value.clone(), reason: e.to_string() })
}

impl RedeemArgs {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rpc_url()?;
        self.bundler_url()?;
        if let Some(explorer) = &self.explorer_url {
            parse_url("--explorer-url", Some(explorer))?;
        }

        let positive = [
            ("--max-attempts", u64::from(self.max_attempts)),
            ("--poll-interval-secs", self.poll_interval_secs),
            ("--poll-timeout-secs", self.poll_timeout_secs),
            ("--max-poll-failures", u64::from(self.max_poll_failures)),
            ("--log-lookback-blocks", self.log_lookback_blocks),
        ];
        if let Some((flag, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ValidationError(format!("{flag} must be greater than zero")));
        }

        Ok(())
    }

    /// Chain node URL.
    pub fn rpc_url(&self) -> Result<Url, ConfigError> {
        parse_url("--rpc-url", self.rpc_url.as_ref())
    }

    /// Bundler URL.
    pub fn bundler_url(&self) -> Result<Url, ConfigError> {
        parse_url("--bundler-url", self.bundler_url.as_ref())
    }

    /// Known deployments with this invocation's overrides applied to the
    /// selected chain.
    pub fn registry(&self) -> Result<ChainRegistry, ConfigError> {
        let mut registry = ChainRegistry::with_known_deployments();
        let has_overrides = self.delegation_manager.is_some()
            || self.entry_point.is_some()
            || self.period_transfer_enforcer.is_some()
            || self.explorer_url.is_some();
        if !has_overrides {
            return Ok(registry);
        }

        let deployment = registry.entry(self.chain_id);
        if let Some(delegation_manager) = self.delegation_manager {
            deployment.delegation_manager = Some(delegation_manager);
        }
        if let Some(entry_point) = self.entry_point {
            deployment.entry_point = entry_point;
        }
        if let Some(enforcer) = self.period_transfer_enforcer {
            deployment.period_transfer_enforcer = Some(enforcer);
        }
        if let Some(explorer) = &self.explorer_url {
            deployment.explorer_url = Some(parse_url("--explorer-url", Some(explorer))?);
        }
        Ok(registry)
    }

    /// Stage settings from the CLI args
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            chain_id: self.chain_id,
            estimation: EstimationConfig {
                gas_buffer_percent: self.gas_buffer_percent,
                ..EstimationConfig::default()
            },
            submission: SubmissionConfig {
                max_attempts: self.max_attempts,
                fee_bump_percent: self.fee_bump_percent,
                retry_delay: Duration::from_millis(self.retry_delay_ms),
            },
            confirmation: ConfirmationConfig {
                primary_timeout: Duration::from_secs(self.primary_timeout_secs),
                poll_interval: Duration::from_secs(self.poll_interval_secs),
                poll_timeout: Duration::from_secs(self.poll_timeout_secs),
                max_consecutive_failures: self.max_poll_failures,
                heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
                log_lookback_blocks: self.log_lookback_blocks,
                ..ConfirmationConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::address;

    use super::*;
    use crate::registry::SEPOLIA_CHAIN_ID;

    fn base_args() -> RedeemArgs {
        RedeemArgs {
            rpc_url: Some("http://localhost:8545".to_string()),
            bundler_url: Some("http://localhost:4337".to_string()),
            ..RedeemArgs::default()
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(base_args().validate().is_ok());
    }

    #[test]
    fn test_missing_bundler_url_fails() {
        let mut args = base_args();
        args.bundler_url = None;
        assert!(matches!(args.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_invalid_rpc_url_fails() {
        let mut args = base_args();
        args.rpc_url = Some("not a url".to_string());
        assert!(matches!(args.validate(), Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn test_zero_attempts_fails() {
        let mut args = base_args();
        args.max_attempts = 0;
        let err = args.validate().unwrap_err();
        assert!(err.to_string().contains("--max-attempts"));
    }

    #[test]
    fn test_defaults_match_stage_defaults() {
        let config = base_args().pipeline_config();
        assert_eq!(config, PipelineConfig::for_chain(MONAD_TESTNET_CHAIN_ID));
    }

    #[test]
    fn test_overrides_apply_to_selected_chain() {
        let manager = address!("9999999999999999999999999999999999999999");
        let mut args = base_args();
        args.chain_id = SEPOLIA_CHAIN_ID;
        args.delegation_manager = Some(manager);

        let registry = args.registry().unwrap();
        assert_eq!(registry.get(SEPOLIA_CHAIN_ID).unwrap().delegation_manager, Some(manager));
        assert_ne!(
            registry.get(MONAD_TESTNET_CHAIN_ID).unwrap().delegation_manager,
            Some(manager)
        );
    }

    #[test]
    fn test_overrides_register_unknown_chain() {
        let mut args = base_args();
        args.chain_id = 31337;
        args.delegation_manager = Some(Address::repeat_byte(7));

        let deployment = args.registry().unwrap().require(31337).unwrap().clone();
        assert_eq!(deployment.require_delegation_manager(), Ok(Address::repeat_byte(7)));
    }
}
