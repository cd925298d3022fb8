//! Per-chain contract deployments.
//!
//! The registry is built once and handed to the pipeline. Nothing in the
//! crate reads deployment addresses from global state.

use std::collections::HashMap;

use alloy_primitives::{Address, B256, address};
use url::Url;

use crate::{contracts::ENTRYPOINT_V07_ADDRESS, error::PreconditionError};

/// Monad testnet chain id.
pub const MONAD_TESTNET_CHAIN_ID: u64 = 10143;

/// Sepolia chain id.
pub const SEPOLIA_CHAIN_ID: u64 = 11155111;

/// DelegationManager of the delegation framework v1.3.0 deployment.
const DELEGATION_MANAGER_V1_3: Address = address!("db9b1e94b5b69df7e401ddbede43491141047db3");

/// ERC20PeriodTransferEnforcer of the same deployment.
const PERIOD_TRANSFER_ENFORCER_V1_3: Address =
    address!("474e3ae7e169e940607cc624da8a15eb120139ab");

/// Contracts and endpoints for one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainDeployment {
    pub chain_id: u64,
    pub name: String,
    pub delegation_manager: Option<Address>,
    pub entry_point: Address,
    pub period_transfer_enforcer: Option<Address>,
    pub default_token: Option<Address>,
    pub explorer_url: Option<Url>,
}

impl ChainDeployment {
    /// A deployment with only the EntryPoint known.
    pub fn new(chain_id: u64, name: impl Into<String>) -> Self {
        Self {
            chain_id,
            name: name.into(),
            delegation_manager: None,
            entry_point: ENTRYPOINT_V07_ADDRESS,
            period_transfer_enforcer: None,
            default_token: None,
            explorer_url: None,
        }
    }

    /// The DelegationManager, or the precondition failure naming this chain.
    pub fn require_delegation_manager(&self) -> Result<Address, PreconditionError> {
        self.delegation_manager
            .ok_or(PreconditionError::ContractAddressMissing { chain_id: self.chain_id })
    }

    /// Explorer page for a hash on this chain.
    pub fn explorer_link(&self, hash: B256) -> Option<String> {
        self.explorer_url
            .as_ref()
            .map(|base| format!("{}/tx/{hash}", base.as_str().trim_end_matches('/')))
    }
}

/// Chain id to deployment map.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    deployments: HashMap<u64, ChainDeployment>,
}

impl ChainRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with Monad testnet and Sepolia.
    pub fn with_known_deployments() -> Self {
        let mut registry = Self::new();

        let mut monad = ChainDeployment::new(MONAD_TESTNET_CHAIN_ID, "Monad Testnet");
        monad.delegation_manager = Some(DELEGATION_MANAGER_V1_3);
        monad.period_transfer_enforcer = Some(PERIOD_TRANSFER_ENFORCER_V1_3);
        monad.default_token = Some(address!("3a13c20987ac0e6840d9cb6e917085f72d17e698"));
        monad.explorer_url = Url::parse("https://testnet-explorer.monad.xyz").ok();
        registry.insert(monad);

        let mut sepolia = ChainDeployment::new(SEPOLIA_CHAIN_ID, "Sepolia");
        sepolia.delegation_manager = Some(DELEGATION_MANAGER_V1_3);
        sepolia.period_transfer_enforcer = Some(PERIOD_TRANSFER_ENFORCER_V1_3);
        sepolia.default_token = Some(address!("1c7d4b196cb0c7b01d743fbc6116a902379c7238"));
        sepolia.explorer_url = Url::parse("https://sepolia.etherscan.io").ok();
        registry.insert(sepolia);

        registry
    }

    /// Adds or replaces the deployment for its chain.
    pub fn insert(&mut self, deployment: ChainDeployment) {
        self.deployments.insert(deployment.chain_id, deployment);
    }

    /// Deployment for `chain_id`.
    pub fn get(&self, chain_id: u64) -> Option<&ChainDeployment> {
        self.deployments.get(&chain_id)
    }

    /// Deployment for `chain_id`, creating an empty one if absent.
    pub fn entry(&mut self, chain_id: u64) -> &mut ChainDeployment {
        self.deployments
            .entry(chain_id)
            .or_insert_with(|| ChainDeployment::new(chain_id, format!("chain-{chain_id}")))
    }

    /// Deployment for `chain_id`, or [`PreconditionError::UnsupportedChain`].
    pub fn require(&self, chain_id: u64) -> Result<&ChainDeployment, PreconditionError> {
        self.get(chain_id).ok_or(PreconditionError::UnsupportedChain { chain_id })
    }
}
