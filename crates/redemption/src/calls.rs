//! Encodes the token transfer, the DelegationManager redemption and the
//! smart-account call that carries it.

use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_sol_types::{SolCall, SolValue};

use crate::{
    contracts::{IDelegationManager, IERC20, IERC7579Account},
    error::PreconditionError,
    permission::Permission,
    registry::ChainDeployment,
};

/// ERC-7579 mode for one call that reverts on failure.
pub const SINGLE_DEFAULT_MODE: B256 = B256::ZERO;

/// One call in ERC-7579 single-execution form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub target: Address,
    pub value: U256,
    pub call_data: Bytes,
}

impl Execution {
    /// `target ‖ value ‖ callData`, packed.
    pub fn encode_single(&self) -> Bytes {
        let mut out = Vec::with_capacity(20 + 32 + self.call_data.len());
        out.extend_from_slice(self.target.as_slice());
        out.extend_from_slice(&self.value.to_be_bytes::<32>());
        out.extend_from_slice(&self.call_data);
        out.into()
    }
}

/// Everything needed to build the user operation's call data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionCalls {
    /// Token transfer to the delegate, executed by the delegator.
    pub transfer: Execution,
    /// `redeemDelegations` call data for the DelegationManager.
    pub redeem_call_data: Bytes,
    /// `execute` call data for the delegate smart account.
    pub account_call_data: Bytes,
    pub delegation_manager: Address,
}

/// Builds redemption call data for one chain's DelegationManager.
#[derive(Debug, Clone, Copy)]
pub struct CallBuilder {
    delegation_manager: Address,
}

impl CallBuilder {
    /// Builder targeting `delegation_manager`.
    pub const fn new(delegation_manager: Address) -> Self {
        Self { delegation_manager }
    }

    /// Builder for a deployment, failing if it has no DelegationManager.
    pub fn for_deployment(deployment: &ChainDeployment) -> Result<Self, PreconditionError> {
        Ok(Self::new(deployment.require_delegation_manager()?))
    }

    /// Encodes a transfer of `amount` of `token` to the permission's delegate,
    /// redeemed through `permission`.
    pub fn build(&self, permission: &Permission, token: Address, amount: U256) -> RedemptionCalls {
        let transfer = Execution {
            target: token,
            value: U256::ZERO,
            call_data: IERC20::transferCall { to: permission.delegate, amount }.abi_encode().into(),
        };

        let permission_context = vec![permission.to_delegation()].abi_encode();
        let redeem_call_data: Bytes = IDelegationManager::redeemDelegationsCall {
            permissionContexts: vec![permission_context.into()],
            modes: vec![SINGLE_DEFAULT_MODE],
            executionCallDatas: vec![transfer.encode_single()],
        }
        .abi_encode()
        .into();

        let envelope = Execution {
            target: self.delegation_manager,
            value: U256::ZERO,
            call_data: redeem_call_data.clone(),
        };
        let account_call_data = IERC7579Account::executeCall {
            mode: SINGLE_DEFAULT_MODE,
            executionCalldata: envelope.encode_single(),
        }
        .abi_encode()
        .into();

        RedemptionCalls {
            transfer,
            redeem_call_data,
            account_call_data,
            delegation_manager: self.delegation_manager,
        }
    }
}
