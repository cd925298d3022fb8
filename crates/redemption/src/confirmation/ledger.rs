//! Recovers an operation's outcome from EntryPoint logs.

use alloy_primitives::{Address, B256, Bytes, Log as PrimitiveLog, U256};
use alloy_rpc_types_eth::{Filter, Log};
use alloy_sol_types::SolEvent;

use crate::contracts::IEntryPoint::{UserOperationEvent, UserOperationRevertReason};

/// Reason reported when the event says failure and no revert data was logged.
pub const EVENT_REPORTED_FAILURE: &str = "EntryPoint event reported success=false";

/// Fields of a decoded `UserOperationEvent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserOperationOutcome {
    pub user_op_hash: B256,
    pub sender: Address,
    pub paymaster: Address,
    pub nonce: U256,
    pub success: bool,
    pub actual_gas_cost: U256,
    pub actual_gas_used: U256,
    pub transaction_hash: Option<B256>,
    pub block_number: Option<u64>,
}

impl UserOperationOutcome {
    /// `actualGasCost / actualGasUsed`, if gas was used.
    pub fn effective_gas_price(&self) -> Option<U256> {
        (!self.actual_gas_used.is_zero()).then(|| self.actual_gas_cost / self.actual_gas_used)
    }
}

/// `UserOperationEvent` filter for one operation over `[from_block, to_block]`.
pub fn user_operation_event_filter(
    entry_point: Address,
    user_op_hash: B256,
    from_block: u64,
    to_block: u64,
) -> Filter {
    Filter::new()
        .address(entry_point)
        .event_signature(UserOperationEvent::SIGNATURE_HASH)
        .topic1(user_op_hash)
        .from_block(from_block)
        .to_block(to_block)
}

/// Decodes the last log in `logs` that is this operation's `UserOperationEvent`.
///
/// Logs from other operations or with undecodable data are skipped.
pub fn find_user_operation_event(logs: &[Log], user_op_hash: B256) -> Option<UserOperationOutcome> {
    logs.iter().rev().find_map(|log| {
        let topics = log.topics();
        if topics.len() < 2
            || topics[0] != UserOperationEvent::SIGNATURE_HASH
            || topics[1] != user_op_hash
        {
            return None;
        }
        let event = UserOperationEvent::decode_log(&log.inner).ok()?;
        Some(UserOperationOutcome {
            user_op_hash: event.userOpHash,
            sender: event.sender,
            paymaster: event.paymaster,
            nonce: event.nonce,
            success: event.success,
            actual_gas_cost: event.actualGasCost,
            actual_gas_used: event.actualGasUsed,
            transaction_hash: log.transaction_hash,
            block_number: log.block_number,
        })
    })
}

/// Revert data from this operation's `UserOperationRevertReason` log, if any.
pub fn revert_reason_from_logs(logs: &[PrimitiveLog], user_op_hash: B256) -> Option<Bytes> {
    logs.iter().find_map(|log| {
        let topics = log.topics();
        if topics.len() < 2
            || topics[0] != UserOperationRevertReason::SIGNATURE_HASH
            || topics[1] != user_op_hash
        {
            return None;
        }
        UserOperationRevertReason::decode_log(log).ok().map(|event| event.revertReason.clone())
    })
}
