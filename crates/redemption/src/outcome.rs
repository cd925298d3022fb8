//! Turns a resolved receipt into a final verdict and message.
//!
//! The operation-level flag and the receipt status arrive in loose shapes.
//! Both are normalized; when they disagree the receipt status wins and the
//! disagreement is logged as a relay reporting anomaly.

use alloy_primitives::{B256, U256, hex};
use alloy_sol_types::{Panic, Revert, SolError};
use tracing::warn;

use crate::{
    confirmation::ResolvedReceipt, contracts::IDelegationManager, relay::LooseFlag,
    relay::classify_relay_message,
};

/// Reason used when failure carries no revert data at all.
pub const UNKNOWN_REASON: &str = "unknown reason";

macro_rules! signatures {
    ($($name:ident),* $(,)?) => {
        &[$((
            <IDelegationManager::$name as SolError>::SELECTOR,
            <IDelegationManager::$name as SolError>::SIGNATURE,
        )),*]
    };
}

/// DelegationManager custom errors by selector.
const DELEGATION_MANAGER_ERRORS: &[([u8; 4], &str)] = signatures!(
    AlreadyDisabled,
    AlreadyEnabled,
    BatchDataLengthMismatch,
    CannotUseADisabledDelegation,
    EmptySignature,
    InvalidAuthority,
    InvalidDelegate,
    InvalidDelegator,
    InvalidEOASignature,
    InvalidERC1271Signature,
    InvalidShortSignature,
);

/// Operation-level success flag: `true` or `"true"` in any case.
pub fn flag_verdict(flag: Option<&LooseFlag>) -> Option<bool> {
    match flag? {
        LooseFlag::Bool(value) => Some(*value),
        LooseFlag::Number(value) => match value {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        },
        LooseFlag::Text(text) => {
            let text = text.trim();
            if text.eq_ignore_ascii_case("true") {
                Some(true)
            } else if text.eq_ignore_ascii_case("false") {
                Some(false)
            } else {
                None
            }
        }
    }
}

/// Receipt status: `1`, `"1"`, `"0x1"`, `"0x01"` or `"success"`.
pub fn status_verdict(status: Option<&LooseFlag>) -> Option<bool> {
    match status? {
        LooseFlag::Bool(value) => Some(*value),
        LooseFlag::Number(value) => match value {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        },
        LooseFlag::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "1" | "0x1" | "0x01" | "success" => Some(true),
            "0" | "0x0" | "0x00" | "reverted" => Some(false),
            _ => None,
        },
    }
}

/// Renders revert data as `Name(args)` when the error is known.
pub fn decode_revert_data(data: &[u8]) -> Option<String> {
    let selector: [u8; 4] = data.get(..4)?.try_into().ok()?;
    if selector == Revert::SELECTOR {
        return Revert::abi_decode(data).ok().map(|revert| format!("Error({})", revert.reason));
    }
    if selector == Panic::SELECTOR {
        return Panic::abi_decode(data).ok().map(|panic| format!("Panic({:#x})", panic.code));
    }
    DELEGATION_MANAGER_ERRORS
        .iter()
        .find(|(known, _)| *known == selector)
        .map(|(_, signature)| (*signature).to_string())
}

/// Decoded reason, the raw reason when it does not decode, or
/// [`UNKNOWN_REASON`] when there is none.
pub fn decode_revert_reason(raw: Option<&str>) -> String {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() || raw == "0x" {
        return UNKNOWN_REASON.to_string();
    }
    raw.strip_prefix("0x")
        .and_then(|digits| hex::decode(digits).ok())
        .and_then(|data| decode_revert_data(&data))
        .unwrap_or_else(|| raw.to_string())
}

/// Final classification of one redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpretation {
    pub success: bool,
    pub message: String,
    pub gas_used: U256,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
    pub revert_reason: Option<String>,
    pub remediation: Option<&'static str>,
}

/// Classifies resolved receipts. Pure; never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutcomeInterpreter;

impl OutcomeInterpreter {
    /// The single boolean verdict for `receipt`.
    pub fn verdict(&self, receipt: &ResolvedReceipt) -> bool {
        let flag = flag_verdict(receipt.success.as_ref());
        let status = status_verdict(receipt.status.as_ref());
        match (flag, status) {
            (Some(flag), Some(status)) if flag != status => {
                warn!(
                    target: "redeem-outcome",
                    user_op_hash = %receipt.user_op_hash,
                    relay_flag = flag,
                    receipt_status = status,
                    "relay success flag disagrees with receipt status, using receipt status"
                );
                status
            }
            (_, Some(status)) => status,
            (flag, None) => flag.unwrap_or(false),
        }
    }

    /// Classifies `receipt` for a redemption of `amount` base units.
    pub fn interpret(&self, receipt: &ResolvedReceipt, amount: U256) -> Interpretation {
        let success = self.verdict(receipt);
        let gas_used = receipt.gas_used.or(receipt.actual_gas_used).unwrap_or_default();
        let block = receipt
            .block_number
            .map(|block| format!(" in block {block}"))
            .unwrap_or_default();

        if success {
            return Interpretation {
                success,
                message: format!("redeemed {amount} base units; confirmed{block}"),
                gas_used,
                block_number: receipt.block_number,
                transaction_hash: receipt.transaction_hash,
                revert_reason: None,
                remediation: None,
            };
        }

        let reason = decode_revert_reason(receipt.reason.as_deref());
        let remediation = classify_relay_message(&reason).remediation();
        Interpretation {
            success,
            message: format!("redemption reverted on-chain{block}: {reason}"),
            gas_used,
            block_number: receipt.block_number,
            transaction_hash: receipt.transaction_hash,
            revert_reason: Some(reason),
            remediation,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::confirmation::ConfirmationTier;

    fn receipt(success: Option<LooseFlag>, status: Option<LooseFlag>) -> ResolvedReceipt {
        ResolvedReceipt {
            user_op_hash: B256::repeat_byte(1),
            tier: ConfirmationTier::Primary,
            success,
            status,
            transaction_hash: Some(B256::repeat_byte(2)),
            block_number: Some(1234),
            gas_used: Some(U256::from(150_000)),
            actual_gas_used: Some(U256::from(140_000)),
            actual_gas_cost: None,
            reason: None,
        }
    }

    fn text(value: &str) -> Option<LooseFlag> {
        Some(LooseFlag::Text(value.to_string()))
    }

    #[rstest]
    #[case(text("0x1"), Some(true))]
    #[case(text("0x01"), Some(true))]
    #[case(text("1"), Some(true))]
    #[case(text("success"), Some(true))]
    #[case(Some(LooseFlag::Number(1)), Some(true))]
    #[case(text("0x0"), Some(false))]
    #[case(text("reverted"), Some(false))]
    #[case(Some(LooseFlag::Number(0)), Some(false))]
    #[case(text("pending"), None)]
    #[case(None, None)]
    fn normalizes_receipt_status(#[case] status: Option<LooseFlag>, #[case] expected: Option<bool>) {
        assert_eq!(status_verdict(status.as_ref()), expected);
    }

    #[rstest]
    #[case(Some(LooseFlag::Bool(true)), Some(true))]
    #[case(text("true"), Some(true))]
    #[case(text("True"), Some(true))]
    #[case(text(" TRUE "), Some(true))]
    #[case(text("false"), Some(false))]
    #[case(text("FALSE"), Some(false))]
    #[case(text("yes"), None)]
    fn normalizes_relay_flag(#[case] flag: Option<LooseFlag>, #[case] expected: Option<bool>) {
        assert_eq!(flag_verdict(flag.as_ref()), expected);
    }

    #[test]
    fn receipt_status_wins_over_relay_flag() {
        let interpretation = OutcomeInterpreter
            .interpret(&receipt(Some(LooseFlag::Bool(false)), text("0x1")), U256::from(5));
        assert!(interpretation.success);
        assert_eq!(interpretation.revert_reason, None);
        assert!(interpretation.message.contains("block 1234"));
    }

    #[test]
    fn flag_decides_without_status() {
        assert!(OutcomeInterpreter.verdict(&receipt(text("true"), None)));
        assert!(!OutcomeInterpreter.verdict(&receipt(Some(LooseFlag::Bool(false)), None)));
        assert!(!OutcomeInterpreter.verdict(&receipt(None, None)));
    }

    #[test]
    fn capitalized_flag_without_status_is_a_success() {
        let interpretation =
            OutcomeInterpreter.interpret(&receipt(text("True"), None), U256::from(5));
        assert!(interpretation.success);
        assert_eq!(interpretation.revert_reason, None);
        assert!(interpretation.message.starts_with("redeemed 5 base units"));
    }

    #[test]
    fn decodes_revert_string_into_message() {
        let data = Revert { reason: "ERC20PeriodTransferEnforcer:transfer-amount-exceeded".into() }
            .abi_encode();
        let mut failed = receipt(Some(LooseFlag::Bool(false)), None);
        failed.reason = Some(hex::encode_prefixed(data));

        let interpretation = OutcomeInterpreter.interpret(&failed, U256::from(5));
        assert!(!interpretation.success);
        assert_eq!(
            interpretation.revert_reason.as_deref(),
            Some("Error(ERC20PeriodTransferEnforcer:transfer-amount-exceeded)")
        );
        assert!(interpretation.message.contains("transfer-amount-exceeded"));
        assert!(interpretation.remediation.is_some());
    }

    #[test]
    fn decodes_delegation_manager_errors() {
        let data = IDelegationManager::CannotUseADisabledDelegation {}.abi_encode();
        assert_eq!(
            decode_revert_data(&data).as_deref(),
            Some("CannotUseADisabledDelegation()")
        );
    }

    #[test]
    fn decodes_panics() {
        let data = Panic { code: U256::from(0x11) }.abi_encode();
        assert_eq!(decode_revert_data(&data).as_deref(), Some("Panic(0x11)"));
    }

    #[rstest]
    #[case(None, UNKNOWN_REASON)]
    #[case(Some("0x"), UNKNOWN_REASON)]
    #[case(Some("0xdeadbeef"), "0xdeadbeef")]
    #[case(Some("AA23 reverted"), "AA23 reverted")]
    fn falls_back_to_raw_reason(#[case] raw: Option<&str>, #[case] expected: &str) {
        assert_eq!(decode_revert_reason(raw), expected);
    }

    #[test]
    fn gas_used_prefers_bundle_receipt() {
        let mut resolved = receipt(Some(LooseFlag::Bool(true)), None);
        assert_eq!(OutcomeInterpreter.interpret(&resolved, U256::ZERO).gas_used, U256::from(150_000));
        resolved.gas_used = None;
        assert_eq!(OutcomeInterpreter.interpret(&resolved, U256::ZERO).gas_used, U256::from(140_000));
    }
}
