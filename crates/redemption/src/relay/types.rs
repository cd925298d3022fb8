use alloy_primitives::{Address, B256, Bytes, U256, keccak256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

/// EntryPoint v0.7 user operation in the unpacked form bundlers accept.
///
/// Paymaster fields are never populated: redemption pays gas from the
/// delegate smart account's own deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory_data: Option<Bytes>,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub signature: Bytes,
}

impl UserOperation {
    /// `initCode` as the EntryPoint sees it: `factory ‖ factoryData`, or empty.
    pub fn init_code(&self) -> Bytes {
        match self.factory {
            Some(factory) => {
                let mut code = factory.to_vec();
                if let Some(data) = &self.factory_data {
                    code.extend_from_slice(data);
                }
                code.into()
            }
            None => Bytes::new(),
        }
    }

    /// Computes the v0.7 user operation hash.
    ///
    /// `keccak256(abi.encode(keccak256(abi.encode(packed fields)), entryPoint, chainId))`,
    /// where the gas limits and fees are packed as two 128-bit halves.
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> B256 {
        let account_gas_limits = pack_u128_pair(self.verification_gas_limit, self.call_gas_limit);
        let gas_fees = pack_u128_pair(self.max_priority_fee_per_gas, self.max_fee_per_gas);

        let inner = (
            self.sender,
            self.nonce,
            keccak256(self.init_code()),
            keccak256(&self.call_data),
            account_gas_limits,
            self.pre_verification_gas,
            gas_fees,
            // no paymaster: keccak of empty paymasterAndData
            keccak256(Bytes::new()),
        )
            .abi_encode();

        keccak256((keccak256(inner), entry_point, U256::from(chain_id)).abi_encode())
    }
}

/// Packs the low 128 bits of `high` and `low` into one word.
fn pack_u128_pair(high: U256, low: U256) -> B256 {
    let mut word = [0u8; 32];
    word[..16].copy_from_slice(&high.to_be_bytes::<32>()[16..]);
    word[16..].copy_from_slice(&low.to_be_bytes::<32>()[16..]);
    B256::from(word)
}

/// Result of `eth_estimateUserOperationGas`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationGasEstimate {
    pub pre_verification_gas: U256,
    pub verification_gas_limit: U256,
    pub call_gas_limit: U256,
}

/// A value relays report as a bool, a number, or a string.
///
/// `success` and `receipt.status` arrive in all of these shapes depending on
/// the relay and SDK in between, so they stay loose until the outcome is
/// interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LooseFlag {
    Bool(bool),
    Number(u64),
    Text(String),
}

/// Result of `eth_getUserOperationReceipt`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    #[serde(default)]
    pub user_op_hash: B256,
    #[serde(default)]
    pub entry_point: Option<Address>,
    #[serde(default)]
    pub sender: Option<Address>,
    #[serde(default)]
    pub nonce: Option<U256>,
    #[serde(default)]
    pub actual_gas_cost: Option<U256>,
    #[serde(default)]
    pub actual_gas_used: Option<U256>,
    #[serde(default)]
    pub success: Option<LooseFlag>,
    /// Raw revert data or message when the operation failed.
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub receipt: Option<BundleReceipt>,
}

/// The bundle transaction receipt embedded in a user operation receipt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleReceipt {
    #[serde(default)]
    pub transaction_hash: Option<B256>,
    #[serde(default)]
    pub block_number: Option<U256>,
    #[serde(default)]
    pub gas_used: Option<U256>,
    #[serde(default)]
    pub status: Option<LooseFlag>,
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, b256, bytes};

    use super::*;

    fn sample_operation() -> UserOperation {
        UserOperation {
            sender: address!("1111111111111111111111111111111111111111"),
            nonce: U256::from(7),
            factory: None,
            factory_data: None,
            call_data: bytes!("deadbeef"),
            call_gas_limit: U256::from(600_000),
            verification_gas_limit: U256::from(1_500_000),
            pre_verification_gas: U256::from(50_000),
            max_fee_per_gas: U256::from(2_000_000_000u64),
            max_priority_fee_per_gas: U256::from(1_000_000_000u64),
            signature: Bytes::new(),
        }
    }

    #[test]
    fn serializes_without_paymaster_or_factory_fields() {
        let json = serde_json::to_value(sample_operation()).unwrap();
        let object = json.as_object().unwrap();
        assert!(object.contains_key("callGasLimit"));
        assert!(object.contains_key("maxPriorityFeePerGas"));
        assert!(!object.contains_key("factory"));
        assert!(!object.keys().any(|key| key.starts_with("paymaster")));
        assert_eq!(object["nonce"], "0x7");
    }

    #[test]
    fn hash_depends_on_fees_chain_and_entry_point() {
        let entry_point = address!("0000000071727De22E5E9d8BAf0edAc6f37da032");
        let op = sample_operation();
        let base = op.hash(entry_point, 10143);

        let mut bumped = op.clone();
        bumped.max_fee_per_gas = U256::from(2_400_000_000u64);

        assert_eq!(base, op.hash(entry_point, 10143));
        assert_ne!(base, bumped.hash(entry_point, 10143));
        assert_ne!(base, op.hash(entry_point, 11155111));
        assert_ne!(base, op.hash(Address::ZERO, 10143));
    }

    #[test]
    fn signature_is_not_part_of_the_hash() {
        let entry_point = address!("0000000071727De22E5E9d8BAf0edAc6f37da032");
        let op = sample_operation();
        let mut signed = op.clone();
        signed.signature = Bytes::from(vec![1u8; 65]);
        assert_eq!(op.hash(entry_point, 1), signed.hash(entry_point, 1));
    }

    #[test]
    fn packs_gas_limits_into_halves() {
        let word = pack_u128_pair(U256::from(1), U256::from(2));
        assert_eq!(
            word,
            b256!("0000000000000000000000000000000100000000000000000000000000000002")
        );
    }

    #[test]
    fn deserializes_loose_receipt_shapes() {
        let json = serde_json::json!({
            "userOpHash": "0x49628fd1471006c1482da88028e9ce4dbb080b815c9b0344d39e5a8e6ec1419f",
            "success": "false",
            "actualGasUsed": "0x5208",
            "reason": "0x",
            "receipt": {
                "transactionHash": "0x1c4fada7374c0a9ee8841fc38afe82932dc0f8e69012e927f061a8bae611a201",
                "blockNumber": "0x10",
                "gasUsed": "0x7530",
                "status": "0x1"
            }
        });
        let receipt: UserOperationReceipt = serde_json::from_value(json).unwrap();
        assert_eq!(receipt.success, Some(LooseFlag::Text("false".to_string())));
        assert_eq!(receipt.actual_gas_used, Some(U256::from(21_000)));
        let bundle = receipt.receipt.unwrap();
        assert_eq!(bundle.block_number, Some(U256::from(16)));
        assert_eq!(bundle.status, Some(LooseFlag::Text("0x1".to_string())));
    }
}
