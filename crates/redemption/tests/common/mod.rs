//! Scripted ledger, relay and signer doubles shared by the integration tests.

#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use alloy_primitives::{Address, B256, Bytes, Log as PrimitiveLog, LogData, U256, address, hex};
use alloy_rpc_types_eth::{Filter, Log};
use alloy_sol_types::{SolEvent, SolValue};
use delegation_redemption::{
    ChainClient, ChainError, ChainReceipt, ENTRYPOINT_V07_ADDRESS, OperationSigner,
    PipelineConfig, RawPermission, RedemptionPipeline, RelayClient, RelayError, SignerError,
    UserOperation,
    contracts::IEntryPoint::{UserOperationEvent, UserOperationRevertReason},
    permission::{ROOT_AUTHORITY, RawCaveat},
    registry::{ChainRegistry, MONAD_TESTNET_CHAIN_ID},
    relay::{BundleReceipt, LooseFlag, UserOperationGasEstimate, UserOperationReceipt},
};
use parking_lot::Mutex;

pub const DELEGATOR: Address = address!("1111111111111111111111111111111111111111");
pub const SMART_ACCOUNT: Address = address!("2222222222222222222222222222222222222222");
pub const OWNER: Address = address!("4444444444444444444444444444444444444444");
/// mUSDC on Monad testnet.
pub const TOKEN: Address = address!("3a13c20987ac0e6840d9cb6e917085f72d17e698");
pub const PERIOD_TRANSFER_ENFORCER: Address = address!("474e3ae7e169e940607cc624da8a15eb120139ab");
pub const PERIOD_AMOUNT: u64 = 10_000_000;
pub const GAS_PRICE: u128 = 1_000_000_000;
pub const HEAD_BLOCK: u64 = 5_000;

/// Packed period-transfer terms: token, amount, one day, started long ago.
pub fn period_terms(token: Address, amount: u64) -> String {
    let mut terms = token.to_vec();
    terms.extend_from_slice(&U256::from(amount).to_be_bytes::<32>());
    terms.extend_from_slice(&U256::from(86_400).to_be_bytes::<32>());
    terms.extend_from_slice(&U256::from(1_700_000_000u64).to_be_bytes::<32>());
    hex::encode_prefixed(terms)
}

/// A stored, active, EOA-signed permission from [`DELEGATOR`] to [`SMART_ACCOUNT`].
pub fn permission() -> RawPermission {
    RawPermission {
        id: Some("perm-1".to_string()),
        delegator: Some(DELEGATOR.to_string().to_lowercase()),
        delegate: Some(SMART_ACCOUNT.to_checksum(None)),
        authority: Some(hex::encode_prefixed(ROOT_AUTHORITY)),
        caveats: vec![RawCaveat {
            enforcer: Some(PERIOD_TRANSFER_ENFORCER.to_string()),
            terms: Some(period_terms(TOKEN, PERIOD_AMOUNT)),
            args: Some("0x".to_string()),
        }],
        salt: Some(serde_json::json!("0x01")),
        signature: Some(hex::encode_prefixed([0x11u8; 65])),
        status: Some("ACTIVE".to_string()),
    }
}

/// Relay receipt for an operation that succeeded in block 1234.
pub fn success_receipt(user_op_hash: B256) -> UserOperationReceipt {
    UserOperationReceipt {
        user_op_hash,
        entry_point: Some(ENTRYPOINT_V07_ADDRESS),
        sender: Some(SMART_ACCOUNT),
        actual_gas_used: Some(U256::from(140_000)),
        actual_gas_cost: Some(U256::from(140_000u64 * 1_000_000_000)),
        success: Some(LooseFlag::Bool(true)),
        receipt: Some(BundleReceipt {
            transaction_hash: Some(B256::repeat_byte(0xbb)),
            block_number: Some(U256::from(1234)),
            gas_used: Some(U256::from(150_000)),
            status: Some(LooseFlag::Text("0x1".to_string())),
        }),
        ..Default::default()
    }
}

/// A `UserOperationEvent` log as a node returns it.
pub fn user_operation_event_log(user_op_hash: B256, success: bool, tx_hash: B256, block: u64) -> Log {
    let topics = vec![
        UserOperationEvent::SIGNATURE_HASH,
        user_op_hash,
        B256::left_padding_from(SMART_ACCOUNT.as_slice()),
        B256::ZERO,
    ];
    let data = (U256::ZERO, success, U256::from(210_000_000_000_000u64), U256::from(210_000))
        .abi_encode_params();
    Log {
        inner: PrimitiveLog {
            address: ENTRYPOINT_V07_ADDRESS,
            data: LogData::new_unchecked(topics, data.into()),
        },
        block_number: Some(block),
        transaction_hash: Some(tx_hash),
        ..Default::default()
    }
}

/// A `UserOperationRevertReason` log carrying `reason`.
pub fn revert_reason_log(user_op_hash: B256, reason: Bytes) -> PrimitiveLog {
    let topics = vec![
        UserOperationRevertReason::SIGNATURE_HASH,
        user_op_hash,
        B256::left_padding_from(SMART_ACCOUNT.as_slice()),
    ];
    PrimitiveLog {
        address: ENTRYPOINT_V07_ADDRESS,
        data: LogData::new_unchecked(topics, (U256::ZERO, reason).abi_encode_params().into()),
    }
}

/// Ledger double. Every read is counted.
#[derive(Debug)]
pub struct MockChain {
    pub balance: Mutex<U256>,
    pub code: Mutex<Bytes>,
    /// `None` makes the nonce read fail.
    pub nonce: Mutex<Option<U256>>,
    pub head: Mutex<u64>,
    pub logs: Mutex<Vec<Log>>,
    pub receipts: Mutex<HashMap<B256, ChainReceipt>>,
    pub last_filter: Mutex<Option<Filter>>,
    pub gas_price_calls: AtomicUsize,
    pub balance_calls: AtomicUsize,
    pub code_calls: AtomicUsize,
    pub nonce_calls: AtomicUsize,
    pub block_number_calls: AtomicUsize,
    pub logs_calls: AtomicUsize,
    pub receipt_calls: AtomicUsize,
}

impl MockChain {
    /// A funded, deployed smart account at nonce 0.
    pub fn new() -> Self {
        Self {
            balance: Mutex::new(U256::from(10u64.pow(18))),
            code: Mutex::new(Bytes::from_static(&[0xef, 0x01, 0x00])),
            nonce: Mutex::new(Some(U256::ZERO)),
            head: Mutex::new(HEAD_BLOCK),
            logs: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
            last_filter: Mutex::new(None),
            gas_price_calls: AtomicUsize::new(0),
            balance_calls: AtomicUsize::new(0),
            code_calls: AtomicUsize::new(0),
            nonce_calls: AtomicUsize::new(0),
            block_number_calls: AtomicUsize::new(0),
            logs_calls: AtomicUsize::new(0),
            receipt_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_balance(self, balance: U256) -> Self {
        *self.balance.lock() = balance;
        self
    }

    /// Adds a mined event and its bundle receipt.
    pub fn with_event(self, log: Log, receipt_logs: Vec<PrimitiveLog>) -> Self {
        self.add_event(log, receipt_logs);
        self
    }

    /// Mines an event while a test is running.
    pub fn add_event(&self, log: Log, receipt_logs: Vec<PrimitiveLog>) {
        let tx_hash = log.transaction_hash.unwrap_or_default();
        let receipt = ChainReceipt {
            transaction_hash: tx_hash,
            block_number: log.block_number,
            gas_used: 180_000,
            status: true,
            logs: receipt_logs,
        };
        self.receipts.lock().insert(tx_hash, receipt);
        self.logs.lock().push(log);
    }
}

#[async_trait::async_trait]
impl ChainClient for MockChain {
    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.gas_price_calls.fetch_add(1, Ordering::SeqCst);
        Ok(GAS_PRICE)
    }

    async fn balance(&self, _address: Address) -> Result<U256, ChainError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.balance.lock())
    }

    async fn code(&self, _address: Address) -> Result<Bytes, ChainError> {
        self.code_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.code.lock().clone())
    }

    async fn entry_point_nonce(
        &self,
        _entry_point: Address,
        _sender: Address,
    ) -> Result<U256, ChainError> {
        self.nonce_calls.fetch_add(1, Ordering::SeqCst);
        (*self.nonce.lock()).ok_or_else(|| ChainError::Rpc("execution reverted".to_string()))
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.block_number_calls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.head.lock())
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainError> {
        self.logs_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_filter.lock() = Some(filter.clone());
        let from = filter.get_from_block().unwrap_or_default();
        let to = filter.get_to_block().unwrap_or(u64::MAX);
        Ok(self
            .logs
            .lock()
            .iter()
            .filter(|log| log.block_number.is_some_and(|block| (from..=to).contains(&block)))
            .cloned()
            .collect())
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ChainReceipt>, ChainError> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.receipts.lock().get(&hash).cloned())
    }
}

/// How the relay answers the blocking wait-for-receipt call.
#[derive(Debug, Clone)]
pub enum WaitBehaviour {
    /// Poll `get_user_operation_receipt` until the timeout.
    Poll,
    /// Sleep for the whole timeout, then time out.
    TimeOut,
    /// Fail immediately.
    Fail(RelayError),
}

/// Bundler double.
///
/// Accepts at most one operation per `(sender, nonce)`; later sends with the
/// same pair are rejected with a nonce error. Scripted send errors are
/// returned first.
#[derive(Debug)]
pub struct MockRelay {
    chain_id: u64,
    pub supported: Mutex<Result<Vec<Address>, RelayError>>,
    pub estimate: Mutex<Result<UserOperationGasEstimate, RelayError>>,
    pub send_script: Mutex<VecDeque<RelayError>>,
    pub pool: Mutex<HashMap<(Address, U256), B256>>,
    pub sent: Mutex<Vec<(UserOperation, Address)>>,
    pub wait: Mutex<WaitBehaviour>,
    pub receipt_script: Mutex<VecDeque<Result<Option<UserOperationReceipt>, RelayError>>>,
    /// Answer once the script is exhausted.
    pub receipt_fallback: Mutex<Result<Option<UserOperationReceipt>, RelayError>>,
    pub supported_calls: AtomicUsize,
    pub estimate_calls: AtomicUsize,
    pub send_calls: AtomicUsize,
    pub wait_calls: AtomicUsize,
    pub receipt_calls: AtomicUsize,
}

impl MockRelay {
    /// A relay supporting the v0.7 EntryPoint, estimating successfully and
    /// reporting every operation as pending.
    pub fn new() -> Self {
        Self {
            chain_id: MONAD_TESTNET_CHAIN_ID,
            supported: Mutex::new(Ok(vec![ENTRYPOINT_V07_ADDRESS])),
            estimate: Mutex::new(Ok(UserOperationGasEstimate {
                pre_verification_gas: U256::from(50_000),
                verification_gas_limit: U256::from(100_000),
                call_gas_limit: U256::from(200_000),
            })),
            send_script: Mutex::new(VecDeque::new()),
            pool: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            wait: Mutex::new(WaitBehaviour::Poll),
            receipt_script: Mutex::new(VecDeque::new()),
            receipt_fallback: Mutex::new(Ok(None)),
            supported_calls: AtomicUsize::new(0),
            estimate_calls: AtomicUsize::new(0),
            send_calls: AtomicUsize::new(0),
            wait_calls: AtomicUsize::new(0),
            receipt_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_wait(self, wait: WaitBehaviour) -> Self {
        *self.wait.lock() = wait;
        self
    }

    pub fn with_send_errors(self, errors: impl IntoIterator<Item = RelayError>) -> Self {
        self.send_script.lock().extend(errors);
        self
    }

    pub fn with_receipts(
        self,
        receipts: impl IntoIterator<Item = Result<Option<UserOperationReceipt>, RelayError>>,
    ) -> Self {
        self.receipt_script.lock().extend(receipts);
        self
    }

    pub fn with_receipt_fallback(
        self,
        fallback: Result<Option<UserOperationReceipt>, RelayError>,
    ) -> Self {
        *self.receipt_fallback.lock() = fallback;
        self
    }

    /// Calls of any kind made to the relay.
    pub fn total_calls(&self) -> usize {
        [
            &self.supported_calls,
            &self.estimate_calls,
            &self.send_calls,
            &self.wait_calls,
            &self.receipt_calls,
        ]
        .iter()
        .map(|counter| counter.load(Ordering::SeqCst))
        .sum()
    }

    /// Hash of the single operation the relay accepted.
    pub fn accepted_hash(&self) -> Option<B256> {
        self.pool.lock().values().next().copied()
    }

    /// Operations sent so far, in order.
    pub fn sent_operations(&self) -> Vec<UserOperation> {
        self.sent.lock().iter().map(|(operation, _)| operation.clone()).collect()
    }
}

/// A relay nonce error as bundlers word it.
pub fn nonce_error() -> RelayError {
    RelayError::rpc(-32602, "AA25 invalid account nonce")
}

#[async_trait::async_trait]
impl RelayClient for MockRelay {
    async fn supported_entry_points(&self) -> Result<Vec<Address>, RelayError> {
        self.supported_calls.fetch_add(1, Ordering::SeqCst);
        self.supported.lock().clone()
    }

    async fn estimate_user_operation_gas(
        &self,
        _user_operation: &UserOperation,
        _entry_point: Address,
    ) -> Result<UserOperationGasEstimate, RelayError> {
        self.estimate_calls.fetch_add(1, Ordering::SeqCst);
        self.estimate.lock().clone()
    }

    async fn send_user_operation(
        &self,
        user_operation: &UserOperation,
        entry_point: Address,
    ) -> Result<B256, RelayError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().push((user_operation.clone(), entry_point));
        if let Some(err) = self.send_script.lock().pop_front() {
            return Err(err);
        }

        let mut pool = self.pool.lock();
        let key = (user_operation.sender, user_operation.nonce);
        if pool.contains_key(&key) {
            return Err(nonce_error());
        }
        let hash = user_operation.hash(entry_point, self.chain_id);
        pool.insert(key, hash);
        Ok(hash)
    }

    async fn get_user_operation_receipt(
        &self,
        _user_op_hash: B256,
    ) -> Result<Option<UserOperationReceipt>, RelayError> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.receipt_script.lock().pop_front();
        scripted.unwrap_or_else(|| self.receipt_fallback.lock().clone())
    }

    async fn wait_for_user_operation_receipt(
        &self,
        user_op_hash: B256,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<UserOperationReceipt, RelayError> {
        self.wait_calls.fetch_add(1, Ordering::SeqCst);
        let behaviour = self.wait.lock().clone();
        match behaviour {
            WaitBehaviour::Poll => {
                let wait = async {
                    loop {
                        if let Some(receipt) = self.get_user_operation_receipt(user_op_hash).await? {
                            return Ok(receipt);
                        }
                        tokio::time::sleep(poll_interval).await;
                    }
                };
                tokio::time::timeout(timeout, wait)
                    .await
                    .map_err(|_| RelayError::Timeout(user_op_hash))?
            }
            WaitBehaviour::TimeOut => {
                tokio::time::sleep(timeout).await;
                Err(RelayError::Timeout(user_op_hash))
            }
            WaitBehaviour::Fail(err) => Err(err),
        }
    }
}

/// Signer double returning a fixed 65-byte signature and recording hashes.
#[derive(Debug, Default)]
pub struct MockSigner {
    pub signed: Mutex<Vec<B256>>,
    pub sign_calls: AtomicUsize,
}

impl MockSigner {
    pub const SIGNATURE: [u8; 65] = [0x5a; 65];
}

#[async_trait::async_trait]
impl OperationSigner for MockSigner {
    fn owner(&self) -> Address {
        OWNER
    }

    async fn sign_user_operation_hash(&self, hash: B256) -> Result<Bytes, SignerError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        self.signed.lock().push(hash);
        Ok(Bytes::from_static(&Self::SIGNATURE))
    }
}

/// Doubles wired into a pipeline on Monad testnet.
pub struct Harness {
    pub chain: Arc<MockChain>,
    pub relay: Arc<MockRelay>,
    pub signer: Arc<MockSigner>,
    pub pipeline: RedemptionPipeline<MockChain, MockRelay, MockSigner>,
}

impl Harness {
    pub fn new(chain: MockChain, relay: MockRelay) -> Self {
        let chain = Arc::new(chain);
        let relay = Arc::new(relay);
        let signer = Arc::new(MockSigner::default());
        let pipeline = RedemptionPipeline::new(
            chain.clone(),
            relay.clone(),
            signer.clone(),
            ChainRegistry::with_known_deployments(),
            PipelineConfig::for_chain(MONAD_TESTNET_CHAIN_ID),
        );
        Self { chain, relay, signer, pipeline }
    }
}
