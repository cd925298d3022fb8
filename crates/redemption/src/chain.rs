//! Read-only ledger access.

use alloy_primitives::{Address, B256, Bytes, Log as PrimitiveLog, U256};
use alloy_provider::{Provider, ProviderBuilder, RootProvider};
use alloy_rpc_types_eth::{Filter, Log, TransactionInput, TransactionReceipt, TransactionRequest};
use alloy_sol_types::{SolCall, SolValue};
use alloy_transport::TransportError;
use thiserror::Error;
use url::Url;

use crate::contracts::IEntryPoint;

/// Errors from ledger reads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The node returned an error or could not be reached.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// A response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<TransportError> for ChainError {
    fn from(err: TransportError) -> Self {
        Self::Rpc(err.to_string())
    }
}

/// The parts of a transaction receipt confirmation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReceipt {
    pub transaction_hash: B256,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub status: bool,
    pub logs: Vec<PrimitiveLog>,
}

impl From<TransactionReceipt> for ChainReceipt {
    fn from(receipt: TransactionReceipt) -> Self {
        Self {
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            status: receipt.inner.status(),
            logs: receipt.inner.logs().iter().map(|log| log.inner.clone()).collect(),
        }
    }
}

/// Read-only ledger accessor. Stateless per call; shared across redemptions.
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
    /// Current gas price in wei.
    async fn gas_price(&self) -> Result<u128, ChainError>;

    /// Native balance of `address`.
    async fn balance(&self, address: Address) -> Result<U256, ChainError>;

    /// Deployed bytecode at `address`. Empty for accounts without code.
    async fn code(&self, address: Address) -> Result<Bytes, ChainError>;

    /// EntryPoint nonce of `sender` for key 0.
    async fn entry_point_nonce(&self, entry_point: Address, sender: Address)
    -> Result<U256, ChainError>;

    /// Latest block number.
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// `eth_getLogs`. Callers keep the block range bounded.
    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainError>;

    /// Receipt of a mined transaction, `None` if unknown.
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ChainReceipt>, ChainError>;
}

/// [`ChainClient`] over a node's HTTP JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcChainClient {
    provider: RootProvider,
}

impl RpcChainClient {
    /// Creates a client for the node at `url`.
    pub fn new(url: Url) -> Self {
        Self { provider: ProviderBuilder::new().disable_recommended_fillers().connect_http(url) }
    }

    /// Chain id reported by the node.
    pub async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_chain_id().await?)
    }
}

#[async_trait::async_trait]
impl ChainClient for RpcChainClient {
    async fn gas_price(&self) -> Result<u128, ChainError> {
        Ok(self.provider.get_gas_price().await?)
    }

    async fn balance(&self, address: Address) -> Result<U256, ChainError> {
        Ok(self.provider.get_balance(address).await?)
    }

    async fn code(&self, address: Address) -> Result<Bytes, ChainError> {
        Ok(self.provider.get_code_at(address).await?)
    }

    async fn entry_point_nonce(
        &self,
        entry_point: Address,
        sender: Address,
    ) -> Result<U256, ChainError> {
        let call = IEntryPoint::getNonceCall { sender, key: Default::default() };
        let request = TransactionRequest::default()
            .to(entry_point)
            .input(TransactionInput::new(call.abi_encode().into()));
        let output = self.provider.call(request).await?;
        U256::abi_decode(&output).map_err(|err| ChainError::Decode(err.to_string()))
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainError> {
        Ok(self.provider.get_logs(filter).await?)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ChainReceipt>, ChainError> {
        Ok(self.provider.get_transaction_receipt(hash).await?.map(ChainReceipt::from))
    }
}
