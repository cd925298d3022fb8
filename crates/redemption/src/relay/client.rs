use std::time::Duration;

use alloy_primitives::{Address, B256};
use alloy_provider::{Provider, ProviderBuilder, RootProvider};
use tracing::debug;
use url::Url;

use super::{RelayError, UserOperation, UserOperationGasEstimate, UserOperationReceipt};

/// Bundler JSON-RPC surface used by the redemption pipeline.
///
/// Implementations are stateless per call and shared between concurrent
/// redemptions.
#[async_trait::async_trait]
pub trait RelayClient: Send + Sync {
    /// `eth_supportedEntryPoints`.
    async fn supported_entry_points(&self) -> Result<Vec<Address>, RelayError>;

    /// `eth_estimateUserOperationGas` for an operation without paymaster data.
    async fn estimate_user_operation_gas(
        &self,
        user_operation: &UserOperation,
        entry_point: Address,
    ) -> Result<UserOperationGasEstimate, RelayError>;

    /// `eth_sendUserOperation`. Returns the operation hash the relay assigned.
    async fn send_user_operation(
        &self,
        user_operation: &UserOperation,
        entry_point: Address,
    ) -> Result<B256, RelayError>;

    /// `eth_getUserOperationReceipt`. `None` while the operation is pending.
    async fn get_user_operation_receipt(
        &self,
        user_op_hash: B256,
    ) -> Result<Option<UserOperationReceipt>, RelayError>;

    /// Blocks until the relay reports a receipt or `timeout` elapses.
    ///
    /// Transport errors end the wait immediately; the caller decides whether
    /// to fall back to manual polling.
    async fn wait_for_user_operation_receipt(
        &self,
        user_op_hash: B256,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<UserOperationReceipt, RelayError> {
        let wait = async {
            loop {
                if let Some(receipt) = self.get_user_operation_receipt(user_op_hash).await? {
                    return Ok(receipt);
                }
                tokio::time::sleep(poll_interval).await;
            }
        };
        tokio::time::timeout(timeout, wait).await.map_err(|_| RelayError::Timeout(user_op_hash))?
    }
}

/// [`RelayClient`] over a bundler's HTTP JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct BundlerClient {
    provider: RootProvider,
}

impl BundlerClient {
    /// Creates a client for the bundler at `url`.
    pub fn new(url: Url) -> Self {
        let provider = ProviderBuilder::new().disable_recommended_fillers().connect_http(url);
        Self { provider }
    }
}

#[async_trait::async_trait]
impl RelayClient for BundlerClient {
    async fn supported_entry_points(&self) -> Result<Vec<Address>, RelayError> {
        let entry_points: Vec<Address> =
            self.provider.client().request_noparams("eth_supportedEntryPoints").await?;
        Ok(entry_points)
    }

    async fn estimate_user_operation_gas(
        &self,
        user_operation: &UserOperation,
        entry_point: Address,
    ) -> Result<UserOperationGasEstimate, RelayError> {
        let estimate: UserOperationGasEstimate = self
            .provider
            .client()
            .request("eth_estimateUserOperationGas", (user_operation.clone(), entry_point))
            .await?;
        Ok(estimate)
    }

    async fn send_user_operation(
        &self,
        user_operation: &UserOperation,
        entry_point: Address,
    ) -> Result<B256, RelayError> {
        debug!(
            target: "redeem-relay",
            sender = %user_operation.sender,
            nonce = %user_operation.nonce,
            "sending user operation"
        );
        let hash: B256 = self
            .provider
            .client()
            .request("eth_sendUserOperation", (user_operation.clone(), entry_point))
            .await?;
        Ok(hash)
    }

    async fn get_user_operation_receipt(
        &self,
        user_op_hash: B256,
    ) -> Result<Option<UserOperationReceipt>, RelayError> {
        let receipt: Option<UserOperationReceipt> = self
            .provider
            .client()
            .request("eth_getUserOperationReceipt", (user_op_hash,))
            .await?;
        Ok(receipt)
    }
}
