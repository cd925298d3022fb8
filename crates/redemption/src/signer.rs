//! Signing of user operation hashes on behalf of the delegate smart account.

use alloy_primitives::{Address, B256, Bytes, hex};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use thiserror::Error;

/// Placeholder signature with a valid shape, used for gas estimation.
const DUMMY_SIGNATURE: [u8; 65] = hex!(
    "fffffffffffffffffffffffffffffff0000000000000000000000000000000007aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1c"
);

/// Signing failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to sign user operation: {0}")]
pub struct SignerError(pub String);

/// Produces the `signature` field of a user operation.
#[async_trait::async_trait]
pub trait OperationSigner: Send + Sync {
    /// Owner address that signs for the smart account.
    fn owner(&self) -> Address;

    /// A signature the account's validation will parse, for estimation only.
    fn dummy_signature(&self) -> Bytes {
        Bytes::from_static(&DUMMY_SIGNATURE)
    }

    /// Signs the user operation hash.
    async fn sign_user_operation_hash(&self, hash: B256) -> Result<Bytes, SignerError>;
}

/// Smart-account owner backed by a local private key.
///
/// Signs the operation hash as an EIP-191 personal message, which is what
/// ECDSA-owned smart accounts validate against.
#[derive(Debug, Clone)]
pub struct LocalOwnerSigner {
    signer: PrivateKeySigner,
}

impl LocalOwnerSigner {
    /// Wraps an existing key.
    pub const fn new(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }
}

#[async_trait::async_trait]
impl OperationSigner for LocalOwnerSigner {
    fn owner(&self) -> Address {
        self.signer.address()
    }

    async fn sign_user_operation_hash(&self, hash: B256) -> Result<Bytes, SignerError> {
        let signature = self
            .signer
            .sign_message(hash.as_slice())
            .await
            .map_err(|err| SignerError(err.to_string()))?;
        Ok(Bytes::copy_from_slice(&signature.as_bytes()))
    }
}
