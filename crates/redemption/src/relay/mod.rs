//! Bundler (relay) client, wire types and error classification.

mod client;
pub use client::{BundlerClient, RelayClient};

mod error;
pub use error::{RelayError, RelayErrorKind, classify_relay_message};

mod types;
pub use types::{BundleReceipt, LooseFlag, UserOperation, UserOperationGasEstimate, UserOperationReceipt};
