#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod calls;
pub use calls::{CallBuilder, Execution, RedemptionCalls, SINGLE_DEFAULT_MODE};

pub mod chain;
pub use chain::{ChainClient, ChainError, ChainReceipt, RpcChainClient};

mod config;
pub use config::{ConfigError, PipelineConfig, RedeemArgs};

pub mod confirmation;
pub use confirmation::{ConfirmationConfig, ConfirmationResolver, ConfirmationTier, ResolvedReceipt};

pub mod contracts;
pub use contracts::ENTRYPOINT_V07_ADDRESS;

mod error;
pub use error::{
    PreconditionError, RedemptionError, Result, RevertedError, SubmissionError, UnconfirmedError,
    ValidationError,
};

pub mod estimation;
pub use estimation::{EstimationConfig, FeeQuote, GasEstimator, GasLimits, GasPlan, LimitSource};

pub mod history;
pub use history::{HistoryError, InMemoryHistory, JsonFileHistory, RedemptionHistory};

pub mod outcome;
pub use outcome::{Interpretation, OutcomeInterpreter};

pub mod permission;
pub use permission::{Permission, RawPermission, SignatureKind, normalize};

mod pipeline;
pub use pipeline::{PendingRedemption, RedemptionPipeline, RedemptionRequest};

pub mod registry;
pub use registry::{ChainDeployment, ChainRegistry};

pub mod relay;
pub use relay::{BundlerClient, RelayClient, RelayError, RelayErrorKind, UserOperation};

mod result;
pub use result::{RedemptionParties, RedemptionResult};

pub mod signer;
pub use signer::{LocalOwnerSigner, OperationSigner, SignerError};

pub mod source;
pub use source::{JsonFilePermissionSource, PermissionSource, SourceError};

pub mod submission;
pub use submission::{OperationSubmitter, SubmissionConfig, SubmittedOperation};
