//! Redeemer binary entry point.

mod cli;

use std::{path::PathBuf, sync::Arc};

use alloy_primitives::{Address, B256, Bytes};
use alloy_signer_local::PrivateKeySigner;
use clap::Parser;
use cli::{Cli, Commands, Parties};
use delegation_redemption::{
    BundlerClient, JsonFileHistory, JsonFilePermissionSource, LocalOwnerSigner, OperationSigner,
    PendingRedemption, RedeemArgs, RedemptionError, RedemptionParties, RedemptionPipeline,
    RedemptionResult, RpcChainClient, SignerError,
};
use eyre::{WrapErr, eyre};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    cli::init_tracing(cli.verbose);
    cli.redeem.validate()?;

    match cli.command {
        Commands::Redeem { parties, permissions_file, owner_key } => {
            let owner: PrivateKeySigner =
                owner_key.trim().parse().wrap_err("invalid owner private key")?;
            let signer = LocalOwnerSigner::new(owner);
            info!(target: "redeemer", owner = %signer.owner(), delegate = %parties.delegate, "redeeming");

            let pipeline = pipeline(&cli.redeem, signer, cli.history_file)?;
            let source = JsonFilePermissionSource::new(permissions_file);
            let outcome = pipeline
                .redeem_for(
                    &source,
                    parties.delegator,
                    parties.delegate,
                    parties.token,
                    parties.amount,
                )
                .await;
            report(outcome)
        }
        Commands::Recheck { user_op_hash, parties, entry_point } => {
            let pipeline = pipeline(&cli.redeem, ReadOnlySigner, cli.history_file)?;
            let token = parties.token.or(pipeline.deployment()?.default_token).unwrap_or_default();
            let outcome =
                pipeline.reconcile(pending(user_op_hash, &parties, token, entry_point)).await;
            report(outcome)
        }
    }
}

fn pipeline<S: OperationSigner>(
    args: &RedeemArgs,
    signer: S,
    history_file: Option<PathBuf>,
) -> eyre::Result<RedemptionPipeline<RpcChainClient, BundlerClient, S>> {
    let pipeline = RedemptionPipeline::new(
        Arc::new(RpcChainClient::new(args.rpc_url()?)),
        Arc::new(BundlerClient::new(args.bundler_url()?)),
        Arc::new(signer),
        args.registry()?,
        args.pipeline_config(),
    );
    Ok(match history_file {
        Some(path) => pipeline.with_history(Arc::new(JsonFileHistory::new(path))),
        None => pipeline,
    })
}

fn pending(
    user_op_hash: B256,
    parties: &Parties,
    token: Address,
    entry_point: Option<Address>,
) -> PendingRedemption {
    PendingRedemption {
        user_op_hash,
        parties: RedemptionParties {
            delegator: parties.delegator,
            delegate: parties.delegate,
            token,
            amount: parties.amount,
        },
        entry_point,
    }
}

/// Prints the result as JSON on stdout. Failures are explained on stderr and
/// turned into a non-zero exit.
fn report(outcome: Result<RedemptionResult, RedemptionError>) -> eyre::Result<()> {
    match outcome {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            match result.reverted_error() {
                None => Ok(()),
                Some(reverted) => {
                    error!(
                        target: "redeemer",
                        user_op_hash = %reverted.user_op_hash,
                        reason = %reverted.reason,
                        remediation = reverted.remediation.unwrap_or("none"),
                        "redemption reverted on-chain"
                    );
                    Err(reverted.into())
                }
            }
        }
        Err(RedemptionError::Unconfirmed(unconfirmed)) => {
            warn!(
                target: "redeemer",
                user_op_hash = %unconfirmed.user_op_hash,
                explorer = unconfirmed.explorer_url.as_deref().unwrap_or("n/a"),
                "outcome unknown; the operation may still land, run `redeemer recheck` before retrying"
            );
            Err(unconfirmed.into())
        }
        Err(err) => {
            if let Some(remediation) = err.remediation() {
                error!(target: "redeemer", %remediation, "redemption failed");
            }
            Err(eyre!(err))
        }
    }
}

/// Signer for commands that never submit.
#[derive(Debug)]
struct ReadOnlySigner;

#[async_trait::async_trait]
impl OperationSigner for ReadOnlySigner {
    fn owner(&self) -> Address {
        Address::ZERO
    }

    async fn sign_user_operation_hash(&self, _hash: B256) -> Result<Bytes, SignerError> {
        Err(SignerError("no owner key loaded".to_string()))
    }
}
