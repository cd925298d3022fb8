//! Command line arguments for the redeemer binary.

use std::path::PathBuf;

use alloy_primitives::{Address, B256, U256};
use clap::{Parser, Subcommand};
use delegation_redemption::RedeemArgs;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Redeems ERC-7710 delegations as gasless ERC-4337 user operations.
#[derive(Debug, Parser)]
#[command(name = "redeemer")]
#[command(about = "Redeem delegated token transfers through an ERC-4337 bundler")]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) redeem: RedeemArgs,

    /// Results are appended to this JSON file, most recent first.
    #[arg(long = "history-file", env = "REDEEM_HISTORY_FILE", global = true)]
    pub(crate) history_file: Option<PathBuf>,

    /// Verbose output (can be repeated for more verbosity).
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    pub(crate) verbose: u8,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Subcommands for the redeemer CLI.
#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Redeem an active permission from a permissions file.
    Redeem {
        #[command(flatten)]
        parties: Parties,

        /// JSON array of stored permissions.
        #[arg(long = "permissions-file", env = "REDEEM_PERMISSIONS_FILE")]
        permissions_file: PathBuf,

        /// Private key of the delegate smart account's owner.
        #[arg(long = "owner-key", env = "REDEEM_OWNER_KEY", hide_env_values = true)]
        owner_key: String,
    },
    /// Re-check an operation that was submitted but never confirmed.
    #[command(visible_alias = "r")]
    Recheck {
        /// Hash reported when the operation was submitted.
        #[arg(long = "user-op-hash")]
        user_op_hash: B256,

        #[command(flatten)]
        parties: Parties,

        /// EntryPoint the operation was sent to, if not the chain's default.
        #[arg(long = "sent-to")]
        entry_point: Option<Address>,
    },
}

/// Who is redeeming what.
#[derive(Debug, Clone, clap::Args)]
pub(crate) struct Parties {
    /// Account that granted the permission.
    #[arg(long)]
    pub(crate) delegator: Address,

    /// Smart account redeeming the permission.
    #[arg(long)]
    pub(crate) delegate: Address,

    /// Amount in the token's base units.
    #[arg(long)]
    pub(crate) amount: U256,

    /// Token to transfer. Defaults to the permission's token.
    #[arg(long)]
    pub(crate) token: Option<Address>,
}

/// Initialize tracing with the specified verbosity level.
pub(crate) fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "redeem=info,delegation_redemption=info",
        1 => "redeem=debug,delegation_redemption=debug",
        _ => "redeem=trace,delegation_redemption=trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}
