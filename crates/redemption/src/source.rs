//! Where stored permissions come from.

use std::{io, path::PathBuf};

use alloy_primitives::Address;
use thiserror::Error;
use tracing::debug;

use crate::permission::RawPermission;

/// Permission store failure.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("permission file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("permission file {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Looks up the active permission for a delegator and delegate pair.
#[async_trait::async_trait]
pub trait PermissionSource: Send + Sync {
    /// The most recently stored active permission from `delegator` to
    /// `delegate`, if any.
    async fn find_active(
        &self,
        delegator: Address,
        delegate: Address,
    ) -> Result<Option<RawPermission>, SourceError>;
}

/// Addresses are compared case-insensitively; unparseable ones never match.
fn same_address(stored: Option<&str>, expected: Address) -> bool {
    stored.and_then(|value| value.trim().parse::<Address>().ok()) == Some(expected)
}

/// Picks the last active record for the pair.
fn select_active(
    records: Vec<RawPermission>,
    delegator: Address,
    delegate: Address,
) -> Option<RawPermission> {
    records.into_iter().rev().find(|record| {
        record.is_active()
            && same_address(record.delegator.as_deref(), delegator)
            && same_address(record.delegate.as_deref(), delegate)
    })
}

/// Permissions stored as a JSON array in a file.
#[derive(Debug, Clone)]
pub struct JsonFilePermissionSource {
    path: PathBuf,
}

impl JsonFilePermissionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl PermissionSource for JsonFilePermissionSource {
    async fn find_active(
        &self,
        delegator: Address,
        delegate: Address,
    ) -> Result<Option<RawPermission>, SourceError> {
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|source| SourceError::Io { path: self.path.clone(), source })?;
        let records: Vec<RawPermission> = serde_json::from_slice(&raw)
            .map_err(|source| SourceError::Malformed { path: self.path.clone(), source })?;
        debug!(target: "redeem-source", path = %self.path.display(), records = records.len(), "loaded permissions");
        Ok(select_active(records, delegator, delegate))
    }
}
