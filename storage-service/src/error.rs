// SPDX-License-Identifier: GPL-3.0-only

use storage_contracts::{ModuleId, StorageError};
use thiserror::Error;

/// Service-specific errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Unknown partitioning: {0}")]
    UnknownModule(ModuleId),

    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl ServiceError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Storage(error) if error.is_cancelled())
    }
}

impl From<toml::de::Error> for ServiceError {
    fn from(err: toml::de::Error) -> Self {
        ServiceError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl From<storage_sys::SysError> for ServiceError {
    fn from(err: storage_sys::SysError) -> Self {
        ServiceError::Storage(err.into())
    }
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServiceError::TaskFailed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
