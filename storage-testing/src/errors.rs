// SPDX-License-Identifier: GPL-3.0-only

use storage_contracts::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TestingError {
    #[error("spec not found for '{spec_name}' in resources/lab-specs")]
    SpecNotFound { spec_name: String },
    #[error("invalid spec '{spec_name}': {reason}")]
    SpecInvalid { spec_name: String, reason: String },
    #[error("building the device graph failed: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, TestingError>;
