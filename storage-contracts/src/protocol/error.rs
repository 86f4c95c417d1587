// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageErrorKind {
    /// The request is internally inconsistent
    InvalidInput,
    /// Mutation of a protected device
    ProtectedDevice,
    /// No usable disks or not enough free space
    InsufficientResources,
    /// Disks with mismatched logical sector sizes in one container
    InconsistentParentSectorSize,
    /// A factory or backend call failed
    StorageConfiguration,
    /// The bootloader first stage cannot be placed
    BootloaderConfiguration,
    /// Requested method or feature is not available
    UnsupportedPartitioning,
    /// Non-fatal diagnostics
    Validation,
    UnknownDevice,
    UnavailableStorage,
    UnavailableData,
    /// The task was cancelled before it committed
    Cancelled,
}

impl StorageErrorKind {
    pub fn code(self) -> u16 {
        match self {
            Self::InvalidInput => 400,
            Self::ProtectedDevice => 403,
            Self::UnknownDevice => 404,
            Self::InconsistentParentSectorSize => 409,
            Self::Validation => 422,
            Self::BootloaderConfiguration => 424,
            Self::Cancelled => 499,
            Self::StorageConfiguration => 500,
            Self::UnsupportedPartitioning => 501,
            Self::UnavailableStorage => 503,
            Self::UnavailableData => 503,
            Self::InsufficientResources => 507,
        }
    }
}

/// Text shown when disks with different sector sizes end up in one container.
pub const INCONSISTENT_SECTOR_SIZE_SUGGESTION: &str = "Workaround: Create an individual partition \
     for each disk and then use those partitions as members of the container.";

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::InvalidInput, message)
    }

    pub fn protected_device(name: &str) -> Self {
        Self::new(
            StorageErrorKind::ProtectedDevice,
            format!("Device {name} is protected and cannot be modified"),
        )
    }

    pub fn no_disks() -> Self {
        Self::new(
            StorageErrorKind::InsufficientResources,
            "No usable disks selected.",
        )
    }

    pub fn not_enough_free_space(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::InsufficientResources, message)
    }

    pub fn inconsistent_sector_size(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::InconsistentParentSectorSize, message)
            .with_suggestion(INCONSISTENT_SECTOR_SIZE_SUGGESTION)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::StorageConfiguration, message)
    }

    pub fn bootloader(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::BootloaderConfiguration, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::UnsupportedPartitioning, message)
    }

    pub fn unknown_device(spec: &str) -> Self {
        Self::new(
            StorageErrorKind::UnknownDevice,
            format!("Unknown device: {spec}"),
        )
    }

    pub fn unavailable_storage() -> Self {
        Self::new(
            StorageErrorKind::UnavailableStorage,
            "The storage model is not available.",
        )
    }

    pub fn unavailable_data(what: &str) -> Self {
        Self::new(
            StorageErrorKind::UnavailableData,
            format!("The {what} is not available."),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(StorageErrorKind::Cancelled, "The task was cancelled.")
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == StorageErrorKind::Cancelled
    }
}

/// The only error a block backend may return.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("{operation} failed: {message}")]
    Failed { operation: String, message: String },

    #[error("{0} timed out")]
    Timeout(String),

    #[error("not supported by the backend: {0}")]
    Unsupported(String),
}

impl BackendError {
    pub fn failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl From<BackendError> for StorageError {
    fn from(error: BackendError) -> Self {
        StorageError::configuration(error.to_string())
    }
}

/// Outcome of a whole-graph check.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Turn a failed report into a validation error.
    pub fn into_result(self) -> Result<Self, StorageError> {
        if self.success() {
            Ok(self)
        } else {
            Err(StorageError::new(
                StorageErrorKind::Validation,
                self.errors.join("\n"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_roundtrips() {
        let error = StorageError::inconsistent_sector_size("sda and sdb differ");
        let json = serde_json::to_string(&error).expect("serialize error");
        let parsed: StorageError = serde_json::from_str(&json).expect("deserialize error");
        assert_eq!(parsed, error);
        assert!(parsed.suggestion.is_some());
    }

    #[test]
    fn backend_errors_become_configuration_errors() {
        let error: StorageError = BackendError::failed("mkfs.xfs", "device busy").into();
        assert_eq!(error.kind, StorageErrorKind::StorageConfiguration);
        assert!(error.message.contains("device busy"));
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(StorageErrorKind::InvalidInput.code(), 400);
        assert_eq!(StorageErrorKind::ProtectedDevice.code(), 403);
        assert_eq!(StorageErrorKind::UnknownDevice.code(), 404);
        assert_eq!(StorageErrorKind::StorageConfiguration.code(), 500);
        assert_eq!(StorageErrorKind::UnsupportedPartitioning.code(), 501);
    }

    #[test]
    fn validation_report_collects_errors() {
        let mut report = ValidationReport::default();
        report.warning("no swap");
        assert!(report.success());
        report.error("no /");
        let error = report.into_result().unwrap_err();
        assert_eq!(error.kind, StorageErrorKind::Validation);
    }
}
