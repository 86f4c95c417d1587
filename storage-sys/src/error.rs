// SPDX-License-Identifier: GPL-3.0-only

use storage_contracts::{BackendError, StorageError};
use thiserror::Error;

/// Error types for reading and writing the target system's files
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<SysError> for StorageError {
    fn from(error: SysError) -> Self {
        match error {
            SysError::Backend(error) => error.into(),
            other => StorageError::configuration(other.to_string()),
        }
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;

#[cfg(test)]
mod tests {
    use storage_contracts::StorageErrorKind;

    use super::*;

    #[test]
    fn sys_errors_become_configuration_errors() {
        let io: StorageError = SysError::from(std::io::Error::other("read-only file system")).into();
        assert_eq!(io.kind, StorageErrorKind::StorageConfiguration);
        assert!(io.message.contains("read-only file system"));

        let backend = BackendError::Timeout("mount sda2".to_string());
        let error: StorageError = SysError::from(backend).into();
        assert_eq!(error.kind, StorageErrorKind::StorageConfiguration);
        assert!(error.message.contains("mount sda2"));
    }
}
