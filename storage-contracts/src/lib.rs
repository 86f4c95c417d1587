// SPDX-License-Identifier: GPL-3.0-only

pub mod protocol;
pub mod task;

pub use protocol::{
    BackendError, ModuleId, StorageError, StorageErrorKind, StorageEvent, TaskId, TaskOutcome,
    ValidationReport,
};
pub use task::{NullMonitor, Task, TaskMonitor};

/// Result type of every planner operation.
pub type Result<T> = std::result::Result<T, StorageError>;
