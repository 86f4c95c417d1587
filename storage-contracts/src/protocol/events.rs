// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

use super::{ModuleId, StorageError, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "error")]
pub enum TaskOutcome {
    Succeeded,
    Failed(StorageError),
    Cancelled,
}

impl TaskOutcome {
    pub fn from_result<T>(result: &Result<T, StorageError>) -> Self {
        match result {
            Ok(_) => Self::Succeeded,
            Err(error) if error.is_cancelled() => Self::Cancelled,
            Err(error) => Self::Failed(error.clone()),
        }
    }
}

/// Messages published by a storage session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum StorageEvent {
    /// The current device graph was replaced
    StorageChanged,
    /// Every partitioning module was discarded
    PartitioningReset,
    PartitioningCreated(ModuleId),
    PartitioningApplied(ModuleId),
    TaskProgress { task: TaskId, message: String },
    TaskFinished { task: TaskId, outcome: TaskOutcome },
}
