// SPDX-License-Identifier: GPL-3.0-only

//! Task contract
//!
//! Long planner operations run as tasks on worker threads. The planner polls
//! the [`TaskMonitor`] between devices or layout rows and stops with
//! [`StorageError::cancelled`] before it commits anything.

use crate::{StorageError, TaskId};

pub trait TaskMonitor: Send + Sync {
    fn report_progress(&self, message: &str);

    fn is_cancelled(&self) -> bool;

    fn check_cancel(&self) -> Result<(), StorageError> {
        if self.is_cancelled() {
            Err(StorageError::cancelled())
        } else {
            Ok(())
        }
    }
}

/// Monitor for callers that neither cancel nor display progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMonitor;

impl TaskMonitor for NullMonitor {
    fn report_progress(&self, _message: &str) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Unit of work run by a session.
pub trait Task: Send {
    type Output: Send + 'static;

    fn id(&self) -> TaskId;

    fn description(&self) -> String;

    fn run(self: Box<Self>, monitor: &dyn TaskMonitor) -> Result<Self::Output, StorageError>;
}
