// SPDX-License-Identifier: GPL-3.0-only

//! Task runner
//!
//! Planner work is synchronous and may take a while, so every task runs on a
//! blocking worker. Progress and completion are published on the session's
//! event channel; cancellation goes through a [`CancellationToken`] the task
//! polls between devices.

use storage_contracts::{StorageError, StorageEvent, Task, TaskId, TaskMonitor, TaskOutcome};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Monitor handed to a running task.
#[derive(Debug, Clone)]
pub struct TokenMonitor {
    task: TaskId,
    token: CancellationToken,
    events: broadcast::Sender<StorageEvent>,
}

impl TokenMonitor {
    pub fn new(task: TaskId, token: CancellationToken, events: broadcast::Sender<StorageEvent>) -> Self {
        Self { task, token, events }
    }
}

impl TaskMonitor for TokenMonitor {
    fn report_progress(&self, message: &str) {
        tracing::debug!(task = %self.task, message, "task progress");
        // nobody listening is fine
        let _ = self.events.send(StorageEvent::TaskProgress {
            task: self.task,
            message: message.to_string(),
        });
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Handle of a task started by [`TaskRunner::spawn`].
#[derive(Debug)]
pub struct RunningTask<T> {
    id: TaskId,
    token: CancellationToken,
    handle: JoinHandle<std::result::Result<T, StorageError>>,
}

impl<T> RunningTask<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Ask the task to stop at its next check.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for the task to finish.
    pub async fn join(self) -> Result<T> {
        Ok(self.handle.await??)
    }
}

#[derive(Debug, Clone)]
pub struct TaskRunner {
    events: broadcast::Sender<StorageEvent>,
}

impl TaskRunner {
    pub fn new(events: broadcast::Sender<StorageEvent>) -> Self {
        Self { events }
    }

    /// Run `task` on a blocking worker.
    pub fn spawn<T>(&self, task: T) -> RunningTask<T::Output>
    where
        T: Task + 'static,
    {
        let id = task.id();
        let token = CancellationToken::new();
        let monitor = TokenMonitor::new(id, token.clone(), self.events.clone());
        let events = self.events.clone();
        let description = task.description();
        tracing::info!(task = %id, %description, "starting task");

        let handle = tokio::task::spawn_blocking(move || {
            let result = Box::new(task).run(&monitor);
            let outcome = TaskOutcome::from_result(&result);
            match &outcome {
                TaskOutcome::Succeeded => tracing::info!(task = %id, %description, "task finished"),
                TaskOutcome::Cancelled => tracing::info!(task = %id, %description, "task cancelled"),
                TaskOutcome::Failed(error) => {
                    tracing::error!(task = %id, %description, %error, "task failed")
                }
            }
            let _ = events.send(StorageEvent::TaskFinished { task: id, outcome });
            result
        });

        RunningTask { id, token, handle }
    }
}
