// SPDX-License-Identifier: GPL-3.0-only

//! Storage session driver
//!
//! Ties the planners to a block backend: scanning, partitioning modules with
//! their playgrounds, validation, action execution and the configuration
//! written to the installed system. Long work runs as tasks on blocking
//! workers; progress and state changes go out as [`StorageEvent`]s.
//!
//! [`StorageEvent`]: storage_contracts::StorageEvent

pub mod config;
pub mod error;
pub mod session;
pub mod snapshot;
pub mod tasks;

pub use config::ServiceConfig;
pub use error::{Result, ServiceError};
pub use session::{PartitioningMethod, StorageSession};
pub use snapshot::GraphSnapshot;
pub use tasks::{RunningTask, TaskRunner, TokenMonitor};
