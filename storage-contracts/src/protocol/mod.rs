// SPDX-License-Identifier: GPL-3.0-only

pub mod error;
pub mod events;
pub mod id;

pub use error::{BackendError, StorageError, StorageErrorKind, ValidationReport};
pub use events::{StorageEvent, TaskOutcome};
pub use id::{ModuleId, TaskId};
