// SPDX-License-Identifier: GPL-3.0-only

//! Device graph of the installer storage planner
//!
//! The [`DeviceTree`] is an arena of [`storage_types::Device`] records keyed by
//! id. [`Storage`] wraps a tree with the session settings and offers every
//! mutation the planners need; each mutation records an [`Action`] that a
//! [`BlockBackend`] executes later.

pub mod actions;
pub mod backend;
pub mod lvm;
pub mod naming;
pub mod partitioning;
pub mod root;
pub mod storage;
pub mod tree;

pub use actions::{Action, ActionKind, ActionList, ActionPayload, ActionTarget};
pub use backend::BlockBackend;
pub use lvm::{grow_lvm, thin_pool_metadata_size};
pub use naming::{lv_device_name, partition_name, safe_device_name};
pub use partitioning::{do_partitioning, get_free_regions, remove_empty_extended_partitions};
pub use root::Root;
pub use storage::{
    BootloaderState, DEFAULT_PARTITION_SIZE, NewBtrfs, NewLv, NewMdArray, NewPartition, NewVg,
    Storage, StorageSettings,
};
pub use tree::DeviceTree;

pub use storage_contracts::{Result, StorageError};
