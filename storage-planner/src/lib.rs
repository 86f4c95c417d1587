// SPDX-License-Identifier: GPL-3.0-only

//! Partitioning planners
//!
//! Every planner works on a [`Storage`] playground and only records actions;
//! nothing here touches a real device.
//!
//! - [`automatic`]: scheme driven layout from the default partitioning table
//! - [`custom`]: declarative `part`/`volgroup`/`logvol`/`raid`/`btrfs` rows
//! - [`manual`]: mount points assigned to existing devices
//! - [`factory`]: interactive add/change/remove of single devices
//! - [`validator`]: whole-graph checks run before a plan is applied
//!
//! [`Storage`]: storage_devicetree::Storage

pub mod automatic;
pub mod bootloader;
pub mod custom;
pub mod defaults;
pub mod factory;
pub mod luks;
pub mod manual;
pub mod policy;
pub mod resizable;
pub mod reuse;
pub mod schedule;
pub mod swap;
pub mod validator;
pub mod viewer;

#[cfg(test)]
mod test_support;

pub use automatic::do_autopart;
pub use custom::{CustomLayout, CustomPlanner};
pub use defaults::{get_default_partitioning, get_part_spec};
pub use factory::{
    add_device, change_device, destroy_device, factory_device, generate_device_factory_permissions,
    generate_device_factory_request, reset_device,
};
pub use manual::{ManualPlanner, gather_requests};
pub use policy::{DiskInitializationDomain, DiskInitializationPolicy, clear_partitions};
pub use swap::suggest_swap_size;
pub use validator::StorageChecker;
