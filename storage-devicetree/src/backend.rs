// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use storage_contracts::BackendError;
use storage_types::Device;

use crate::actions::Action;
use crate::tree::DeviceTree;

/// Block device primitives the planner relies on.
///
/// The planner itself never touches a device: it scans through the backend,
/// records actions and hands them back for execution. Implementations run on
/// the service's blocking workers and may take as long as the system needs.
pub trait BlockBackend: Send + Sync + std::fmt::Debug {
    /// Build a fresh graph of the devices present on the system.
    fn scan(&self) -> Result<DeviceTree, BackendError>;

    /// Carry out one action against the system.
    fn execute(&self, action: &Action, tree: &DeviceTree) -> Result<(), BackendError>;

    /// Activate a device and its parents so that it can be mounted.
    fn setup(&self, device: &Device) -> Result<(), BackendError>;

    fn teardown(&self, device: &Device) -> Result<(), BackendError>;

    fn mount(&self, device: &Device, target: &Path, options: &str) -> Result<(), BackendError>;

    fn unmount(&self, target: &Path) -> Result<(), BackendError>;

    /// Fetch the escrow certificate published at `url`.
    fn escrow_certificate(&self, url: &str) -> Result<String, BackendError>;
}
