// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use storage_types::DeviceId;

use crate::tree::DeviceTree;

/// An operating system found installed on the disks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Root {
    pub name: String,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
    /// Every device the installation uses
    #[serde(default)]
    pub devices: Vec<DeviceId>,
    /// Mount point to device, from the installation's fstab
    #[serde(default)]
    pub mounts: BTreeMap<String, DeviceId>,
    /// Mount point to fstab options
    #[serde(default)]
    pub mountopts: BTreeMap<String, String>,
    #[serde(default)]
    pub swaps: Vec<DeviceId>,
}

impl Root {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Display name built from product and version.
    pub fn describe(&self) -> String {
        match (&self.product, &self.version) {
            (Some(product), Some(version)) => format!("{product} {version}"),
            (Some(product), None) => product.clone(),
            _ => self.name.clone(),
        }
    }

    /// The same root referring only to devices present in `tree`.
    ///
    /// Lookups include hidden devices so that a root on a hidden device
    /// survives the copy.
    pub fn copy(&self, tree: &DeviceTree) -> Root {
        let present = |id: &DeviceId| tree.get_device_by_id(*id, true).is_some();
        Root {
            name: self.name.clone(),
            product: self.product.clone(),
            version: self.version.clone(),
            arch: self.arch.clone(),
            devices: self.devices.iter().copied().filter(|id| present(id)).collect(),
            mounts: self
                .mounts
                .iter()
                .filter(|(_, id)| present(id))
                .map(|(mountpoint, id)| (mountpoint.clone(), *id))
                .collect(),
            mountopts: self
                .mountopts
                .iter()
                .filter(|(mountpoint, _)| {
                    self.mounts.get(*mountpoint).is_some_and(|id| present(id))
                })
                .map(|(mountpoint, options)| (mountpoint.clone(), options.clone()))
                .collect(),
            swaps: self.swaps.iter().copied().filter(|id| present(id)).collect(),
        }
    }

    /// Device mounted at `mountpoint` by this installation.
    pub fn device_for(&self, mountpoint: &str) -> Option<DeviceId> {
        self.mounts.get(mountpoint).copied()
    }
}
