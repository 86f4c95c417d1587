// SPDX-License-Identifier: GPL-3.0-only

//! JSON snapshots of a scanned system.

use serde::{Deserialize, Serialize};
use storage_contracts::StorageError;
use storage_devicetree::{DeviceTree, Root, Storage, StorageSettings};
use storage_types::{Device, DeviceId, DiskInitializationConfig};

use crate::error::Result;

/// Devices of a system plus the disk selection made for it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSnapshot {
    pub devices: Vec<Device>,
    pub roots: Vec<Root>,
    /// Disk names; empty selects every disk
    pub selected_disks: Vec<String>,
    pub disk_init: DiskInitializationConfig,
    /// Disk names in boot order
    pub drive_order: Vec<String>,
}

impl GraphSnapshot {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_storage(storage: &Storage) -> Self {
        let name_of = |id: &DeviceId| storage.tree.get(*id).map(|d| d.name.clone());
        Self {
            devices: storage.tree.all_devices().into_iter().cloned().collect(),
            roots: storage.roots.clone(),
            selected_disks: storage.selected_disks.iter().filter_map(name_of).collect(),
            disk_init: storage.disk_init.clone(),
            drive_order: storage.bootloader.drive_order.clone(),
        }
    }

    pub fn into_storage(self, settings: StorageSettings) -> Result<Storage> {
        let tree = DeviceTree::from_devices(self.devices)?;
        let mut storage = Storage::new(tree, settings);
        storage.selected_disks = self
            .selected_disks
            .iter()
            .map(|name| {
                storage
                    .tree
                    .get_device_by_name(name, true)
                    .map(|d| d.id)
                    .ok_or_else(|| StorageError::unknown_device(name))
            })
            .collect::<std::result::Result<_, _>>()?;
        storage.roots = self.roots.iter().map(|root| root.copy(&storage.tree)).collect();
        storage.disk_init = self.disk_init;
        storage.bootloader.drive_order = self.drive_order;
        Ok(storage)
    }
}

#[cfg(test)]
mod tests {
    use storage_types::GIB;

    use super::*;

    #[test]
    fn snapshot_keeps_ids_and_selection() {
        let json = r#"{
            "devices": [
                {"id": 3, "name": "vdb", "size": "10 GiB", "exists": true, "kind": "disk"},
                {"id": 1, "name": "vda", "size": 21474836480, "exists": true, "kind": "disk"}
            ],
            "selected_disks": ["vdb"],
            "disk_init": {"mode": "all"}
        }"#;
        let storage = GraphSnapshot::from_json(json)
            .unwrap()
            .into_storage(StorageSettings::default())
            .unwrap();
        let vdb = storage.tree.get_device_by_name("vdb", false).unwrap();
        assert_eq!(vdb.id, DeviceId(3));
        assert_eq!(vdb.size, 10 * GIB);
        assert_eq!(storage.selected_disks, vec![DeviceId(3)]);

        let again = GraphSnapshot::from_storage(&storage);
        assert_eq!(again.selected_disks, ["vdb"]);
        assert_eq!(GraphSnapshot::from_json(&again.to_json().unwrap()).unwrap(), again);
    }

    #[test]
    fn unknown_selected_disk_is_an_error() {
        let snapshot = GraphSnapshot {
            selected_disks: vec!["sdz".to_string()],
            ..Default::default()
        };
        assert!(snapshot.into_storage(StorageSettings::default()).is_err());
    }
}
