// SPDX-License-Identifier: GPL-3.0-only

//! Disk initialization policy
//!
//! Decides which existing devices the planners may wipe before they lay out
//! new storage, following the `clearpart`-style configuration of the session.

use storage_devicetree::{Result, Storage};
use storage_types::{
    DeviceId, DiskInitializationConfig, FormatType, InitializationMode, PartitionFlag,
};

pub trait DiskInitializationDomain: Send + Sync {
    /// Whether the device may be removed to make room for the installation.
    fn can_remove(&self, storage: &Storage, id: DeviceId) -> bool;

    /// Whether the disk may get a fresh partition table.
    fn can_initialize(&self, storage: &Storage, id: DeviceId) -> bool;
}

pub struct DiskInitializationPolicy {
    config: DiskInitializationConfig,
}

impl DiskInitializationPolicy {
    pub fn new(config: DiskInitializationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiskInitializationConfig {
        &self.config
    }

    fn is_empty(&self, storage: &Storage, id: DeviceId) -> bool {
        let tree = &storage.tree;
        tree.is_empty_disk(id)
            || (tree.get(id).is_some_and(|d| d.format.is_none()) && tree.children(id).is_empty())
    }

    fn is_linux_native(&self, storage: &Storage, kind: FormatType) -> bool {
        kind.is_linux_native() && !storage.platform().non_linux_format_types.contains(&kind)
    }

    fn listed(&self, storage: &Storage, id: DeviceId) -> bool {
        let Some(device) = storage.tree.get(id) else {
            return false;
        };
        let id = id.to_string();
        self.config
            .devices_to_clear
            .iter()
            .any(|spec| spec == &device.name || spec == &id || *spec == device.path())
    }

    fn has_protected_descendant(&self, storage: &Storage, id: DeviceId) -> bool {
        storage
            .tree
            .get_dependent_devices(id)
            .into_iter()
            .any(|dep| storage.tree.get(dep).is_some_and(|d| d.protected))
    }
}

impl DiskInitializationDomain for DiskInitializationPolicy {
    fn can_remove(&self, storage: &Storage, id: DeviceId) -> bool {
        let tree = &storage.tree;
        let Some(device) = tree.get(id) else {
            return false;
        };
        let mode = self.config.mode;

        if !self.config.drives_to_clear.is_empty() {
            let on_cleared_drives = tree.disks_of(id).into_iter().all(|disk| {
                tree.get(disk)
                    .is_some_and(|d| self.config.drives_to_clear.contains(&d.name))
            });
            if !on_cleared_drives {
                return false;
            }
        }

        if !self.config.clear_non_existent {
            let skip = if device.is_disk() {
                !device.format.exists
            } else {
                !device.exists
            };
            if skip {
                return false;
            }
        }

        if matches!(mode, InitializationMode::None | InitializationMode::Default) {
            return device.is_disk()
                && !device.protected
                && self.config.initialize_labels
                && self.is_empty(storage, id);
        }

        if device.is_partition() {
            if tree.is_magic(id) || !(device.is_primary() || device.is_logical()) {
                return false;
            }
            if mode == InitializationMode::Linux
                && !self.is_linux_native(storage, device.format.kind)
                && ![PartitionFlag::Lvm, PartitionFlag::Raid, PartitionFlag::Swap]
                    .iter()
                    .any(|flag| device.has_flag(*flag))
            {
                return false;
            }
        } else if device.is_disk() {
            if device.format.is_hidden() {
                return false;
            }
            let partitioned = tree.is_partitioned(id);
            if partitioned && mode != InitializationMode::All && !self.is_empty(storage, id) {
                return false;
            }
            if mode == InitializationMode::Linux {
                let empty_label = self.config.initialize_labels && self.is_empty(storage, id);
                let native = !partitioned && self.is_linux_native(storage, device.format.kind);
                if !(empty_label || native) {
                    return false;
                }
            }
        }

        if device.protected || self.has_protected_descendant(storage, id) {
            return false;
        }

        if mode == InitializationMode::List && !self.listed(storage, id) {
            return false;
        }
        true
    }

    fn can_initialize(&self, storage: &Storage, id: DeviceId) -> bool {
        let Some(device) = storage.tree.get(id) else {
            return false;
        };
        if device.protected || !device.is_disk() {
            return false;
        }
        if self.config.format_unrecognized
            && matches!(device.format.kind, FormatType::None | FormatType::Unknown)
        {
            return true;
        }
        self.can_remove(storage, id)
    }
}

/// Remove everything the policy allows on the selected disks and put new
/// partition tables on the disks it allows to initialize.
pub fn clear_partitions(storage: &mut Storage) -> Result<()> {
    let policy = DiskInitializationPolicy::new(storage.disk_init.clone());
    let disks = storage.disks();

    // whole-disk formats are judged before their contents go away
    let reinitialize: Vec<DeviceId> = disks
        .iter()
        .copied()
        .filter(|disk| !storage.tree.is_partitioned(*disk) && policy.can_initialize(storage, *disk))
        .collect();

    let mut partitions: Vec<(u32, DeviceId)> = storage
        .tree
        .partitions()
        .into_iter()
        .filter(|p| p.exists)
        .filter(|p| storage.tree.disks_of(p.id).iter().all(|d| disks.contains(d)))
        .map(|p| (p.partition().and_then(|data| data.number).unwrap_or(0), p.id))
        .collect();
    partitions.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    for (_, id) in partitions {
        if !storage.tree.contains(id) || !policy.can_remove(storage, id) {
            continue;
        }
        tracing::debug!(device = %storage.tree.device(id)?.name, "clearing partition");
        storage.recursive_remove(id)?;
    }
    storage.remove_empty_extended_partitions();

    for disk in disks {
        if reinitialize.contains(&disk) || policy.can_initialize(storage, disk) {
            storage.initialize_disk(disk)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use storage_types::{DiskLabelType, Format, GIB, MIB, PlatformKind};

    use super::*;
    use crate::test_support::{disk, partition, partition_with_flags, storage};

    fn policy(mode: InitializationMode) -> DiskInitializationPolicy {
        DiskInitializationPolicy::new(DiskInitializationConfig {
            mode,
            initialize_labels: true,
            ..Default::default()
        })
    }

    fn fixture() -> (Storage, [DeviceId; 5]) {
        let mut storage = storage(PlatformKind::X86);
        let sda = disk(&mut storage, "sda", 100 * GIB, Some(DiskLabelType::Msdos));
        let ntfs = partition(&mut storage, sda, 1, MIB, 20 * GIB, Format::new(FormatType::Ntfs));
        let ext4 = partition(&mut storage, sda, 2, 21 * GIB, 20 * GIB, Format::new(FormatType::Ext4));
        let pv = partition_with_flags(
            &mut storage,
            sda,
            3,
            41 * GIB,
            20 * GIB,
            Format::new(FormatType::Unknown),
            vec![PartitionFlag::Lvm],
        );
        let sdb = disk(&mut storage, "sdb", 100 * GIB, Some(DiskLabelType::Gpt));
        (storage, [sda, ntfs, ext4, pv, sdb])
    }

    #[test]
    fn linux_mode_keeps_foreign_partitions() {
        let (storage, [sda, ntfs, ext4, pv, sdb]) = fixture();
        let policy = policy(InitializationMode::Linux);
        assert!(!policy.can_remove(&storage, ntfs));
        assert!(policy.can_remove(&storage, ext4));
        assert!(policy.can_remove(&storage, pv));
        assert!(!policy.can_remove(&storage, sda));
        assert!(policy.can_remove(&storage, sdb));
    }

    #[test]
    fn all_mode_removes_everything_unprotected() {
        let (mut storage, [sda, ntfs, ext4, _, _]) = fixture();
        storage.tree.get_mut(ext4).unwrap().protected = true;
        let policy = policy(InitializationMode::All);
        assert!(policy.can_remove(&storage, ntfs));
        assert!(!policy.can_remove(&storage, ext4));
        assert!(!policy.can_remove(&storage, sda));
    }

    #[test]
    fn default_and_none_modes_only_touch_empty_disks() {
        let (storage, [sda, ntfs, _, _, sdb]) = fixture();
        for mode in [InitializationMode::None, InitializationMode::Default] {
            let policy = policy(mode);
            assert!(!policy.can_remove(&storage, ntfs));
            assert!(!policy.can_remove(&storage, sda));
            assert!(policy.can_remove(&storage, sdb));
        }
        let no_labels = DiskInitializationPolicy::new(DiskInitializationConfig::default());
        assert!(!no_labels.can_remove(&storage, sdb));
    }

    #[test]
    fn list_mode_and_drive_filter() {
        let (storage, [_, ntfs, ext4, _, _]) = fixture();
        let listed = DiskInitializationPolicy::new(DiskInitializationConfig {
            mode: InitializationMode::List,
            devices_to_clear: vec!["sda2".to_string()],
            ..Default::default()
        });
        assert!(listed.can_remove(&storage, ext4));
        assert!(!listed.can_remove(&storage, ntfs));

        let other_drive = DiskInitializationPolicy::new(DiskInitializationConfig {
            mode: InitializationMode::All,
            drives_to_clear: vec!["sdb".to_string()],
            ..Default::default()
        });
        assert!(!other_drive.can_remove(&storage, ext4));
    }

    #[test]
    fn unrecognized_disks_can_be_initialized() {
        let mut storage = storage(PlatformKind::X86);
        let raw = disk(&mut storage, "vda", 10 * GIB, None);
        let policy = DiskInitializationPolicy::new(DiskInitializationConfig {
            mode: InitializationMode::None,
            format_unrecognized: true,
            ..Default::default()
        });
        assert!(policy.can_initialize(&storage, raw));
        storage.tree.get_mut(raw).unwrap().protected = true;
        assert!(!policy.can_initialize(&storage, raw));
    }

    #[test]
    fn clear_partitions_in_linux_mode() {
        let (mut storage, [sda, ntfs, ext4, pv, sdb]) = fixture();
        storage.disk_init = DiskInitializationConfig {
            mode: InitializationMode::Linux,
            initialize_labels: true,
            ..Default::default()
        };
        clear_partitions(&mut storage).unwrap();
        assert!(storage.tree.contains(ntfs));
        assert!(!storage.tree.contains(ext4));
        assert!(!storage.tree.contains(pv));
        // sda still holds the NTFS partition, so its label stays
        assert!(storage.tree.get(sda).unwrap().format.exists);
        // the empty sdb gets a fresh label
        assert!(!storage.tree.get(sdb).unwrap().format.exists);
        assert_eq!(storage.tree.get(sdb).unwrap().format.kind, FormatType::DiskLabel);
    }
}
