// SPDX-License-Identifier: GPL-3.0-only

//! Reuse of an existing installation by the automatic planner
//!
//! Mount points of a discovered root are either kept as they are, kept with
//! a new format, or removed. Bootloader partitions are always recreated.

use std::collections::BTreeSet;

use storage_contracts::StorageError;
use storage_devicetree::{Result, Root, Storage};
use storage_types::{AutoPartScheme, DeviceId, Format, FormatType, PartitioningRequest};

/// Name standing for the bootloader partitions in the removed list.
pub const BOOTLOADER_MOUNT_POINT: &str = "bootloader";

fn overlap(a: &[String], b: &[String]) -> Vec<String> {
    let a: BTreeSet<&String> = a.iter().collect();
    b.iter().filter(|m| a.contains(m)).cloned().collect()
}

/// Reject mount points listed for more than one kind of reuse.
pub fn check_reuse_request(request: &PartitioningRequest) -> Result<()> {
    let pairs = [
        (&request.reused_mount_points, &request.reformatted_mount_points, "reused and reformatted"),
        (&request.reused_mount_points, &request.removed_mount_points, "reused and removed"),
        (&request.reformatted_mount_points, &request.removed_mount_points, "reformatted and removed"),
    ];
    for (a, b, what) in pairs {
        let both = overlap(a, b);
        if !both.is_empty() {
            return Err(StorageError::invalid_input(format!(
                "Mount points cannot be both {what}: {}",
                both.join(", ")
            )));
        }
    }
    Ok(())
}

/// The installation that holds every reused and reformatted mount point.
pub fn find_reused_root(storage: &Storage, request: &PartitioningRequest) -> Result<Root> {
    let wanted: Vec<&String> = request
        .reused_mount_points
        .iter()
        .chain(&request.reformatted_mount_points)
        .collect();
    storage
        .roots
        .iter()
        .find(|root| wanted.iter().all(|m| root.mounts.contains_key(*m)))
        .cloned()
        .ok_or_else(|| {
            StorageError::invalid_input("No existing installation holds the mount points to reuse")
        })
}

/// Existing stage1 partitions on the selected disks.
fn bootloader_partitions(storage: &Storage) -> Result<Vec<DeviceId>> {
    let disks = storage.disks();
    let mut found = Vec::new();
    for fstype in storage.platform().stage1_format_types() {
        let matching: Vec<DeviceId> = storage
            .tree
            .partitions()
            .into_iter()
            .filter(|p| p.exists && p.format.kind == fstype)
            .filter(|p| storage.tree.disks_of(p.id).iter().all(|d| disks.contains(d)))
            .map(|p| p.id)
            .collect();
        if matching.len() > 1 {
            return Err(StorageError::invalid_input(format!(
                "Multiple boot loader partitions of type {fstype} found"
            )));
        }
        found.extend(matching);
    }
    Ok(found)
}

fn remove_if_present(storage: &mut Storage, id: DeviceId) -> Result<()> {
    if storage.tree.contains(id) {
        tracing::debug!(device = %storage.tree.device(id)?.name, "removing reused device");
        storage.recursive_remove(id)?;
    }
    Ok(())
}

fn check_scheme(storage: &Storage, scheme: AutoPartScheme, id: DeviceId, mountpoint: &str) -> Result<()> {
    let device = storage.tree.device(id)?;
    let matches = match scheme {
        AutoPartScheme::Btrfs => device.is_btrfs_subvolume(),
        AutoPartScheme::Lvm | AutoPartScheme::LvmThinp => device.is_lv(),
        AutoPartScheme::Plain => device.is_partition(),
    };
    if matches {
        Ok(())
    } else {
        Err(StorageError::invalid_input(format!(
            "The reused mount point {mountpoint} on {} does not match the {} scheme",
            device.name,
            scheme.as_str()
        )))
    }
}

fn root_device(storage: &Storage, root: &Root, mountpoint: &str) -> Result<DeviceId> {
    root.device_for(mountpoint)
        .filter(|id| storage.tree.contains(*id))
        .ok_or_else(|| {
            StorageError::invalid_input(format!(
                "Mount point {mountpoint} was not found in {}",
                root.describe()
            ))
        })
}

/// Apply the reuse lists of `request` to the root they refer to.
pub fn reuse_existing_installation(storage: &mut Storage, request: &PartitioningRequest) -> Result<()> {
    check_reuse_request(request)?;
    let root = find_reused_root(storage, request)?;
    tracing::info!(root = %root.describe(), "reusing existing installation");

    // the scheme has to fit before anything is touched
    for mountpoint in &request.reused_mount_points {
        let id = root_device(storage, &root, mountpoint)?;
        check_scheme(storage, request.scheme, id, mountpoint)?;
    }

    for id in bootloader_partitions(storage)? {
        remove_if_present(storage, id)?;
    }
    let boot_kept = request.reused_mount_points.iter().any(|m| m == "/boot")
        || request.reformatted_mount_points.iter().any(|m| m == "/boot");
    if !boot_kept && let Some(boot) = root.device_for("/boot") {
        remove_if_present(storage, boot)?;
    }

    for mountpoint in &request.removed_mount_points {
        if mountpoint == BOOTLOADER_MOUNT_POINT {
            continue;
        }
        match root.device_for(mountpoint) {
            Some(id) => remove_if_present(storage, id)?,
            None => tracing::debug!(mountpoint, "removed mount point not found, ignoring"),
        }
    }

    for mountpoint in &request.reformatted_mount_points {
        let id = root_device(storage, &root, mountpoint)?;
        let device = storage.tree.device(id)?;
        let kind = if device.is_btrfs_subvolume() {
            FormatType::Btrfs
        } else {
            request
                .fstype
                .unwrap_or_else(|| storage.default_fstype_for(Some(mountpoint)))
        };
        storage.format_device(id, Format::new(kind).with_mountpoint(mountpoint.clone()))?;
    }

    for mountpoint in &request.reused_mount_points {
        let id = root_device(storage, &root, mountpoint)?;
        storage.set_mountpoint(id, Some(mountpoint.clone()))?;
        if let Some(options) = root.mountopts.get(mountpoint)
            && let Some(device) = storage.tree.get_mut(id)
        {
            device.format.options = Some(options.clone());
        }
    }
    Ok(())
}

/// Mount points the reused installation already provides.
pub fn provided_mount_points(request: &PartitioningRequest) -> BTreeSet<String> {
    request
        .reused_mount_points
        .iter()
        .chain(&request.reformatted_mount_points)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use storage_types::{DiskLabelType, GIB, MIB, PlatformKind};

    use super::*;
    use crate::test_support::{disk, partition, storage};

    #[test]
    fn overlapping_lists_are_rejected() {
        let request = PartitioningRequest {
            reused_mount_points: vec!["/home".to_string()],
            removed_mount_points: vec!["/home".to_string()],
            ..Default::default()
        };
        let err = check_reuse_request(&request).unwrap_err();
        assert_eq!(err.kind, storage_contracts::StorageErrorKind::InvalidInput);
    }

    #[test]
    fn missing_root_is_rejected() {
        let storage = storage(PlatformKind::X86);
        let request = PartitioningRequest {
            reused_mount_points: vec!["/home".to_string()],
            ..Default::default()
        };
        assert!(find_reused_root(&storage, &request).is_err());
    }

    #[test]
    fn duplicate_bootloader_partitions_are_an_error() {
        let mut storage = storage(PlatformKind::Efi);
        let vda = disk(&mut storage, "vda", 20 * GIB, Some(DiskLabelType::Gpt));
        partition(&mut storage, vda, 1, MIB, 500 * MIB, Format::new(FormatType::Efi));
        partition(&mut storage, vda, 2, 501 * MIB, 500 * MIB, Format::new(FormatType::Efi));
        assert!(bootloader_partitions(&storage).is_err());
    }

    #[test]
    fn reused_partition_must_match_scheme() {
        let mut storage = storage(PlatformKind::X86);
        let sda = disk(&mut storage, "sda", 20 * GIB, Some(DiskLabelType::Gpt));
        let home = partition(&mut storage, sda, 1, MIB, 5 * GIB, Format::new(FormatType::Ext4));
        let mut root = Root::new("Fedora");
        root.mounts.insert("/home".to_string(), home);
        storage.roots.push(root);

        let request = PartitioningRequest {
            scheme: AutoPartScheme::Lvm,
            reused_mount_points: vec!["/home".to_string()],
            ..Default::default()
        };
        assert!(reuse_existing_installation(&mut storage, &request).is_err());
        assert!(storage.tree.actions().is_empty());

        let plain = PartitioningRequest {
            scheme: AutoPartScheme::Plain,
            ..request
        };
        reuse_existing_installation(&mut storage, &plain).unwrap();
        assert_eq!(
            storage.tree.get(home).unwrap().format.mountpoint.as_deref(),
            Some("/home")
        );
    }
}
