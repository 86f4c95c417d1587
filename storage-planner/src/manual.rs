// SPDX-License-Identifier: GPL-3.0-only

//! Manual partitioning
//!
//! Mount points are assigned to devices that already exist in the graph.

use storage_contracts::{StorageError, TaskMonitor};
use storage_devicetree::{Result, Storage};
use storage_types::{Device, DeviceId, Format, FormatType, MountPointRequest};

use crate::bootloader::find_stage1_device;

/// Find the device a request's `device_spec` names.
///
/// Besides everything [`storage_devicetree::DeviceTree::resolve_device`]
/// understands, `UUID=<uuid>@<subvol>` picks a subvolume of a btrfs volume.
pub fn resolve_device_spec(storage: &Storage, spec: &str) -> Option<DeviceId> {
    if let Some(rest) = spec.strip_prefix("UUID=")
        && let Some((uuid, subvol)) = rest.split_once('@')
    {
        return storage
            .tree
            .subvolumes()
            .into_iter()
            .find(|d| d.format.uuid.as_deref() == Some(uuid) && d.name == subvol)
            .map(|d| d.id);
    }
    storage.tree.resolve_device(spec).map(|d| d.id)
}

/// Devices a mount point can be assigned to.
pub fn usable_devices(storage: &Storage) -> Vec<&Device> {
    let disks = storage.disks();
    storage
        .devices()
        .into_iter()
        .filter(|d| storage.tree.is_leaf(d.id) || d.is_btrfs())
        .filter(|d| !d.protected && d.size > 0)
        .filter(|d| !d.is_extended() && !d.is_freespace())
        .filter(|d| storage.tree.disks_of(d.id).iter().all(|disk| disks.contains(disk)))
        .collect()
}

/// Pair every usable device with its request, creating a default request
/// for devices nobody asked for.
pub fn gather_requests(storage: &Storage, requests: &[MountPointRequest]) -> Vec<MountPointRequest> {
    usable_devices(storage)
        .into_iter()
        .map(|device| {
            requests
                .iter()
                .find(|r| resolve_device_spec(storage, &r.device_spec) == Some(device.id))
                .cloned()
                .unwrap_or_else(|| MountPointRequest {
                    mount_point: device.format.mountpoint.clone().unwrap_or_default(),
                    format_type: Some(device.format.kind).filter(|k| *k != FormatType::None),
                    ..MountPointRequest::for_device(device.name.clone())
                })
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct ManualPlanner {
    requests: Vec<MountPointRequest>,
}

impl ManualPlanner {
    pub fn new(requests: Vec<MountPointRequest>) -> Self {
        Self { requests }
    }

    pub fn requests(&self) -> &[MountPointRequest] {
        &self.requests
    }

    /// Apply every request to its device.
    pub fn execute(&self, storage: &mut Storage, monitor: &dyn TaskMonitor) -> Result<()> {
        tracing::info!(requests = self.requests.len(), "manual partitioning");
        for request in &self.requests {
            monitor.check_cancel()?;
            let id = resolve_device_spec(storage, &request.device_spec).ok_or_else(|| {
                StorageError::invalid_input(format!(
                    "Unknown or invalid device \"{}\" specified",
                    request.device_spec
                ))
            })?;
            setup_mount_point(storage, id, request)?;
        }
        find_stage1_device(storage);
        Ok(())
    }
}

fn setup_mount_point(storage: &mut Storage, id: DeviceId, request: &MountPointRequest) -> Result<()> {
    let mut mount_point = match request.mount_point.as_str() {
        "" | "none" => None,
        path => Some(path.to_string()),
    };
    let swap = mount_point.as_deref() == Some("swap")
        || request.format_type == Some(FormatType::Swap);
    if swap {
        mount_point = None;
    }
    if let Some(path) = &mount_point
        && !path.starts_with('/')
    {
        return Err(StorageError::invalid_input(format!(
            "The mount point \"{path}\" is not valid. It must start with a /."
        )));
    }
    if !request.reformat && mount_point.is_none() && !swap {
        return Ok(());
    }

    let device = storage.tree.device(id)?;
    let name = device.name.clone();
    if request.reformat {
        let kind = match (request.format_type, swap) {
            (Some(kind), _) => kind,
            (None, true) => FormatType::Swap,
            (None, false) => storage.default_fstype_for(mount_point.as_deref()),
        };
        if !kind.is_formattable() {
            return Err(StorageError::invalid_input(format!(
                "Unknown or invalid format \"{kind}\" specified for device {name}"
            )));
        }
        let mut format = Format::new(kind);
        format.mountpoint = mount_point;
        format.create_options = Some(request.format_options.clone()).filter(|o| !o.is_empty());
        format.options = Some(request.mount_options.clone()).filter(|o| !o.is_empty());
        storage.format_device(id, format)?;
    } else {
        if let Some(kind) = request.format_type
            && kind != device.format.kind
        {
            return Err(StorageError::invalid_input(format!(
                "The format type {kind} of {name} can only be changed by reformatting"
            )));
        }
        if mount_point.is_some() && !device.format.is_mountable() {
            return Err(StorageError::invalid_input(format!(
                "The format of {name} is not mountable"
            )));
        }
        storage.set_mountpoint(id, mount_point)?;
        if !request.mount_options.is_empty() {
            storage.tree.device_mut(id)?.format.options = Some(request.mount_options.clone());
        }
    }

    if storage.tree.device(id)?.format.kind == FormatType::Swap {
        storage.add_fstab_swap(id);
    }
    tracing::debug!(device = %name, mount_point = %request.mount_point, "assigned mount point");
    Ok(())
}

#[cfg(test)]
mod tests {
    use storage_contracts::{NullMonitor, StorageErrorKind};
    use storage_devicetree::NewBtrfs;
    use storage_types::{DiskLabelType, GIB, MIB, PlatformKind};

    use super::*;
    use crate::test_support::{disk, mounted, partition, storage};

    #[test]
    fn unmatched_devices_get_default_requests() {
        let mut storage = storage(PlatformKind::X86);
        let sda = disk(&mut storage, "sda", 20 * GIB, Some(DiskLabelType::Gpt));
        partition(&mut storage, sda, 1, MIB, GIB, Format::new(FormatType::Ext4).with_mountpoint("/boot"));
        partition(&mut storage, sda, 2, GIB + MIB, 10 * GIB, Format::new(FormatType::Xfs));

        let requests = vec![MountPointRequest {
            mount_point: "/".to_string(),
            reformat: true,
            ..MountPointRequest::for_device("/dev/sda2")
        }];
        let gathered = gather_requests(&storage, &requests);
        assert_eq!(gathered.len(), 2);
        let boot = gathered.iter().find(|r| r.device_spec == "sda1").unwrap();
        assert_eq!(boot.mount_point, "/boot");
        assert!(!boot.reformat);
        assert!(gathered.iter().any(|r| r.device_spec == "/dev/sda2" && r.reformat));
    }

    #[test]
    fn protected_devices_are_not_usable() {
        let mut storage = storage(PlatformKind::X86);
        let sda = disk(&mut storage, "sda", 20 * GIB, Some(DiskLabelType::Gpt));
        let p1 = partition(&mut storage, sda, 1, MIB, GIB, Format::new(FormatType::Ext4));
        storage.tree.get_mut(p1).unwrap().protected = true;
        assert!(usable_devices(&storage).is_empty());
    }

    #[test]
    fn reformat_and_keep() {
        let mut storage = storage(PlatformKind::X86);
        let sda = disk(&mut storage, "sda", 20 * GIB, Some(DiskLabelType::Gpt));
        let root = partition(&mut storage, sda, 1, MIB, 10 * GIB, Format::new(FormatType::Ext4).existing());
        let swap = partition(&mut storage, sda, 2, 10 * GIB + MIB, 2 * GIB, Format::new(FormatType::Swap).existing());
        let planner = ManualPlanner::new(vec![
            MountPointRequest {
                mount_point: "/".to_string(),
                reformat: true,
                format_type: Some(FormatType::Xfs),
                ..MountPointRequest::for_device("sda1")
            },
            MountPointRequest {
                mount_point: "swap".to_string(),
                ..MountPointRequest::for_device("sda2")
            },
        ]);
        planner.execute(&mut storage, &NullMonitor).unwrap();
        assert_eq!(mounted(&storage, "/").id, root);
        assert_eq!(mounted(&storage, "/").format.kind, FormatType::Xfs);
        assert!(storage.fstab_swaps().contains(&swap));
    }

    #[test]
    fn changing_type_without_reformat_is_rejected() {
        let mut storage = storage(PlatformKind::X86);
        let sda = disk(&mut storage, "sda", 20 * GIB, Some(DiskLabelType::Gpt));
        partition(&mut storage, sda, 1, MIB, 10 * GIB, Format::new(FormatType::Ext4).existing());
        let planner = ManualPlanner::new(vec![MountPointRequest {
            mount_point: "/".to_string(),
            format_type: Some(FormatType::Xfs),
            ..MountPointRequest::for_device("sda1")
        }]);
        let err = planner.execute(&mut storage, &NullMonitor).unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::InvalidInput);
    }

    #[test]
    fn btrfs_subvolume_by_uuid() {
        let mut storage = storage(PlatformKind::X86);
        let sda = disk(&mut storage, "sda", 20 * GIB, Some(DiskLabelType::Gpt));
        let member = partition(&mut storage, sda, 1, MIB, 10 * GIB, Format::new(FormatType::Btrfs));
        let volume = storage
            .new_btrfs(NewBtrfs {
                parents: vec![member],
                name: Some("fedora".to_string()),
                format: Format::new(FormatType::Btrfs),
                ..Default::default()
            })
            .unwrap();
        let volume = storage.create_device(volume).unwrap();
        let subvol = storage
            .new_btrfs(NewBtrfs {
                parents: vec![volume],
                name: Some("home".to_string()),
                subvol: true,
                ..Default::default()
            })
            .unwrap();
        let subvol = storage.create_device(subvol).unwrap();
        let uuid = storage.tree.get(volume).unwrap().format.uuid.clone().unwrap();

        let spec = format!("UUID={uuid}@home");
        assert_eq!(resolve_device_spec(&storage, &spec), Some(subvol));
        ManualPlanner::new(vec![MountPointRequest {
            mount_point: "/home".to_string(),
            ..MountPointRequest::for_device(spec)
        }])
        .execute(&mut storage, &NullMonitor)
        .unwrap();
        assert_eq!(mounted(&storage, "/home").id, subvol);
    }
}
