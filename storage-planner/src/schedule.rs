// SPDX-License-Identifier: GPL-3.0-only

//! Scheduling of partitioning specs
//!
//! Turns [`PartSpec`] rows into new devices: explicit partitions, the
//! implicit partitions backing a container, and the volumes inside it.

use storage_contracts::StorageError;
use storage_devicetree::{
    DEFAULT_PARTITION_SIZE, NewBtrfs, NewLv, NewPartition, NewVg, Result, Storage,
    get_free_regions,
};
use storage_types::{
    AutoPartScheme, DeviceId, Format, FormatType, LuksParams, LvRole, MIB, PartSpec,
    PartitionRole, bytes_to_pretty,
};

use crate::bootloader::needs_biosboot;
use crate::luks::create_encrypted;

/// Size implicit partitions fall back to when explicit ones need the room.
pub const IMPLICIT_FALLBACK_SIZE: u64 = 256 * MIB;

fn largest_free_region(storage: &Storage, disks: &[DeviceId]) -> u64 {
    disks
        .iter()
        .flat_map(|disk| get_free_regions(&storage.tree, *disk))
        .map(|region| region.size())
        .max()
        .unwrap_or(0)
}

/// Partitioned selected disks with room for at least one new partition.
pub fn get_candidate_disks(storage: &Storage) -> Result<Vec<DeviceId>> {
    let disks = storage.partitioned_disks();
    if disks.is_empty() {
        return Err(StorageError::no_disks());
    }
    let candidates: Vec<DeviceId> = disks
        .into_iter()
        .filter(|disk| largest_free_region(storage, &[*disk]) > DEFAULT_PARTITION_SIZE)
        .collect();
    if candidates.is_empty() {
        return Err(StorageError::not_enough_free_space(
            "Not enough free space on disks for automatic partitioning",
        ));
    }
    Ok(candidates)
}

/// Disks that get an implicit partition for the container.
pub fn get_disks_for_implicit_partitions(
    storage: &Storage,
    disks: &[DeviceId],
    scheme: AutoPartScheme,
    requests: &[PartSpec],
) -> Vec<DeviceId> {
    if scheme == AutoPartScheme::Plain {
        return Vec::new();
    }
    let explicit = requests
        .iter()
        .filter(|r| r.applies_to(scheme) && r.is_partition(scheme))
        .count() as u32;
    disks
        .iter()
        .copied()
        .filter(|disk| {
            let Some(label) = storage.tree.get(*disk).and_then(|d| d.format.disklabel) else {
                return false;
            };
            if label.supports_extended() {
                return true;
            }
            let used = storage
                .tree
                .partitions_of(*disk)
                .iter()
                .filter(|p| p.partition().is_some_and(|data| data.role != PartitionRole::Extended))
                .filter(|p| p.exists)
                .count() as u32;
            label.max_primary_partitions().saturating_sub(used) > explicit
        })
        .collect()
}

fn container_member_format(scheme: AutoPartScheme) -> FormatType {
    match scheme {
        AutoPartScheme::Btrfs => FormatType::Btrfs,
        _ => FormatType::LvmPv,
    }
}

/// One growable member partition per disk for the container of `scheme`.
pub fn schedule_implicit_partitions(
    storage: &mut Storage,
    disks: &[DeviceId],
    scheme: AutoPartScheme,
    requests: &[PartSpec],
    luks: Option<&LuksParams>,
) -> Result<Vec<DeviceId>> {
    if !requests.iter().any(|r| r.applies_to(scheme) && r.is_volume(scheme)) {
        return Ok(Vec::new());
    }
    let mut implicit = Vec::new();
    for disk in disks {
        let format = match luks {
            Some(params) => Format::new(FormatType::Luks).with_luks(params.clone()),
            None => Format::new(container_member_format(scheme)),
        };
        let partition = storage.new_partition(NewPartition {
            format,
            size: DEFAULT_PARTITION_SIZE,
            grow: true,
            disks: vec![*disk],
            ..Default::default()
        })?;
        implicit.push(storage.create_device(partition)?);
    }
    Ok(implicit)
}

fn stage1_row_type(storage: &Storage, request: &PartSpec, fstype: FormatType) -> bool {
    storage.platform().stage1_format_types().contains(&fstype)
        || (fstype == FormatType::HfsPlus && request.mountpoint.is_none())
}

/// Whether the stage1 row is already served on the boot disk.
fn skip_stage1_row(storage: &Storage, fstype: FormatType, boot_disk: Option<DeviceId>) -> bool {
    if storage.bootloader.skip {
        tracing::info!(fstype = %fstype, "skipping bootloader partition, the bootloader is skipped");
        return true;
    }
    let Some(boot_disk) = boot_disk else {
        return false;
    };
    let present = storage
        .tree
        .partitions_of(boot_disk)
        .iter()
        .any(|p| p.format.kind == fstype);
    if present {
        tracing::info!(fstype = %fstype, "skipping bootloader partition, one already exists");
        return true;
    }
    if fstype == FormatType::BiosBoot && !needs_biosboot(storage, boot_disk) {
        tracing::info!("skipping biosboot partition, the boot disk is not GPT");
        return true;
    }
    false
}

/// New partitions for the partition rows of `requests`.
pub fn schedule_partitions(
    storage: &mut Storage,
    disks: &[DeviceId],
    implicit: &[DeviceId],
    scheme: AutoPartScheme,
    requests: &[PartSpec],
    luks: Option<&LuksParams>,
) -> Result<Vec<DeviceId>> {
    let boot_disk = storage.stage1_disk().filter(|d| disks.contains(d));
    let mut created = Vec::new();
    for request in requests {
        if !request.applies_to(scheme) || request.is_volume(scheme) {
            continue;
        }
        let fstype = request
            .fstype
            .unwrap_or_else(|| storage.default_fstype_for(request.mountpoint.as_deref()));

        let stage1 = stage1_row_type(storage, request, fstype);
        if stage1 && skip_stage1_row(storage, fstype, boot_disk) {
            continue;
        }

        let free = storage.get_disk_free_space(disks);
        if request.required_space > 0 && request.required_space > free {
            tracing::info!(
                request = %request.describe(),
                required = request.required_space,
                free,
                "skipping request, not enough free space"
            );
            continue;
        }
        let largest = largest_free_region(storage, disks);
        if request.size > largest {
            return Err(StorageError::not_enough_free_space(format!(
                "Not enough free space on disks for {} ({} needed, {} available)",
                request.describe(),
                bytes_to_pretty(&request.size, false),
                bytes_to_pretty(&largest, false)
            )));
        }

        let mut format = Format::new(fstype);
        if let Some(mountpoint) = &request.mountpoint {
            format = format.with_mountpoint(mountpoint.clone());
        }
        let target_disks = match (stage1, boot_disk) {
            (true, Some(boot_disk)) => vec![boot_disk],
            _ => disks.to_vec(),
        };
        let partition = storage.new_partition(NewPartition {
            format: format.clone(),
            size: request.size,
            grow: request.grow,
            max_size: request.max_size,
            disks: target_disks,
            ..Default::default()
        })?;
        let id = match luks.filter(|_| request.encrypted) {
            Some(params) => create_encrypted(storage, partition, params.clone(), format)?.1,
            None => storage.create_device(partition)?,
        };
        created.push(id);

        let smallest_implicit = implicit
            .iter()
            .filter_map(|id| storage.tree.get(*id))
            .map(|d| d.size)
            .min();
        if let Some(smallest) = smallest_implicit
            && request.size + smallest > largest
        {
            tracing::debug!("shrinking implicit partitions to make room for {}", request.describe());
            for id in implicit {
                if storage.tree.contains(*id) {
                    storage.resize_device(*id, IMPLICIT_FALLBACK_SIZE)?;
                }
            }
        }
    }
    Ok(created)
}

/// The container of `scheme` over the implicit partitions and the volume
/// rows of `requests` inside it.
pub fn schedule_volumes(
    storage: &mut Storage,
    implicit: &[DeviceId],
    scheme: AutoPartScheme,
    requests: &[PartSpec],
) -> Result<Vec<DeviceId>> {
    let volumes: Vec<&PartSpec> = requests
        .iter()
        .filter(|r| r.applies_to(scheme) && r.is_volume(scheme))
        .collect();
    if scheme == AutoPartScheme::Plain || volumes.is_empty() || implicit.is_empty() {
        return Ok(Vec::new());
    }

    let mut members = Vec::new();
    for id in implicit {
        let Some(device) = storage.tree.get(*id) else {
            continue;
        };
        if device.format.kind == FormatType::Luks {
            let mapping = storage.new_luks(*id, Format::new(container_member_format(scheme)))?;
            members.push(storage.create_device(mapping)?);
        } else {
            members.push(*id);
        }
    }

    let container = if scheme == AutoPartScheme::Btrfs {
        let volume = storage.new_btrfs(NewBtrfs {
            parents: members,
            format: Format::new(FormatType::Btrfs),
            ..Default::default()
        })?;
        storage.create_device(volume)?
    } else {
        let vg = storage.new_vg(NewVg {
            parents: members,
            ..Default::default()
        })?;
        storage.create_device(vg)?
    };

    let pool = if volumes.iter().any(|r| r.is_lvm_thin_volume(scheme)) {
        let thin_total: u64 = volumes
            .iter()
            .filter(|r| r.is_lvm_thin_volume(scheme))
            .map(|r| r.size)
            .sum();
        let pool = storage.new_lv(NewLv {
            name: Some("pool00".to_string()),
            size: thin_total,
            grow: true,
            role: LvRole::ThinPool,
            ..NewLv::new(container)
        })?;
        Some(storage.create_device(pool)?)
    } else {
        None
    };

    let mut created = Vec::new();
    for request in volumes {
        let container_size = storage.tree.get(container).map(|d| d.size).unwrap_or(0);
        if request.required_space > container_size {
            tracing::info!(
                request = %request.describe(),
                required = request.required_space,
                container_size,
                "skipping volume, the container is too small"
            );
            continue;
        }
        let fstype = match (request.fstype, scheme) {
            (Some(fstype), _) => fstype,
            (None, AutoPartScheme::Btrfs) => FormatType::Btrfs,
            (None, _) => storage.default_fstype_for(request.mountpoint.as_deref()),
        };
        let mut format = Format::new(fstype);
        if let Some(mountpoint) = &request.mountpoint {
            format = format.with_mountpoint(mountpoint.clone());
        }

        let device = if request.is_btrfs_subvolume(scheme) {
            storage.new_btrfs(NewBtrfs {
                parents: vec![container],
                format,
                subvol: true,
                ..Default::default()
            })?
        } else {
            let thin = request.is_lvm_thin_volume(scheme);
            let parent = match (thin, pool) {
                (true, Some(pool)) => pool,
                _ => container,
            };
            storage.new_lv(NewLv {
                format,
                size: request.size,
                grow: request.grow,
                max_size: request.max_size,
                role: if thin { LvRole::Thin } else { LvRole::Plain },
                ..NewLv::new(parent)
            })?
        };
        created.push(storage.create_device(device)?);
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use storage_types::{DiskLabelType, GIB, PlatformKind};

    use super::*;
    use crate::test_support::{disk, partition, storage};

    fn root_spec() -> PartSpec {
        PartSpec::builder()
            .mountpoint("/")
            .size(GIB)
            .grow(true)
            .lv(true)
            .thin(true)
            .btr(true)
            .build()
    }

    #[test]
    fn candidate_disks_need_room() {
        let mut storage = storage(PlatformKind::X86);
        assert_eq!(get_candidate_disks(&storage).unwrap_err(), StorageError::no_disks());

        let sda = disk(&mut storage, "sda", 20 * GIB, Some(DiskLabelType::Gpt));
        partition(&mut storage, sda, 1, MIB, 20 * GIB - 2 * MIB - 200 * MIB, Format::new(FormatType::Ext4));
        let err = get_candidate_disks(&storage).unwrap_err();
        assert_eq!(err.kind, storage_contracts::StorageErrorKind::InsufficientResources);

        let sdb = disk(&mut storage, "sdb", 20 * GIB, Some(DiskLabelType::Gpt));
        assert_eq!(get_candidate_disks(&storage).unwrap(), vec![sdb]);
    }

    #[test]
    fn plain_scheme_has_no_implicit_disks() {
        let mut storage = storage(PlatformKind::X86);
        let sda = disk(&mut storage, "sda", 20 * GIB, Some(DiskLabelType::Msdos));
        let requests = vec![root_spec()];
        assert!(get_disks_for_implicit_partitions(&storage, &[sda], AutoPartScheme::Plain, &requests).is_empty());
        assert_eq!(
            get_disks_for_implicit_partitions(&storage, &[sda], AutoPartScheme::Lvm, &requests),
            vec![sda]
        );
    }

    #[test]
    fn full_mac_label_gets_no_implicit_partition() {
        let mut storage = storage(PlatformKind::NewWorldPpc);
        let sda = disk(&mut storage, "sda", 200 * GIB, Some(DiskLabelType::Mac));
        let max = DiskLabelType::Mac.max_primary_partitions();
        for n in 1..max {
            partition(&mut storage, sda, n, n as u64 * GIB, 512 * MIB, Format::new(FormatType::Ext4));
        }
        let requests = vec![PartSpec::builder().mountpoint("/boot").size(GIB).build(), root_spec()];
        assert!(get_disks_for_implicit_partitions(&storage, &[sda], AutoPartScheme::Lvm, &requests).is_empty());
    }

    #[test]
    fn oversized_request_is_rejected() {
        let mut storage = storage(PlatformKind::X86);
        let sda = disk(&mut storage, "sda", 10 * GIB, Some(DiskLabelType::Gpt));
        let requests = vec![PartSpec::builder().mountpoint("/").size(20 * GIB).build()];
        let err = schedule_partitions(&mut storage, &[sda], &[], AutoPartScheme::Plain, &requests, None)
            .unwrap_err();
        assert_eq!(err.kind, storage_contracts::StorageErrorKind::InsufficientResources);
    }

    #[test]
    fn biosboot_is_skipped_on_msdos() {
        let mut storage = storage(PlatformKind::X86);
        let sda = disk(&mut storage, "sda", 10 * GIB, Some(DiskLabelType::Msdos));
        let requests = storage.platform().partitions.clone();
        let created =
            schedule_partitions(&mut storage, &[sda], &[], AutoPartScheme::Lvm, &requests, None).unwrap();
        assert_eq!(created.len(), 1);
        let boot = storage.tree.get(created[0]).unwrap();
        assert_eq!(boot.format.mountpoint.as_deref(), Some("/boot"));
        assert_eq!(boot.format.kind, storage.settings.default_boot_fstype);
    }

    #[test]
    fn thin_volumes_go_to_a_pool() {
        let mut storage = storage(PlatformKind::Efi);
        let vda = disk(&mut storage, "vda", 20 * GIB, Some(DiskLabelType::Gpt));
        let requests = vec![root_spec()];
        let implicit =
            schedule_implicit_partitions(&mut storage, &[vda], AutoPartScheme::LvmThinp, &requests, None).unwrap();
        storage.do_partitioning(None).unwrap();
        let volumes = schedule_volumes(&mut storage, &implicit, AutoPartScheme::LvmThinp, &requests).unwrap();
        let root = storage.tree.get(volumes[0]).unwrap();
        assert!(root.is_thin_lv());
        let pool = storage.tree.get(root.parents[0]).unwrap();
        assert!(pool.is_thin_pool());
        assert_eq!(pool.short_name(), "pool00");
    }
}
