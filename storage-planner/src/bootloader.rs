// SPDX-License-Identifier: GPL-3.0-only

//! Bootloader first stage placement

use storage_contracts::ValidationReport;
use storage_devicetree::Storage;
use storage_types::{DeviceId, DiskLabelType, FormatType, PlatformKind};

/// Whether the device satisfies the platform's first stage constraints.
pub fn is_valid_stage1_device(storage: &Storage, id: DeviceId) -> bool {
    let Some(device) = storage.tree.get(id) else {
        return false;
    };
    let constraints = &storage.platform().stage1_constraints;

    if !constraints.device_types.contains(&device.class()) {
        return false;
    }
    if device.is_disk() && !storage.tree.is_partitioned(id) {
        return false;
    }
    if !constraints.format_types.is_empty() && !constraints.format_types.contains(&device.format.kind) {
        return false;
    }
    if let Some(max_end) = constraints.max_end {
        let start = device.partition().map(|p| p.start).unwrap_or(0);
        if start + device.size > max_end {
            return false;
        }
    }
    if let Some(md) = device.md() {
        let metadata = md.metadata_version.as_deref().unwrap_or("1.2");
        if !constraints.raid_levels.contains(&md.level)
            || !constraints.raid_metadata.iter().any(|m| m == metadata)
        {
            return false;
        }
    }
    if !constraints.mountpoints.is_empty() {
        let mounted = device
            .format
            .mountpoint
            .as_ref()
            .is_some_and(|m| constraints.mountpoints.contains(m));
        if !mounted {
            return false;
        }
    }
    true
}

/// Devices that could hold the first stage, those on the boot disk first.
pub fn stage1_candidates(storage: &Storage) -> Vec<DeviceId> {
    let disks = storage.disks();
    let boot_disk = storage.stage1_disk();
    let mut candidates: Vec<(bool, DeviceId)> = storage
        .devices()
        .into_iter()
        .filter(|d| {
            let on = storage.tree.disks_of(d.id);
            !on.is_empty() && on.iter().all(|disk| disks.contains(disk))
        })
        .map(|d| {
            let on_boot_disk = boot_disk.is_some_and(|b| storage.tree.disks_of(d.id).contains(&b));
            (!on_boot_disk, d.id)
        })
        .collect();
    // stable: keeps the path order within each group
    candidates.sort_by_key(|(other_disk, _)| *other_disk);
    candidates.into_iter().map(|(_, id)| id).collect()
}

/// Pick the first stage device and remember it in the bootloader state.
pub fn find_stage1_device(storage: &mut Storage) -> Option<DeviceId> {
    let found = stage1_candidates(storage)
        .into_iter()
        .find(|id| is_valid_stage1_device(storage, *id));
    storage.bootloader.stage1_device = found;
    if let Some(id) = found
        && let Some(device) = storage.tree.get(id)
    {
        tracing::debug!(device = %device.name, "selected bootloader stage1 device");
    }
    found
}

fn has_biosboot(storage: &Storage, disk: DeviceId) -> bool {
    storage
        .tree
        .partitions_of(disk)
        .iter()
        .any(|p| p.format.kind == FormatType::BiosBoot)
}

/// Whether a BIOS install on this disk needs a BIOS boot partition.
pub fn needs_biosboot(storage: &Storage, disk: DeviceId) -> bool {
    storage.platform().kind == PlatformKind::X86
        && storage
            .tree
            .get(disk)
            .is_some_and(|d| d.format.disklabel == Some(DiskLabelType::Gpt))
}

/// Report problems with the bootloader placement of the current plan.
pub fn check_stage1(storage: &Storage) -> ValidationReport {
    let mut report = ValidationReport::default();
    if storage.bootloader.skip {
        return report;
    }
    let platform = storage.platform();
    let stage1 = storage
        .bootloader
        .stage1_device
        .filter(|id| is_valid_stage1_device(storage, *id))
        .or_else(|| {
            stage1_candidates(storage)
                .into_iter()
                .find(|id| is_valid_stage1_device(storage, *id))
        });
    let Some(stage1) = stage1 else {
        report.error(format!(
            "No valid boot loader target device found. {}",
            platform.stage1_suggestion
        ));
        return report;
    };

    if let Some(disk) = storage.tree.disks_of(stage1).first().copied()
        && storage.tree.get(stage1).is_some_and(|d| d.is_disk())
        && needs_biosboot(storage, disk)
        && !has_biosboot(storage, disk)
    {
        report.error(format!(
            "Your BIOS-based system needs a special partition to boot from a GPT disk label. {}",
            platform.stage1_suggestion
        ));
    }
    report
}

#[cfg(test)]
mod tests {
    use storage_types::{DiskLabelType, Format, GIB, MIB};

    use super::*;
    use crate::test_support::{disk, partition, storage};

    #[test]
    fn efi_stage1_is_the_mounted_esp() {
        let mut storage = storage(PlatformKind::Efi);
        let vda = disk(&mut storage, "vda", 20 * GIB, Some(DiskLabelType::Gpt));
        let unmounted = partition(&mut storage, vda, 1, MIB, 500 * MIB, Format::new(FormatType::Efi));
        assert!(!is_valid_stage1_device(&storage, unmounted));
        let esp = partition(
            &mut storage,
            vda,
            2,
            501 * MIB,
            500 * MIB,
            Format::new(FormatType::Efi).with_mountpoint("/boot/efi"),
        );
        assert_eq!(find_stage1_device(&mut storage), Some(esp));
        assert_eq!(storage.bootloader.stage1_device, Some(esp));
        assert!(check_stage1(&storage).success());
    }

    #[test]
    fn prep_must_end_below_4_gib() {
        let mut storage = storage(PlatformKind::IpSeriesPpc);
        let sda = disk(&mut storage, "sda", 20 * GIB, Some(DiskLabelType::Msdos));
        let late = partition(&mut storage, sda, 1, 5 * GIB, 4 * MIB, Format::new(FormatType::PrepBoot));
        assert!(!is_valid_stage1_device(&storage, late));
        let early = partition(&mut storage, sda, 2, MIB, 4 * MIB, Format::new(FormatType::PrepBoot));
        assert!(is_valid_stage1_device(&storage, early));
    }

    #[test]
    fn bios_on_gpt_needs_biosboot() {
        let mut storage = storage(PlatformKind::X86);
        let sda = disk(&mut storage, "sda", 20 * GIB, Some(DiskLabelType::Gpt));
        let report = check_stage1(&storage);
        assert_eq!(report.errors.len(), 1);
        partition(&mut storage, sda, 1, MIB, MIB, Format::new(FormatType::BiosBoot));
        assert!(check_stage1(&storage).success());
    }

    #[test]
    fn skipped_bootloader_is_not_checked() {
        let mut storage = storage(PlatformKind::Efi);
        disk(&mut storage, "vda", 20 * GIB, Some(DiskLabelType::Gpt));
        assert!(!check_stage1(&storage).success());
        storage.bootloader.skip = true;
        assert!(check_stage1(&storage).success());
    }
}
