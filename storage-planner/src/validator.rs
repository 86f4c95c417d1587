// SPDX-License-Identifier: GPL-3.0-only

//! Whole-graph checks run on a finished plan
//!
//! Each check appends to a [`ValidationReport`]; errors make the plan
//! unusable, warnings are shown to the user.

use storage_contracts::ValidationReport;
use storage_devicetree::Storage;
use storage_types::{DeviceId, MIB, bytes_to_pretty};

use crate::bootloader::check_stage1;

/// Smallest root file system that does not earn a warning.
pub const MIN_ROOT_SIZE: u64 = 250 * MIB;

/// Mount points that need a Linux native file system.
pub const LINUX_MOUNT_POINTS: &[&str] = &["/", "/boot", "/usr", "/var", "/tmp", "/home", "/opt"];

pub type Check = fn(&Storage, &mut ValidationReport);

/// Ordered set of checks applied to a plan.
pub struct StorageChecker {
    checks: Vec<(&'static str, Check)>,
}

impl Default for StorageChecker {
    fn default() -> Self {
        Self {
            checks: vec![
                ("mount points", check_mount_points),
                ("encryption", check_encryption),
                ("bootloader", check_bootloader),
                ("sizes", check_sizes),
                ("containers", check_containers),
                ("formats", check_formats),
                ("raid", check_raid),
                ("swap", check_swap),
            ],
        }
    }
}

impl StorageChecker {
    pub fn add_check(&mut self, name: &'static str, check: Check) {
        self.checks.push((name, check));
    }

    pub fn check(&self, storage: &Storage) -> ValidationReport {
        let mut report = ValidationReport::default();
        for (name, check) in &self.checks {
            let before = report.errors.len();
            check(storage, &mut report);
            let failed = report.errors.len() - before;
            if failed > 0 {
                tracing::debug!(check = name, errors = failed, "storage check failed");
            }
        }
        tracing::info!(
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "storage checked"
        );
        report
    }
}

fn name_of(storage: &Storage, id: DeviceId) -> &str {
    storage.tree.get(id).map(|d| d.name.as_str()).unwrap_or("?")
}

fn is_encrypted(storage: &Storage, id: DeviceId) -> bool {
    std::iter::once(id)
        .chain(storage.tree.ancestors(id))
        .filter_map(|a| storage.tree.get(a))
        .any(|a| a.is_luks())
}

fn check_mount_points(storage: &Storage, report: &mut ValidationReport) {
    let mounts = storage.mountpoints();
    let mut required: Vec<&str> = vec!["/"];
    for mountpoint in &storage.settings.required_mount_points {
        if !required.contains(&mountpoint.as_str()) {
            required.push(mountpoint);
        }
    }
    for mountpoint in required {
        if !mounts.contains_key(mountpoint) {
            report.error(format!("You have not defined a {mountpoint} partition."));
        }
    }
    for mountpoint in storage.tree.duplicate_mountpoints() {
        report.error(format!("The mount point {mountpoint} is used by more than one device."));
    }
    for (mountpoint, id) in &mounts {
        if !mountpoint.starts_with('/') {
            report.error(format!(
                "The mount point {mountpoint} of {} must start with a /.",
                name_of(storage, *id)
            ));
        }
    }
}

fn check_encryption(storage: &Storage, report: &mut ValidationReport) {
    for (mountpoint, id) in storage.mountpoints() {
        if mountpoint.starts_with("/boot") && is_encrypted(storage, id) {
            report.error(format!("{mountpoint} cannot be on an encrypted block device."));
        }
    }
    if let Some(stage1) = storage.bootloader.stage1_device
        && is_encrypted(storage, stage1)
    {
        report.error(format!(
            "The boot loader cannot be installed on the encrypted device {}.",
            name_of(storage, stage1)
        ));
    }
    for lv in storage.tree.lvs().into_iter().filter(|lv| lv.is_thin_lv()) {
        let encrypted_child = storage
            .tree
            .children(lv.id)
            .into_iter()
            .any(|c| storage.tree.get(c).is_some_and(|d| d.is_luks()));
        if encrypted_child {
            report.error(format!("The thin volume {} cannot be encrypted.", lv.name));
        }
    }
}

fn check_bootloader(storage: &Storage, report: &mut ValidationReport) {
    report.merge(check_stage1(storage));
}

fn check_sizes(storage: &Storage, report: &mut ValidationReport) {
    for device in storage.devices() {
        if device.exists || !(device.is_partition() || device.is_lv()) || device.is_extended() {
            continue;
        }
        let min = storage.tree.min_size(device.id);
        let max = storage.tree.max_size(device.id);
        if device.size < min {
            report.error(format!(
                "{} is {}, smaller than its minimum of {}.",
                device.name,
                bytes_to_pretty(&device.size, false),
                bytes_to_pretty(&min, false)
            ));
        } else if device.size > max {
            report.error(format!(
                "{} is {}, larger than its maximum of {}.",
                device.name,
                bytes_to_pretty(&device.size, false),
                bytes_to_pretty(&max, false)
            ));
        }
    }

    if let Some(root) = storage.mountpoints().get("/").and_then(|id| storage.tree.get(*id))
        && !root.is_btrfs()
        && root.size < MIN_ROOT_SIZE
    {
        report.warning(format!(
            "Your root partition is less than {}, which is usually too small to install Linux.",
            bytes_to_pretty(&MIN_ROOT_SIZE, false)
        ));
    }
}

fn check_containers(storage: &Storage, report: &mut ValidationReport) {
    let tree = &storage.tree;
    for vg in tree.vgs() {
        let available = vg.size.saturating_sub(tree.vg_reserved_space(vg.id));
        let used = tree.vg_used_space(vg.id);
        if used > available {
            report.error(format!(
                "The volume group {} needs {} but only {} is available.",
                vg.name,
                bytes_to_pretty(&used, false),
                bytes_to_pretty(&available, false)
            ));
        }
    }
    for pool in tree.thin_pools() {
        if pool.exists {
            continue;
        }
        let metadata = tree.lv_metadata_size(pool);
        if metadata == 0 {
            report.error(format!("The thin pool {} has no room for its metadata.", pool.name));
        }
        let promised: u64 = tree
            .children(pool.id)
            .into_iter()
            .filter_map(|c| tree.get(c))
            .map(|lv| lv.size)
            .sum();
        if promised > pool.size {
            report.warning(format!(
                "The thin pool {} is overcommitted: its volumes may use {} of {}.",
                pool.name,
                bytes_to_pretty(&promised, false),
                bytes_to_pretty(&pool.size, false)
            ));
        }
    }
}

fn check_formats(storage: &Storage, report: &mut ValidationReport) {
    for device in storage.devices() {
        let format = &device.format;
        if !format.exists && !format.is_none() && !format.is_formattable() {
            report.error(format!("{} cannot be created on {}.", format.kind, device.name));
        }
        if let Some(mountpoint) = &format.mountpoint
            && LINUX_MOUNT_POINTS.contains(&mountpoint.as_str())
            && !format.is_linux_native()
        {
            report.error(format!(
                "The mount point {mountpoint} must be on a Linux file system, not {}.",
                format.kind
            ));
        }
        if !format.label_format_ok() {
            report.error(format!("The label of {} is not valid for {}.", device.name, format.kind));
        }
    }
}

fn check_raid(storage: &Storage, report: &mut ValidationReport) {
    let tree = &storage.tree;
    for array in tree.mdarrays() {
        let Some(md) = array.md() else {
            continue;
        };
        let members = array.parents.len();
        if members < md.level.min_members() {
            report.error(format!(
                "The {} array {} needs at least {} members, it has {members}.",
                md.level,
                array.name,
                md.level.min_members()
            ));
        }
    }
    for volume in tree.btrfs_volumes() {
        let Some(data) = volume.btrfs_volume() else {
            continue;
        };
        let members = volume.parents.len();
        for level in [data.data_level, data.metadata_level].into_iter().flatten() {
            if members < level.min_members() {
                report.error(format!(
                    "The {level} btrfs volume {} needs at least {} members, it has {members}.",
                    volume.name,
                    level.min_members()
                ));
            }
        }
    }
}

fn check_swap(storage: &Storage, report: &mut ValidationReport) {
    if storage.tree.swaps().is_empty() {
        report.warning("You have not specified a swap partition.");
    }
}

#[cfg(test)]
mod tests {
    use storage_contracts::NullMonitor;
    use storage_devicetree::NewMdArray;
    use storage_types::{DiskLabelType, Format, FormatType, GIB, PartitioningRequest, PlatformKind, RaidLevel};

    use super::*;
    use crate::automatic::do_autopart;
    use crate::test_support::{disk, partition, storage};

    #[test]
    fn automatic_plan_passes() {
        let mut storage = storage(PlatformKind::Efi);
        disk(&mut storage, "vda", 40 * GIB, Some(DiskLabelType::Gpt));
        do_autopart(&mut storage, &PartitioningRequest::default(), &NullMonitor).unwrap();
        let report = StorageChecker::default().check(&storage);
        assert!(report.success(), "{:?}", report.errors);
    }

    #[test]
    fn missing_root_and_duplicates() {
        let mut storage = storage(PlatformKind::X86);
        storage.bootloader.skip = true;
        let sda = disk(&mut storage, "sda", 20 * GIB, Some(DiskLabelType::Gpt));
        partition(&mut storage, sda, 1, MIB, GIB, Format::new(FormatType::Ext4).with_mountpoint("/home"));
        partition(&mut storage, sda, 2, GIB + MIB, GIB, Format::new(FormatType::Xfs).with_mountpoint("/home"));
        let report = StorageChecker::default().check(&storage);
        assert_eq!(report.errors.len(), 2, "{:?}", report.errors);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn encrypted_boot_is_an_error() {
        let mut storage = storage(PlatformKind::X86);
        storage.bootloader.skip = true;
        let sda = disk(&mut storage, "sda", 20 * GIB, Some(DiskLabelType::Gpt));
        partition(&mut storage, sda, 2, 2 * GIB, 10 * GIB, Format::new(FormatType::Ext4).with_mountpoint("/"));
        let p1 = partition(&mut storage, sda, 1, MIB, GIB, Format::new(FormatType::Luks).existing());
        let mapping = storage
            .new_luks(p1, Format::new(FormatType::Ext4).with_mountpoint("/boot"))
            .unwrap();
        storage.create_device(mapping).unwrap();
        let report = StorageChecker::default().check(&storage);
        assert!(report.errors.iter().any(|e| e.contains("/boot")), "{:?}", report.errors);
    }

    #[test]
    fn raid_needs_enough_members() {
        let mut storage = storage(PlatformKind::X86);
        storage.bootloader.skip = true;
        let sda = disk(&mut storage, "sda", 20 * GIB, Some(DiskLabelType::Gpt));
        partition(&mut storage, sda, 3, 12 * GIB, 5 * GIB, Format::new(FormatType::Ext4).with_mountpoint("/"));
        let a = partition(&mut storage, sda, 1, MIB, 5 * GIB, Format::new(FormatType::MdMember));
        let b = partition(&mut storage, sda, 2, 6 * GIB, 5 * GIB, Format::new(FormatType::MdMember));
        let array = storage.new_mdarray(NewMdArray::new(vec![a, b], RaidLevel::Raid1)).unwrap();
        let array = storage.create_device(array).unwrap();
        assert!(StorageChecker::default().check(&storage).success());

        // a member lost after the array was planned
        storage.tree.get_mut(array).unwrap().parents = vec![a];
        let report = StorageChecker::default().check(&storage);
        assert!(report.errors.iter().any(|e| e.contains("raid1")), "{:?}", report.errors);
    }

    #[test]
    fn custom_checks_run_after_the_defaults() {
        fn no_home(storage: &Storage, report: &mut ValidationReport) {
            if storage.mountpoints().contains_key("/home") {
                report.error("/home is not allowed here");
            }
        }
        let mut storage = storage(PlatformKind::X86);
        storage.bootloader.skip = true;
        let sda = disk(&mut storage, "sda", 20 * GIB, Some(DiskLabelType::Gpt));
        partition(&mut storage, sda, 1, MIB, 5 * GIB, Format::new(FormatType::Ext4).with_mountpoint("/"));
        partition(&mut storage, sda, 2, 6 * GIB, 5 * GIB, Format::new(FormatType::Ext4).with_mountpoint("/home"));
        let mut checker = StorageChecker::default();
        assert!(checker.check(&storage).success());
        checker.add_check("no home", no_home);
        assert_eq!(checker.check(&storage).errors, vec!["/home is not allowed here".to_string()]);
    }
}
