// SPDX-License-Identifier: GPL-3.0-only

//! Automatic partitioning
//!
//! Lays out the default partitioning table of the platform and product on
//! the selected disks using one of the [`AutoPartScheme`]s.

use storage_contracts::{StorageError, TaskMonitor};
use storage_devicetree::{Result, Storage};
use storage_types::{AutoPartScheme, DeviceId, FormatType, PartSpec, PartitioningRequest};

use crate::bootloader::find_stage1_device;
use crate::defaults::get_default_partitioning;
use crate::luks::luks_format_args;
use crate::policy::clear_partitions;
use crate::reuse::{provided_mount_points, reuse_existing_installation};
use crate::schedule::{
    get_candidate_disks, get_disks_for_implicit_partitions, schedule_implicit_partitions,
    schedule_partitions, schedule_volumes,
};
use crate::swap::suggest_swap_size;

/// Key a row is excluded or reused by: its mount point, or `swap`.
fn spec_key(spec: &PartSpec) -> Option<String> {
    match (&spec.mountpoint, spec.is_swap()) {
        (Some(mountpoint), _) => Some(mountpoint.clone()),
        (None, true) => Some("swap".to_string()),
        (None, false) => None,
    }
}

/// Rows of the default table that this request still has to create.
pub fn get_requested_partitioning(storage: &Storage, request: &PartitioningRequest) -> Vec<PartSpec> {
    let provided = provided_mount_points(request);
    let mut requests: Vec<PartSpec> = get_default_partitioning(&storage.settings)
        .into_iter()
        .filter(|spec| spec.applies_to(request.scheme))
        .filter(|spec| {
            spec_key(spec).is_none_or(|key| {
                !request.excluded_mount_points.contains(&key) && !provided.contains(&key)
            })
        })
        .collect();

    let swap_wanted = !request.excluded_mount_points.iter().any(|m| m == "swap");
    if request.hibernation && swap_wanted && !requests.iter().any(PartSpec::is_swap) {
        requests.push(
            PartSpec::builder()
                .fstype(FormatType::Swap)
                .lv(true)
                .encrypted(true)
                .build(),
        );
    }

    let disk_space = storage.get_disk_free_space(&[]);
    for spec in requests.iter_mut().filter(|s| s.is_swap()) {
        spec.size = suggest_swap_size(
            storage.settings.total_memory,
            request.hibernation,
            Some(disk_space),
        );
        spec.grow = false;
        spec.max_size = None;
    }
    requests
}

/// Plan a complete installation layout into `storage`.
pub fn do_autopart(storage: &mut Storage, request: &PartitioningRequest, monitor: &dyn TaskMonitor) -> Result<()> {
    let scheme = request.scheme;
    tracing::info!(scheme = scheme.as_str(), encrypted = request.encrypted, "automatic partitioning");

    if let Some(fstype) = request.fstype {
        if !fstype.is_filesystem() || !fstype.is_formattable() {
            return Err(StorageError::invalid_input(format!(
                "{fstype} cannot be used as the default file system"
            )));
        }
        storage.settings.default_fstype = fstype;
    }
    let luks = luks_format_args(storage, request)?;

    monitor.check_cancel()?;
    if request.is_reuse() {
        monitor.report_progress("Reusing the existing installation");
        reuse_existing_installation(storage, request)?;
    } else {
        monitor.report_progress("Clearing disks");
        clear_partitions(storage)?;
    }

    let requests = get_requested_partitioning(storage, request);
    tracing::debug!(
        rows = ?requests.iter().map(PartSpec::describe).collect::<Vec<_>>(),
        "requested partitioning"
    );

    monitor.check_cancel()?;
    monitor.report_progress("Scheduling partitions");
    let disks = get_candidate_disks(storage)?;
    let implicit_disks = get_disks_for_implicit_partitions(storage, &disks, scheme, &requests);
    let implicit = schedule_implicit_partitions(storage, &implicit_disks, scheme, &requests, luks.as_ref())?;
    let mut created = schedule_partitions(storage, &disks, &implicit, scheme, &requests, luks.as_ref())?;

    let boot_disk = storage.stage1_disk();
    storage.do_partitioning(boot_disk)?;

    monitor.check_cancel()?;
    monitor.report_progress("Scheduling volumes");
    created.extend(schedule_volumes(storage, &implicit, scheme, &requests)?);
    if scheme.is_lvm() {
        storage.grow_lvm();
    }

    let swaps: Vec<DeviceId> = created
        .iter()
        .copied()
        .filter(|id| storage.tree.get(*id).is_some_and(|d| d.format.kind == FormatType::Swap))
        .collect();
    storage.set_fstab_swaps(&swaps);
    find_stage1_device(storage);

    tracing::info!(actions = storage.tree.actions().len(), "automatic partitioning scheduled");
    Ok(())
}
