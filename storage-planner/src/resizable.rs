// SPDX-License-Identifier: GPL-3.0-only

//! Helpers for shrinking, removing and reformatting existing devices, used
//! when room is made for a new installation next to an old one.

use storage_contracts::StorageError;
use storage_devicetree::{Result, Storage};
use storage_types::{DeviceId, Format, FormatType, bytes_to_pretty};

fn lookup(storage: &Storage, spec: &str) -> Result<DeviceId> {
    storage
        .tree
        .resolve_device(spec)
        .map(|d| d.id)
        .ok_or_else(|| StorageError::unknown_device(spec))
}

fn unprotected(storage: &Storage, id: DeviceId) -> Result<()> {
    let device = storage.tree.device(id)?;
    if device.protected {
        return Err(StorageError::protected_device(&device.name));
    }
    Ok(())
}

/// Whether the device carries a partition table.
pub fn is_device_partitioned(storage: &Storage, spec: &str) -> Result<bool> {
    let id = lookup(storage, spec)?;
    Ok(storage.tree.is_partitioned(id))
}

/// Whether the device can be made smaller than it is now.
pub fn is_device_shrinkable(storage: &Storage, spec: &str) -> Result<bool> {
    let id = lookup(storage, spec)?;
    let device = storage.tree.device(id)?;
    let format_shrinkable = device.format.is_none()
        || !device.format.exists
        || device.format.kind.is_shrinkable();
    Ok(device.exists
        && !device.protected
        && device.is_resizable()
        && format_shrinkable
        && storage.tree.min_size(id) < device.size)
}

/// Smallest and largest size the device can be resized to.
pub fn get_device_size_limits(storage: &Storage, spec: &str) -> Result<(u64, u64)> {
    let id = lookup(storage, spec)?;
    let min = storage.tree.min_size(id);
    let max = storage.tree.max_size(id).max(min);
    Ok((min, max))
}

/// Shrink a device. Asking for a size that is not smaller changes nothing.
pub fn shrink_device(storage: &mut Storage, spec: &str, size: u64) -> Result<()> {
    let id = lookup(storage, spec)?;
    unprotected(storage, id)?;
    let current = storage.tree.device(id)?.size;
    let size = storage.tree.align_target_size(id, size);
    if size >= current {
        tracing::debug!(device = spec, size, current, "not shrinking to a larger size");
        return Ok(());
    }
    if !is_device_shrinkable(storage, spec)? {
        return Err(StorageError::invalid_input(format!("{spec} is not shrinkable")));
    }
    tracing::info!(device = spec, size = %bytes_to_pretty(&size, false), "shrinking device");
    storage.resize_device(id, size)
}

/// Remove a device with everything on it that no protected device needs.
/// Existing disks stay in the graph and only lose their format.
pub fn remove_device(storage: &mut Storage, spec: &str) -> Result<()> {
    let id = lookup(storage, spec)?;
    unprotected(storage, id)?;
    tracing::info!(device = spec, "removing device");
    storage.recursive_remove(id)
}

/// Give a device a new format with a mount point and label.
pub fn reformat_device(
    storage: &mut Storage,
    id: DeviceId,
    fstype: FormatType,
    mountpoint: Option<&str>,
    label: Option<&str>,
) -> Result<()> {
    unprotected(storage, id)?;
    if !fstype.is_formattable() {
        return Err(StorageError::invalid_input(format!("{fstype} cannot be created")));
    }
    let mut format = Format::new(fstype);
    if let Some(mountpoint) = mountpoint.filter(|_| fstype.is_mountable()) {
        format = format.with_mountpoint(mountpoint);
    }
    if let Some(label) = label {
        if !fstype.label_format_ok(label) {
            return Err(StorageError::invalid_input(format!(
                "Label {label} is not valid for {fstype}"
            )));
        }
        format = format.with_label(label);
    }
    storage.format_device(id, format)
}
