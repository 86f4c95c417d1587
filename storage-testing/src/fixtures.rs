// SPDX-License-Identifier: GPL-3.0-only

//! Graph builders and lookups shared by the integration tests.

use storage_devicetree::{DeviceTree, Storage, StorageSettings, partition_name};
use storage_types::{
    Device, DeviceId, DeviceKind, DiskData, DiskLabelType, Format, FormatType, PartitionData,
    Platform, PlatformKind,
};

/// Empty storage for `platform` with 4 GiB of memory.
pub fn storage(platform: PlatformKind) -> Storage {
    let mut settings = StorageSettings::new(Platform::new(platform));
    settings.total_memory = 4 * storage_types::GIB;
    Storage::new(DeviceTree::new(), settings)
}

pub fn disk(storage: &mut Storage, name: &str, size: u64, label: Option<DiskLabelType>) -> DeviceId {
    let format = match label {
        Some(label) => Format::new(FormatType::DiskLabel).with_disklabel(label),
        None => Format::none(),
    };
    let device = Device::new(name, size, DeviceKind::Disk(DiskData::default()))
        .with_format(format)
        .into_existing();
    storage
        .tree
        .add_device(device)
        .unwrap_or_else(|e| panic!("adding disk {name}: {e}"))
}

/// An existing, resizable partition.
pub fn partition(
    storage: &mut Storage,
    disk: DeviceId,
    number: u32,
    start: u64,
    size: u64,
    format: Format,
) -> DeviceId {
    let disk_name = device(storage, disk).name.clone();
    let mut device = Device::new(
        partition_name(&disk_name, number),
        size,
        DeviceKind::Partition(PartitionData {
            number: Some(number),
            start,
            ..Default::default()
        }),
    )
    .with_parents(vec![disk])
    .with_format(format)
    .into_existing();
    device.resizable = true;
    device.format.resizable = device.format.kind.is_resizable();
    device.original_format.resizable = device.format.resizable;
    storage
        .tree
        .add_device(device)
        .unwrap_or_else(|e| panic!("adding partition {number} of {disk_name}: {e}"))
}

pub fn device(storage: &Storage, id: DeviceId) -> &Device {
    storage
        .tree
        .get(id)
        .unwrap_or_else(|| panic!("no device with id {id:?}"))
}

pub fn find(storage: &Storage, name: &str) -> DeviceId {
    storage
        .tree
        .get_device_by_name(name, true)
        .unwrap_or_else(|| panic!("no device named {name}"))
        .id
}

pub fn mounted<'a>(storage: &'a Storage, mountpoint: &str) -> &'a Device {
    let id = storage
        .mountpoints()
        .get(mountpoint)
        .copied()
        .unwrap_or_else(|| panic!("nothing mounted at {mountpoint}"));
    device(storage, id)
}

/// Devices the plan creates, in graph order.
pub fn created(storage: &Storage) -> Vec<&Device> {
    storage.tree.devices().into_iter().filter(|d| !d.exists).collect()
}

/// Names of the devices `storage` would create, destroy or change, in the
/// order the backend would see them.
pub fn action_log(storage: &Storage) -> Vec<String> {
    storage
        .tree
        .actions()
        .sorted()
        .iter()
        .map(|action| format!("{} {}", action.type_name(), action.device_name))
        .collect()
}
