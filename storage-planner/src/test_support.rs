// SPDX-License-Identifier: GPL-3.0-only

//! Graph builders shared by the unit tests of the planners.

use storage_devicetree::{DeviceTree, Storage, StorageSettings};
use storage_types::{
    Device, DeviceId, DeviceKind, DiskData, DiskLabelType, Format, FormatType, PartitionData,
    PartitionFlag, Platform, PlatformKind,
};

pub fn storage(kind: PlatformKind) -> Storage {
    let mut settings = StorageSettings::new(Platform::new(kind));
    settings.total_memory = 4 * storage_types::GIB;
    Storage::new(DeviceTree::new(), settings)
}

pub fn disk(storage: &mut Storage, name: &str, size: u64, label: Option<DiskLabelType>) -> DeviceId {
    let format = match label {
        Some(label) => Format::new(FormatType::DiskLabel).with_disklabel(label),
        None => Format::none(),
    };
    storage
        .tree
        .add_device(
            Device::new(name, size, DeviceKind::Disk(DiskData::default()))
                .with_format(format)
                .into_existing(),
        )
        .unwrap()
}

pub fn partition(
    storage: &mut Storage,
    disk: DeviceId,
    number: u32,
    start: u64,
    size: u64,
    format: Format,
) -> DeviceId {
    partition_with_flags(storage, disk, number, start, size, format, Vec::new())
}

pub fn partition_with_flags(
    storage: &mut Storage,
    disk: DeviceId,
    number: u32,
    start: u64,
    size: u64,
    format: Format,
    flags: Vec<PartitionFlag>,
) -> DeviceId {
    let disk_name = storage.tree.get(disk).unwrap().name.clone();
    let mut device = Device::new(
        storage_devicetree::partition_name(&disk_name, number),
        size,
        DeviceKind::Partition(PartitionData {
            number: Some(number),
            start,
            flags,
            ..Default::default()
        }),
    )
    .with_parents(vec![disk])
    .with_format(format)
    .into_existing();
    device.resizable = true;
    device.format.resizable = true;
    device.original_format.resizable = true;
    storage.tree.add_device(device).unwrap()
}

pub fn find(storage: &Storage, name: &str) -> DeviceId {
    storage
        .tree
        .get_device_by_name(name, true)
        .unwrap_or_else(|| panic!("no device named {name}"))
        .id
}

pub fn mounted(storage: &Storage, mountpoint: &str) -> Device {
    let id = storage
        .mountpoints()
        .get(mountpoint)
        .copied()
        .unwrap_or_else(|| panic!("nothing mounted at {mountpoint}"));
    storage.tree.get(id).unwrap().clone()
}
