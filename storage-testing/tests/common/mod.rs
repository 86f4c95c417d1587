// SPDX-License-Identifier: GPL-3.0-only
#![allow(dead_code)]

use std::sync::Arc;

use storage_contracts::NullMonitor;
use storage_devicetree::{DeviceTree, Storage};
use storage_planner::bootloader::{find_stage1_device, is_valid_stage1_device};
use storage_sys::{DiscoveredRoot, Discoverer, MountingReader};
use storage_testing::{InMemoryBackend, load_by_name};
use storage_types::{Device, DeviceId, FormatType};

pub fn lab(name: &str) -> Storage {
    load_by_name(name).unwrap().storage().unwrap()
}

/// Run discovery over `storage` with files served by `backend`.
pub fn discover(storage: &mut Storage, backend: Arc<InMemoryBackend>) -> Vec<DiscoveredRoot> {
    let mount_point = tempfile::tempdir().unwrap();
    let reader = MountingReader::new(backend.clone(), mount_point.path());
    let found = Discoverer::new(&reader)
        .find_existing_installations(storage, &NullMonitor)
        .unwrap();
    assert!(backend.mounted().is_empty(), "left mounted: {:?}", backend.mounted());
    assert!(backend.active().is_empty(), "left active: {:?}", backend.active());
    found
}

/// Storage of lab `name` with the installations on it discovered.
pub fn discovered_lab(name: &str) -> Storage {
    let spec = load_by_name(name).unwrap();
    let mut storage = spec.storage().unwrap();
    let backend = Arc::new(InMemoryBackend::from_spec(&spec).unwrap());
    discover(&mut storage, backend);
    storage
}

/// The graph a rescan would find once the plan has been carried out.
pub fn as_installed(storage: &Storage) -> Storage {
    let devices = storage
        .tree
        .all_devices()
        .into_iter()
        .cloned()
        .map(Device::into_existing);
    let mut installed = Storage::new(DeviceTree::from_devices(devices).unwrap(), storage.settings.clone());
    installed.selected_disks = storage.selected_disks.clone();
    installed
}

fn is_encrypted(storage: &Storage, id: DeviceId) -> bool {
    std::iter::once(id)
        .chain(storage.tree.ancestors(id))
        .filter_map(|id| storage.tree.get(id))
        .any(|d| d.is_luks() || d.format.kind == FormatType::Luks)
}

/// What every plan must satisfy before it is applied.
pub fn assert_plan_invariants(storage: &mut Storage) {
    assert!(
        storage.tree.duplicate_mountpoints().is_empty(),
        "duplicate mount points: {:?}",
        storage.tree.duplicate_mountpoints()
    );

    for (mountpoint, id) in storage.mountpoints() {
        if mountpoint.starts_with("/boot") {
            assert!(!is_encrypted(storage, id), "{mountpoint} is encrypted");
        }
    }

    for lv in storage.tree.lvs() {
        if lv.is_thin_lv() {
            assert_ne!(lv.format.kind, FormatType::Luks, "thin volume {} is encrypted", lv.name);
        }
    }

    let stage1 = find_stage1_device(storage).expect("no stage1 device");
    assert!(is_valid_stage1_device(storage, stage1));

    for device in storage.tree.devices() {
        if device.exists || !(device.is_partition() || device.is_lv()) {
            continue;
        }
        assert!(
            device.min_size() <= device.size && device.size <= device.max_size(),
            "{} has size {} outside {}..={}",
            device.name,
            device.size,
            device.min_size(),
            device.max_size()
        );
    }
}
