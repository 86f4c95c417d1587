// SPDX-License-Identifier: GPL-3.0-only

//! Properties every plan and every graph copy must keep.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Local, TimeZone};
use common::{as_installed, assert_plan_invariants, discover, discovered_lab, lab};
use storage_contracts::{NullMonitor, StorageErrorKind};
use storage_devicetree::{Root, Storage};
use storage_planner::reuse::reuse_existing_installation;
use storage_planner::{
    CustomLayout, CustomPlanner, DiskInitializationDomain, DiskInitializationPolicy, ManualPlanner,
    do_autopart, gather_requests,
};
use storage_sys::Writer;
use storage_testing::InMemoryBackend;
use storage_testing::fixtures::{action_log, device, disk, find, partition, storage};
use storage_types::{
    AutoPartScheme, Device, DeviceId, DeviceKind, DiskInitializationConfig, DiskLabelType, Format,
    FormatType, GIB, InitializationMode, LuksVersion, MIB, MountPointRequest, PartitioningRequest,
    PlatformKind,
};

fn efi_lvm_plan() -> Storage {
    let mut storage = lab("efi-empty");
    do_autopart(&mut storage, &PartitioningRequest::default(), &NullMonitor).unwrap();
    storage
}

fn bios_hibernation_plan() -> Storage {
    let mut storage = lab("bios-gpt");
    let request = PartitioningRequest {
        fstype: Some(FormatType::Xfs),
        hibernation: true,
        ..Default::default()
    };
    do_autopart(&mut storage, &request, &NullMonitor).unwrap();
    storage
}

fn encrypted_plan() -> Storage {
    let mut storage = storage(PlatformKind::Efi);
    disk(&mut storage, "vda", 40 * GIB, Some(DiskLabelType::Gpt));
    let request = PartitioningRequest {
        encrypted: true,
        passphrase: "passphrase".to_string(),
        luks_version: Some(LuksVersion::Luks2),
        ..Default::default()
    };
    do_autopart(&mut storage, &request, &NullMonitor).unwrap();
    storage
}

fn custom_plan() -> Storage {
    let mut storage = storage(PlatformKind::Efi);
    disk(&mut storage, "vda", 40 * GIB, Some(DiskLabelType::Gpt));
    let layout: CustomLayout = toml::from_str(
        r#"
[reqpart]
add_boot = true

[[part]]
mountpoint = "pv.01"
size = 10000
grow = true

[[volgroup]]
name = "fedora"
members = ["pv.01"]

[[logvol]]
mountpoint = "/"
vgname = "fedora"
name = "root"
fstype = "xfs"
size = 8000

[[logvol]]
mountpoint = "swap"
vgname = "fedora"
name = "swap"
recommended = true
"#,
    )
    .unwrap();
    CustomPlanner::new(&mut storage)
        .execute(&layout, &NullMonitor)
        .unwrap();
    storage
}

fn manual_plan() -> Storage {
    let mut storage = discovered_lab("fedora-installed");
    let requests = [
        MountPointRequest {
            mount_point: "/".to_string(),
            reformat: true,
            format_type: Some(FormatType::Xfs),
            ..MountPointRequest::for_device("sda2")
        },
        MountPointRequest {
            mount_point: "/home".to_string(),
            ..MountPointRequest::for_device("sda3")
        },
        MountPointRequest {
            mount_point: "/boot".to_string(),
            ..MountPointRequest::for_device("sda4")
        },
    ];
    ManualPlanner::new(gather_requests(&storage, &requests))
        .execute(&mut storage, &NullMonitor)
        .unwrap();
    storage
}

#[test]
fn copies_are_independent() {
    let original = efi_lvm_plan();
    let mut copy = original.copy();

    let ids = |s: &Storage| s.tree.all_devices().iter().map(|d| d.id).collect::<Vec<_>>();
    assert_eq!(ids(&original), ids(&copy));
    assert_eq!(original.names(), copy.names());
    assert_eq!(original.tree.actions().len(), copy.tree.actions().len());
    assert_eq!(original.fstab_swaps(), copy.fstab_swaps());

    let root = copy.mountpoints()["/"];
    copy.set_mountpoint(root, Some("/srv".to_string())).unwrap();
    copy.tree.get_mut(root).unwrap().protected = true;

    assert!(copy.mountpoints().contains_key("/srv"));
    assert_eq!(original.mountpoints()["/"], root);
    assert!(!device(&original, root).protected);
}

#[test]
fn copies_drop_roots_on_missing_devices() {
    let mut storage = lab("fedora-installed");
    let sda2 = find(&storage, "sda2");
    let mut root = Root::new("Fedora Linux 40");
    root.mounts.insert("/".to_string(), sda2);
    root.mounts.insert("/home".to_string(), DeviceId(999));
    root.mountopts.insert("/home".to_string(), "defaults".to_string());
    root.swaps.push(DeviceId(999));
    storage.roots.push(root);

    let copy = storage.copy();
    let root = &copy.roots[0];
    assert_eq!(root.mounts.get("/"), Some(&sda2));
    assert!(!root.mounts.contains_key("/home"));
    assert!(root.mountopts.is_empty());
    assert!(root.swaps.is_empty());
}

#[test]
fn listings_are_ordered_and_files_deterministic() {
    let storage = bios_hibernation_plan();
    let paths: Vec<String> = storage.tree.devices().iter().map(|d| d.path()).collect();
    let mut sorted = paths.clone();
    sorted.sort();
    assert_eq!(paths, sorted);

    let at = Local.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let writer = Writer::new().at(at);
    assert_eq!(writer.fstab(&storage), writer.fstab(&storage.copy()));
    assert_eq!(writer.crypttab(&storage), writer.crypttab(&storage.copy()));
}

#[test]
fn plans_keep_invariants() {
    for (name, mut plan) in [
        ("efi lvm", efi_lvm_plan()),
        ("bios hibernation", bios_hibernation_plan()),
        ("encrypted", encrypted_plan()),
        ("custom", custom_plan()),
        ("manual", manual_plan()),
    ] {
        eprintln!("checking the {name} plan");
        assert_plan_invariants(&mut plan);
    }
}

#[test]
fn written_fstab_is_discovered_again() {
    for plan in [efi_lvm_plan(), bios_hibernation_plan(), encrypted_plan()] {
        let writer = Writer::new();
        let root_name = device(&plan, plan.mountpoints()["/"]).name.clone();
        let mut installed = as_installed(&plan);
        let backend = Arc::new(
            InMemoryBackend::new(installed.tree.clone())
                .with_file(&root_name, "etc/fstab", &writer.fstab(&plan))
                .with_file(&root_name, "etc/crypttab", &writer.crypttab(&plan))
                .with_file(&root_name, "etc/os-release", "NAME=\"Fedora Linux\"\nVERSION_ID=41\n"),
        );

        let found = discover(&mut installed, backend);
        assert_eq!(found.len(), 1, "roots on {root_name}");
        let root = &found[0].root;
        assert!(found[0].warnings.is_empty(), "{:?}", found[0].warnings);
        assert_eq!(root.mounts, plan.mountpoints());
        let swaps: BTreeSet<DeviceId> = root.swaps.iter().copied().collect();
        assert_eq!(&swaps, plan.fstab_swaps());
    }
}

/// sda: ext4 and vfat partitions, sdb: empty label, sdc: blank,
/// sdd: a label holding a protected partition.
fn policy_lab() -> Storage {
    let mut storage = storage(PlatformKind::X86);
    let sda = disk(&mut storage, "sda", 20 * GIB, Some(DiskLabelType::Gpt));
    partition(&mut storage, sda, 1, MIB, 5 * GIB, Format::new(FormatType::Ext4).existing());
    partition(&mut storage, sda, 2, 5 * GIB + MIB, 5 * GIB, Format::new(FormatType::Vfat).existing());
    disk(&mut storage, "sdb", 10 * GIB, Some(DiskLabelType::Gpt));
    disk(&mut storage, "sdc", 10 * GIB, None);
    let sdd = disk(&mut storage, "sdd", 10 * GIB, Some(DiskLabelType::Gpt));
    let sdd1 = partition(&mut storage, sdd, 1, MIB, 5 * GIB, Format::new(FormatType::Ext4).existing());
    storage.tree.get_mut(sdd1).unwrap().protected = true;
    storage
}

fn config(mode: InitializationMode) -> DiskInitializationConfig {
    DiskInitializationConfig {
        mode,
        ..Default::default()
    }
}

#[test]
fn disk_initialization_policy_table() {
    let storage = policy_lab();
    let id = |name| find(&storage, name);

    let list = DiskInitializationConfig {
        devices_to_clear: vec!["sda1".to_string()],
        ..config(InitializationMode::List)
    };
    let labels = DiskInitializationConfig {
        initialize_labels: true,
        ..config(InitializationMode::Default)
    };
    let only_sda = DiskInitializationConfig {
        drives_to_clear: vec!["sda".to_string()],
        ..config(InitializationMode::All)
    };

    let table = [
        (config(InitializationMode::All), "sda1", true),
        (config(InitializationMode::All), "sda2", true),
        (config(InitializationMode::All), "sda", true),
        (config(InitializationMode::All), "sdd", false),
        (config(InitializationMode::All), "sdd1", false),
        (config(InitializationMode::Linux), "sda1", true),
        (config(InitializationMode::Linux), "sda2", false),
        (config(InitializationMode::Linux), "sda", false),
        (config(InitializationMode::Default), "sdb", false),
        (config(InitializationMode::Default), "sda1", false),
        (config(InitializationMode::None), "sdb", false),
        (labels.clone(), "sdb", true),
        (labels, "sda", false),
        (list.clone(), "sda1", true),
        (list, "sda2", false),
        (only_sda.clone(), "sda1", true),
        (only_sda, "sdd1", false),
    ];
    for (config, name, expected) in table {
        let mode = config.mode;
        let policy = DiskInitializationPolicy::new(config);
        assert_eq!(
            policy.can_remove(&storage, id(name)),
            expected,
            "can_remove({name}) in {mode:?} mode"
        );
    }
}

#[test]
fn disk_initialization_of_unrecognized_disks() {
    let storage = policy_lab();
    let sdc = find(&storage, "sdc");
    let sdd = find(&storage, "sdd");

    let strict = DiskInitializationPolicy::new(config(InitializationMode::All));
    assert!(!strict.can_initialize(&storage, sdc));

    let lenient = DiskInitializationPolicy::new(DiskInitializationConfig {
        format_unrecognized: true,
        ..config(InitializationMode::All)
    });
    assert!(lenient.can_initialize(&storage, sdc));
    assert!(!lenient.can_initialize(&storage, sdd));
    assert!(!lenient.can_initialize(&storage, find(&storage, "sda1")));
}

#[test]
fn reuse_lists_must_not_overlap() {
    let mut storage = discovered_lab("fedora-installed");
    let request = PartitioningRequest {
        scheme: AutoPartScheme::Plain,
        reused_mount_points: vec!["/home".to_string()],
        removed_mount_points: vec!["/home".to_string()],
        ..Default::default()
    };
    let err = reuse_existing_installation(&mut storage, &request).unwrap_err();
    assert_eq!(err.kind, StorageErrorKind::InvalidInput);
    assert!(storage.tree.actions().is_empty());
}

#[test]
fn reused_devices_must_match_the_scheme() {
    let mut storage = discovered_lab("fedora-installed");
    let request = PartitioningRequest {
        scheme: AutoPartScheme::Lvm,
        reused_mount_points: vec!["/home".to_string()],
        ..Default::default()
    };
    let err = reuse_existing_installation(&mut storage, &request).unwrap_err();
    assert_eq!(err.kind, StorageErrorKind::InvalidInput);
    assert!(storage.tree.actions().is_empty());
}

#[test]
fn reuse_keeps_reformats_and_removes() {
    let mut storage = discovered_lab("fedora-installed");
    let root = find(&storage, "sda2");
    let home = find(&storage, "sda3");
    let boot = find(&storage, "sda4");
    let biosboot = find(&storage, "sda1");
    let home_uuid = device(&storage, home).format.uuid.clone();

    let request = PartitioningRequest {
        scheme: AutoPartScheme::Plain,
        reused_mount_points: vec!["/home".to_string()],
        reformatted_mount_points: vec!["/".to_string()],
        removed_mount_points: vec!["/boot".to_string()],
        ..Default::default()
    };
    reuse_existing_installation(&mut storage, &request).unwrap();

    let kept = device(&storage, home);
    assert!(kept.format.exists);
    assert_eq!(kept.format.uuid, home_uuid);
    assert_eq!(kept.format.mountpoint.as_deref(), Some("/home"));
    assert_eq!(kept.format.options.as_deref(), Some("defaults,noatime"));

    let reformatted = device(&storage, root);
    assert!(reformatted.exists);
    assert!(!reformatted.format.exists);
    assert_eq!(reformatted.format.kind, storage.settings.default_fstype);
    assert!(
        storage
            .tree
            .actions()
            .iter()
            .any(|a| a.device_id == root && a.is_create() && a.is_format())
    );

    assert!(!storage.tree.contains(boot));
    // bootloader partitions are always recreated
    assert!(!storage.tree.contains(biosboot));
}

#[test]
fn removing_the_last_volume_reclaims_the_encrypted_stack() {
    let mut storage = encrypted_plan();
    let vg = storage.tree.vgs()[0].id;
    let luks = device(&storage, vg).parents[0];
    assert!(device(&storage, luks).is_luks());
    let pv = device(&storage, luks).parents[0];
    assert!(device(&storage, pv).is_partition());

    let volumes = storage.tree.children(vg);
    assert!(!volumes.is_empty());
    for (n, lv) in volumes.iter().enumerate() {
        storage.recursive_remove(*lv).unwrap();
        let last = n + 1 == volumes.len();
        assert_eq!(storage.tree.contains(vg), !last);
    }
    for id in [vg, luks, pv] {
        assert!(!storage.tree.contains(id));
    }
    assert!(storage.mountpoints().contains_key("/boot"));
    assert!(storage.mountpoints().contains_key("/boot/efi"));
    assert!(storage.tree.actions().iter().all(|a| storage.tree.contains(a.device_id)));
}

#[test]
fn emptied_existing_parents_are_destroyed_transitively() {
    let mut storage = storage(PlatformKind::X86);
    let sda = disk(&mut storage, "sda", 20 * GIB, Some(DiskLabelType::Gpt));
    let sda1 = partition(&mut storage, sda, 1, MIB, 10 * GIB, Format::new(FormatType::Luks).existing());
    let mapping = storage
        .tree
        .add_device(
            Device::new("luks-sda1", 10 * GIB - 16 * MIB, DeviceKind::Luks)
                .with_parents(vec![sda1])
                .with_format(Format::new(FormatType::Ext4).existing())
                .into_existing(),
        )
        .unwrap();

    storage.recursive_remove(mapping).unwrap();
    assert!(!storage.tree.contains(mapping));
    assert!(!storage.tree.contains(sda1));
    assert!(storage.tree.contains(sda));
    let log = action_log(&storage);
    assert!(log.contains(&"destroy luks-sda1".to_string()), "{log:?}");
    assert!(log.contains(&"destroy sda1".to_string()), "{log:?}");
}
