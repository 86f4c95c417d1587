// SPDX-License-Identifier: GPL-3.0-only

//! Interactive device factory
//!
//! Builds, changes and removes one user-visible device at a time, together
//! with whatever container and member partitions it needs. Every public
//! entry point works on a copy of the storage and only replaces it when the
//! whole operation succeeded.

use storage_contracts::{StorageError, StorageErrorKind};
use storage_devicetree::{
    ActionKind, ActionTarget, NewBtrfs, NewLv, NewMdArray, NewPartition, NewVg, Result, Storage,
    thin_pool_metadata_size,
};
use storage_types::{
    DEFAULT_PE_SIZE, Device, DeviceClass, DeviceFactoryPermissions, DeviceFactoryRequest, DeviceId,
    DeviceType, Format, FormatType, LuksParams, LuksVersion, LvRole, MIB, PV_METADATA_SIZE,
    RaidLevel, SizePolicy,
};

use crate::policy::{DiskInitializationDomain, DiskInitializationPolicy};

/// Name of the thin pool the factory creates in a new container.
pub const DEFAULT_THIN_POOL_NAME: &str = "pool00";

/// Factory type of the device `id`.
pub fn device_type_of(storage: &Storage, id: DeviceId) -> Option<DeviceType> {
    let device = storage.tree.get(id)?;
    match device.class() {
        DeviceClass::Luks => device.parents.first().and_then(|p| device_type_of(storage, *p)),
        DeviceClass::Disk => Some(DeviceType::Disk),
        DeviceClass::Partition => Some(DeviceType::Partition),
        DeviceClass::LvmLv => Some(DeviceType::Lvm),
        DeviceClass::LvmThinLv | DeviceClass::LvmThinPool => Some(DeviceType::LvmThinp),
        DeviceClass::MdArray => Some(DeviceType::Md),
        DeviceClass::BtrfsVolume | DeviceClass::BtrfsSubvolume => Some(DeviceType::Btrfs),
        _ => None,
    }
}

/// Container (VG or btrfs volume) the device `id` draws its space from.
pub fn container_of(storage: &Storage, id: DeviceId) -> Option<DeviceId> {
    let device = storage.tree.get(id)?;
    if device.is_luks() {
        return device.parents.first().and_then(|p| container_of(storage, *p));
    }
    if device.is_lv() {
        return storage.tree.lv_vg(id);
    }
    if device.is_btrfs_subvolume() {
        return device.parents.first().copied();
    }
    None
}

fn is_container_for(device: &Device, device_type: DeviceType) -> bool {
    match device_type {
        DeviceType::Lvm | DeviceType::LvmThinp => device.is_vg(),
        DeviceType::Btrfs => device.is_btrfs_volume(),
        _ => false,
    }
}

/// Backing device of a LUKS mapping, or the device itself.
fn backing_of(storage: &Storage, id: DeviceId) -> DeviceId {
    storage
        .tree
        .get(id)
        .filter(|d| d.is_luks())
        .and_then(|d| d.parents.first().copied())
        .unwrap_or(id)
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn luks_params(storage: &Storage, version: Option<LuksVersion>) -> LuksParams {
    LuksParams {
        version: version.unwrap_or(storage.settings.default_luks_version),
        ..Default::default()
    }
}

/// Fill in the defaults of a request and drop combinations that cannot be built.
pub fn normalize_request(storage: &Storage, request: &DeviceFactoryRequest) -> DeviceFactoryRequest {
    let mut request = request.clone();
    let mount_point = non_empty(&request.mount_point);
    if request.luks_version.is_none() {
        request.luks_version = Some(storage.settings.default_luks_version);
    }
    let kind = *request
        .format_type
        .get_or_insert_with(|| storage.default_fstype_for(mount_point.as_deref()));

    let boot = mount_point.as_deref().is_some_and(|m| m.starts_with("/boot"));
    if boot || kind.is_partition_only() {
        request.device_type = DeviceType::Partition;
        request.device_encrypted = false;
    }
    if kind == FormatType::Swap && request.device_type == DeviceType::LvmThinp {
        request.device_type = DeviceType::Lvm;
    }
    if request.device_type == DeviceType::LvmThinp {
        request.device_encrypted = false;
    }
    if !request.device_type.supports_raid() {
        request.device_raid_level = None;
    }
    if !request.device_type.is_container_type() {
        request.reset_container_data();
    }
    request
}

fn request_format(storage: &Storage, request: &DeviceFactoryRequest) -> Format {
    let mount_point = non_empty(&request.mount_point);
    let kind = request
        .format_type
        .unwrap_or_else(|| storage.default_fstype_for(mount_point.as_deref()));
    let mut format = Format::new(kind);
    if kind.is_mountable() {
        format.mountpoint = mount_point;
    }
    if kind.supports_label() {
        format.label = non_empty(&request.label);
    }
    format
}

/// Partitioned disks the request may use.
fn request_disks(storage: &Storage, request: &DeviceFactoryRequest) -> Result<Vec<DeviceId>> {
    let partitioned = storage.partitioned_disks();
    let disks: Vec<DeviceId> = if request.disks.is_empty() {
        partitioned
    } else {
        request
            .disks
            .iter()
            .map(|name| {
                storage
                    .tree
                    .resolve_device(name)
                    .map(|d| d.id)
                    .ok_or_else(|| StorageError::unknown_device(name))
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|id| partitioned.contains(id))
            .collect()
    };
    if disks.is_empty() {
        return Err(StorageError::no_disks());
    }
    Ok(disks)
}

/// Create `device` carrying `format`, optionally under LUKS. Returns the leaf.
fn create_with_format(
    storage: &mut Storage,
    mut device: Device,
    format: Format,
    luks: Option<LuksParams>,
) -> Result<DeviceId> {
    match luks {
        Some(params) => Ok(crate::luks::create_encrypted(storage, device, params, format)?.1),
        None => {
            device.format = format;
            storage.create_device(device)
        }
    }
}

fn place_partitions(storage: &mut Storage) -> Result<()> {
    let boot_disk = storage.stage1_disk();
    storage.do_partitioning(boot_disk)?;
    storage.tree.refresh_derived_sizes();
    Ok(())
}

/// Size of each of `count` members so that `level` yields `size` usable bytes.
fn member_size(level: RaidLevel, count: usize, size: u64) -> u64 {
    if size == 0 || count == 0 {
        return size;
    }
    let usable = level.usable_size(&vec![size; count]);
    if usable == 0 {
        return size;
    }
    ((size as u128 * size as u128).div_ceil(usable as u128)) as u64
}

/// One new member partition per disk.
fn create_members(
    storage: &mut Storage,
    disks: &[DeviceId],
    kind: FormatType,
    size: u64,
    luks: Option<LuksParams>,
) -> Result<Vec<DeviceId>> {
    let mut members = Vec::new();
    for disk in disks {
        let partition = storage.new_partition(NewPartition {
            format: Format::new(kind),
            size,
            grow: false,
            max_size: None,
            disks: vec![*disk],
            primary: false,
            name: None,
        })?;
        members.push(create_with_format(storage, partition, Format::new(kind), luks.clone())?);
    }
    Ok(members)
}

/// Find the container a request goes into, if an existing one should be used.
fn find_container(storage: &Storage, request: &DeviceFactoryRequest, use_existing: bool) -> Option<DeviceId> {
    let named = [&request.container_spec, &request.container_name]
        .into_iter()
        .filter(|spec| !spec.is_empty())
        .find_map(|spec| storage.tree.resolve_device(spec))
        .filter(|d| is_container_for(d, request.device_type));
    if let Some(container) = named {
        return Some(container.id);
    }
    if !use_existing {
        return None;
    }
    let containers = match request.device_type {
        DeviceType::Lvm | DeviceType::LvmThinp => storage.tree.vgs(),
        DeviceType::Btrfs => storage.tree.btrfs_volumes(),
        _ => Vec::new(),
    };
    containers.into_iter().find(|c| !c.protected).map(|c| c.id)
}

/// Space the contents of a new container need.
fn container_needs(storage: &Storage, container: DeviceId) -> u64 {
    let tree = &storage.tree;
    tree.children(container)
        .into_iter()
        .filter_map(|child| tree.get(child))
        .map(|child| {
            let metadata = if child.is_thin_pool() {
                2 * thin_pool_metadata_size(child.size)
            } else {
                0
            };
            child.lv().map(|lv| lv.req_size).unwrap_or(child.size) + metadata
        })
        .sum()
}

/// Resize the new members of a container according to its size policy.
fn configure_container(storage: &mut Storage, container: DeviceId, requested: u64) -> Result<()> {
    let device = storage.tree.device(container)?.clone();
    if device.exists {
        return Ok(());
    }
    let policy = storage.container_policies.get(&container).copied().unwrap_or_default();
    let members: Vec<DeviceId> = device
        .parents
        .iter()
        .map(|m| backing_of(storage, *m))
        .filter(|m| storage.tree.get(*m).is_some_and(|d| d.is_partition() && !d.exists))
        .collect();
    if members.is_empty() {
        return Ok(());
    }
    let count = members.len() as u64;
    let overhead = PV_METADATA_SIZE
        + DEFAULT_PE_SIZE
        + storage
            .tree
            .get(members[0])
            .and_then(|d| d.format.luks_version())
            .map(|v| v.metadata_size())
            .unwrap_or(0);
    let needed = if device.is_vg() {
        container_needs(storage, container).max(requested)
    } else {
        requested
    };
    let (size, grow) = match policy {
        SizePolicy::Auto => (needed.div_ceil(count) + overhead, false),
        SizePolicy::Max => (MIB, true),
        SizePolicy::Fixed(size) => (size.div_ceil(count), false),
    };
    tracing::debug!(container = %device.name, ?policy, size, grow, "configuring container members");
    for member in members {
        let partition = storage.tree.device_mut(member)?;
        partition.size = size;
        if let Some(data) = partition.partition_mut() {
            data.req_base_size = size;
            data.req_grow = grow;
        }
    }
    place_partitions(storage)
}

fn new_vg(
    storage: &mut Storage,
    request: &DeviceFactoryRequest,
    disks: &[DeviceId],
) -> Result<DeviceId> {
    let luks = request
        .container_encrypted
        .then(|| luks_params(storage, request.container_luks_version));
    let members = create_members(storage, disks, FormatType::LvmPv, MIB, luks)?;
    let vg = storage.new_vg(NewVg {
        parents: members,
        name: non_empty(&request.container_name),
        pe_size: None,
        reserved_space: 0,
        reserved_percent: 0,
        thpool_reserve: None,
    })?;
    let vg = storage.create_device(vg)?;
    storage.container_policies.insert(vg, request.container_size_policy);
    Ok(vg)
}

fn new_btrfs_volume(
    storage: &mut Storage,
    request: &DeviceFactoryRequest,
    disks: &[DeviceId],
) -> Result<DeviceId> {
    let luks = request
        .container_encrypted
        .then(|| luks_params(storage, request.container_luks_version));
    let members = create_members(storage, disks, FormatType::Btrfs, MIB, luks)?;
    let volume = storage.new_btrfs(NewBtrfs {
        parents: members,
        name: non_empty(&request.container_name),
        format: Format::new(FormatType::Btrfs),
        data_level: request.container_raid_level,
        metadata_level: request.container_raid_level,
        subvol: false,
    })?;
    let volume = storage.create_device(volume)?;
    storage.container_policies.insert(volume, request.container_size_policy);
    Ok(volume)
}

fn thin_pool_of(storage: &mut Storage, vg: DeviceId, size: u64) -> Result<DeviceId> {
    let existing = storage
        .tree
        .children(vg)
        .into_iter()
        .find(|c| storage.tree.get(*c).is_some_and(Device::is_thin_pool));
    if let Some(pool) = existing {
        return Ok(pool);
    }
    let pool = storage.new_lv(NewLv {
        name: Some(DEFAULT_THIN_POOL_NAME.to_string()),
        size,
        grow: true,
        role: LvRole::ThinPool,
        ..NewLv::new(vg)
    })?;
    storage.create_device(pool)
}

/// Build the device a request describes. Returns the leaf carrying the format.
pub fn factory_device(
    storage: &mut Storage,
    request: &DeviceFactoryRequest,
    use_existing_container: bool,
) -> Result<DeviceId> {
    let format = request_format(storage, request);
    let luks = request
        .device_encrypted
        .then(|| luks_params(storage, request.luks_version));
    let name = non_empty(&request.device_name);
    let size = request.device_size;
    tracing::info!(
        device_type = request.device_type.as_str(),
        mount_point = %request.mount_point,
        size,
        use_existing_container,
        "building device"
    );

    match request.device_type {
        DeviceType::Partition => {
            let disks = request_disks(storage, request)?;
            let partition = storage.new_partition(NewPartition {
                format: format.clone(),
                size,
                grow: false,
                max_size: None,
                disks,
                primary: false,
                name: None,
            })?;
            let leaf = create_with_format(storage, partition, format, luks)?;
            place_partitions(storage)?;
            Ok(leaf)
        }
        DeviceType::Disk => {
            let disk = request
                .disks
                .first()
                .and_then(|name| storage.tree.resolve_device(name))
                .filter(|d| d.is_disk())
                .map(|d| d.id)
                .ok_or_else(StorageError::no_disks)?;
            storage.remove_descendants(disk)?;
            match luks {
                Some(params) => {
                    storage.format_device(disk, Format::new(FormatType::Luks).with_luks(params))?;
                    let mapping = storage.new_luks(disk, format)?;
                    storage.create_device(mapping)
                }
                None => {
                    storage.format_device(disk, format)?;
                    Ok(disk)
                }
            }
        }
        DeviceType::Md => {
            let disks = request_disks(storage, request)?;
            let level = request.device_raid_level.unwrap_or(RaidLevel::Raid1);
            let members = create_members(
                storage,
                &disks,
                FormatType::MdMember,
                member_size(level, disks.len(), size),
                None,
            )?;
            let array = storage.new_mdarray(NewMdArray {
                name,
                ..NewMdArray::new(members, level)
            })?;
            let leaf = create_with_format(storage, array, format, luks)?;
            place_partitions(storage)?;
            Ok(leaf)
        }
        DeviceType::Lvm | DeviceType::LvmThinp => {
            let vg = match find_container(storage, request, use_existing_container) {
                Some(vg) => vg,
                None => {
                    let disks = request_disks(storage, request)?;
                    new_vg(storage, request, &disks)?
                }
            };
            let parent = if request.device_type == DeviceType::LvmThinp {
                thin_pool_of(storage, vg, size)?
            } else {
                vg
            };
            let role = if request.device_type == DeviceType::LvmThinp {
                LvRole::Thin
            } else {
                LvRole::Plain
            };
            let lv = storage.new_lv(NewLv {
                name,
                size,
                role,
                format: format.clone(),
                ..NewLv::new(parent)
            })?;
            let leaf = create_with_format(storage, lv, format, luks)?;
            configure_container(storage, vg, size)?;
            storage.grow_lvm();
            Ok(leaf)
        }
        DeviceType::Btrfs => {
            let volume = match find_container(storage, request, use_existing_container) {
                Some(volume) => volume,
                None => {
                    let disks = request_disks(storage, request)?;
                    new_btrfs_volume(storage, request, &disks)?
                }
            };
            let subvol = storage.new_btrfs(NewBtrfs {
                parents: vec![volume],
                name,
                format: Format {
                    label: None,
                    ..format
                },
                subvol: true,
                ..Default::default()
            })?;
            let leaf = storage.create_device(subvol)?;
            let level = request.container_raid_level.unwrap_or(RaidLevel::Single);
            let count = storage.tree.device(volume)?.parents.len();
            configure_container(storage, volume, member_size(level, count, size) * count as u64)?;
            Ok(leaf)
        }
    }
}

fn to_factory_error(err: StorageError) -> StorageError {
    if err.kind == StorageErrorKind::InconsistentParentSectorSize || err.is_cancelled() {
        err
    } else {
        StorageError::configuration(err.message)
    }
}

/// Add the device a request describes, reusing an existing container when
/// a new one cannot be built.
pub fn add_device(storage: &mut Storage, request: &DeviceFactoryRequest) -> Result<DeviceId> {
    let request = normalize_request(storage, request);
    let mut attempt = storage.copy();
    let result = match factory_device(&mut attempt, &request, false) {
        Ok(id) => Ok(id),
        Err(err) => {
            tracing::debug!(error = %err, "retrying with an existing container");
            attempt = storage.copy();
            factory_device(&mut attempt, &request, true)
        }
    };
    let id = result.map_err(to_factory_error)?;
    *storage = attempt;
    Ok(id)
}

/// Put back the format an existing device had before this session.
fn revert_format(storage: &mut Storage, leaf: DeviceId) -> Result<DeviceId> {
    let backing = backing_of(storage, leaf);
    if backing != leaf && !storage.tree.device(leaf)?.exists {
        storage.destroy_device(leaf)?;
    }
    let actions = storage.tree.actions_mut();
    actions.cancel(backing, ActionKind::Create, Some(ActionTarget::Format));
    actions.cancel(backing, ActionKind::Destroy, Some(ActionTarget::Format));
    let device = storage.tree.device_mut(backing)?;
    device.format = device.original_format.clone();
    storage.tree.refresh_derived_sizes();
    Ok(backing)
}

/// Give the leaf a new format, adding, removing or replacing LUKS as asked.
fn reformat(storage: &mut Storage, leaf: DeviceId, request: &DeviceFactoryRequest) -> Result<DeviceId> {
    let backing = backing_of(storage, leaf);
    let encrypted = backing != leaf;
    let format = request_format(storage, request);
    if !request.device_encrypted {
        if encrypted {
            storage.destroy_device(leaf)?;
        }
        storage.format_device(backing, format)?;
        return Ok(backing);
    }

    let params = luks_params(storage, request.luks_version);
    let same_luks = storage.tree.device(backing)?.format.luks_version() == Some(params.version);
    if encrypted && same_luks {
        storage.format_device(leaf, format)?;
        return Ok(leaf);
    }
    if encrypted {
        storage.destroy_device(leaf)?;
    }
    storage.format_device(backing, Format::new(FormatType::Luks).with_luks(params))?;
    let mapping = storage.new_luks(backing, format)?;
    storage.create_device(mapping)
}

fn update_format_attributes(storage: &mut Storage, leaf: DeviceId, request: &DeviceFactoryRequest) -> Result<()> {
    let device = storage.tree.device(leaf)?;
    let mount_point = non_empty(&request.mount_point).filter(|_| device.format.is_mountable());
    if device.format.mountpoint != mount_point {
        storage.set_mountpoint(leaf, mount_point)?;
    }
    let device = storage.tree.device(leaf)?;
    let label = non_empty(&request.label);
    if device.format.kind.supports_label() && device.format.label != label {
        storage.set_format_label(leaf, label)?;
    }
    Ok(())
}

fn resize(storage: &mut Storage, id: DeviceId, size: u64) -> Result<()> {
    let target = backing_of(storage, id);
    let device = storage.tree.device(target)?;
    if size == 0 || device.is_btrfs() || size == device.size {
        return Ok(());
    }
    let min = storage.tree.min_size(target);
    let growable_container = !device.exists
        && container_of(storage, target)
            .and_then(|c| storage.tree.get(c))
            .is_some_and(|c| !c.exists);
    if growable_container {
        // the container members are resized to fit afterwards
        let size = storage.tree.align_target_size(target, size).max(min);
        let device = storage.tree.device_mut(target)?;
        device.size = size;
        if let Some(lv) = device.lv_mut() {
            lv.req_size = size;
        }
        storage.tree.refresh_derived_sizes();
        return Ok(());
    }
    let max = storage.tree.max_size(target).max(min);
    let size = storage.tree.align_target_size(target, size).clamp(min, max);
    if size != storage.tree.device(target)?.size {
        storage.resize_device(target, size)?;
    }
    Ok(())
}

fn rename(storage: &mut Storage, id: DeviceId, name: &str) -> Result<()> {
    let target = backing_of(storage, id);
    let device = storage.tree.device(target)?;
    let named = device.is_lv() || device.is_md() || device.is_btrfs_subvolume();
    if named && !name.is_empty() && device.short_name() != name {
        storage.rename_device(target, name)?;
    }
    Ok(())
}

fn apply_change(
    storage: &mut Storage,
    id: DeviceId,
    request: &DeviceFactoryRequest,
    original: &DeviceFactoryRequest,
) -> Result<DeviceId> {
    let request = normalize_request(storage, request);
    let original = &normalize_request(storage, original);

    if !request.container_spec.is_empty()
        && !request.container_name.is_empty()
        && request.container_name != original.container_name
        && let Some(container) = storage.tree.resolve_device(&request.container_spec).map(|d| d.id)
    {
        storage.rename_device(container, &request.container_name)?;
    }

    let device = storage.tree.device(id)?.clone();
    let backing = backing_of(storage, id);
    let backing_exists = storage.tree.device(backing)?.exists;

    if !backing_exists {
        let should_remove = request.device_type != original.device_type
            || request.container_name != original.container_name;
        if should_remove {
            tracing::debug!(device = %device.name, "recreating device");
            destroy_device(storage, id)?;
            return factory_device(storage, &request, true);
        }
        resize(storage, id, request.device_size)?;
        let format_changed = request.format_type != original.format_type
            || request.device_encrypted != original.device_encrypted
            || request.luks_version != original.luks_version;
        let leaf = if format_changed {
            reformat(storage, id, &request)?
        } else {
            update_format_attributes(storage, id, &request)?;
            id
        };
        rename(storage, leaf, &request.device_name)?;
        if let Some(container) = container_of(storage, leaf) {
            configure_container(storage, container, 0)?;
        } else if storage.tree.device(backing_of(storage, leaf))?.is_partition() {
            place_partitions(storage)?;
        }
        return Ok(leaf);
    }

    let mut leaf = id;
    if !request.reformat && original.reformat {
        leaf = revert_format(storage, leaf)?;
    }
    if request.device_size != original.device_size {
        resize(storage, leaf, request.device_size)?;
    }
    let reformat_needed = request.reformat
        && (request.format_type != original.format_type
            || request.device_encrypted != original.device_encrypted
            || request.luks_version != original.luks_version
            || !original.reformat);
    if reformat_needed {
        leaf = reformat(storage, leaf, &request)?;
    } else {
        update_format_attributes(storage, leaf, &request)?;
    }
    rename(storage, leaf, &request.device_name)?;
    Ok(leaf)
}

/// Change a device from `original` to `request`. Returns the device's leaf,
/// which may be a new device when the change recreated it.
pub fn change_device(
    storage: &mut Storage,
    id: DeviceId,
    request: &DeviceFactoryRequest,
    original: &DeviceFactoryRequest,
) -> Result<DeviceId> {
    if request == original {
        tracing::debug!(device = %id, "nothing to change");
        return Ok(id);
    }
    let mut attempt = storage.copy();
    let leaf = apply_change(&mut attempt, id, request, original).map_err(to_factory_error)?;
    *storage = attempt;
    Ok(leaf)
}

/// Forget the changes made to a device, destroying it when it is new.
pub fn reset_device(storage: &mut Storage, id: DeviceId) -> Result<()> {
    if storage.tree.device(id)?.exists {
        storage.reset_device(id)
    } else {
        destroy_device(storage, id)
    }
}

/// Destroy new members left without a user.
fn destroy_unused_members(storage: &mut Storage, members: &[DeviceId]) -> Result<()> {
    for member in members {
        let mut next = Some(*member);
        while let Some(id) = next {
            let Some(device) = storage.tree.get(id) else {
                break;
            };
            if device.exists || !storage.tree.is_leaf(id) {
                break;
            }
            next = device.is_luks().then(|| device.parents.first().copied()).flatten();
            storage.destroy_device(id)?;
        }
    }
    Ok(())
}

/// Remove a device the user no longer wants.
pub fn destroy_device(storage: &mut Storage, id: DeviceId) -> Result<()> {
    let device = storage.tree.device(id)?.clone();
    if device.protected {
        return Err(StorageError::protected_device(&device.name));
    }
    let disks = storage.tree.disks_of(id);
    let container = container_of(storage, id);
    tracing::info!(device = %device.name, "destroying device");

    if device.is_disk() && !device.format.is_supported() {
        storage.remove_descendants(id)?;
        if !storage.tree.device(id)?.format.is_none() {
            storage.destroy_format(id)?;
        }
    } else if storage.tree.is_direct(id) && !storage.tree.is_leaf(id) {
        storage.recursive_remove(id)?;
    } else {
        storage.destroy_device(id)?;
        let backing = device.parents.first().copied().filter(|_| device.is_luks());
        if let Some(backing) = backing
            && storage.tree.contains(backing)
            && storage.tree.is_leaf(backing)
        {
            storage.destroy_device(backing)?;
        }
    }

    if let Some(container) = container
        && let Some(dev) = storage.tree.get(container).cloned()
    {
        let empty = storage.tree.children(container).is_empty();
        if empty && !dev.exists && !dev.protected {
            storage.recursive_remove(container)?;
            destroy_unused_members(storage, &dev.parents)?;
        } else if storage.container_policies.get(&container) == Some(&SizePolicy::Auto) {
            configure_container(storage, container, 0)?;
        }
    }

    if device.exists {
        let policy = DiskInitializationPolicy::new(storage.disk_init.clone());
        for disk in disks {
            let emptied = storage.tree.contains(disk)
                && storage.tree.device(disk)?.format.exists
                && storage.tree.is_empty_disk(disk);
            if emptied && policy.can_initialize(storage, disk) {
                storage.initialize_disk(disk)?;
            }
        }
    }
    Ok(())
}

/// Factory request describing the device `id` as it is planned now.
pub fn generate_device_factory_request(storage: &Storage, id: DeviceId) -> Result<DeviceFactoryRequest> {
    let device = storage.tree.device(id)?;
    let device_type = device_type_of(storage, id).ok_or_else(|| {
        StorageError::unsupported(format!("{} cannot be edited by the device factory", device.name))
    })?;
    let backing = storage.tree.device(backing_of(storage, id))?;
    let encrypted = backing.id != id;

    let names = |ids: Vec<DeviceId>| -> Vec<String> {
        ids.into_iter()
            .filter_map(|d| storage.tree.get(d).map(|d| d.name.clone()))
            .collect()
    };
    let disks = match backing.partition() {
        Some(data) if !backing.exists && !data.req_disks.is_empty() => names(data.req_disks.clone()),
        _ => names(storage.tree.disks_of(backing.id)),
    };

    let mut request = DeviceFactoryRequest {
        device_spec: id.to_string(),
        disks,
        mount_point: device.format.mountpoint.clone().unwrap_or_default(),
        reformat: !device.format.exists,
        format_type: Some(device.format.kind),
        label: device.format.label.clone().unwrap_or_default(),
        luks_version: backing.format.luks_version(),
        device_type,
        device_name: backing.short_name().to_string(),
        device_size: backing.size,
        device_raid_level: backing
            .md()
            .map(|md| md.level)
            .or_else(|| backing.btrfs_volume().and_then(|b| b.data_level)),
        device_encrypted: encrypted,
        ..Default::default()
    };

    if device_type.is_container_type()
        && let Some(container) = container_of(storage, id).and_then(|c| storage.tree.get(c))
    {
        let members: Vec<&Device> = container
            .parents
            .iter()
            .filter_map(|p| storage.tree.get(*p))
            .collect();
        let container_encrypted = !members.is_empty() && members.iter().all(|m| m.is_luks());
        request.container_spec = container.id.to_string();
        request.container_name = container.name.clone();
        request.container_size_policy = match storage.container_policies.get(&container.id) {
            Some(policy) => *policy,
            None if container.exists => SizePolicy::Fixed(container.size),
            None => SizePolicy::Auto,
        };
        request.container_raid_level = container.btrfs_volume().and_then(|b| b.data_level);
        request.container_encrypted = container_encrypted;
        request.container_luks_version = members
            .first()
            .filter(|_| container_encrypted)
            .and_then(|m| storage.tree.get(backing_of(storage, m.id)))
            .and_then(|b| b.format.luks_version());
        request.disks = names(storage.tree.disks_of(container.id));
    }
    Ok(request)
}

/// Which attributes of `request` the user may change for its device.
pub fn generate_device_factory_permissions(
    storage: &Storage,
    request: &DeviceFactoryRequest,
) -> Result<DeviceFactoryPermissions> {
    let device = match request.device_spec.as_str() {
        "" => None,
        spec => Some(
            storage
                .tree
                .resolve_device(spec)
                .ok_or_else(|| StorageError::unknown_device(spec))?,
        ),
    };
    if device.is_some_and(|d| d.protected) {
        return Ok(DeviceFactoryPermissions::default());
    }
    let exists = device.is_some_and(|d| {
        storage.tree.get(backing_of(storage, d.id)).is_some_and(|b| b.exists)
    });
    let device_type = request.device_type;
    let kind = request
        .format_type
        .unwrap_or_else(|| storage.default_fstype_for(non_empty(&request.mount_point).as_deref()));
    let btrfs = device_type == DeviceType::Btrfs;

    let luks_ancestor = device.is_some_and(|d| {
        storage
            .tree
            .ancestors(d.id)
            .into_iter()
            .chain([d.id])
            .filter_map(|a| storage.tree.get(a))
            .any(|a| a.format.kind == FormatType::Luks && a.format.exists)
    });
    let container = [&request.container_spec, &request.container_name]
        .into_iter()
        .filter(|spec| !spec.is_empty())
        .find_map(|spec| storage.tree.resolve_device(spec));
    let container_editable = device_type.is_container_type() && !container.is_some_and(|c| c.exists);
    let format_immutable = device.is_some_and(|d| d.format_immutable);
    let reformat_allowed = exists
        && !format_immutable
        && device.is_some_and(|d| d.original_format.is_supported() || d.original_format.is_none());

    Ok(DeviceFactoryPermissions {
        mount_point: kind.is_mountable(),
        reformat: reformat_allowed,
        format_type: request.reformat || !exists,
        label: request.reformat && kind.supports_label(),
        device_type: !exists,
        device_name: !exists && !matches!(device_type, DeviceType::Partition | DeviceType::Disk),
        device_size: device.is_some_and(Device::is_resizable) || (!exists && !btrfs),
        device_raid_level: !exists && device_type.supports_raid(),
        device_encrypted: request.reformat && !request.container_encrypted && !btrfs && !luks_ancestor,
        disks: !exists && !device_type.is_container_type(),
        container_spec: container_editable,
        container_name: container_editable,
        container_size_policy: container_editable,
        container_raid_level: container_editable && device_type.supports_raid(),
        container_encrypted: container_editable,
    })
}
