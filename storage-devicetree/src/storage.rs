// SPDX-License-Identifier: GPL-3.0-only

//! Storage session
//!
//! [`Storage`] is the object the planners work on: a device tree plus the
//! session settings, the discovered roots and the bootloader state. Every
//! mutation goes through one of its methods so that the action list stays
//! consistent with the tree.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use storage_contracts::{StorageError, TaskMonitor};
use storage_types::{
    BtrfsVolumeData, Device, DeviceId, DeviceKind, DiskInitializationConfig, Format, FormatType,
    LuksVersion, LvData, LvRole, LvmCacheRequest, MIB, MdData, PartitionData, Platform,
    PlatformKind, ProductPartitionRow, RaidLevel, SizePolicy, ThinPoolReserve, VgData, align_up,
    is_supported_pe_size,
};

use crate::Result;
use crate::actions::{ActionKind, ActionPayload, ActionTarget};
use crate::backend::BlockBackend;
use crate::naming::{device_name_base, first_free_name, lv_device_name, safe_device_name, unique_name};
use crate::root::Root;
use crate::tree::DeviceTree;

/// Size of a new partition created without an explicit size.
pub const DEFAULT_PARTITION_SIZE: u64 = 500 * MIB;

/// Session-wide settings the planners read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    pub platform: Platform,
    pub default_fstype: FormatType,
    pub default_boot_fstype: FormatType,
    pub default_luks_version: LuksVersion,
    /// Base name of new containers
    pub container_prefix: String,
    pub fips: bool,
    /// Installed memory in bytes
    pub total_memory: u64,
    pub required_mount_points: Vec<String>,
    pub product_partitions: Vec<ProductPartitionRow>,
}

impl StorageSettings {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            default_fstype: FormatType::Ext4,
            default_boot_fstype: FormatType::Ext4,
            default_luks_version: LuksVersion::Luks2,
            container_prefix: "anaconda".to_string(),
            fips: false,
            total_memory: 4 * storage_types::GIB,
            required_mount_points: vec!["/".to_string()],
            product_partitions: Vec::new(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self::new(Platform::new(PlatformKind::X86))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BootloaderState {
    /// Disk the first stage goes to
    #[serde(default)]
    pub stage1_disk: Option<DeviceId>,
    #[serde(default)]
    pub skip: bool,
    /// Stage1 device found after planning
    #[serde(default)]
    pub stage1_device: Option<DeviceId>,
    /// Disk names in boot order
    #[serde(default)]
    pub drive_order: Vec<String>,
}

/// Arguments of [`Storage::new_partition`].
#[derive(Debug, Clone, Default)]
pub struct NewPartition {
    pub format: Format,
    /// Base size; zero picks the default partition size
    pub size: u64,
    pub grow: bool,
    pub max_size: Option<u64>,
    /// Disks the partition may go to (empty means any)
    pub disks: Vec<DeviceId>,
    pub primary: bool,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewVg {
    pub parents: Vec<DeviceId>,
    pub name: Option<String>,
    pub pe_size: Option<u64>,
    pub reserved_space: u64,
    pub reserved_percent: u8,
    pub thpool_reserve: Option<ThinPoolReserve>,
}

#[derive(Debug, Clone)]
pub struct NewLv {
    /// VG, or thin pool for thin LVs
    pub parent: DeviceId,
    /// LV name inside the VG
    pub name: Option<String>,
    pub format: Format,
    pub size: u64,
    pub grow: bool,
    pub max_size: Option<u64>,
    pub role: LvRole,
    pub percent: Option<u8>,
    pub metadata_size: Option<u64>,
    pub chunk_size: Option<u64>,
    pub profile: Option<String>,
    pub cache: Option<LvmCacheRequest>,
}

impl NewLv {
    pub fn new(parent: DeviceId) -> Self {
        Self {
            parent,
            name: None,
            format: Format::none(),
            size: 0,
            grow: false,
            max_size: None,
            role: LvRole::Plain,
            percent: None,
            metadata_size: None,
            chunk_size: None,
            profile: None,
            cache: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewBtrfs {
    /// Members of a volume, or the volume of a subvolume
    pub parents: Vec<DeviceId>,
    pub name: Option<String>,
    pub format: Format,
    pub data_level: Option<RaidLevel>,
    pub metadata_level: Option<RaidLevel>,
    pub subvol: bool,
}

#[derive(Debug, Clone)]
pub struct NewMdArray {
    pub parents: Vec<DeviceId>,
    pub name: Option<String>,
    pub level: RaidLevel,
    /// Active members; defaults to all parents minus spares
    pub member_devices: Option<u32>,
    pub spares: u32,
    pub metadata_version: Option<String>,
    pub chunk_size: Option<u64>,
    pub format: Format,
}

impl NewMdArray {
    pub fn new(parents: Vec<DeviceId>, level: RaidLevel) -> Self {
        Self {
            parents,
            name: None,
            level,
            member_devices: None,
            spares: 0,
            metadata_version: None,
            chunk_size: None,
            format: Format::none(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Storage {
    pub tree: DeviceTree,
    pub settings: StorageSettings,
    /// Installations found on the disks
    pub roots: Vec<Root>,
    pub bootloader: BootloaderState,
    pub disk_init: DiskInitializationConfig,
    /// Disks picked for the installation (empty means all)
    pub selected_disks: Vec<DeviceId>,
    /// Lines of an existing fstab to carry over to the new one
    pub preserved_fstab_lines: Vec<String>,
    /// Size policy of the containers built by the device factory
    pub container_policies: BTreeMap<DeviceId, SizePolicy>,
    fstab_swaps: BTreeSet<DeviceId>,
    escrow_certificates: BTreeMap<String, String>,
    backend: Option<Arc<dyn BlockBackend>>,
    request_counter: u32,
}

impl Storage {
    pub fn new(tree: DeviceTree, settings: StorageSettings) -> Self {
        Self {
            tree,
            settings,
            roots: Vec::new(),
            bootloader: BootloaderState::default(),
            disk_init: DiskInitializationConfig::default(),
            selected_disks: Vec::new(),
            preserved_fstab_lines: Vec::new(),
            container_policies: BTreeMap::new(),
            fstab_swaps: BTreeSet::new(),
            escrow_certificates: BTreeMap::new(),
            backend: None,
            request_counter: 0,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn BlockBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn backend(&self) -> Option<&Arc<dyn BlockBackend>> {
        self.backend.as_ref()
    }

    pub fn platform(&self) -> &Platform {
        &self.settings.platform
    }

    /// Replace the tree with a fresh scan of the system.
    pub fn reset(&mut self) -> Result<()> {
        let backend = self.backend.clone().ok_or_else(StorageError::unavailable_storage)?;
        self.tree = backend.scan()?;
        self.roots.clear();
        self.fstab_swaps.clear();
        self.bootloader.stage1_device = None;
        self.preserved_fstab_lines.clear();
        self.container_policies.clear();
        tracing::info!(devices = self.tree.all_devices().len(), "storage reset");
        Ok(())
    }

    /// Independent working copy with the roots rewired to the copied tree.
    pub fn copy(&self) -> Storage {
        let mut copy = self.clone();
        copy.roots = self.roots.iter().map(|root| root.copy(&copy.tree)).collect();
        copy
    }

    pub fn devices(&self) -> Vec<&Device> {
        self.tree.devices()
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.tree.names()
    }

    pub fn mountpoints(&self) -> BTreeMap<String, DeviceId> {
        self.tree.mountpoints()
    }

    /// Disks picked for the installation, in path order.
    pub fn disks(&self) -> Vec<DeviceId> {
        self.tree
            .disks()
            .into_iter()
            .filter(|d| !d.is_optical())
            .filter(|d| self.selected_disks.is_empty() || self.selected_disks.contains(&d.id))
            .map(|d| d.id)
            .collect()
    }

    /// Selected disks that carry a supported partition table.
    pub fn partitioned_disks(&self) -> Vec<DeviceId> {
        self.disks()
            .into_iter()
            .filter(|id| {
                self.tree.get(*id).is_some_and(|d| {
                    !d.protected && d.media_present && d.format.kind == FormatType::DiskLabel
                })
            })
            .collect()
    }

    /// Disk the bootloader first stage goes to.
    pub fn stage1_disk(&self) -> Option<DeviceId> {
        if let Some(disk) = self.bootloader.stage1_disk {
            return Some(disk);
        }
        let disks = self.disks();
        self.bootloader
            .drive_order
            .iter()
            .filter_map(|name| self.tree.get_device_by_name(name, false))
            .map(|d| d.id)
            .find(|id| disks.contains(id))
            .or_else(|| disks.first().copied())
    }

    pub fn fstab_swaps(&self) -> &BTreeSet<DeviceId> {
        &self.fstab_swaps
    }

    /// Swap devices to list in the target fstab.
    pub fn set_fstab_swaps(&mut self, swaps: &[DeviceId]) {
        self.fstab_swaps = swaps
            .iter()
            .copied()
            .filter(|id| self.tree.get(*id).is_some_and(|d| d.format.kind == FormatType::Swap))
            .collect();
    }

    pub fn add_fstab_swap(&mut self, id: DeviceId) {
        self.fstab_swaps.insert(id);
    }

    /// Filesystem type of a new device mounted at `mountpoint`.
    pub fn default_fstype_for(&self, mountpoint: Option<&str>) -> FormatType {
        match mountpoint {
            Some("/boot") => self.settings.default_boot_fstype,
            _ => self.settings.default_fstype,
        }
    }

    /// Free space on the given disks, or on all selected disks.
    pub fn get_disk_free_space(&self, disks: &[DeviceId]) -> u64 {
        let disks = if disks.is_empty() { self.disks() } else { disks.to_vec() };
        disks
            .iter()
            .flat_map(|disk| crate::partitioning::get_free_regions(&self.tree, *disk))
            .map(|region| region.size())
            .sum()
    }

    /// Escrow certificate published at `url`, fetched once per session.
    pub fn get_escrow_certificate(&mut self, url: &str) -> Result<String> {
        if let Some(certificate) = self.escrow_certificates.get(url) {
            return Ok(certificate.clone());
        }
        let backend = self
            .backend
            .clone()
            .ok_or_else(|| StorageError::unavailable_data("escrow certificate"))?;
        let certificate = backend.escrow_certificate(url)?;
        self.escrow_certificates.insert(url.to_string(), certificate.clone());
        Ok(certificate)
    }

    pub fn add_escrow_certificate(&mut self, url: impl Into<String>, certificate: impl Into<String>) {
        self.escrow_certificates.insert(url.into(), certificate.into());
    }

    pub fn safe_device_name(&self, name: &str) -> String {
        safe_device_name(name)
    }

    /// Unused name for a new container: `anaconda`, `anaconda00`, …
    pub fn suggest_container_name(&self) -> String {
        unique_name(&safe_device_name(&self.settings.container_prefix), &self.names())
    }

    /// Unused name for a new device holding `mountpoint`. Inside a VG the
    /// name is an LV name.
    pub fn suggest_device_name(&self, parent: Option<DeviceId>, mountpoint: Option<&str>, swap: bool) -> String {
        let base = device_name_base(mountpoint, swap);
        let names = self.names();
        let vg = parent.and_then(|p| self.tree.get(p)).filter(|d| d.is_vg());
        match vg {
            Some(vg) => first_free_name(&base, |candidate| {
                names.contains(&lv_device_name(&vg.name, candidate))
            }),
            None => unique_name(&base, &names),
        }
    }

    fn next_request_name(&mut self) -> String {
        let names = self.names();
        loop {
            self.request_counter += 1;
            let name = format!("req{}", self.request_counter);
            if !names.contains(&name) {
                return name;
            }
        }
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(StorageError::invalid_input("Device name must not be empty"));
        }
        if name != safe_device_name(name) {
            return Err(StorageError::invalid_input(format!("Invalid device name: {name}")));
        }
        if self.names().contains(name) {
            return Err(StorageError::invalid_input(format!("Name {name} is already in use")));
        }
        Ok(())
    }

    fn check_sector_sizes(&self, parents: &[DeviceId]) -> Result<()> {
        let sizes = self.tree.parent_sector_sizes(parents);
        if sizes.len() > 1 {
            let names: Vec<String> = parents
                .iter()
                .flat_map(|p| self.tree.disks_of(*p))
                .filter_map(|d| self.tree.get(d).map(|d| d.name.clone()))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            return Err(StorageError::inconsistent_sector_size(format!(
                "Cannot create a container on disks with different sector sizes: {}",
                names.join(", ")
            )));
        }
        Ok(())
    }

    /// A new partition request, placed later by [`Storage::do_partitioning`].
    pub fn new_partition(&mut self, args: NewPartition) -> Result<Device> {
        let name = match args.name {
            Some(name) => {
                self.check_name(&name)?;
                name
            }
            None => self.next_request_name(),
        };
        let size = if args.size == 0 { DEFAULT_PARTITION_SIZE } else { args.size };
        let size = align_up(size.max(args.format.kind.min_size()), MIB);
        if let Some(max) = args.max_size
            && max < size
        {
            return Err(StorageError::invalid_input(format!(
                "Maximum size {} is smaller than the size {}",
                storage_types::bytes_to_pretty(&max, false),
                storage_types::bytes_to_pretty(&size, false)
            )));
        }
        let weight = self
            .settings
            .platform
            .weight(Some(args.format.kind), args.format.mountpoint.as_deref());
        Ok(Device::new(
            name,
            size,
            DeviceKind::Partition(PartitionData {
                req_base_size: size,
                req_max_size: args.max_size,
                req_grow: args.grow,
                req_disks: args.disks,
                req_primary: args.primary,
                weight,
                ..Default::default()
            }),
        )
        .with_format(args.format))
    }

    pub fn new_vg(&mut self, args: NewVg) -> Result<Device> {
        let name = match args.name {
            Some(name) => {
                let name = safe_device_name(&name);
                self.check_name(&name)?;
                name
            }
            None => self.suggest_container_name(),
        };
        let pe_size = args.pe_size.unwrap_or(storage_types::DEFAULT_PE_SIZE);
        if !is_supported_pe_size(pe_size) {
            return Err(StorageError::invalid_input(format!(
                "Physical extent size {} is not supported",
                storage_types::bytes_to_pretty(&pe_size, false)
            )));
        }
        self.check_sector_sizes(&args.parents)?;
        Ok(Device::new(
            name,
            0,
            DeviceKind::LvmVg(VgData {
                pe_size,
                reserved_space: args.reserved_space,
                reserved_percent: args.reserved_percent,
                thpool_reserve: args.thpool_reserve,
            }),
        )
        .with_parents(args.parents)
        .with_format(Format::none()))
    }

    pub fn new_lv(&mut self, args: NewLv) -> Result<Device> {
        let parent = self.tree.device(args.parent)?;
        let vg = if parent.is_vg() {
            args.parent
        } else if parent.is_thin_pool() {
            self.tree
                .lv_vg(args.parent)
                .ok_or_else(|| StorageError::unknown_device(&format!("volume group of {}", parent.name)))?
        } else {
            return Err(StorageError::invalid_input(format!(
                "{} cannot hold logical volumes",
                parent.name
            )));
        };
        if (args.role == LvRole::Thin) != parent.is_thin_pool() {
            return Err(StorageError::invalid_input(
                "Thin volumes must be created in a thin pool",
            ));
        }
        let vg_device = self.tree.device(vg)?;
        let vg_name = vg_device.name.clone();
        let pe = vg_device.vg().map(|d| d.pe_size).unwrap_or(storage_types::DEFAULT_PE_SIZE);
        let lvname = match args.name {
            Some(name) => safe_device_name(&name),
            None => self.suggest_device_name(
                Some(vg),
                args.format.mountpoint.as_deref(),
                args.format.kind == FormatType::Swap,
            ),
        };
        let name = lv_device_name(&vg_name, &lvname);
        self.check_name(&name)?;
        let size = align_up(args.size, pe);
        Ok(Device::new(
            name,
            size,
            DeviceKind::LvmLv(LvData {
                lvname,
                role: args.role,
                percent: args.percent,
                req_grow: args.grow,
                req_size: size,
                req_max_size: args.max_size,
                metadata_size: args.metadata_size,
                chunk_size: args.chunk_size,
                profile: args.profile,
                cache: args.cache,
            }),
        )
        .with_parents(vec![args.parent])
        .with_format(args.format))
    }

    pub fn new_btrfs(&mut self, args: NewBtrfs) -> Result<Device> {
        let mut format = args.format;
        if format.kind != FormatType::Btrfs {
            format = Format {
                kind: FormatType::Btrfs,
                ..format
            };
        }
        if args.subvol {
            let [volume] = args.parents.as_slice() else {
                return Err(StorageError::invalid_input("A subvolume needs exactly one parent"));
            };
            let volume = self.tree.device(*volume)?;
            if !volume.is_btrfs() {
                return Err(StorageError::invalid_input(format!(
                    "{} is not a btrfs volume",
                    volume.name
                )));
            }
            format.uuid = volume.format.uuid.clone();
            let name = match args.name {
                Some(name) => name,
                None => device_name_base(format.mountpoint.as_deref(), false),
            };
            let name = if self.names().contains(&name) {
                unique_name(&name, &self.names())
            } else {
                name
            };
            return Ok(Device::new(name, 0, DeviceKind::BtrfsSubvolume)
                .with_parents(args.parents)
                .with_format(format));
        }

        if args.parents.is_empty() {
            return Err(StorageError::invalid_input("A btrfs volume needs at least one member"));
        }
        for level in [args.data_level, args.metadata_level].into_iter().flatten() {
            if !level.is_btrfs_level() {
                return Err(StorageError::invalid_input(format!(
                    "RAID level {level} is not valid for btrfs"
                )));
            }
            if args.parents.len() < level.min_members() {
                return Err(StorageError::invalid_input(format!(
                    "RAID level {level} requires at least {} members",
                    level.min_members()
                )));
            }
        }
        self.check_sector_sizes(&args.parents)?;
        let name = match args.name.or_else(|| format.label.clone()) {
            Some(name) => {
                let name = safe_device_name(&name);
                self.check_name(&name)?;
                name
            }
            None => self.suggest_container_name(),
        };
        Ok(Device::new(
            name,
            0,
            DeviceKind::BtrfsVolume(BtrfsVolumeData {
                data_level: args.data_level,
                metadata_level: args.metadata_level,
            }),
        )
        .with_parents(args.parents)
        .with_format(format))
    }

    pub fn new_mdarray(&mut self, args: NewMdArray) -> Result<Device> {
        if !args.level.is_md_level() {
            return Err(StorageError::invalid_input(format!(
                "RAID level {} is not valid for MD arrays",
                args.level
            )));
        }
        let total = args.parents.len() as u32;
        let members = args.member_devices.unwrap_or(total.saturating_sub(args.spares));
        if (members as usize) < args.level.min_members() || members + args.spares > total {
            return Err(StorageError::invalid_input(format!(
                "RAID level {} requires at least {} members, {} given",
                args.level,
                args.level.min_members(),
                members
            )));
        }
        self.check_sector_sizes(&args.parents)?;
        let name = match args.name {
            Some(name) => {
                self.check_name(&name)?;
                name
            }
            None => self.suggest_device_name(
                None,
                args.format.mountpoint.as_deref(),
                args.format.kind == FormatType::Swap,
            ),
        };
        Ok(Device::new(
            name,
            0,
            DeviceKind::MdArray(MdData {
                level: args.level,
                member_devices: members,
                spares: args.spares,
                metadata_version: args.metadata_version,
                chunk_size: args.chunk_size,
            }),
        )
        .with_parents(args.parents)
        .with_format(args.format))
    }

    /// The mapping of a LUKS format on `parent`, carrying `format`.
    pub fn new_luks(&mut self, parent: DeviceId, format: Format) -> Result<Device> {
        let backing = self.tree.device(parent)?;
        if backing.format.kind != FormatType::Luks {
            return Err(StorageError::invalid_input(format!(
                "{} is not formatted as LUKS",
                backing.name
            )));
        }
        let suffix = backing.format.uuid.clone().unwrap_or_else(|| backing.name.clone());
        let name = unique_name(&format!("luks-{suffix}"), &self.names());
        Ok(Device::new(name, 0, DeviceKind::Luks)
            .with_parents(vec![parent])
            .with_format(format))
    }

    pub fn new_tmp_fs(&mut self, format: Format, size: u64) -> Result<Device> {
        let base = format.kind.as_str().to_string();
        let name = unique_name(&base, &self.names());
        Ok(Device::new(name, size, DeviceKind::Nodev).with_format(format))
    }

    /// Add a new device to the tree and queue its creation.
    pub fn create_device(&mut self, device: Device) -> Result<DeviceId> {
        if device.exists {
            return Err(StorageError::invalid_input(format!(
                "{} already exists",
                device.name
            )));
        }
        for parent in &device.parents {
            let parent = self.tree.device(*parent)?;
            if parent.protected {
                return Err(StorageError::protected_device(&parent.name));
            }
        }
        let format = device.format.clone();
        let name = device.name.clone();
        let id = self.tree.add_device(device)?;
        self.tree
            .actions
            .add(ActionKind::Create, ActionTarget::Device, id, &name, ActionPayload::None);
        if !format.is_none() {
            self.tree.actions.add(
                ActionKind::Create,
                ActionTarget::Format,
                id,
                &name,
                ActionPayload::Format { format },
            );
        }
        self.tree.refresh_derived_sizes();
        Ok(id)
    }

    /// Remove a leaf device. New devices simply disappear with their actions.
    pub fn destroy_device(&mut self, id: DeviceId) -> Result<()> {
        let device = self.tree.device(id)?.clone();
        if device.protected {
            return Err(StorageError::protected_device(&device.name));
        }
        if !self.tree.is_leaf(id) {
            return Err(StorageError::invalid_input(format!(
                "Cannot destroy {} because other devices depend on it",
                device.name
            )));
        }
        if device.exists {
            let actions = &mut self.tree.actions;
            actions.cancel(id, ActionKind::Create, Some(ActionTarget::Format));
            actions.cancel(id, ActionKind::Resize, None);
            actions.cancel(id, ActionKind::Reformat, None);
            let original = &device.original_format;
            if original.exists
                && !original.is_none()
                && !device.format_immutable
                && !actions.contains(id, ActionKind::Destroy, ActionTarget::Format)
            {
                actions.add(
                    ActionKind::Destroy,
                    ActionTarget::Format,
                    id,
                    &device.name,
                    ActionPayload::Format {
                        format: original.clone(),
                    },
                );
            }
            actions.add(ActionKind::Destroy, ActionTarget::Device, id, &device.name, ActionPayload::None);
        } else {
            self.tree.actions.cancel_all(id);
        }
        self.fstab_swaps.remove(&id);
        self.container_policies.remove(&id);
        self.selected_disks.retain(|disk| *disk != id);
        if self.bootloader.stage1_device == Some(id) {
            self.bootloader.stage1_device = None;
        }
        self.tree.remove_device(id)?;
        self.tree.refresh_derived_sizes();
        tracing::debug!(device = %device.name, "destroyed device");
        Ok(())
    }

    /// Replace the format of a device.
    pub fn format_device(&mut self, id: DeviceId, format: Format) -> Result<()> {
        let device = self.tree.device(id)?;
        if device.protected {
            return Err(StorageError::protected_device(&device.name));
        }
        if device.format_immutable {
            return Err(StorageError::invalid_input(format!(
                "The format of {} cannot be changed",
                device.name
            )));
        }
        if !self.tree.is_leaf(id) {
            return Err(StorageError::invalid_input(format!(
                "Cannot reformat {} because other devices depend on it",
                device.name
            )));
        }
        let name = device.name.clone();
        let old = device.format.clone();

        let actions = &mut self.tree.actions;
        if !old.exists {
            actions.cancel(id, ActionKind::Create, Some(ActionTarget::Format));
        } else if !old.is_none() && !actions.contains(id, ActionKind::Destroy, ActionTarget::Format) {
            actions.add(
                ActionKind::Destroy,
                ActionTarget::Format,
                id,
                &name,
                ActionPayload::Format { format: old },
            );
        }
        actions.cancel(id, ActionKind::Resize, Some(ActionTarget::Format));
        actions.cancel(id, ActionKind::Reformat, Some(ActionTarget::Format));

        let mut format = format;
        format.exists = false;
        if !format.is_none() {
            actions.add(
                ActionKind::Create,
                ActionTarget::Format,
                id,
                &name,
                ActionPayload::Format {
                    format: format.clone(),
                },
            );
        }
        let device = self.tree.device_mut(id)?;
        if format.kind != FormatType::Swap {
            self.fstab_swaps.remove(&id);
        }
        device.format = format;
        self.tree.refresh_derived_sizes();
        tracing::debug!(device = %name, "scheduled new format");
        Ok(())
    }

    pub fn destroy_format(&mut self, id: DeviceId) -> Result<()> {
        self.format_device(id, Format::none())
    }

    /// Change the label of a device's format.
    pub fn set_format_label(&mut self, id: DeviceId, label: Option<String>) -> Result<()> {
        let device = self.tree.device(id)?;
        if device.protected {
            return Err(StorageError::protected_device(&device.name));
        }
        if let Some(label) = &label
            && !device.format.kind.label_format_ok(label)
        {
            return Err(StorageError::invalid_input(format!(
                "Label {label} is not valid for {}",
                device.format.kind
            )));
        }
        let name = device.name.clone();
        let exists = device.format.exists;
        let device = self.tree.device_mut(id)?;
        device.format.label = label.clone();
        let format = device.format.clone();
        let actions = &mut self.tree.actions;
        if exists {
            actions.cancel(id, ActionKind::Reformat, Some(ActionTarget::Format));
            actions.add(
                ActionKind::Reformat,
                ActionTarget::Format,
                id,
                &name,
                ActionPayload::Label { label },
            );
        } else {
            actions.update_created_format(id, &format);
        }
        Ok(())
    }

    /// Mount points need no action; they are written to fstab at the end.
    pub fn set_mountpoint(&mut self, id: DeviceId, mountpoint: Option<String>) -> Result<()> {
        let device = self.tree.device_mut(id)?;
        if device.protected {
            return Err(StorageError::protected_device(&device.name));
        }
        device.format.mountpoint = mountpoint;
        let format = device.format.clone();
        if !format.exists {
            self.tree.actions.update_created_format(id, &format);
        }
        Ok(())
    }

    /// Rename a device. LVs are renamed inside their VG, a renamed VG
    /// renames its LVs.
    pub fn rename_device(&mut self, id: DeviceId, new_name: &str) -> Result<()> {
        let device = self.tree.device(id)?.clone();
        if device.protected {
            return Err(StorageError::protected_device(&device.name));
        }
        let new_name = safe_device_name(new_name);
        if device.short_name() == new_name {
            return Ok(());
        }
        let full_name = match self.tree.lv_vg(id).filter(|_| device.is_lv()) {
            Some(vg) => lv_device_name(&self.tree.device(vg)?.name, &new_name),
            None => new_name.clone(),
        };
        self.check_name(&full_name)?;

        let dev = self.tree.device_mut(id)?;
        dev.name = full_name.clone();
        if let Some(lv) = dev.lv_mut() {
            lv.lvname = new_name.clone();
        }
        self.tree.actions.rename_device(id, &full_name);
        if device.exists {
            self.tree.actions.add(
                ActionKind::Reformat,
                ActionTarget::Device,
                id,
                &full_name,
                ActionPayload::Label {
                    label: Some(new_name.clone()),
                },
            );
        }

        if device.is_vg() {
            let lvs: Vec<DeviceId> = self
                .tree
                .get_dependent_devices(id)
                .into_iter()
                .filter(|d| self.tree.get(*d).is_some_and(Device::is_lv))
                .collect();
            for lv in lvs {
                if let Some(dev) = self.tree.get_mut(lv) {
                    let lvname = dev.short_name().to_string();
                    dev.name = lv_device_name(&full_name, &lvname);
                    let name = dev.name.clone();
                    self.tree.actions.rename_device(lv, &name);
                }
            }
        }
        tracing::debug!(from = %device.name, to = %full_name, "renamed device");
        Ok(())
    }

    /// Change the size of a device, within its limits.
    pub fn resize_device(&mut self, id: DeviceId, size: u64) -> Result<()> {
        let device = self.tree.device(id)?.clone();
        if device.protected {
            return Err(StorageError::protected_device(&device.name));
        }
        let new_size = self.tree.align_target_size(id, size);
        let min = self.tree.min_size(id);
        let max = self.tree.max_size(id);
        if new_size < min || new_size > max || new_size == 0 {
            return Err(StorageError::invalid_input(format!(
                "Invalid size {} for {}: it must be between {} and {}",
                storage_types::bytes_to_pretty(&new_size, false),
                device.name,
                storage_types::bytes_to_pretty(&min, false),
                storage_types::bytes_to_pretty(&max, false)
            )));
        }

        if !device.exists {
            let dev = self.tree.device_mut(id)?;
            dev.size = new_size;
            if let Some(data) = dev.partition_mut() {
                data.req_base_size = new_size;
            }
            if let Some(data) = dev.lv_mut() {
                data.req_size = new_size;
            }
            self.tree.refresh_derived_sizes();
            return Ok(());
        }

        if !device.is_resizable() {
            return Err(StorageError::invalid_input(format!(
                "{} is not resizable",
                device.name
            )));
        }
        self.tree.actions.cancel(id, ActionKind::Resize, None);
        self.tree.device_mut(id)?.size = new_size;
        let original = device.original_size;
        if new_size != original {
            let payload = ActionPayload::Resize {
                old_size: original,
                new_size,
            };
            let format_resizable = device.format.exists && !device.format.is_none();
            let actions = &mut self.tree.actions;
            if new_size < original {
                if format_resizable {
                    actions.add(ActionKind::Resize, ActionTarget::Format, id, &device.name, payload.clone());
                }
                actions.add(ActionKind::Resize, ActionTarget::Device, id, &device.name, payload);
            } else {
                actions.add(ActionKind::Resize, ActionTarget::Device, id, &device.name, payload.clone());
                if format_resizable {
                    actions.add(ActionKind::Resize, ActionTarget::Format, id, &device.name, payload);
                }
            }
        }
        self.tree.refresh_derived_sizes();
        tracing::debug!(device = %device.name, size = new_size, "resized device");
        Ok(())
    }

    /// Remove a device and everything built on it, except what protected
    /// devices still need.
    pub fn recursive_remove(&mut self, id: DeviceId) -> Result<()> {
        let device = self.tree.device(id)?.clone();
        if device.protected {
            return Err(StorageError::protected_device(&device.name));
        }
        let dependents = self.tree.get_dependent_devices(id);
        let mut keep = BTreeSet::new();
        for dep in &dependents {
            if self.tree.get(*dep).is_some_and(|d| d.protected) {
                keep.insert(*dep);
                keep.extend(self.tree.ancestors(*dep));
            }
        }
        for dep in dependents.iter().rev() {
            if keep.contains(dep) || !self.tree.contains(*dep) {
                continue;
            }
            self.destroy_device(*dep)?;
        }

        if !keep.contains(&id) {
            self.destroy_device(id)?;
            self.destroy_empty_parents(&device.parents)?;
        }
        crate::partitioning::remove_empty_extended_partitions(&mut self.tree);
        Ok(())
    }

    /// Destroy everything built on a device, keeping the device itself.
    pub fn remove_descendants(&mut self, id: DeviceId) -> Result<()> {
        for dep in self.tree.get_dependent_devices(id).into_iter().rev() {
            if self.tree.contains(dep) {
                self.destroy_device(dep)?;
            }
        }
        crate::partitioning::remove_empty_extended_partitions(&mut self.tree);
        Ok(())
    }

    /// Destroy parents left without children, up to the disks. Btrfs
    /// subvolumes stay.
    fn destroy_empty_parents(&mut self, parents: &[DeviceId]) -> Result<()> {
        for parent in parents {
            let Some(device) = self.tree.get(*parent) else {
                continue;
            };
            let kept = device.is_disk() || device.is_btrfs_subvolume() || device.protected;
            if kept || !self.tree.is_leaf(*parent) {
                continue;
            }
            let grandparents = device.parents.clone();
            self.destroy_device(*parent)?;
            self.destroy_empty_parents(&grandparents)?;
        }
        Ok(())
    }

    /// Wipe a disk and give it a new partition table.
    pub fn initialize_disk(&mut self, id: DeviceId) -> Result<()> {
        let device = self.tree.device(id)?;
        if device.protected {
            return Err(StorageError::protected_device(&device.name));
        }
        if !device.is_disk() {
            return Err(StorageError::invalid_input(format!("{} is not a disk", device.name)));
        }
        let size = device.size;
        for child in self.tree.children(id) {
            if self.tree.contains(child) {
                self.recursive_remove(child)?;
            }
        }
        let label = self.settings.platform.best_disklabel_type(size);
        self.format_device(id, Format::new(FormatType::DiskLabel).with_disklabel(label))?;
        tracing::info!(disk = %self.tree.device(id)?.name, label = label.as_str(), "initialized disk");
        Ok(())
    }

    /// Forget every change made to a device.
    pub fn reset_device(&mut self, id: DeviceId) -> Result<()> {
        let device = self.tree.device(id)?;
        if device.protected {
            return Err(StorageError::protected_device(&device.name));
        }
        if !device.exists {
            return self.destroy_device(id);
        }
        self.tree.actions.cancel_all(id);
        let device = self.tree.device_mut(id)?;
        device.format = device.original_format.clone();
        device.size = device.original_size;
        self.tree.refresh_derived_sizes();
        Ok(())
    }

    pub fn remove_empty_extended_partitions(&mut self) {
        crate::partitioning::remove_empty_extended_partitions(&mut self.tree);
    }

    /// Place all new partitions on the partitioned selected disks.
    pub fn do_partitioning(&mut self, boot_disk: Option<DeviceId>) -> Result<()> {
        let disks = self.partitioned_disks();
        crate::partitioning::do_partitioning(&mut self.tree, &disks, boot_disk)
    }

    pub fn grow_lvm(&mut self) {
        crate::lvm::grow_lvm(&mut self.tree);
        self.tree.refresh_derived_sizes();
    }

    /// Hand the recorded actions to the backend in execution order.
    pub fn execute_actions(&self, monitor: &dyn TaskMonitor) -> Result<usize> {
        let backend = self.backend.clone().ok_or_else(StorageError::unavailable_storage)?;
        let actions = self.tree.actions.sorted();
        for action in &actions {
            monitor.check_cancel()?;
            monitor.report_progress(&action.describe());
            backend.execute(action, &self.tree)?;
        }
        Ok(actions.len())
    }
}
