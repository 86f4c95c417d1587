// SPDX-License-Identifier: GPL-3.0-only

//! Custom partitioning
//!
//! Executes a declarative layout in the style of kickstart storage commands.
//! Rows are processed stage by stage: `reqpart`, `part`, `raid`, `volgroup`,
//! `logvol` and `btrfs`. Sizes are in MiB, chunk and extent sizes in KiB.
//!
//! Rows can refer to member devices created by earlier rows by the names
//! they were given as mount point (`pv.01`, `raid.01`, `btrfs.01`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use storage_contracts::{StorageError, TaskMonitor};
use storage_devicetree::{
    NewBtrfs, NewLv, NewMdArray, NewPartition, NewVg, Result, Storage, lv_device_name,
};
use storage_types::{
    AutoPartScheme, CacheMode, DeviceId, Format, FormatType, KIB, LuksParams, LuksVersion, LvRole,
    LvmCacheRequest, MIB, PlatformKind, RaidLevel,
};

use crate::bootloader::find_stage1_device;
use crate::luks::{check_passphrase, create_encrypted, get_pbkdf_args, luks_child};
use crate::schedule::schedule_partitions;
use crate::swap::suggest_swap_size;

/// Mount options of an EFI system partition.
pub const EFI_MOUNT_OPTIONS: &str = "defaults,uid=0,gid=0,umask=077,shortname=winnt";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionArgs {
    pub encrypted: bool,
    #[serde(skip_serializing)]
    pub passphrase: String,
    pub cipher: Option<String>,
    pub luks_version: Option<LuksVersion>,
    pub pbkdf: Option<String>,
    pub pbkdf_memory: u32,
    pub pbkdf_time: u32,
    pub pbkdf_iterations: u32,
    pub escrowcert: Option<String>,
    pub backuppassphrase: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReqPartRow {
    pub add_boot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartRow {
    pub mountpoint: String,
    pub fstype: Option<FormatType>,
    pub size: Option<u64>,
    pub grow: bool,
    pub maxsize: Option<u64>,
    pub ondisk: Option<String>,
    pub onpart: Option<String>,
    pub asprimary: bool,
    pub noformat: bool,
    pub resize: bool,
    pub label: Option<String>,
    pub fsoptions: Option<String>,
    pub mkfsoptions: Option<String>,
    pub recommended: bool,
    pub hibernation: bool,
    #[serde(flatten)]
    pub encryption: EncryptionArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RaidRow {
    pub mountpoint: String,
    pub device: String,
    pub level: Option<RaidLevel>,
    pub members: Vec<String>,
    pub spares: u32,
    pub fstype: Option<FormatType>,
    pub chunk_size: Option<u64>,
    pub metadata: Option<String>,
    pub useexisting: bool,
    pub noformat: bool,
    pub label: Option<String>,
    pub fsoptions: Option<String>,
    pub mkfsoptions: Option<String>,
    #[serde(flatten)]
    pub encryption: EncryptionArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VolGroupRow {
    pub name: String,
    pub members: Vec<String>,
    pub pesize: Option<u64>,
    pub useexisting: bool,
    pub noformat: bool,
    pub reserved_space: Option<u64>,
    pub reserved_percent: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogVolRow {
    pub mountpoint: String,
    pub vgname: String,
    pub name: String,
    pub fstype: Option<FormatType>,
    pub size: Option<u64>,
    pub grow: bool,
    pub maxsize: Option<u64>,
    pub percent: Option<u8>,
    pub useexisting: bool,
    pub noformat: bool,
    pub resize: bool,
    pub label: Option<String>,
    pub fsoptions: Option<String>,
    pub mkfsoptions: Option<String>,
    pub recommended: bool,
    pub hibernation: bool,
    pub thin_pool: bool,
    pub thin: bool,
    pub poolname: Option<String>,
    pub metadatasize: Option<u64>,
    pub chunksize: Option<u64>,
    pub profile: Option<String>,
    pub cachesize: Option<u64>,
    pub cachepvs: Vec<String>,
    pub cachemode: Option<CacheMode>,
    #[serde(flatten)]
    pub encryption: EncryptionArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BtrfsRow {
    pub mountpoint: String,
    pub name: Option<String>,
    pub label: Option<String>,
    pub subvol: bool,
    pub members: Vec<String>,
    pub data: Option<RaidLevel>,
    pub metadata: Option<RaidLevel>,
    pub useexisting: bool,
    pub noformat: bool,
    pub fsoptions: Option<String>,
    pub mkfsoptions: Option<String>,
}

/// A complete declarative layout.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomLayout {
    pub reqpart: Option<ReqPartRow>,
    #[serde(alias = "partition")]
    pub part: Vec<PartRow>,
    pub raid: Vec<RaidRow>,
    pub volgroup: Vec<VolGroupRow>,
    pub logvol: Vec<LogVolRow>,
    pub btrfs: Vec<BtrfsRow>,
}

/// What a row's mount point field asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    fstype: FormatType,
    mountpoint: Option<String>,
    options: Option<String>,
    /// Name under which later rows refer to the device
    member: Option<String>,
}

fn mib(size: Option<u64>) -> u64 {
    size.unwrap_or(0) * MIB
}

fn is_member_name(name: &str) -> bool {
    ["pv.", "raid.", "btrfs."].iter().any(|prefix| name.starts_with(prefix))
}

fn check_mountpoint(mountpoint: &str) -> Result<()> {
    if !mountpoint.is_empty() && !mountpoint.starts_with('/') {
        return Err(StorageError::invalid_input(format!(
            "The mount point \"{mountpoint}\" is not valid. It must start with a /."
        )));
    }
    Ok(())
}

pub struct CustomPlanner<'a> {
    storage: &'a mut Storage,
    members: BTreeMap<String, DeviceId>,
}

impl<'a> CustomPlanner<'a> {
    pub fn new(storage: &'a mut Storage) -> Self {
        Self {
            storage,
            members: BTreeMap::new(),
        }
    }

    /// Run every stage of `layout` against the storage.
    pub fn execute(mut self, layout: &CustomLayout, monitor: &dyn TaskMonitor) -> Result<()> {
        tracing::info!(
            parts = layout.part.len(),
            raids = layout.raid.len(),
            vgs = layout.volgroup.len(),
            lvs = layout.logvol.len(),
            btrfs = layout.btrfs.len(),
            "custom partitioning"
        );
        crate::policy::clear_partitions(self.storage)?;

        if let Some(reqpart) = &layout.reqpart {
            monitor.check_cancel()?;
            self.reqpart(reqpart)?;
        }
        for row in &layout.part {
            monitor.check_cancel()?;
            monitor.report_progress(&format!("Scheduling partition {}", row.mountpoint));
            self.part(row)?;
        }
        let boot_disk = self.storage.stage1_disk();
        self.storage.do_partitioning(boot_disk)?;

        for row in &layout.raid {
            monitor.check_cancel()?;
            self.raid(row)?;
        }
        for row in &layout.volgroup {
            monitor.check_cancel()?;
            self.volgroup(row)?;
        }
        for row in &layout.logvol {
            monitor.check_cancel()?;
            monitor.report_progress(&format!("Scheduling logical volume {}", row.name));
            self.logvol(row)?;
        }
        self.storage.grow_lvm();
        for row in &layout.btrfs {
            monitor.check_cancel()?;
            self.btrfs(row)?;
        }
        find_stage1_device(self.storage);
        Ok(())
    }

    fn target(&self, mountpoint: &str, fstype: Option<FormatType>) -> Result<Target> {
        let target = |fstype, mountpoint: Option<&str>| Target {
            fstype,
            mountpoint: mountpoint.map(str::to_string),
            options: None,
            member: None,
        };
        Ok(match mountpoint {
            "swap" => target(FormatType::Swap, None),
            "" | "none" | "None" => target(fstype.unwrap_or(FormatType::None), None),
            "appleboot" => target(FormatType::AppleBoot, None),
            "prepboot" => target(FormatType::PrepBoot, None),
            "biosboot" => target(FormatType::BiosBoot, None),
            name if name.starts_with("pv.") => Target {
                member: Some(name.to_string()),
                ..target(FormatType::LvmPv, None)
            },
            name if name.starts_with("raid.") => Target {
                member: Some(name.to_string()),
                ..target(FormatType::MdMember, None)
            },
            name if name.starts_with("btrfs.") => Target {
                member: Some(name.to_string()),
                ..target(FormatType::Btrfs, None)
            },
            "/boot/efi" => {
                let efi = if self.storage.platform().kind == PlatformKind::MacEfi {
                    FormatType::MacEfi
                } else {
                    FormatType::Efi
                };
                Target {
                    options: Some(EFI_MOUNT_OPTIONS.to_string()),
                    ..target(efi, Some("/boot/efi"))
                }
            }
            path => {
                check_mountpoint(path)?;
                let fstype = fstype.unwrap_or_else(|| self.storage.default_fstype_for(Some(path)));
                target(fstype, Some(path))
            }
        })
    }

    fn format(
        &self,
        target: &Target,
        label: Option<&String>,
        fsoptions: Option<&String>,
        mkfsoptions: Option<&String>,
    ) -> Result<Format> {
        let mut format = Format::new(target.fstype);
        format.mountpoint = target.mountpoint.clone();
        format.options = fsoptions.cloned().or_else(|| target.options.clone());
        format.create_options = mkfsoptions.cloned();
        if let Some(label) = label {
            if !target.fstype.label_format_ok(label) {
                return Err(StorageError::invalid_input(format!(
                    "Label {label} is not valid for {}",
                    target.fstype
                )));
            }
            format.label = Some(label.clone());
        }
        Ok(format)
    }

    fn luks_params(&mut self, args: &EncryptionArgs) -> Result<Option<LuksParams>> {
        if !args.encrypted {
            return Ok(None);
        }
        check_passphrase(self.storage.settings.fips, &args.passphrase)?;
        let version = args.luks_version.unwrap_or(self.storage.settings.default_luks_version);
        let escrow_cert = match args.escrowcert.as_deref() {
            None | Some("") => None,
            Some(url) => Some(self.storage.get_escrow_certificate(url)?),
        };
        Ok(Some(LuksParams {
            version,
            passphrase: Some(args.passphrase.clone()),
            cipher: args.cipher.clone(),
            pbkdf_args: get_pbkdf_args(
                version,
                args.pbkdf.as_deref(),
                args.pbkdf_memory,
                args.pbkdf_iterations,
                args.pbkdf_time,
            ),
            escrow_cert,
            add_backup_passphrase: args.backuppassphrase,
            ..Default::default()
        }))
    }

    fn resolve(&self, spec: &str) -> Result<DeviceId> {
        if is_member_name(spec) && !self.members.contains_key(spec) {
            return Err(StorageError::invalid_input(format!(
                "The member \"{spec}\" is not defined by an earlier row"
            )));
        }
        self.members
            .get(spec)
            .copied()
            .or_else(|| self.storage.tree.resolve_device(spec).map(|d| d.id))
            .ok_or_else(|| StorageError::invalid_input(format!("The device \"{spec}\" was not found")))
    }

    /// A member device, through its LUKS mapping when it is encrypted.
    fn member(&self, spec: &str, expected: FormatType) -> Result<DeviceId> {
        let id = self.resolve(spec)?;
        let id = luks_child(self.storage, id).unwrap_or(id);
        let device = self.storage.tree.device(id)?;
        if device.format.kind != expected {
            return Err(StorageError::invalid_input(format!(
                "The device {} is not formatted as {expected}",
                device.name
            )));
        }
        Ok(id)
    }

    /// Free the mount point of a new device from devices claiming it earlier.
    fn release_mountpoint(&mut self, mountpoint: Option<&String>) -> Result<()> {
        let Some(mountpoint) = mountpoint else {
            return Ok(());
        };
        let Some(id) = self.storage.mountpoints().get(mountpoint).copied() else {
            return Ok(());
        };
        if self.storage.tree.device(id)?.exists {
            self.storage.set_mountpoint(id, None)
        } else {
            tracing::debug!(mountpoint, "replacing the earlier device of the mount point");
            self.storage.recursive_remove(id)
        }
    }

    /// Create `device`, wrapped in LUKS when `luks` is set. Returns the
    /// device that carries `format`.
    fn create(
        &mut self,
        mut device: storage_types::Device,
        format: Format,
        luks: Option<LuksParams>,
        target: &Target,
    ) -> Result<DeviceId> {
        let (backing, leaf) = match luks {
            Some(params) => create_encrypted(self.storage, device, params, format.clone())?,
            None => {
                device.format = format.clone();
                let id = self.storage.create_device(device)?;
                (id, id)
            }
        };
        if format.kind == FormatType::Swap {
            self.storage.add_fstab_swap(leaf);
        }
        if let Some(member) = &target.member {
            self.members.insert(member.clone(), backing);
        }
        Ok(leaf)
    }

    /// Reuse an existing device for a row.
    fn apply_to_existing(
        &mut self,
        id: DeviceId,
        format: Format,
        noformat: bool,
        resize: Option<u64>,
        luks: Option<LuksParams>,
    ) -> Result<()> {
        if let Some(size) = resize {
            self.storage.resize_device(id, size)?;
        }
        if noformat {
            self.storage.set_mountpoint(id, format.mountpoint.clone())?;
            if let Some(device) = self.storage.tree.get_mut(id)
                && format.options.is_some()
            {
                device.format.options = format.options;
            }
            return Ok(());
        }
        self.storage.remove_descendants(id)?;
        match luks {
            Some(params) => {
                self.storage
                    .format_device(id, Format::new(FormatType::Luks).with_luks(params))?;
                let mapping = self.storage.new_luks(id, format)?;
                self.storage.create_device(mapping)?;
            }
            None => self.storage.format_device(id, format)?,
        }
        Ok(())
    }

    fn reqpart(&mut self, row: &ReqPartRow) -> Result<()> {
        let boot_fstype = self.storage.settings.default_boot_fstype;
        let requests: Vec<_> = self
            .storage
            .platform()
            .partitions
            .iter()
            .filter(|spec| row.add_boot || spec.mountpoint.as_deref() != Some("/boot"))
            .cloned()
            .map(|mut spec| {
                if spec.mountpoint.as_deref() == Some("/boot") {
                    spec.fstype = Some(boot_fstype);
                }
                spec
            })
            .collect();
        let disks = self.storage.partitioned_disks();
        schedule_partitions(self.storage, &disks, &[], AutoPartScheme::Plain, &requests, None)?;
        Ok(())
    }

    fn part(&mut self, row: &PartRow) -> Result<()> {
        let target = self.target(&row.mountpoint, row.fstype)?;
        let format = self.format(&target, row.label.as_ref(), row.fsoptions.as_ref(), row.mkfsoptions.as_ref())?;
        let luks = self.luks_params(&row.encryption)?;

        if let Some(onpart) = &row.onpart {
            let id = self.resolve(onpart)?;
            let resize = (row.resize && row.size.is_some()).then(|| mib(row.size));
            if !row.noformat {
                self.release_mountpoint(target.mountpoint.as_ref())?;
            }
            self.apply_to_existing(id, format.clone(), row.noformat, resize, luks)?;
            if format.kind == FormatType::Swap {
                self.storage.add_fstab_swap(luks_child(self.storage, id).unwrap_or(id));
            }
            if let Some(member) = target.member {
                self.members.insert(member, id);
            }
            return Ok(());
        }
        if row.noformat {
            return Err(StorageError::invalid_input(
                "The noformat option requires the onpart option",
            ));
        }

        if format.kind == FormatType::Tmpfs {
            self.release_mountpoint(target.mountpoint.as_ref())?;
            let device = self.storage.new_tmp_fs(format, mib(row.size))?;
            self.storage.create_device(device)?;
            return Ok(());
        }

        let size = if format.kind == FormatType::Swap && (row.recommended || row.hibernation) {
            suggest_swap_size(self.storage.settings.total_memory, row.hibernation, None)
        } else {
            mib(row.size)
        };
        let disks = match &row.ondisk {
            Some(spec) => {
                let disk = self.resolve(spec)?;
                if !self.storage.tree.device(disk)?.is_disk() {
                    return Err(StorageError::invalid_input(format!("{spec} is not a disk")));
                }
                vec![disk]
            }
            None => Vec::new(),
        };
        self.release_mountpoint(target.mountpoint.as_ref())?;
        let partition = self.storage.new_partition(NewPartition {
            format: format.clone(),
            size,
            grow: row.grow,
            max_size: row.maxsize.map(|m| m * MIB),
            disks,
            primary: row.asprimary,
            name: None,
        })?;
        self.create(partition, format, luks, &target)?;
        Ok(())
    }

    fn raid(&mut self, row: &RaidRow) -> Result<()> {
        let target = self.target(&row.mountpoint, row.fstype)?;
        let format = self.format(&target, row.label.as_ref(), row.fsoptions.as_ref(), row.mkfsoptions.as_ref())?;
        let luks = self.luks_params(&row.encryption)?;

        if row.useexisting || row.noformat {
            let id = self.resolve(&row.device)?;
            if !self.storage.tree.device(id)?.is_md() {
                return Err(StorageError::invalid_input(format!(
                    "{} is not an existing RAID device",
                    row.device
                )));
            }
            self.apply_to_existing(id, format, row.noformat, None, luks)?;
            if let Some(member) = target.member {
                self.members.insert(member, id);
            }
            return Ok(());
        }

        if self.storage.names().contains(&row.device) {
            return Err(StorageError::invalid_input(format!(
                "The RAID volume name \"{}\" is already in use.",
                row.device
            )));
        }
        let level = row
            .level
            .ok_or_else(|| StorageError::invalid_input("The RAID level is missing"))?;
        let members = row
            .members
            .iter()
            .map(|spec| self.member(spec, FormatType::MdMember))
            .collect::<Result<Vec<_>>>()?;
        let count = members.len() as u32;
        if row.spares >= count {
            return Err(StorageError::invalid_input(format!(
                "RAID device {} has more spares than members",
                row.device
            )));
        }
        self.release_mountpoint(target.mountpoint.as_ref())?;
        let array = self.storage.new_mdarray(NewMdArray {
            name: Some(row.device.clone()),
            member_devices: Some(count - row.spares),
            spares: row.spares,
            metadata_version: row.metadata.clone(),
            chunk_size: row.chunk_size.map(|c| c * KIB),
            ..NewMdArray::new(members, level)
        })?;
        self.create(array, format, luks, &target)?;
        Ok(())
    }

    fn volgroup(&mut self, row: &VolGroupRow) -> Result<()> {
        if row.useexisting || row.noformat {
            let exists = self
                .storage
                .tree
                .get_device_by_name(&row.name, false)
                .is_some_and(|d| d.is_vg());
            if !exists {
                return Err(StorageError::invalid_input(format!(
                    "No preexisting volume group with the name \"{}\" was found.",
                    row.name
                )));
            }
            return Ok(());
        }
        if self.storage.names().contains(&row.name) {
            return Err(StorageError::invalid_input(format!(
                "The volume group name \"{}\" is already in use.",
                row.name
            )));
        }
        let members = row
            .members
            .iter()
            .map(|spec| self.member(spec, FormatType::LvmPv))
            .collect::<Result<Vec<_>>>()?;
        let vg = self.storage.new_vg(NewVg {
            parents: members,
            name: Some(row.name.clone()),
            pe_size: Some(row.pesize.unwrap_or(storage_types::DEFAULT_PE_SIZE / KIB) * KIB),
            reserved_space: mib(row.reserved_space),
            reserved_percent: row.reserved_percent.unwrap_or(0),
            thpool_reserve: None,
        })?;
        self.storage.create_device(vg)?;
        Ok(())
    }

    fn logvol(&mut self, row: &LogVolRow) -> Result<()> {
        let target = self.target(&row.mountpoint, row.fstype)?;
        if self.storage.platform().kind == PlatformKind::S390
            && target.mountpoint.as_deref() == Some("/boot")
        {
            return Err(StorageError::invalid_input(
                "/boot cannot be on a logical volume on s390x",
            ));
        }
        let vg = self
            .storage
            .tree
            .get_device_by_name(&row.vgname, false)
            .filter(|d| d.is_vg())
            .ok_or_else(|| {
                StorageError::invalid_input(format!("No volume group named \"{}\" was found", row.vgname))
            })?;
        let (vg, vg_name) = (vg.id, vg.name.clone());
        let pe = self.storage.tree.get(vg).and_then(|d| d.vg()).map(|d| d.pe_size).unwrap_or(storage_types::DEFAULT_PE_SIZE);
        let format = self.format(&target, row.label.as_ref(), row.fsoptions.as_ref(), row.mkfsoptions.as_ref())?;
        if row.thin && row.encryption.encrypted {
            return Err(StorageError::invalid_input("Thin logical volumes cannot be encrypted"));
        }
        let luks = self.luks_params(&row.encryption)?;
        let full_name = lv_device_name(&vg_name, &row.name);

        if row.useexisting || row.noformat {
            let id = self
                .storage
                .tree
                .get_device_by_name(&full_name, false)
                .filter(|d| d.exists)
                .map(|d| d.id)
                .ok_or_else(|| {
                    StorageError::invalid_input(format!(
                        "Logical volume \"{}\" given in logvol command does not exist.",
                        row.name
                    ))
                })?;
            let resize = (row.resize && row.size.is_some()).then(|| mib(row.size));
            if !row.noformat {
                self.release_mountpoint(target.mountpoint.as_ref())?;
            }
            return self.apply_to_existing(id, format, row.noformat, resize, luks);
        }

        let size = if row.percent.is_some() {
            0
        } else if format.kind == FormatType::Swap && (row.recommended || row.hibernation) {
            suggest_swap_size(self.storage.settings.total_memory, row.hibernation, None)
        } else {
            mib(row.size)
        };
        if row.percent.is_none() && size < pe && !row.grow {
            return Err(StorageError::invalid_input(
                "Logical volume size must be larger than the volume group extent size.",
            ));
        }

        let parent = if row.thin {
            let pool_name = row.poolname.as_deref().ok_or_else(|| {
                StorageError::invalid_input("Thin logical volumes need a pool name")
            })?;
            self.storage
                .tree
                .get_device_by_name(&lv_device_name(&vg_name, pool_name), false)
                .filter(|d| d.is_thin_pool())
                .map(|d| d.id)
                .ok_or_else(|| {
                    StorageError::invalid_input(format!("No thin pool named \"{pool_name}\" was found"))
                })?
        } else {
            vg
        };

        let cache = match row.cachesize {
            Some(cachesize) => {
                let vg_pvs: Vec<DeviceId> = self.storage.tree.vg_pvs(vg).iter().map(|d| d.id).collect();
                let pvs = row
                    .cachepvs
                    .iter()
                    .map(|spec| {
                        let id = self.member(spec, FormatType::LvmPv)?;
                        if vg_pvs.contains(&id) {
                            Ok(id)
                        } else {
                            Err(StorageError::invalid_input(format!(
                                "Cache PV {spec} is not in the volume group {vg_name}"
                            )))
                        }
                    })
                    .collect::<Result<Vec<_>>>()?;
                Some(LvmCacheRequest {
                    size: cachesize * MIB,
                    pvs,
                    mode: row.cachemode.unwrap_or_default(),
                })
            }
            None => None,
        };

        self.release_mountpoint(target.mountpoint.as_ref())?;
        let role = match (row.thin_pool, row.thin) {
            (true, _) => LvRole::ThinPool,
            (false, true) => LvRole::Thin,
            (false, false) => LvRole::Plain,
        };
        let lv = self.storage.new_lv(NewLv {
            name: Some(row.name.clone()),
            size,
            grow: row.grow,
            max_size: row.maxsize.map(|m| m * MIB),
            role,
            percent: row.percent,
            metadata_size: row.metadatasize.map(|m| m * MIB),
            chunk_size: row.chunksize.map(|c| c * KIB),
            profile: row.profile.clone(),
            cache,
            ..NewLv::new(parent)
        })?;
        self.create(lv, format, luks, &target)?;
        Ok(())
    }

    fn btrfs(&mut self, row: &BtrfsRow) -> Result<()> {
        let mountpoint = match row.mountpoint.as_str() {
            "" | "none" | "None" => None,
            path => {
                check_mountpoint(path)?;
                Some(path.to_string())
            }
        };
        let target = Target {
            fstype: FormatType::Btrfs,
            mountpoint,
            options: None,
            member: None,
        };
        let format = self.format(&target, row.label.as_ref(), row.fsoptions.as_ref(), row.mkfsoptions.as_ref())?;

        if row.subvol {
            let [volume] = row.members.as_slice() else {
                return Err(StorageError::invalid_input("A btrfs subvolume needs exactly one volume"));
            };
            let volume = self.resolve(volume)?;
            if !self.storage.tree.device(volume)?.is_btrfs_volume() {
                return Err(StorageError::invalid_input(format!(
                    "{} is not a btrfs volume",
                    row.members[0]
                )));
            }
            self.release_mountpoint(target.mountpoint.as_ref())?;
            let name = row.name.clone().or_else(|| row.label.clone());
            let subvol = self.storage.new_btrfs(NewBtrfs {
                parents: vec![volume],
                name,
                format: Format {
                    label: None,
                    ..format
                },
                subvol: true,
                ..Default::default()
            })?;
            self.storage.create_device(subvol)?;
            return Ok(());
        }

        if row.useexisting || row.noformat {
            let spec = row.name.as_deref().or(row.label.as_deref()).unwrap_or_default();
            let id = self.resolve(spec)?;
            if !self.storage.tree.device(id)?.is_btrfs_volume() {
                return Err(StorageError::invalid_input(format!(
                    "No preexisting btrfs volume named \"{spec}\" was found"
                )));
            }
            if row.noformat {
                return self.storage.set_mountpoint(id, target.mountpoint);
            }
            let members = self.storage.tree.device(id)?.parents.clone();
            self.storage.remove_descendants(id)?;
            self.storage.destroy_device(id)?;
            let volume = self.storage.new_btrfs(NewBtrfs {
                parents: members,
                name: row.name.clone(),
                format,
                data_level: row.data,
                metadata_level: row.metadata,
                subvol: false,
            })?;
            let id = self.storage.create_device(volume)?;
            self.remember_volume(row, id);
            return Ok(());
        }

        let members = row
            .members
            .iter()
            .map(|spec| self.member(spec, FormatType::Btrfs))
            .collect::<Result<Vec<_>>>()?;
        self.release_mountpoint(target.mountpoint.as_ref())?;
        let volume = self.storage.new_btrfs(NewBtrfs {
            parents: members,
            name: row.name.clone(),
            format,
            data_level: row.data,
            metadata_level: row.metadata,
            subvol: false,
        })?;
        let id = self.storage.create_device(volume)?;
        self.remember_volume(row, id);
        Ok(())
    }

    fn remember_volume(&mut self, row: &BtrfsRow, id: DeviceId) {
        for name in [&row.name, &row.label].into_iter().flatten() {
            self.members.insert(name.clone(), id);
        }
    }
}

#[cfg(test)]
mod tests {
    use storage_contracts::{NullMonitor, StorageErrorKind};
    use storage_types::{DiskLabelType, GIB};

    use super::*;
    use crate::test_support::{disk, mounted, storage};

    fn run(storage: &mut Storage, layout: &str) -> Result<()> {
        let layout: CustomLayout = toml::from_str(layout).unwrap();
        CustomPlanner::new(storage).execute(&layout, &NullMonitor)
    }

    #[test]
    fn member_names_are_recognised() {
        assert!(is_member_name("pv.01"));
        assert!(is_member_name("raid.11"));
        assert!(!is_member_name("/pv.01"));
    }

    #[test]
    fn partitions_volume_group_and_volumes() {
        let mut storage = storage(PlatformKind::Efi);
        disk(&mut storage, "vda", 40 * GIB, Some(DiskLabelType::Gpt));
        run(
            &mut storage,
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
        let root = mounted(&storage, "/");
        assert_eq!(root.name, "fedora-root");
        assert_eq!(root.format.kind, FormatType::Xfs);
        assert_eq!(mounted(&storage, "/boot/efi").format.kind, FormatType::Efi);
        assert_eq!(mounted(&storage, "/boot").format.kind, storage.settings.default_boot_fstype);
        let swap = crate::test_support::find(&storage, "fedora-swap");
        assert!(storage.fstab_swaps().contains(&swap));
        assert_eq!(storage.tree.get(swap).unwrap().size, 4 * GIB);
    }

    #[test]
    fn fips_rejects_weak_passphrase() {
        let mut storage = storage(PlatformKind::X86);
        storage.settings.fips = true;
        disk(&mut storage, "sda", 40 * GIB, Some(DiskLabelType::Gpt));
        let err = run(
            &mut storage,
            r#"
[[part]]
mountpoint = "/"
fstype = "ext4"
size = 3000
encrypted = true
passphrase = "weak"
"#,
        )
        .unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::InvalidInput);
    }

    #[test]
    fn encrypted_swap_is_listed_by_its_mapping() {
        let mut storage = storage(PlatformKind::X86);
        disk(&mut storage, "sda", 40 * GIB, Some(DiskLabelType::Gpt));
        run(
            &mut storage,
            r#"
[[part]]
mountpoint = "swap"
size = 2048
encrypted = true
passphrase = "passphrase"
"#,
        )
        .unwrap();
        let swaps: Vec<_> = storage.fstab_swaps().iter().copied().collect();
        assert_eq!(swaps.len(), 1);
        assert!(storage.tree.get(swaps[0]).unwrap().is_luks());
    }

    #[test]
    fn raid_members_must_be_md_members() {
        let mut storage = storage(PlatformKind::X86);
        disk(&mut storage, "sda", 40 * GIB, Some(DiskLabelType::Gpt));
        disk(&mut storage, "sdb", 40 * GIB, Some(DiskLabelType::Gpt));
        run(
            &mut storage,
            r#"
[[part]]
mountpoint = "raid.01"
size = 4096
ondisk = "sda"

[[part]]
mountpoint = "raid.02"
size = 4096
ondisk = "sdb"

[[raid]]
mountpoint = "/srv"
device = "srv"
level = "raid1"
members = ["raid.01", "raid.02"]
"#,
        )
        .unwrap();
        let srv = mounted(&storage, "/srv");
        assert!(srv.is_md());
        assert_eq!(srv.md().unwrap().member_devices, 2);

        let mut other = crate::test_support::storage(PlatformKind::X86);
        disk(&mut other, "sda", 40 * GIB, Some(DiskLabelType::Gpt));
        let err = run(
            &mut other,
            r#"
[[part]]
mountpoint = "pv.01"
size = 4096

[[raid]]
mountpoint = "/srv"
device = "srv"
level = "raid1"
members = ["pv.01"]
"#,
        )
        .unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::InvalidInput);
    }

    #[test]
    fn relative_mountpoints_are_rejected() {
        let mut storage = storage(PlatformKind::X86);
        disk(&mut storage, "sda", 40 * GIB, Some(DiskLabelType::Gpt));
        let err = run(
            &mut storage,
            r#"
[[part]]
mountpoint = "home"
size = 1000
"#,
        )
        .unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::InvalidInput);
    }

    #[test]
    fn small_logical_volumes_need_grow() {
        let mut storage = storage(PlatformKind::X86);
        disk(&mut storage, "sda", 40 * GIB, Some(DiskLabelType::Gpt));
        let layout = r#"
[[part]]
mountpoint = "pv.01"
size = 10000

[[volgroup]]
name = "data"
members = ["pv.01"]
pesize = 8192

[[logvol]]
mountpoint = "/tiny"
vgname = "data"
name = "tiny"
size = 4
"#;
        let err = run(&mut storage, layout).unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::InvalidInput);
    }

    #[test]
    fn btrfs_volume_with_subvolumes() {
        let mut storage = storage(PlatformKind::X86);
        disk(&mut storage, "sda", 40 * GIB, Some(DiskLabelType::Gpt));
        run(
            &mut storage,
            r#"
[[part]]
mountpoint = "btrfs.01"
size = 20000

[[btrfs]]
mountpoint = "none"
label = "fedora"
members = ["btrfs.01"]

[[btrfs]]
mountpoint = "/"
name = "root"
subvol = true
members = ["fedora"]

[[btrfs]]
mountpoint = "/home"
subvol = true
label = "home"
members = ["fedora"]
"#,
        )
        .unwrap();
        let root = mounted(&storage, "/");
        assert!(root.is_btrfs_subvolume());
        assert_eq!(root.name, "root");
        assert_eq!(mounted(&storage, "/home").name, "home");
    }
}
