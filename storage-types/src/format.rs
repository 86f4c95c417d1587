// SPDX-License-Identifier: GPL-3.0-only

//! Device formats
//!
//! Every device in the graph carries exactly one [`Format`]. The format type
//! decides what the device can be used for (mounting, LVM membership, RAID
//! membership, encryption, partition table) and the capabilities are lifted
//! into methods on [`FormatType`] so callers never probe by name.

use serde::{Deserialize, Serialize};

use crate::common::{GIB, KIB, MIB, TIB};

/// Type of a device format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum FormatType {
    /// No format at all (blank device).
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "ext2")]
    Ext2,
    #[serde(rename = "ext3")]
    Ext3,
    #[serde(rename = "ext4")]
    Ext4,
    #[serde(rename = "xfs")]
    Xfs,
    #[serde(rename = "btrfs")]
    Btrfs,
    #[serde(rename = "vfat")]
    Vfat,
    /// EFI System Partition filesystem.
    #[serde(rename = "efi")]
    Efi,
    /// Mac EFI (HFS+ based) system partition.
    #[serde(rename = "macefi")]
    MacEfi,
    /// Apple bootstrap partition (NewWorld PPC).
    #[serde(rename = "appleboot")]
    AppleBoot,
    /// BIOS boot partition for GRUB on GPT.
    #[serde(rename = "biosboot")]
    BiosBoot,
    /// PReP boot partition (IBM POWER).
    #[serde(rename = "prepboot")]
    PrepBoot,
    #[serde(rename = "swap")]
    Swap,
    /// LVM physical volume.
    #[serde(rename = "lvmpv")]
    LvmPv,
    /// MD RAID member.
    #[serde(rename = "mdmember")]
    MdMember,
    #[serde(rename = "luks")]
    Luks,
    /// Partition table.
    #[serde(rename = "disklabel")]
    DiskLabel,
    #[serde(rename = "ntfs")]
    Ntfs,
    #[serde(rename = "hfs")]
    Hfs,
    #[serde(rename = "hfs+")]
    HfsPlus,
    #[serde(rename = "iso9660")]
    Iso9660,
    #[serde(rename = "bind")]
    Bind,
    #[serde(rename = "tmpfs")]
    Tmpfs,
    #[serde(rename = "proc")]
    Proc,
    #[serde(rename = "sysfs")]
    Sysfs,
    #[serde(rename = "devpts")]
    Devpts,
    /// Multipath member (hidden).
    #[serde(rename = "multipath_member")]
    MultipathMember,
    /// Firmware RAID member (hidden).
    #[serde(rename = "dmraidmember")]
    DmRaidMember,
    /// A signature we could not identify.
    #[serde(rename = "unknown")]
    Unknown,
}

impl FormatType {
    pub const ALL: [FormatType; 29] = [
        Self::None,
        Self::Ext2,
        Self::Ext3,
        Self::Ext4,
        Self::Xfs,
        Self::Btrfs,
        Self::Vfat,
        Self::Efi,
        Self::MacEfi,
        Self::AppleBoot,
        Self::BiosBoot,
        Self::PrepBoot,
        Self::Swap,
        Self::LvmPv,
        Self::MdMember,
        Self::Luks,
        Self::DiskLabel,
        Self::Ntfs,
        Self::Hfs,
        Self::HfsPlus,
        Self::Iso9660,
        Self::Bind,
        Self::Tmpfs,
        Self::Proc,
        Self::Sysfs,
        Self::Devpts,
        Self::MultipathMember,
        Self::DmRaidMember,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Ext2 => "ext2",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
            Self::Xfs => "xfs",
            Self::Btrfs => "btrfs",
            Self::Vfat => "vfat",
            Self::Efi => "efi",
            Self::MacEfi => "macefi",
            Self::AppleBoot => "appleboot",
            Self::BiosBoot => "biosboot",
            Self::PrepBoot => "prepboot",
            Self::Swap => "swap",
            Self::LvmPv => "lvmpv",
            Self::MdMember => "mdmember",
            Self::Luks => "luks",
            Self::DiskLabel => "disklabel",
            Self::Ntfs => "ntfs",
            Self::Hfs => "hfs",
            Self::HfsPlus => "hfs+",
            Self::Iso9660 => "iso9660",
            Self::Bind => "bind",
            Self::Tmpfs => "tmpfs",
            Self::Proc => "proc",
            Self::Sysfs => "sysfs",
            Self::Devpts => "devpts",
            Self::MultipathMember => "multipath_member",
            Self::DmRaidMember => "dmraidmember",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a format name, accepting the aliases used by layouts and probes.
    pub fn parse(s: &str) -> Option<Self> {
        let format = match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Self::None,
            "ext2" => Self::Ext2,
            "ext3" => Self::Ext3,
            "ext4" => Self::Ext4,
            "xfs" => Self::Xfs,
            "btrfs" => Self::Btrfs,
            "vfat" | "fat" | "fat32" => Self::Vfat,
            "efi" | "efi system partition" => Self::Efi,
            "macefi" | "linux hfs+ esp" => Self::MacEfi,
            "appleboot" | "apple bootstrap" => Self::AppleBoot,
            "biosboot" | "bios boot" => Self::BiosBoot,
            "prepboot" | "ppc prep boot" => Self::PrepBoot,
            "swap" => Self::Swap,
            "lvmpv" | "lvm" | "lvm2_member" | "physical volume (lvm)" => Self::LvmPv,
            "mdmember" | "raid" | "linux_raid_member" | "software raid" => Self::MdMember,
            "luks" | "crypto_luks" => Self::Luks,
            "disklabel" | "partition table" => Self::DiskLabel,
            "ntfs" => Self::Ntfs,
            "hfs" => Self::Hfs,
            "hfs+" | "hfsplus" => Self::HfsPlus,
            "iso9660" => Self::Iso9660,
            "bind" => Self::Bind,
            "tmpfs" => Self::Tmpfs,
            "proc" => Self::Proc,
            "sysfs" => Self::Sysfs,
            "devpts" => Self::Devpts,
            "multipath_member" => Self::MultipathMember,
            "dmraidmember" => Self::DmRaidMember,
            "unknown" => Self::Unknown,
            _ => return None,
        };
        Some(format)
    }

    /// Filesystem type name as written to fstab.
    pub fn vfs_type(&self) -> &'static str {
        match self {
            Self::Efi | Self::Vfat => "vfat",
            Self::MacEfi | Self::HfsPlus => "hfsplus",
            Self::Bind => "none",
            other => other.as_str(),
        }
    }

    pub fn is_mountable(&self) -> bool {
        matches!(
            self,
            Self::Ext2
                | Self::Ext3
                | Self::Ext4
                | Self::Xfs
                | Self::Btrfs
                | Self::Vfat
                | Self::Efi
                | Self::MacEfi
                | Self::Ntfs
                | Self::Hfs
                | Self::HfsPlus
                | Self::Iso9660
                | Self::Bind
                | Self::Tmpfs
                | Self::Proc
                | Self::Sysfs
                | Self::Devpts
        )
    }

    /// Backed by a block device filesystem (as opposed to nodev/bind mounts).
    pub fn is_filesystem(&self) -> bool {
        self.is_mountable() && !self.is_nodev()
    }

    pub fn is_nodev(&self) -> bool {
        matches!(
            self,
            Self::Bind | Self::Tmpfs | Self::Proc | Self::Sysfs | Self::Devpts
        )
    }

    pub fn is_formattable(&self) -> bool {
        matches!(
            self,
            Self::Ext2
                | Self::Ext3
                | Self::Ext4
                | Self::Xfs
                | Self::Btrfs
                | Self::Vfat
                | Self::Efi
                | Self::MacEfi
                | Self::AppleBoot
                | Self::BiosBoot
                | Self::PrepBoot
                | Self::Swap
                | Self::LvmPv
                | Self::MdMember
                | Self::Luks
                | Self::DiskLabel
                | Self::Tmpfs
        )
    }

    pub fn is_supported(&self) -> bool {
        self.is_formattable() || matches!(self, Self::None | Self::Bind | Self::Proc | Self::Sysfs | Self::Devpts)
    }

    pub fn is_linux_native(&self) -> bool {
        matches!(
            self,
            Self::Ext2
                | Self::Ext3
                | Self::Ext4
                | Self::Xfs
                | Self::Btrfs
                | Self::Swap
                | Self::LvmPv
                | Self::MdMember
                | Self::Luks
                | Self::BiosBoot
                | Self::PrepBoot
        )
    }

    pub fn is_hidden(&self) -> bool {
        matches!(self, Self::MultipathMember | Self::DmRaidMember)
    }

    /// Formats that carry the first stage of a bootloader.
    pub fn is_stage1(&self) -> bool {
        matches!(
            self,
            Self::BiosBoot | Self::PrepBoot | Self::AppleBoot | Self::Efi | Self::MacEfi
        )
    }

    /// Formats that are only meaningful on a plain partition.
    pub fn is_partition_only(&self) -> bool {
        matches!(
            self,
            Self::BiosBoot | Self::PrepBoot | Self::AppleBoot | Self::Efi | Self::MacEfi
        )
    }

    pub fn supports_label(&self) -> bool {
        self.max_label_length().is_some()
    }

    pub fn max_label_length(&self) -> Option<usize> {
        match self {
            Self::Ext2 | Self::Ext3 | Self::Ext4 | Self::Swap => Some(16),
            Self::Xfs => Some(12),
            Self::Btrfs => Some(256),
            Self::Vfat | Self::Efi => Some(11),
            Self::Ntfs => Some(128),
            Self::HfsPlus | Self::MacEfi => Some(128),
            _ => None,
        }
    }

    pub fn label_format_ok(&self, label: &str) -> bool {
        match self.max_label_length() {
            Some(max) => {
                label.len() <= max
                    && !label.contains('\n')
                    && match self {
                        Self::Xfs => !label.contains(' '),
                        Self::Vfat | Self::Efi => label.is_ascii(),
                        _ => true,
                    }
            }
            None => false,
        }
    }

    pub fn is_resizable(&self) -> bool {
        matches!(
            self,
            Self::Ext2 | Self::Ext3 | Self::Ext4 | Self::Ntfs | Self::Btrfs | Self::LvmPv | Self::Luks | Self::Xfs
        )
    }

    /// Whether the filesystem can also be made smaller.
    pub fn is_shrinkable(&self) -> bool {
        matches!(
            self,
            Self::Ext2 | Self::Ext3 | Self::Ext4 | Self::Ntfs | Self::LvmPv | Self::Luks
        )
    }

    pub fn min_size(&self) -> u64 {
        match self {
            Self::Efi => 50 * MIB,
            Self::MacEfi => 50 * MIB,
            Self::BiosBoot => 512 * KIB,
            Self::PrepBoot => 4 * MIB,
            Self::AppleBoot => 768 * KIB,
            Self::Xfs => 300 * MIB,
            Self::Btrfs => 256 * MIB,
            Self::LvmPv => 4 * MIB,
            Self::Luks => 16 * MIB,
            Self::Ext2 | Self::Ext3 | Self::Ext4 => MIB,
            _ => 0,
        }
    }

    pub fn max_size(&self) -> u64 {
        match self {
            Self::Efi => 2 * TIB,
            Self::MacEfi => 2 * TIB,
            Self::BiosBoot => MIB,
            Self::PrepBoot => 10 * MIB,
            Self::AppleBoot => MIB,
            Self::Ext2 | Self::Ext3 => 16 * TIB,
            Self::Swap => 16 * TIB,
            Self::Vfat => 2 * TIB,
            Self::Ext4 => 1024 * 1024 * TIB,
            _ => u64::MAX,
        }
    }

    /// Default mount options written to fstab.
    pub fn default_mount_options(&self) -> &'static str {
        match self {
            Self::Efi => "umask=0077,shortname=winnt",
            _ => "defaults",
        }
    }

    /// Whether the filesystem requires an fsck pass at boot.
    pub fn check_on_boot(&self) -> bool {
        matches!(self, Self::Ext2 | Self::Ext3 | Self::Ext4 | Self::Vfat | Self::Efi)
    }

    /// Whether this format is a container member (PV, RAID member, btrfs member).
    pub fn is_container_member(&self) -> bool {
        matches!(self, Self::LvmPv | Self::MdMember)
    }
}

impl std::fmt::Display for FormatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// LUKS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LuksVersion {
    /// LUKS version 1
    #[serde(rename = "luks1")]
    Luks1,

    /// LUKS version 2
    #[default]
    #[serde(rename = "luks2")]
    Luks2,
}

impl LuksVersion {
    /// Convert to cryptsetup string format
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Luks1 => "luks1",
            Self::Luks2 => "luks2",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "luks1" | "1" => Some(Self::Luks1),
            "luks2" | "2" => Some(Self::Luks2),
            _ => None,
        }
    }

    /// Space taken by the LUKS header.
    pub fn metadata_size(&self) -> u64 {
        match self {
            Self::Luks1 => 2 * MIB,
            Self::Luks2 => 16 * MIB,
        }
    }
}

/// LUKS2 key derivation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PbkdfArgs {
    /// Key derivation function (e.g. "argon2id", "pbkdf2")
    pub pbkdf_type: Option<String>,

    /// Memory cost in KiB (0 = library default)
    pub max_memory_kb: u32,

    /// Iteration count (0 = library default)
    pub iterations: u32,

    /// Unlock time in milliseconds (0 = library default)
    pub time_ms: u32,
}

/// Parameters of a LUKS format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LuksParams {
    pub version: LuksVersion,
    #[serde(skip_serializing, default)]
    pub passphrase: Option<String>,
    pub cipher: Option<String>,
    pub key_size: Option<u32>,
    pub pbkdf_args: Option<PbkdfArgs>,
    pub key_file: Option<String>,
    /// Name of the device-mapper mapping (e.g. "luks-<uuid>")
    pub map_name: Option<String>,
    /// Certificate used to escrow the data encryption key
    pub escrow_cert: Option<String>,
    pub add_backup_passphrase: bool,
    #[serde(skip_serializing, default)]
    pub opal_admin_passphrase: Option<String>,
}

impl LuksParams {
    pub fn has_key(&self) -> bool {
        self.passphrase.as_deref().is_some_and(|p| !p.is_empty()) || self.key_file.is_some()
    }
}

/// Partition table type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskLabelType {
    /// GPT (GUID Partition Table)
    Gpt,

    /// MBR/DOS (Master Boot Record)
    Msdos,

    /// Apple partition map
    Mac,

    /// IBM DASD (s390)
    Dasd,

    /// Sun VTOC
    Sun,
}

impl DiskLabelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::Msdos => "msdos",
            Self::Mac => "mac",
            Self::Dasd => "dasd",
            Self::Sun => "sun",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gpt" => Some(Self::Gpt),
            "dos" | "mbr" | "msdos" => Some(Self::Msdos),
            "mac" => Some(Self::Mac),
            "dasd" => Some(Self::Dasd),
            "sun" => Some(Self::Sun),
            _ => None,
        }
    }

    pub fn max_primary_partitions(&self) -> u32 {
        match self {
            Self::Gpt => 128,
            Self::Msdos => 4,
            Self::Mac => 62,
            Self::Dasd => 3,
            Self::Sun => 8,
        }
    }

    pub fn supports_extended(&self) -> bool {
        matches!(self, Self::Msdos)
    }

    /// Partition number that the label reserves for itself.
    pub fn magic_partition_number(&self) -> Option<u32> {
        match self {
            Self::Mac => Some(1),
            Self::Sun => Some(3),
            _ => None,
        }
    }

    /// Largest disk the label can address.
    pub fn max_disk_size(&self) -> u64 {
        match self {
            Self::Msdos => 2 * TIB,
            _ => u64::MAX,
        }
    }

    /// Bytes reserved at the start and at the end of the disk.
    pub fn reserved(&self) -> (u64, u64) {
        match self {
            Self::Gpt => (MIB, MIB),
            Self::Dasd => (3 * 4096 * 2, 0),
            _ => (MIB, 0),
        }
    }
}

/// Complete format of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Format {
    #[serde(rename = "type")]
    pub kind: FormatType,

    /// Whether the format is already present on disk
    #[serde(default)]
    pub exists: bool,

    #[serde(default)]
    pub uuid: Option<String>,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub mountpoint: Option<String>,

    /// Mount options (fstab field 4)
    #[serde(default)]
    pub options: Option<String>,

    /// Options passed to the format tool when creating the format
    #[serde(default)]
    pub create_options: Option<String>,

    /// Hidden formats make the whole device invisible to the planners
    #[serde(default)]
    pub hidden: bool,

    /// Minimum size probed for an existing resizable format
    #[serde(default)]
    pub min_size: Option<u64>,

    /// Whether an existing format was found to be resizable by the probe
    #[serde(default)]
    pub resizable: bool,

    #[serde(default)]
    pub luks: Option<LuksParams>,

    #[serde(default)]
    pub disklabel: Option<DiskLabelType>,

    /// Name of the VG an existing PV belongs to
    #[serde(default)]
    pub vg_name: Option<String>,

    /// UUID of the MD array an existing member belongs to
    #[serde(default)]
    pub md_uuid: Option<String>,
}

impl Format {
    /// A new (not yet existing) format of the given type.
    pub fn new(kind: FormatType) -> Self {
        let uuid = match kind {
            k if k.is_filesystem() || matches!(k, FormatType::Swap | FormatType::Luks | FormatType::LvmPv) => {
                Some(uuid::Uuid::new_v4().to_string())
            }
            _ => None,
        };
        Self {
            kind,
            uuid,
            ..Default::default()
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_mountpoint(mut self, mountpoint: impl Into<String>) -> Self {
        self.mountpoint = Some(mountpoint.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    pub fn with_luks(mut self, params: LuksParams) -> Self {
        self.luks = Some(params);
        self
    }

    pub fn with_disklabel(mut self, label_type: DiskLabelType) -> Self {
        self.disklabel = Some(label_type);
        self
    }

    pub fn existing(mut self) -> Self {
        self.exists = true;
        self
    }

    pub fn is_mountable(&self) -> bool {
        self.kind.is_mountable()
    }

    pub fn is_formattable(&self) -> bool {
        self.kind.is_formattable()
    }

    pub fn is_supported(&self) -> bool {
        self.kind.is_supported()
    }

    pub fn is_linux_native(&self) -> bool {
        self.kind.is_linux_native()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden || self.kind.is_hidden()
    }

    pub fn is_none(&self) -> bool {
        self.kind == FormatType::None
    }

    pub fn label_format_ok(&self) -> bool {
        match &self.label {
            Some(label) => self.kind.label_format_ok(label),
            None => true,
        }
    }

    /// Resizable only when the format exists and the probe allowed it.
    pub fn is_resizable(&self) -> bool {
        self.exists && self.resizable && self.kind.is_resizable()
    }

    pub fn min_size(&self) -> u64 {
        self.min_size.unwrap_or_else(|| self.kind.min_size())
    }

    pub fn max_size(&self) -> u64 {
        self.kind.max_size()
    }

    pub fn has_key(&self) -> bool {
        self.luks.as_ref().is_some_and(LuksParams::has_key)
    }

    pub fn luks_version(&self) -> Option<LuksVersion> {
        self.luks.as_ref().map(|luks| luks.version)
    }

    /// Effective fstab mount options.
    pub fn mount_options(&self) -> String {
        match self.options.as_deref().map(str::trim) {
            Some(options) if !options.is_empty() => options.to_string(),
            _ => self.kind.default_mount_options().to_string(),
        }
    }

    /// Mapping name of a LUKS format, derived from its UUID when not set.
    pub fn luks_map_name(&self) -> Option<String> {
        let luks = self.luks.as_ref()?;
        if let Some(name) = &luks.map_name {
            return Some(name.clone());
        }
        self.uuid.as_ref().map(|uuid| format!("luks-{uuid}"))
    }

    pub fn describe(&self) -> String {
        match &self.mountpoint {
            Some(mountpoint) => format!("{} ({mountpoint})", self.kind),
            None => self.kind.to_string(),
        }
    }
}

/// Largest LV or filesystem size the planner will compute for growth.
pub const MAX_GROW_SIZE: u64 = 100 * 1024 * GIB;
