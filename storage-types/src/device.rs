// SPDX-License-Identifier: GPL-3.0-only

//! Device graph entities
//!
//! A [`Device`] is one node of the device graph. Common attributes live on the
//! record itself, variant data lives in [`DeviceKind`]. Edges are stored as
//! parent ids; children are derived by the graph.

use serde::{Deserialize, Serialize};

use crate::common::{GPT_ALIGNMENT_BYTES, MIB, align_down, align_up};
use crate::format::{Format, FormatType};

/// Stable identifier of a device within a graph and all of its copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// Discriminant of [`DeviceKind`], used by stage1 constraints and the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Disk,
    Partition,
    LvmVg,
    LvmLv,
    LvmThinPool,
    LvmThinLv,
    MdArray,
    BtrfsVolume,
    BtrfsSubvolume,
    Luks,
    Nodev,
    File,
    Directory,
    Optical,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disk => "disk",
            Self::Partition => "partition",
            Self::LvmVg => "lvmvg",
            Self::LvmLv => "lvmlv",
            Self::LvmThinPool => "lvmthinpool",
            Self::LvmThinLv => "lvmthinlv",
            Self::MdArray => "mdarray",
            Self::BtrfsVolume => "btrfs volume",
            Self::BtrfsSubvolume => "btrfs subvolume",
            Self::Luks => "luks/dm-crypt",
            Self::Nodev => "nodev",
            Self::File => "file",
            Self::Directory => "directory",
            Self::Optical => "cdrom",
        }
    }
}

/// RAID level of an MD array or of btrfs data/metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaidLevel {
    Linear,
    Single,
    Dup,
    Raid0,
    Raid1,
    Raid4,
    Raid5,
    Raid6,
    Raid10,
    Container,
}

impl RaidLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Single => "single",
            Self::Dup => "dup",
            Self::Raid0 => "raid0",
            Self::Raid1 => "raid1",
            Self::Raid4 => "raid4",
            Self::Raid5 => "raid5",
            Self::Raid6 => "raid6",
            Self::Raid10 => "raid10",
            Self::Container => "container",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let level = match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Self::Linear,
            "single" => Self::Single,
            "dup" => Self::Dup,
            "0" | "raid0" | "stripe" => Self::Raid0,
            "1" | "raid1" | "mirror" => Self::Raid1,
            "4" | "raid4" => Self::Raid4,
            "5" | "raid5" => Self::Raid5,
            "6" | "raid6" => Self::Raid6,
            "10" | "raid10" => Self::Raid10,
            "container" => Self::Container,
            _ => return None,
        };
        Some(level)
    }

    pub fn min_members(&self) -> usize {
        match self {
            Self::Linear | Self::Single | Self::Dup | Self::Container => 1,
            Self::Raid0 | Self::Raid1 => 2,
            Self::Raid4 | Self::Raid5 => 3,
            Self::Raid6 | Self::Raid10 => 4,
        }
    }

    /// Whether the level is valid for MD arrays.
    pub fn is_md_level(&self) -> bool {
        !matches!(self, Self::Single | Self::Dup)
    }

    /// Whether the level is valid for btrfs data or metadata.
    pub fn is_btrfs_level(&self) -> bool {
        matches!(
            self,
            Self::Single | Self::Dup | Self::Raid0 | Self::Raid1 | Self::Raid10 | Self::Raid5 | Self::Raid6
        )
    }

    /// Usable space given the sizes of the active members.
    pub fn usable_size(&self, member_sizes: &[u64]) -> u64 {
        let count = member_sizes.len() as u64;
        if count == 0 {
            return 0;
        }
        let smallest = member_sizes.iter().copied().min().unwrap_or(0);
        let total: u64 = member_sizes.iter().sum();
        match self {
            Self::Linear | Self::Single | Self::Container => total,
            Self::Dup => total / 2,
            Self::Raid0 => smallest * count,
            Self::Raid1 => smallest,
            Self::Raid4 | Self::Raid5 => smallest * count.saturating_sub(1),
            Self::Raid6 => smallest * count.saturating_sub(2),
            Self::Raid10 => smallest * count / 2,
        }
    }
}

impl std::fmt::Display for RaidLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a partition within its partition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PartitionRole {
    #[default]
    Primary,
    Extended,
    Logical,
    /// Unallocated region reported by the label.
    Freespace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionFlag {
    Boot,
    BiosGrub,
    Prep,
    Esp,
    Lvm,
    Raid,
    Swap,
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskData {
    #[serde(default = "default_sector_size")]
    pub sector_size: u64,
    #[serde(default)]
    pub multipath: bool,
    #[serde(default)]
    pub removable: bool,
    /// Reached over the network (iSCSI, FCoE, NVMe over fabrics)
    #[serde(default)]
    pub network: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
}

fn default_sector_size() -> u64 {
    512
}

impl Default for DiskData {
    fn default() -> Self {
        Self {
            sector_size: default_sector_size(),
            multipath: false,
            removable: false,
            network: false,
            model: None,
            serial: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PartitionData {
    /// Partition number, assigned once the partition is allocated
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub role: PartitionRole,
    /// Byte offset on the disk, assigned once the partition is allocated
    #[serde(default)]
    pub start: u64,
    /// Requested size before growing
    #[serde(default)]
    pub req_base_size: u64,
    #[serde(default)]
    pub req_max_size: Option<u64>,
    #[serde(default)]
    pub req_grow: bool,
    /// Disks the partition may be allocated on (empty means any)
    #[serde(default)]
    pub req_disks: Vec<DeviceId>,
    #[serde(default)]
    pub req_primary: bool,
    /// Allocation priority, higher first
    #[serde(default)]
    pub weight: i32,
    #[serde(default)]
    pub flags: Vec<PartitionFlag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinPoolReserve {
    pub percent: u8,
    pub min: u64,
    pub max: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VgData {
    #[serde(default = "default_pe_size")]
    pub pe_size: u64,
    /// Space left unallocated on purpose, in bytes
    #[serde(default)]
    pub reserved_space: u64,
    #[serde(default)]
    pub reserved_percent: u8,
    #[serde(default)]
    pub thpool_reserve: Option<ThinPoolReserve>,
}

impl Default for VgData {
    fn default() -> Self {
        Self {
            pe_size: default_pe_size(),
            reserved_space: 0,
            reserved_percent: 0,
            thpool_reserve: None,
        }
    }
}

/// Default LVM physical extent size.
pub const DEFAULT_PE_SIZE: u64 = 4 * MIB;

/// Space LVM reserves on each physical volume for its metadata.
pub const PV_METADATA_SIZE: u64 = MIB;

fn default_pe_size() -> u64 {
    DEFAULT_PE_SIZE
}

/// Whether `pe_size` (bytes) is a size LVM accepts: a power of two of at least 1 KiB.
pub fn is_supported_pe_size(pe_size: u64) -> bool {
    pe_size >= 1024 && pe_size.is_power_of_two()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LvRole {
    #[default]
    Plain,
    ThinPool,
    Thin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    #[default]
    Writethrough,
    Writeback,
}

impl CacheMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "writethrough" => Some(Self::Writethrough),
            "writeback" => Some(Self::Writeback),
            _ => None,
        }
    }
}

/// Request to attach a cache to a new LV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvmCacheRequest {
    pub size: u64,
    pub pvs: Vec<DeviceId>,
    pub mode: CacheMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LvData {
    /// Name of the LV inside its VG (the device name is `<vg>-<lv>`)
    pub lvname: String,
    #[serde(default)]
    pub role: LvRole,
    /// Size as a percentage of the VG free space
    #[serde(default)]
    pub percent: Option<u8>,
    #[serde(default)]
    pub req_grow: bool,
    #[serde(default)]
    pub req_size: u64,
    #[serde(default)]
    pub req_max_size: Option<u64>,
    #[serde(default)]
    pub metadata_size: Option<u64>,
    #[serde(default)]
    pub chunk_size: Option<u64>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub cache: Option<LvmCacheRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdData {
    pub level: RaidLevel,
    #[serde(default)]
    pub member_devices: u32,
    #[serde(default)]
    pub spares: u32,
    #[serde(default)]
    pub metadata_version: Option<String>,
    #[serde(default)]
    pub chunk_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BtrfsVolumeData {
    #[serde(default)]
    pub data_level: Option<RaidLevel>,
    #[serde(default)]
    pub metadata_level: Option<RaidLevel>,
}

/// Variant data of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceKind {
    Disk(DiskData),
    Partition(PartitionData),
    LvmVg(VgData),
    LvmLv(LvData),
    MdArray(MdData),
    BtrfsVolume(BtrfsVolumeData),
    BtrfsSubvolume,
    Luks,
    Nodev,
    File,
    Directory,
    Optical,
}

/// One node of the device graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    /// Target size in bytes (what the device will be after the plan runs)
    #[serde(with = "crate::common::human_size")]
    pub size: u64,
    #[serde(default)]
    pub exists: bool,
    #[serde(default)]
    pub protected: bool,
    /// Ordered constituents (a partition's disk, an LV's VG, a VG's PVs)
    #[serde(default)]
    pub parents: Vec<DeviceId>,
    #[serde(default)]
    pub format: Format,
    /// Format found on the system, kept until the plan is committed
    #[serde(default)]
    pub original_format: Format,
    /// Size found on the system
    #[serde(default)]
    pub original_size: u64,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default = "default_true")]
    pub controllable: bool,
    #[serde(default = "default_true")]
    pub media_present: bool,
    /// Existing devices whose format may not be touched at all
    #[serde(default)]
    pub format_immutable: bool,
    /// Whether the probe found the device itself resizable
    #[serde(default)]
    pub resizable: bool,
    #[serde(flatten)]
    pub kind: DeviceKind,
}

fn default_true() -> bool {
    true
}

impl Device {
    /// A new (not yet existing) device with no format.
    pub fn new(name: impl Into<String>, size: u64, kind: DeviceKind) -> Self {
        Self {
            id: DeviceId(0),
            name: name.into(),
            size,
            exists: false,
            protected: false,
            parents: Vec::new(),
            format: Format::none(),
            original_format: Format::none(),
            original_size: 0,
            uuid: None,
            controllable: true,
            media_present: true,
            format_immutable: false,
            resizable: false,
            kind,
        }
    }

    pub fn with_parents(mut self, parents: Vec<DeviceId>) -> Self {
        self.parents = parents;
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Mark as found on the system: the current format and size become the original ones.
    pub fn into_existing(mut self) -> Self {
        self.exists = true;
        self.format.exists = !self.format.is_none();
        self.original_format = self.format.clone();
        self.original_size = self.size;
        self
    }

    pub fn class(&self) -> DeviceClass {
        match &self.kind {
            DeviceKind::Disk(_) => DeviceClass::Disk,
            DeviceKind::Partition(_) => DeviceClass::Partition,
            DeviceKind::LvmVg(_) => DeviceClass::LvmVg,
            DeviceKind::LvmLv(lv) => match lv.role {
                LvRole::Plain => DeviceClass::LvmLv,
                LvRole::ThinPool => DeviceClass::LvmThinPool,
                LvRole::Thin => DeviceClass::LvmThinLv,
            },
            DeviceKind::MdArray(_) => DeviceClass::MdArray,
            DeviceKind::BtrfsVolume(_) => DeviceClass::BtrfsVolume,
            DeviceKind::BtrfsSubvolume => DeviceClass::BtrfsSubvolume,
            DeviceKind::Luks => DeviceClass::Luks,
            DeviceKind::Nodev => DeviceClass::Nodev,
            DeviceKind::File => DeviceClass::File,
            DeviceKind::Directory => DeviceClass::Directory,
            DeviceKind::Optical => DeviceClass::Optical,
        }
    }

    pub fn path(&self) -> String {
        match &self.kind {
            DeviceKind::Disk(_) | DeviceKind::Partition(_) | DeviceKind::LvmVg(_) | DeviceKind::Optical => {
                format!("/dev/{}", self.name)
            }
            DeviceKind::LvmLv(_) | DeviceKind::Luks => format!("/dev/mapper/{}", self.name),
            DeviceKind::MdArray(_) => format!("/dev/md/{}", self.name),
            DeviceKind::BtrfsVolume(_) | DeviceKind::BtrfsSubvolume => format!("/dev/btrfs/{}", self.name),
            DeviceKind::Nodev | DeviceKind::File | DeviceKind::Directory => self.name.clone(),
        }
    }

    pub fn is_disk(&self) -> bool {
        matches!(self.kind, DeviceKind::Disk(_) | DeviceKind::Optical)
    }

    pub fn disk_data(&self) -> Option<&DiskData> {
        match &self.kind {
            DeviceKind::Disk(data) => Some(data),
            _ => None,
        }
    }

    pub fn partition(&self) -> Option<&PartitionData> {
        match &self.kind {
            DeviceKind::Partition(data) => Some(data),
            _ => None,
        }
    }

    pub fn partition_mut(&mut self) -> Option<&mut PartitionData> {
        match &mut self.kind {
            DeviceKind::Partition(data) => Some(data),
            _ => None,
        }
    }

    pub fn vg(&self) -> Option<&VgData> {
        match &self.kind {
            DeviceKind::LvmVg(data) => Some(data),
            _ => None,
        }
    }

    pub fn lv(&self) -> Option<&LvData> {
        match &self.kind {
            DeviceKind::LvmLv(data) => Some(data),
            _ => None,
        }
    }

    pub fn lv_mut(&mut self) -> Option<&mut LvData> {
        match &mut self.kind {
            DeviceKind::LvmLv(data) => Some(data),
            _ => None,
        }
    }

    pub fn md(&self) -> Option<&MdData> {
        match &self.kind {
            DeviceKind::MdArray(data) => Some(data),
            _ => None,
        }
    }

    pub fn btrfs_volume(&self) -> Option<&BtrfsVolumeData> {
        match &self.kind {
            DeviceKind::BtrfsVolume(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_partition(&self) -> bool {
        matches!(self.kind, DeviceKind::Partition(_))
    }

    pub fn is_primary(&self) -> bool {
        self.partition().is_some_and(|p| p.role == PartitionRole::Primary)
    }

    pub fn is_logical(&self) -> bool {
        self.partition().is_some_and(|p| p.role == PartitionRole::Logical)
    }

    pub fn is_extended(&self) -> bool {
        self.partition().is_some_and(|p| p.role == PartitionRole::Extended)
    }

    pub fn is_freespace(&self) -> bool {
        self.partition().is_some_and(|p| p.role == PartitionRole::Freespace)
    }

    pub fn is_vg(&self) -> bool {
        matches!(self.kind, DeviceKind::LvmVg(_))
    }

    pub fn is_lv(&self) -> bool {
        matches!(self.kind, DeviceKind::LvmLv(_))
    }

    pub fn is_thin_pool(&self) -> bool {
        self.lv().is_some_and(|lv| lv.role == LvRole::ThinPool)
    }

    pub fn is_thin_lv(&self) -> bool {
        self.lv().is_some_and(|lv| lv.role == LvRole::Thin)
    }

    pub fn is_md(&self) -> bool {
        matches!(self.kind, DeviceKind::MdArray(_))
    }

    pub fn is_btrfs_volume(&self) -> bool {
        matches!(self.kind, DeviceKind::BtrfsVolume(_))
    }

    pub fn is_btrfs_subvolume(&self) -> bool {
        matches!(self.kind, DeviceKind::BtrfsSubvolume)
    }

    pub fn is_btrfs(&self) -> bool {
        self.is_btrfs_volume() || self.is_btrfs_subvolume()
    }

    pub fn is_luks(&self) -> bool {
        matches!(self.kind, DeviceKind::Luks)
    }

    pub fn is_optical(&self) -> bool {
        matches!(self.kind, DeviceKind::Optical)
    }

    /// Containers own other devices that draw space from them.
    pub fn is_container(&self) -> bool {
        matches!(self.kind, DeviceKind::LvmVg(_) | DeviceKind::BtrfsVolume(_))
    }

    /// Devices that are not backed by block storage of their own.
    pub fn is_virtual(&self) -> bool {
        matches!(
            self.kind,
            DeviceKind::Nodev | DeviceKind::File | DeviceKind::Directory
        )
    }

    /// LV name for LVs, device name otherwise.
    pub fn short_name(&self) -> &str {
        match &self.kind {
            DeviceKind::LvmLv(lv) => &lv.lvname,
            _ => &self.name,
        }
    }

    /// Size found on the system for existing devices, target size otherwise.
    pub fn current_size(&self) -> u64 {
        if self.exists { self.original_size } else { self.size }
    }

    /// Whether the device size may change.
    pub fn is_resizable(&self) -> bool {
        if !self.exists {
            return matches!(
                self.kind,
                DeviceKind::Partition(_) | DeviceKind::LvmLv(_)
            );
        }
        let kind_resizable = match &self.kind {
            DeviceKind::Partition(p) => p.role != PartitionRole::Extended,
            DeviceKind::LvmLv(lv) => lv.role != LvRole::ThinPool,
            DeviceKind::Luks => true,
            _ => false,
        };
        kind_resizable
            && self.resizable
            && (self.format.is_none()
                || !self.format.exists
                || self.format.is_resizable()
                || self.format.kind == FormatType::LvmPv)
    }

    /// Smallest size the device can be set to.
    pub fn min_size(&self) -> u64 {
        if !self.exists {
            return self.format.kind.min_size().max(self.alignment());
        }
        if !self.is_resizable() {
            return self.current_size();
        }
        let mut min = self.format.min_size();
        if let Some(version) = self.format.luks_version() {
            min += version.metadata_size();
        }
        align_up(min.max(self.alignment()), self.alignment())
    }

    /// Largest size the format allows (space availability is checked by the graph).
    pub fn max_size(&self) -> u64 {
        if self.exists && !self.is_resizable() {
            return self.current_size();
        }
        if self.format.is_none() {
            return u64::MAX;
        }
        self.format.max_size()
    }

    /// Granularity of size changes for the device kind.
    pub fn alignment(&self) -> u64 {
        match &self.kind {
            DeviceKind::Partition(_) => GPT_ALIGNMENT_BYTES,
            DeviceKind::LvmLv(_) => MIB,
            _ => 1,
        }
    }

    /// Round a requested size down to a size the device can actually have.
    pub fn align_target_size(&self, size: u64) -> u64 {
        align_down(size, self.alignment())
    }

    pub fn has_flag(&self, flag: PartitionFlag) -> bool {
        self.partition().is_some_and(|p| p.flags.contains(&flag))
    }

    pub fn sector_size(&self) -> Option<u64> {
        self.disk_data().map(|disk| disk.sector_size)
    }

    pub fn is_multipath(&self) -> bool {
        self.disk_data().is_some_and(|disk| disk.multipath)
    }

    /// Whether the device is still the way it was found on the system.
    pub fn is_unchanged(&self) -> bool {
        self.exists && self.format == self.original_format && self.size == self.original_size
    }

    pub fn describe(&self) -> String {
        format!("{} {} ({})", self.class().as_str(), self.name, self.format.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::GIB;

    fn ext4_partition(size: u64) -> Device {
        let mut dev = Device::new("sda1", size, DeviceKind::Partition(PartitionData::default()))
            .with_format(Format::new(FormatType::Ext4).with_mountpoint("/"))
            .into_existing();
        dev.resizable = true;
        dev.format.resizable = true;
        dev.format.min_size = Some(GIB + 123);
        dev
    }

    #[test]
    fn paths_follow_device_kind() {
        let lv = Device::new(
            "fedora-root",
            GIB,
            DeviceKind::LvmLv(LvData {
                lvname: "root".to_string(),
                ..Default::default()
            }),
        );
        assert_eq!(lv.path(), "/dev/mapper/fedora-root");
        assert_eq!(lv.short_name(), "root");
        let md = Device::new(
            "boot",
            GIB,
            DeviceKind::MdArray(MdData {
                level: RaidLevel::Raid1,
                member_devices: 2,
                spares: 0,
                metadata_version: None,
                chunk_size: None,
            }),
        );
        assert_eq!(md.path(), "/dev/md/boot");
    }

    #[test]
    fn existing_resizable_partition_has_aligned_minimum() {
        let dev = ext4_partition(10 * GIB);
        assert!(dev.is_resizable());
        assert_eq!(dev.min_size(), 1025 * MIB);
        assert_eq!(dev.align_target_size(3 * GIB + 17), 3 * GIB);
    }

    #[test]
    fn unresizable_existing_device_is_pinned() {
        let mut dev = ext4_partition(10 * GIB);
        dev.resizable = false;
        assert_eq!(dev.min_size(), 10 * GIB);
        assert_eq!(dev.max_size(), 10 * GIB);
    }

    #[test]
    fn raid_usable_sizes() {
        let members = [10 * GIB, 12 * GIB, 10 * GIB];
        assert_eq!(RaidLevel::Raid1.usable_size(&members), 10 * GIB);
        assert_eq!(RaidLevel::Raid5.usable_size(&members), 20 * GIB);
        assert_eq!(RaidLevel::Raid0.usable_size(&members), 30 * GIB);
        assert_eq!(RaidLevel::Linear.usable_size(&members), 32 * GIB);
        assert_eq!(RaidLevel::parse("mirror"), Some(RaidLevel::Raid1));
    }

    #[test]
    fn device_kind_serializes_flat() {
        let disk = Device::new("vda", 20 * GIB, DeviceKind::Disk(DiskData::default()));
        let json = serde_json::to_value(&disk).unwrap();
        assert_eq!(json["kind"], "disk");
        let back: Device = serde_json::from_value(json).unwrap();
        assert_eq!(back, disk);
    }

    #[test]
    fn pe_sizes_must_be_powers_of_two() {
        assert!(is_supported_pe_size(4 * MIB));
        assert!(!is_supported_pe_size(3 * MIB));
        assert!(!is_supported_pe_size(512));
    }
}
