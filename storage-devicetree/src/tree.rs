// SPDX-License-Identifier: GPL-3.0-only

//! Arena graph of devices
//!
//! Nodes are stored by id; a device only records its parents and children
//! are derived. Every collection returned by the tree is ordered by path,
//! then id.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use storage_contracts::StorageError;
use storage_types::{
    Device, DeviceId, DeviceKind, FormatType, LvRole, PV_METADATA_SIZE, RaidLevel, align_down,
};

use crate::Result;
use crate::actions::ActionList;

/// Space an MD array loses to its superblock and bitmap.
const MD_SUPERBLOCK_SIZE: u64 = 2 * storage_types::MIB;

#[derive(Debug, Clone, Default)]
pub struct DeviceTree {
    devices: BTreeMap<DeviceId, Device>,
    next_id: u32,
    pub(crate) actions: ActionList,
}

impl DeviceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from scanned devices, keeping their ids.
    pub fn from_devices(devices: impl IntoIterator<Item = Device>) -> Result<Self> {
        let mut tree = Self::new();
        let mut pending: Vec<Device> = devices.into_iter().collect();
        // Parents may come after their children in a snapshot.
        while !pending.is_empty() {
            let before = pending.len();
            let mut rest = Vec::new();
            for device in pending {
                if device.parents.iter().all(|p| tree.devices.contains_key(p)) {
                    tree.add_device(device)?;
                } else {
                    rest.push(device);
                }
            }
            if rest.len() == before {
                let names: Vec<_> = rest.iter().map(|d| d.name.as_str()).collect();
                return Err(StorageError::unknown_device(&format!(
                    "parents of {}",
                    names.join(", ")
                )));
            }
            pending = rest;
        }
        tree.refresh_derived_sizes();
        Ok(tree)
    }

    pub fn actions(&self) -> &ActionList {
        &self.actions
    }

    pub fn actions_mut(&mut self) -> &mut ActionList {
        &mut self.actions
    }

    /// Insert a device. A zero or already used id is replaced by a fresh one.
    pub fn add_device(&mut self, mut device: Device) -> Result<DeviceId> {
        if device.name.is_empty() {
            return Err(StorageError::invalid_input("Device name must not be empty"));
        }
        if self.names().contains(&device.name) {
            return Err(StorageError::invalid_input(format!(
                "Name {} is already in use",
                device.name
            )));
        }
        for parent in &device.parents {
            if !self.devices.contains_key(parent) {
                return Err(StorageError::unknown_device(&parent.to_string()));
            }
        }
        if device.id.0 == 0 || self.devices.contains_key(&device.id) {
            self.next_id = self.next_id.max(self.max_id()) + 1;
            device.id = DeviceId(self.next_id);
        } else {
            self.next_id = self.next_id.max(device.id.0);
        }
        let id = device.id;
        tracing::debug!(device = %device.name, id = %id, "added device");
        self.devices.insert(id, device);
        Ok(id)
    }

    fn max_id(&self) -> u32 {
        self.devices.keys().next_back().map(|id| id.0).unwrap_or(0)
    }

    /// Splice a device out of the graph. It must not have children.
    pub fn remove_device(&mut self, id: DeviceId) -> Result<Device> {
        let device = self.device(id)?;
        if device.protected {
            return Err(StorageError::protected_device(&device.name));
        }
        if !self.children(id).is_empty() {
            return Err(StorageError::invalid_input(format!(
                "Cannot remove {} because other devices depend on it",
                device.name
            )));
        }
        let removed = self
            .devices
            .remove(&id)
            .ok_or_else(|| StorageError::unknown_device(&id.to_string()))?;
        tracing::debug!(device = %removed.name, id = %id, "removed device");
        Ok(removed)
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.devices.contains_key(&id)
    }

    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(&id)
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.get_mut(&id)
    }

    pub fn device(&self, id: DeviceId) -> Result<&Device> {
        self.devices
            .get(&id)
            .ok_or_else(|| StorageError::unknown_device(&id.to_string()))
    }

    pub fn device_mut(&mut self, id: DeviceId) -> Result<&mut Device> {
        self.devices
            .get_mut(&id)
            .ok_or_else(|| StorageError::unknown_device(&id.to_string()))
    }

    fn sort_ids(&self, ids: &mut [DeviceId]) {
        ids.sort_by(|a, b| {
            let pa = self.devices.get(a).map(Device::path).unwrap_or_default();
            let pb = self.devices.get(b).map(Device::path).unwrap_or_default();
            pa.cmp(&pb).then(a.cmp(b))
        });
    }

    /// Whether the device carries a hidden format.
    pub fn is_hidden(&self, id: DeviceId) -> bool {
        let Some(device) = self.devices.get(&id) else {
            return false;
        };
        device.format.is_hidden()
    }

    /// Visible devices ordered by path, then id.
    pub fn devices(&self) -> Vec<&Device> {
        let mut ids: Vec<DeviceId> = self
            .devices
            .keys()
            .copied()
            .filter(|id| !self.is_hidden(*id))
            .collect();
        self.sort_ids(&mut ids);
        ids.iter().filter_map(|id| self.devices.get(id)).collect()
    }

    /// All devices, hidden ones included, ordered by path, then id.
    pub fn all_devices(&self) -> Vec<&Device> {
        let mut ids: Vec<DeviceId> = self.devices.keys().copied().collect();
        self.sort_ids(&mut ids);
        ids.iter().filter_map(|id| self.devices.get(id)).collect()
    }

    pub fn ids(&self) -> Vec<DeviceId> {
        self.devices().iter().map(|d| d.id).collect()
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.devices.values().map(|d| d.name.clone()).collect()
    }

    pub fn children(&self, id: DeviceId) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self
            .devices
            .values()
            .filter(|d| d.parents.contains(&id))
            .map(|d| d.id)
            .collect();
        self.sort_ids(&mut ids);
        ids
    }

    pub fn is_leaf(&self, id: DeviceId) -> bool {
        self.children(id).is_empty()
    }

    /// Transitive parents, nearest first.
    pub fn ancestors(&self, id: DeviceId) -> Vec<DeviceId> {
        let mut seen = BTreeSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<DeviceId> = self
            .devices
            .get(&id)
            .map(|d| d.parents.iter().copied().collect())
            .unwrap_or_default();
        while let Some(parent) = queue.pop_front() {
            if !seen.insert(parent) {
                continue;
            }
            order.push(parent);
            if let Some(device) = self.devices.get(&parent) {
                queue.extend(device.parents.iter().copied());
            }
        }
        order
    }

    pub fn depends_on(&self, id: DeviceId, other: DeviceId) -> bool {
        self.ancestors(id).contains(&other)
    }

    /// Transitive children, ordered so that every device comes after its parents.
    pub fn get_dependent_devices(&self, id: DeviceId) -> Vec<DeviceId> {
        let mut seen = BTreeSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<DeviceId> = self.children(id).into();
        while let Some(child) = queue.pop_front() {
            if !seen.insert(child) {
                continue;
            }
            order.push(child);
            queue.extend(self.children(child));
        }
        // a device reachable through two parents must follow both
        order.sort_by_key(|d| self.depth(*d));
        order
    }

    /// Length of the longest parent chain above the device.
    pub fn depth(&self, id: DeviceId) -> usize {
        match self.devices.get(&id) {
            Some(device) => device
                .parents
                .iter()
                .map(|p| self.depth(*p) + 1)
                .max()
                .unwrap_or(0),
            None => 0,
        }
    }

    pub fn leaves(&self) -> Vec<&Device> {
        self.devices()
            .into_iter()
            .filter(|d| self.is_leaf(d.id))
            .collect()
    }

    fn filtered(&self, predicate: impl Fn(&Device) -> bool) -> Vec<&Device> {
        self.devices().into_iter().filter(|d| predicate(d)).collect()
    }

    pub fn disks(&self) -> Vec<&Device> {
        self.filtered(|d| matches!(d.kind, DeviceKind::Disk(_)))
    }

    pub fn partitions(&self) -> Vec<&Device> {
        self.filtered(Device::is_partition)
    }

    pub fn vgs(&self) -> Vec<&Device> {
        self.filtered(Device::is_vg)
    }

    pub fn lvs(&self) -> Vec<&Device> {
        self.filtered(Device::is_lv)
    }

    pub fn thin_pools(&self) -> Vec<&Device> {
        self.filtered(Device::is_thin_pool)
    }

    pub fn mdarrays(&self) -> Vec<&Device> {
        self.filtered(Device::is_md)
    }

    pub fn btrfs_volumes(&self) -> Vec<&Device> {
        self.filtered(Device::is_btrfs_volume)
    }

    pub fn subvolumes(&self) -> Vec<&Device> {
        self.filtered(Device::is_btrfs_subvolume)
    }

    pub fn swaps(&self) -> Vec<&Device> {
        self.filtered(|d| d.format.kind == FormatType::Swap)
    }

    /// Partitions whose disk is `disk`, ordered by path.
    pub fn partitions_of(&self, disk: DeviceId) -> Vec<&Device> {
        self.partitions()
            .into_iter()
            .filter(|p| p.parents.first() == Some(&disk))
            .collect()
    }

    /// Disks the device resides on (the device itself for disks).
    pub fn disks_of(&self, id: DeviceId) -> Vec<DeviceId> {
        let Some(device) = self.devices.get(&id) else {
            return Vec::new();
        };
        if device.is_disk() {
            return vec![id];
        }
        let mut disks: Vec<DeviceId> = self
            .ancestors(id)
            .into_iter()
            .filter(|a| self.devices.get(a).is_some_and(Device::is_disk))
            .collect();
        self.sort_ids(&mut disks);
        disks
    }

    /// Whether the device is a direct child of a disk or a disk itself.
    pub fn is_direct(&self, id: DeviceId) -> bool {
        match self.devices.get(&id) {
            Some(device) if device.is_disk() => true,
            Some(device) => device
                .parents
                .iter()
                .all(|p| self.devices.get(p).is_some_and(Device::is_disk))
                && !device.parents.is_empty(),
            None => false,
        }
    }

    pub fn is_partitioned(&self, id: DeviceId) -> bool {
        self.devices
            .get(&id)
            .is_some_and(|d| d.format.kind == FormatType::DiskLabel)
    }

    /// Whether a partitioned device has no partitions besides extended ones.
    pub fn is_empty_disk(&self, id: DeviceId) -> bool {
        self.is_partitioned(id)
            && self
                .partitions_of(id)
                .iter()
                .all(|p| p.is_extended() || p.is_freespace())
    }

    /// Whether the partition occupies the slot its label reserves for itself.
    pub fn is_magic(&self, id: DeviceId) -> bool {
        let Some(device) = self.devices.get(&id) else {
            return false;
        };
        let Some(number) = device.partition().and_then(|p| p.number) else {
            return false;
        };
        device
            .parents
            .first()
            .and_then(|disk| self.devices.get(disk))
            .and_then(|disk| disk.format.disklabel)
            .and_then(|label| label.magic_partition_number())
            == Some(number)
    }

    pub fn get_device_by_id(&self, id: DeviceId, hidden: bool) -> Option<&Device> {
        self.devices
            .get(&id)
            .filter(|_| hidden || !self.is_hidden(id))
    }

    pub fn get_device_by_name(&self, name: &str, hidden: bool) -> Option<&Device> {
        self.devices
            .values()
            .find(|d| d.name == name && (hidden || !self.is_hidden(d.id)))
    }

    pub fn get_device_by_path(&self, path: &str, hidden: bool) -> Option<&Device> {
        self.devices
            .values()
            .find(|d| d.path() == path && (hidden || !self.is_hidden(d.id)))
            .or_else(|| {
                let name = path
                    .strip_prefix("/dev/mapper/")
                    .or_else(|| path.strip_prefix("/dev/md/"))
                    .or_else(|| path.strip_prefix("/dev/"))?;
                self.get_device_by_name(name, hidden)
            })
    }

    pub fn get_device_by_uuid(&self, uuid: &str, hidden: bool) -> Option<&Device> {
        let mut matches: Vec<&Device> = self
            .devices
            .values()
            .filter(|d| hidden || !self.is_hidden(d.id))
            .filter(|d| d.format.uuid.as_deref() == Some(uuid) || d.uuid.as_deref() == Some(uuid))
            .collect();
        // a btrfs filesystem UUID is shared by the volume and its subvolumes
        matches.sort_by_key(|d| (d.is_btrfs_subvolume(), d.id));
        matches.into_iter().next()
    }

    pub fn get_device_by_label(&self, label: &str, hidden: bool) -> Option<&Device> {
        self.devices
            .values()
            .find(|d| d.format.label.as_deref() == Some(label) && (hidden || !self.is_hidden(d.id)))
    }

    /// Look a device up by name, path, `UUID=…`, `LABEL=…` or id (`dev<N>`).
    pub fn resolve_device(&self, spec: &str) -> Option<&Device> {
        let spec = spec.trim();
        if spec.is_empty() {
            return None;
        }
        if let Some(uuid) = spec.strip_prefix("UUID=") {
            return self.get_device_by_uuid(uuid.trim_matches('"'), false);
        }
        if let Some(label) = spec.strip_prefix("LABEL=") {
            return self.get_device_by_label(label.trim_matches('"'), false);
        }
        if spec.starts_with('/') {
            return self.get_device_by_path(spec, false);
        }
        if let Some(device) = self.get_device_by_name(spec, false) {
            return Some(device);
        }
        spec.strip_prefix("dev")
            .and_then(|n| n.parse::<u32>().ok())
            .and_then(|n| self.get_device_by_id(DeviceId(n), false))
    }

    /// Mount points of the visible devices.
    pub fn mountpoints(&self) -> BTreeMap<String, DeviceId> {
        self.devices()
            .into_iter()
            .filter(|d| d.format.is_mountable())
            .filter_map(|d| d.format.mountpoint.clone().map(|m| (m, d.id)))
            .collect()
    }

    /// Mount points claimed by more than one device.
    pub fn duplicate_mountpoints(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        for device in self.devices() {
            if let Some(mountpoint) = &device.format.mountpoint
                && device.format.is_mountable()
                && !seen.insert(mountpoint.clone())
            {
                duplicates.insert(mountpoint.clone());
            }
        }
        duplicates.into_iter().collect()
    }

    /// Usable size a PV contributes to its VG.
    pub fn pv_usable_size(&self, pv: &Device, pe_size: u64) -> u64 {
        align_down(pv.size.saturating_sub(PV_METADATA_SIZE), pe_size)
    }

    /// PVs of a VG, looking through LUKS mappings.
    pub fn vg_pvs(&self, vg: DeviceId) -> Vec<&Device> {
        self.devices
            .get(&vg)
            .map(|d| d.parents.iter().filter_map(|p| self.devices.get(p)).collect())
            .unwrap_or_default()
    }

    /// Space of a VG kept free on purpose.
    pub fn vg_reserved_space(&self, vg: DeviceId) -> u64 {
        let Some(device) = self.devices.get(&vg) else {
            return 0;
        };
        let Some(data) = device.vg() else {
            return 0;
        };
        let mut reserved = data.reserved_space.max(device.size * data.reserved_percent as u64 / 100);
        if let Some(thpool) = &data.thpool_reserve
            && self.children(vg).iter().any(|c| self.devices.get(c).is_some_and(Device::is_thin_pool))
        {
            let thpool_reserved = (device.size * thpool.percent as u64 / 100).clamp(thpool.min, thpool.max);
            reserved = reserved.max(thpool_reserved);
        }
        reserved
    }

    /// Space of a VG taken by its LVs, thin pool metadata included.
    pub fn vg_used_space(&self, vg: DeviceId) -> u64 {
        self.children(vg)
            .iter()
            .filter_map(|c| self.devices.get(c))
            .map(|lv| lv.size + self.lv_metadata_size(lv))
            .sum()
    }

    /// Space of a VG not taken by its LVs nor reserved.
    pub fn vg_free_space(&self, vg: DeviceId) -> u64 {
        let Some(device) = self.devices.get(&vg) else {
            return 0;
        };
        device
            .size
            .saturating_sub(self.vg_reserved_space(vg))
            .saturating_sub(self.vg_used_space(vg))
    }

    /// Extra VG space a thin pool takes for its metadata and spare.
    pub fn lv_metadata_size(&self, lv: &Device) -> u64 {
        match lv.lv() {
            Some(data) if data.role == LvRole::ThinPool => {
                let meta = data
                    .metadata_size
                    .unwrap_or_else(|| crate::lvm::thin_pool_metadata_size(lv.size));
                meta * 2
            }
            _ => 0,
        }
    }

    /// Space of a thin pool not yet promised to thin LVs.
    pub fn pool_free_space(&self, pool: DeviceId) -> u64 {
        let Some(device) = self.devices.get(&pool) else {
            return 0;
        };
        let used: u64 = self
            .children(pool)
            .iter()
            .filter_map(|c| self.devices.get(c))
            .map(|lv| lv.size)
            .sum();
        device.size.saturating_sub(used)
    }

    /// Physical extent size of the VG an LV belongs to.
    pub fn lv_pe_size(&self, lv: DeviceId) -> Option<u64> {
        self.ancestors(lv)
            .into_iter()
            .filter_map(|a| self.devices.get(&a))
            .find_map(|d| d.vg().map(|vg| vg.pe_size))
    }

    pub fn lv_vg(&self, lv: DeviceId) -> Option<DeviceId> {
        self.ancestors(lv)
            .into_iter()
            .find(|a| self.devices.get(a).is_some_and(Device::is_vg))
    }

    /// Round a requested size down to what the device can have.
    pub fn align_target_size(&self, id: DeviceId, size: u64) -> u64 {
        let Some(device) = self.devices.get(&id) else {
            return size;
        };
        match self.lv_pe_size(id) {
            Some(pe) if device.is_lv() => align_down(size, pe),
            _ => device.align_target_size(size),
        }
    }

    /// Smallest allowed size of the device.
    pub fn min_size(&self, id: DeviceId) -> u64 {
        let Some(device) = self.devices.get(&id) else {
            return 0;
        };
        let min = device.min_size();
        match self.lv_pe_size(id) {
            Some(pe) if device.is_lv() => storage_types::align_up(min, pe),
            _ => min,
        }
    }

    /// Largest allowed size of the device, including available space.
    pub fn max_size(&self, id: DeviceId) -> u64 {
        let Some(device) = self.devices.get(&id) else {
            return 0;
        };
        let format_max = device.max_size();
        if device.exists && !device.is_resizable() {
            return format_max;
        }
        let available = match &device.kind {
            // new partitions are placed again by the allocator
            DeviceKind::Partition(_) if !device.exists => None,
            DeviceKind::Partition(_) => {
                let disk = device.parents.first().copied();
                disk.map(|disk| device.size + self.space_after_partition(disk, id))
            }
            DeviceKind::LvmLv(lv) if lv.role == LvRole::Thin => device
                .parents
                .first()
                .map(|pool| device.size + self.pool_free_space(*pool)),
            DeviceKind::LvmLv(_) => self.lv_vg(id).map(|vg| device.size + self.vg_free_space(vg)),
            _ => None,
        };
        available.map_or(format_max, |available| available.min(format_max))
    }

    /// Free space directly following a partition on its disk.
    fn space_after_partition(&self, disk: DeviceId, partition: DeviceId) -> u64 {
        let Some(part) = self.devices.get(&partition).and_then(|p| p.partition().map(|d| (p, d)))
        else {
            return 0;
        };
        let end = part.1.start + part.0.size;
        crate::partitioning::get_free_regions(self, disk)
            .into_iter()
            .find(|region| region.start == end)
            .map(|region| region.size())
            .unwrap_or(0)
    }

    /// Recompute the sizes of devices whose size follows from their parents.
    pub fn refresh_derived_sizes(&mut self) {
        let mut order: Vec<DeviceId> = self.devices.keys().copied().collect();
        order.sort_by_key(|id| self.depth(*id));
        for id in order {
            let Some(size) = self.derived_size(id) else {
                continue;
            };
            if let Some(device) = self.devices.get_mut(&id)
                && device.size != size
            {
                tracing::trace!(device = %device.name, size, "derived size changed");
                device.size = size;
            }
        }
    }

    fn derived_size(&self, id: DeviceId) -> Option<u64> {
        let device = self.devices.get(&id)?;
        let parents: Vec<&Device> = device
            .parents
            .iter()
            .filter_map(|p| self.devices.get(p))
            .collect();
        match &device.kind {
            DeviceKind::Luks => {
                let backing = parents.first()?;
                let overhead = backing
                    .format
                    .luks_version()
                    .or(backing.original_format.luks_version())
                    .map(|v| v.metadata_size())
                    .unwrap_or(0);
                Some(backing.size.saturating_sub(overhead))
            }
            DeviceKind::LvmVg(vg) if !device.exists => Some(
                parents
                    .iter()
                    .map(|pv| self.pv_usable_size(pv, vg.pe_size))
                    .sum(),
            ),
            DeviceKind::MdArray(md) if !device.exists => {
                let active = (md.member_devices as usize).min(parents.len());
                let sizes: Vec<u64> = parents.iter().take(active).map(|p| p.size).collect();
                Some(md.level.usable_size(&sizes).saturating_sub(MD_SUPERBLOCK_SIZE))
            }
            DeviceKind::BtrfsVolume(data) if !device.exists => {
                let sizes: Vec<u64> = parents.iter().map(|p| p.size).collect();
                let level = data.data_level.unwrap_or(RaidLevel::Single);
                Some(level.usable_size(&sizes))
            }
            DeviceKind::BtrfsSubvolume => self
                .ancestors(id)
                .into_iter()
                .filter_map(|a| self.devices.get(&a))
                .find(|d| d.is_btrfs_volume())
                .map(|volume| volume.size),
            _ => None,
        }
    }

    /// Sector sizes of the disks under the given devices.
    pub fn parent_sector_sizes(&self, ids: &[DeviceId]) -> BTreeSet<u64> {
        ids.iter()
            .flat_map(|id| self.disks_of(*id))
            .filter_map(|disk| self.devices.get(&disk).and_then(Device::sector_size))
            .collect()
    }

    pub(crate) fn raw_devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }
}

#[cfg(test)]
mod tests {
    use storage_types::{DiskData, Format, GIB, LvData, MIB, PartitionData, VgData};

    use super::*;

    fn sample() -> DeviceTree {
        let disk = Device::new("sda", 20 * GIB, DeviceKind::Disk(DiskData::default()))
            .with_format(Format::new(FormatType::DiskLabel).with_disklabel(storage_types::DiskLabelType::Gpt))
            .into_existing();
        let mut tree = DeviceTree::new();
        let disk = tree.add_device(disk).unwrap();
        let pv = tree
            .add_device(
                Device::new(
                    "sda1",
                    10 * GIB,
                    DeviceKind::Partition(PartitionData {
                        number: Some(1),
                        start: MIB,
                        ..Default::default()
                    }),
                )
                .with_parents(vec![disk])
                .with_format(Format::new(FormatType::LvmPv)),
            )
            .unwrap();
        let vg = tree
            .add_device(
                Device::new("fedora", 0, DeviceKind::LvmVg(VgData::default())).with_parents(vec![pv]),
            )
            .unwrap();
        tree.add_device(
            Device::new(
                "fedora-root",
                4 * GIB,
                DeviceKind::LvmLv(LvData {
                    lvname: "root".to_string(),
                    ..Default::default()
                }),
            )
            .with_parents(vec![vg])
            .with_format(Format::new(FormatType::Xfs).with_mountpoint("/")),
        )
        .unwrap();
        tree.refresh_derived_sizes();
        tree
    }

    #[test]
    fn vg_size_derives_from_pvs() {
        let tree = sample();
        let vg = tree.get_device_by_name("fedora", false).unwrap();
        assert_eq!(vg.size, 10 * GIB - 4 * MIB);
        assert_eq!(tree.vg_free_space(vg.id), 6 * GIB - 4 * MIB);
    }

    #[test]
    fn traversal_is_ordered_by_path() {
        let tree = sample();
        let paths: Vec<String> = tree.devices().iter().map(|d| d.path()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
    }

    #[test]
    fn lookups_accept_names_paths_and_uuids() {
        let tree = sample();
        let root = tree.get_device_by_name("fedora-root", false).unwrap();
        let uuid = root.format.uuid.clone().unwrap();
        assert_eq!(tree.resolve_device(&format!("UUID={uuid}")).unwrap().id, root.id);
        assert_eq!(tree.resolve_device("/dev/mapper/fedora-root").unwrap().id, root.id);
        assert_eq!(tree.resolve_device("/dev/sda1").unwrap().name, "sda1");
        assert_eq!(tree.mountpoints().get("/"), Some(&root.id));
    }

    #[test]
    fn dependents_follow_their_parents() {
        let tree = sample();
        let disk = tree.get_device_by_name("sda", false).unwrap().id;
        let names: Vec<String> = tree
            .get_dependent_devices(disk)
            .iter()
            .map(|id| tree.get(*id).unwrap().name.clone())
            .collect();
        assert_eq!(names, vec!["sda1", "fedora", "fedora-root"]);
        let root = tree.get_device_by_name("fedora-root", false).unwrap().id;
        assert_eq!(tree.disks_of(root), vec![disk]);
    }

    #[test]
    fn remove_refuses_devices_with_children() {
        let mut tree = sample();
        let pv = tree.get_device_by_name("sda1", false).unwrap().id;
        assert!(tree.remove_device(pv).is_err());
        let root = tree.get_device_by_name("fedora-root", false).unwrap().id;
        assert!(tree.remove_device(root).is_ok());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut tree = sample();
        let dup = Device::new("sda", GIB, DeviceKind::Disk(DiskData::default()));
        assert!(tree.add_device(dup).is_err());
    }
}
