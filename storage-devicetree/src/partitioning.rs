// SPDX-License-Identifier: GPL-3.0-only

//! Partition allocation
//!
//! New partitions are created without a disk or a position. [`do_partitioning`]
//! places all of them at once: it sorts them by weight, fits each one into the
//! first free region large enough, grows the growable ones into what is left
//! of their region and finally numbers and names them.

use std::collections::BTreeMap;

use storage_contracts::StorageError;
use storage_types::{
    ByteRange, Device, DeviceId, DeviceKind, DiskLabelType, FormatType, MAX_GROW_SIZE, MIB,
    PartitionData, PartitionFlag, PartitionRole, align_down, align_up, bytes_to_pretty,
};

use crate::Result;
use crate::actions::{ActionKind, ActionPayload, ActionTarget};
use crate::naming::partition_name;
use crate::tree::DeviceTree;

/// Space reserved in front of each logical partition for its EBR.
const LOGICAL_OVERHEAD: u64 = MIB;

/// Free regions of a partitioned disk, aligned to 1 MiB.
///
/// Partitions that were not allocated yet do not take space.
pub fn get_free_regions(tree: &DeviceTree, disk: DeviceId) -> Vec<ByteRange> {
    let Some(device) = tree.get(disk) else {
        return Vec::new();
    };
    let Some(label) = disk_label(device) else {
        return Vec::new();
    };
    let (head, tail) = label.reserved();
    let usable = ByteRange::new(head, device.size.saturating_sub(tail));

    let mut used: Vec<ByteRange> = tree
        .partitions_of(disk)
        .into_iter()
        .filter(|p| !p.is_extended() && !p.is_freespace())
        .filter_map(|p| {
            let data = p.partition()?;
            (p.exists || data.number.is_some()).then(|| ByteRange::new(data.start, data.start + p.size))
        })
        .collect();
    used.sort();

    let mut free = Vec::new();
    let mut cursor = usable.start;
    for range in used {
        if range.start > cursor {
            free.push(ByteRange::new(cursor, range.start.min(usable.end)));
        }
        cursor = cursor.max(range.end);
    }
    if cursor < usable.end {
        free.push(ByteRange::new(cursor, usable.end));
    }

    free.into_iter()
        .map(|r| ByteRange::new(align_up(r.start, MIB), align_down(r.end, MIB)))
        .filter(|r| r.end > r.start && r.size() >= MIB)
        .collect()
}

fn disk_label(device: &Device) -> Option<DiskLabelType> {
    if device.format.kind != FormatType::DiskLabel {
        return None;
    }
    Some(device.format.disklabel.unwrap_or(DiskLabelType::Gpt))
}

/// Destroy extended partitions that hold no logical partition.
pub fn remove_empty_extended_partitions(tree: &mut DeviceTree) {
    let extended: Vec<(DeviceId, Option<DeviceId>)> = tree
        .partitions()
        .into_iter()
        .filter(|p| p.is_extended())
        .map(|p| (p.id, p.parents.first().copied()))
        .collect();
    for (id, disk) in extended {
        let has_logical = disk.is_some_and(|disk| tree.partitions_of(disk).iter().any(|p| p.is_logical()));
        if has_logical {
            continue;
        }
        remove_extended(tree, id);
    }
}

fn remove_extended(tree: &mut DeviceTree, id: DeviceId) {
    let Some(device) = tree.get(id) else {
        return;
    };
    if device.protected {
        return;
    }
    let (exists, name) = (device.exists, device.name.clone());
    if exists {
        tree.actions
            .add(ActionKind::Destroy, ActionTarget::Device, id, &name, ActionPayload::None);
    } else {
        tree.actions.cancel_all(id);
    }
    if let Err(err) = tree.remove_device(id) {
        tracing::warn!(device = %name, error = %err, "failed to remove extended partition");
    }
}

/// Allocation state of one candidate disk.
struct DiskPlan {
    disk: DeviceId,
    name: String,
    label: DiskLabelType,
    /// Partitions found on the disk before allocation (extended ones excluded)
    existing: u32,
    has_extended: bool,
    regions: Vec<RegionPlan>,
    /// New partitions in allocation order
    placed: Vec<DeviceId>,
}

struct RegionPlan {
    range: ByteRange,
    used: u64,
    parts: Vec<DeviceId>,
}

impl DiskPlan {
    fn slot_limit(&self) -> u32 {
        if self.label.supports_extended() {
            // three primaries plus what fits in the extended partition
            60
        } else {
            self.label.max_primary_partitions()
        }
    }

    fn would_be_logical(&self, index: u32) -> bool {
        self.label.supports_extended() && index + 1 >= self.label.max_primary_partitions()
    }
}

/// Place every new partition on one of `disks`.
///
/// Partitions with a disk restriction only go to those disks. When
/// `boot_disk` is set, boot partitions try it first.
pub fn do_partitioning(tree: &mut DeviceTree, disks: &[DeviceId], boot_disk: Option<DeviceId>) -> Result<()> {
    // extended partitions of a previous run are recreated as needed
    let stale: Vec<DeviceId> = tree
        .partitions()
        .into_iter()
        .filter(|p| p.is_extended() && !p.exists)
        .map(|p| p.id)
        .collect();
    for id in stale {
        remove_extended(tree, id);
    }

    let mut requests: Vec<DeviceId> = tree
        .raw_devices()
        .filter(|d| d.is_partition() && !d.exists && !d.is_extended())
        .map(|d| d.id)
        .collect();
    if requests.is_empty() {
        return Ok(());
    }
    for id in &requests {
        if let Some(device) = tree.get_mut(*id) {
            let base = device.partition().map(|p| p.req_base_size).unwrap_or(device.size);
            device.size = align_up(base, MIB);
            device.parents.clear();
            if let Some(data) = device.partition_mut() {
                data.number = None;
                data.start = 0;
                data.role = PartitionRole::Primary;
            }
        }
    }
    requests.sort_by_key(|id| {
        let device = tree.get(*id);
        let data = device.and_then(Device::partition);
        (
            std::cmp::Reverse(data.map(|p| p.weight).unwrap_or(0)),
            data.is_some_and(|p| p.req_grow),
            std::cmp::Reverse(device.map(|d| d.size).unwrap_or(0)),
            *id,
        )
    });

    let mut plans: BTreeMap<DeviceId, DiskPlan> = BTreeMap::new();
    let candidates_all: Vec<DeviceId> = disks
        .iter()
        .copied()
        .filter(|d| tree.get(*d).is_some_and(|disk| disk_label(disk).is_some()))
        .collect();

    for id in &requests {
        let Some(device) = tree.get(*id) else {
            continue;
        };
        let Some(data) = device.partition() else {
            continue;
        };
        let size = device.size;
        let mut candidates: Vec<DeviceId> = if data.req_disks.is_empty() {
            candidates_all.clone()
        } else {
            data.req_disks
                .iter()
                .copied()
                .filter(|d| tree.get(*d).is_some_and(|disk| disk_label(disk).is_some()))
                .collect()
        };
        if let Some(boot) = boot_disk
            && data.weight >= 2000
            && let Some(pos) = candidates.iter().position(|d| *d == boot)
        {
            let boot = candidates.remove(pos);
            candidates.insert(0, boot);
        }
        let description = device.format.describe();
        let req_primary = data.req_primary;

        let mut placed = false;
        for disk in candidates {
            let plan = plans.entry(disk).or_insert_with(|| new_plan(tree, disk));
            let index = plan.existing + plan.placed.len() as u32;
            if index >= plan.slot_limit() {
                continue;
            }
            let logical = plan.would_be_logical(index);
            if req_primary && logical {
                continue;
            }
            let needed = size + if logical { LOGICAL_OVERHEAD } else { 0 };
            let Some(region) = plan
                .regions
                .iter_mut()
                .find(|r| r.range.size().saturating_sub(r.used) >= needed)
            else {
                continue;
            };
            region.used += needed;
            region.parts.push(*id);
            plan.placed.push(*id);
            tracing::debug!(
                partition = %description,
                disk = %plan.name,
                size = %bytes_to_pretty(&size, false),
                "allocated partition"
            );
            placed = true;
            break;
        }
        if !placed {
            return Err(StorageError::not_enough_free_space(format!(
                "Unable to allocate requested partition scheme: not enough free space for {} ({})",
                description,
                bytes_to_pretty(&size, false)
            )));
        }
    }

    for plan in plans.values() {
        grow_regions(tree, plan);
        layout(tree, plan)?;
    }
    tree.refresh_derived_sizes();
    Ok(())
}

fn new_plan(tree: &DeviceTree, disk: DeviceId) -> DiskPlan {
    let device = tree.get(disk);
    let partitions = tree.partitions_of(disk);
    let existing = partitions
        .iter()
        .filter(|p| p.exists && !p.is_extended() && !p.is_freespace())
        .count() as u32;
    let has_extended = partitions.iter().any(|p| p.is_extended());
    DiskPlan {
        disk,
        name: device.map(|d| d.name.clone()).unwrap_or_default(),
        label: device.and_then(disk_label).unwrap_or(DiskLabelType::Gpt),
        existing,
        has_extended,
        regions: get_free_regions(tree, disk)
            .into_iter()
            .map(|range| RegionPlan {
                range,
                used: 0,
                parts: Vec::new(),
            })
            .collect(),
        placed: Vec::new(),
    }
}

/// Share the leftover of each region among its growable partitions.
fn grow_regions(tree: &mut DeviceTree, plan: &DiskPlan) {
    for region in &plan.regions {
        let mut remaining = region.range.size().saturating_sub(region.used);
        let mut active: Vec<DeviceId> = region
            .parts
            .iter()
            .copied()
            .filter(|id| tree.get(*id).and_then(Device::partition).is_some_and(|p| p.req_grow))
            .collect();
        while !active.is_empty() && remaining >= MIB {
            let weights: Vec<u64> = active
                .iter()
                .map(|id| tree.get(*id).map(|d| d.size).unwrap_or(0).max(MIB))
                .collect();
            let total: u128 = weights.iter().map(|w| *w as u128).sum();
            let mut handed = 0;
            let mut capped = Vec::new();
            for (id, weight) in active.iter().zip(&weights) {
                let Some(device) = tree.get_mut(*id) else {
                    continue;
                };
                let share = align_down((remaining as u128 * *weight as u128 / total) as u64, MIB);
                let cap = align_down(
                    device
                        .partition()
                        .and_then(|p| p.req_max_size)
                        .unwrap_or(MAX_GROW_SIZE)
                        .min(device.format.max_size())
                        .max(device.size),
                    MIB,
                );
                let new_size = (device.size + share).min(cap);
                handed += new_size - device.size;
                if new_size >= cap {
                    capped.push(*id);
                }
                device.size = new_size;
            }
            remaining = remaining.saturating_sub(handed);
            if capped.is_empty() {
                break;
            }
            active.retain(|id| !capped.contains(id));
        }
    }
}

/// Assign positions, numbers, roles and names to the partitions of a disk.
fn layout(tree: &mut DeviceTree, plan: &DiskPlan) -> Result<()> {
    let total = plan.existing + plan.placed.len() as u32;
    let use_logical = plan.label.supports_extended() && total > plan.label.max_primary_partitions();
    let logical: Vec<DeviceId> = if use_logical {
        plan.placed
            .iter()
            .enumerate()
            .filter(|(i, _)| plan.would_be_logical(plan.existing + *i as u32))
            .map(|(_, id)| *id)
            .collect()
    } else {
        Vec::new()
    };

    for region in &plan.regions {
        let mut cursor = region.range.start;
        let (primaries, logicals): (Vec<DeviceId>, Vec<DeviceId>) =
            region.parts.iter().copied().partition(|id| !logical.contains(id));
        for id in primaries.into_iter().chain(logicals) {
            let is_logical = logical.contains(&id);
            if is_logical {
                cursor += LOGICAL_OVERHEAD;
            }
            let Some(device) = tree.get_mut(id) else {
                continue;
            };
            let size = device.size;
            device.parents = vec![plan.disk];
            if let Some(data) = device.partition_mut() {
                data.start = cursor;
                data.role = if is_logical {
                    PartitionRole::Logical
                } else {
                    PartitionRole::Primary
                };
            }
            cursor += size;
        }
    }

    number_partitions(tree, plan, &logical)?;
    if !logical.is_empty() && !plan.has_extended {
        create_extended(tree, plan, &logical)?;
    }
    Ok(())
}

fn number_partitions(tree: &mut DeviceTree, plan: &DiskPlan, logical: &[DeviceId]) -> Result<()> {
    let magic = plan.label.magic_partition_number();
    let taken: Vec<u32> = tree
        .partitions_of(plan.disk)
        .iter()
        .filter(|p| p.exists)
        .filter_map(|p| p.partition().and_then(|d| d.number))
        .collect();

    let by_start = |tree: &DeviceTree, ids: Vec<DeviceId>| {
        let mut ids = ids;
        ids.sort_by_key(|id| tree.get(*id).and_then(Device::partition).map(|p| p.start).unwrap_or(0));
        ids
    };
    let primaries = by_start(
        tree,
        plan.placed.iter().copied().filter(|id| !logical.contains(id)).collect(),
    );
    let logicals = by_start(tree, logical.to_vec());

    let max_primary = plan.label.max_primary_partitions();
    let mut free_primary = (1..=max_primary).filter(|n| !taken.contains(n) && Some(*n) != magic);
    let mut numbered: Vec<(DeviceId, u32)> = Vec::new();
    for id in primaries {
        let Some(number) = free_primary.next() else {
            return Err(StorageError::not_enough_free_space(format!(
                "No free partition slot left on {}",
                plan.name
            )));
        };
        numbered.push((id, number));
    }
    let mut next_logical = taken.iter().copied().filter(|n| *n > 4).max().unwrap_or(4) + 1;
    for id in logicals {
        numbered.push((id, next_logical));
        next_logical += 1;
    }

    for (id, number) in numbered {
        let name = partition_name(&plan.name, number);
        let Some(device) = tree.get_mut(id) else {
            continue;
        };
        let flags = partition_flags(device, plan.label);
        device.name = name.clone();
        if let Some(data) = device.partition_mut() {
            data.number = Some(number);
            data.flags = flags;
        }
        tree.actions.rename_device(id, &name);
    }
    Ok(())
}

fn create_extended(tree: &mut DeviceTree, plan: &DiskPlan, logical: &[DeviceId]) -> Result<()> {
    let spans: Vec<(u64, u64)> = logical
        .iter()
        .filter_map(|id| {
            let device = tree.get(*id)?;
            let start = device.partition()?.start;
            Some((start, start + device.size))
        })
        .collect();
    let (Some(start), Some(end)) = (
        spans.iter().map(|s| s.0).min(),
        spans.iter().map(|s| s.1).max(),
    ) else {
        return Ok(());
    };
    let start = start.saturating_sub(LOGICAL_OVERHEAD);
    let taken: Vec<u32> = tree
        .partitions_of(plan.disk)
        .iter()
        .filter_map(|p| p.partition().and_then(|d| d.number))
        .collect();
    let Some(number) = (1..=plan.label.max_primary_partitions()).find(|n| !taken.contains(n)) else {
        return Err(StorageError::not_enough_free_space(format!(
            "No primary slot left on {} for an extended partition",
            plan.name
        )));
    };
    let name = partition_name(&plan.name, number);
    let extended = Device::new(
        name.clone(),
        end - start,
        DeviceKind::Partition(PartitionData {
            number: Some(number),
            role: PartitionRole::Extended,
            start,
            req_base_size: end - start,
            ..Default::default()
        }),
    )
    .with_parents(vec![plan.disk]);
    let id = tree.add_device(extended)?;
    tree.actions
        .add(ActionKind::Create, ActionTarget::Device, id, &name, ActionPayload::None);
    tree.actions.mark_early_create(id);
    tracing::debug!(disk = %plan.name, partition = %name, "created extended partition");
    Ok(())
}

/// Partition table flags implied by the format of a partition.
fn partition_flags(device: &Device, label: DiskLabelType) -> Vec<PartitionFlag> {
    let mut flags = match device.format.kind {
        FormatType::Efi | FormatType::MacEfi => vec![PartitionFlag::Esp, PartitionFlag::Boot],
        FormatType::BiosBoot => vec![PartitionFlag::BiosGrub],
        FormatType::PrepBoot => vec![PartitionFlag::Prep, PartitionFlag::Boot],
        FormatType::LvmPv => vec![PartitionFlag::Lvm],
        FormatType::MdMember => vec![PartitionFlag::Raid],
        FormatType::Swap => vec![PartitionFlag::Swap],
        _ => Vec::new(),
    };
    if label == DiskLabelType::Msdos && device.format.mountpoint.as_deref() == Some("/boot") {
        flags.push(PartitionFlag::Boot);
    }
    flags
}

#[cfg(test)]
mod tests {
    use storage_types::{DiskData, Format, GIB};

    use super::*;

    fn disk(tree: &mut DeviceTree, name: &str, size: u64, label: DiskLabelType) -> DeviceId {
        tree.add_device(
            Device::new(name, size, DeviceKind::Disk(DiskData::default()))
                .with_format(Format::new(FormatType::DiskLabel).with_disklabel(label))
                .into_existing(),
        )
        .unwrap()
    }

    fn request(tree: &mut DeviceTree, name: &str, format: Format, size: u64, grow: bool, weight: i32) -> DeviceId {
        tree.add_device(
            Device::new(
                name,
                size,
                DeviceKind::Partition(PartitionData {
                    req_base_size: size,
                    req_grow: grow,
                    weight,
                    ..Default::default()
                }),
            )
            .with_format(format),
        )
        .unwrap()
    }

    #[test]
    fn empty_gpt_disk_has_one_region() {
        let mut tree = DeviceTree::new();
        let vda = disk(&mut tree, "vda", 20 * GIB, DiskLabelType::Gpt);
        assert_eq!(get_free_regions(&tree, vda), vec![ByteRange::new(MIB, 20 * GIB - MIB)]);
    }

    #[test]
    fn existing_partitions_split_free_space() {
        let mut tree = DeviceTree::new();
        let sda = disk(&mut tree, "sda", 10 * GIB, DiskLabelType::Msdos);
        tree.add_device(
            Device::new(
                "sda1",
                GIB,
                DeviceKind::Partition(PartitionData {
                    number: Some(1),
                    start: 2 * GIB,
                    ..Default::default()
                }),
            )
            .with_parents(vec![sda])
            .into_existing(),
        )
        .unwrap();
        assert_eq!(
            get_free_regions(&tree, sda),
            vec![ByteRange::new(MIB, 2 * GIB), ByteRange::new(3 * GIB, 10 * GIB)]
        );
    }

    #[test]
    fn heavy_partitions_come_first_and_growable_fill_the_disk() {
        let mut tree = DeviceTree::new();
        let vda = disk(&mut tree, "vda", 20 * GIB, DiskLabelType::Gpt);
        let pv = request(&mut tree, "req1", Format::new(FormatType::LvmPv), 500 * MIB, true, 0);
        let boot = request(
            &mut tree,
            "req2",
            Format::new(FormatType::Ext4).with_mountpoint("/boot"),
            GIB,
            false,
            2000,
        );
        let efi = tree
            .add_device(
                Device::new(
                    "req3",
                    500 * MIB,
                    DeviceKind::Partition(PartitionData {
                        req_base_size: 500 * MIB,
                        req_max_size: Some(600 * MIB),
                        req_grow: true,
                        weight: 5000,
                        ..Default::default()
                    }),
                )
                .with_format(Format::new(FormatType::Efi).with_mountpoint("/boot/efi")),
            )
            .unwrap();

        do_partitioning(&mut tree, &[vda], Some(vda)).unwrap();

        let efi = tree.get(efi).unwrap();
        let boot = tree.get(boot).unwrap();
        let pv = tree.get(pv).unwrap();
        assert_eq!(efi.name, "vda1");
        assert_eq!(boot.name, "vda2");
        assert_eq!(pv.name, "vda3");
        assert_eq!(efi.size, 600 * MIB);
        assert_eq!(boot.size, GIB);
        assert_eq!(efi.partition().unwrap().start, MIB);
        assert!(efi.has_flag(PartitionFlag::Esp));
        let pv_end = pv.partition().unwrap().start + pv.size;
        assert_eq!(pv_end, 20 * GIB - MIB);
        assert!(get_free_regions(&tree, vda).is_empty());
    }

    #[test]
    fn oversized_request_is_rejected() {
        let mut tree = DeviceTree::new();
        let vda = disk(&mut tree, "vda", 2 * GIB, DiskLabelType::Gpt);
        request(&mut tree, "req1", Format::new(FormatType::Ext4), 4 * GIB, false, 0);
        let err = do_partitioning(&mut tree, &[vda], None).unwrap_err();
        assert_eq!(err.kind, storage_contracts::StorageErrorKind::InsufficientResources);
    }

    #[test]
    fn msdos_uses_an_extended_partition_beyond_four() {
        let mut tree = DeviceTree::new();
        let sda = disk(&mut tree, "sda", 20 * GIB, DiskLabelType::Msdos);
        for n in 0..5 {
            request(&mut tree, &format!("req{n}"), Format::new(FormatType::Ext4), GIB, false, 0);
        }
        do_partitioning(&mut tree, &[sda], None).unwrap();
        let parts = tree.partitions_of(sda);
        let extended: Vec<_> = parts.iter().filter(|p| p.is_extended()).collect();
        assert_eq!(extended.len(), 1);
        assert_eq!(extended[0].partition().unwrap().number, Some(4));
        let logical: Vec<_> = parts.iter().filter(|p| p.is_logical()).map(|p| p.name.clone()).collect();
        assert_eq!(logical, vec!["sda5", "sda6"]);

        // a second run recreates the layout instead of stacking extended partitions
        do_partitioning(&mut tree, &[sda], None).unwrap();
        assert_eq!(tree.partitions_of(sda).iter().filter(|p| p.is_extended()).count(), 1);
    }
}
