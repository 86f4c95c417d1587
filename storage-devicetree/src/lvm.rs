// SPDX-License-Identifier: GPL-3.0-only

//! LVM sizing: thin pool metadata and growth of new LVs

use storage_types::{DEFAULT_PE_SIZE, Device, DeviceId, GIB, MAX_GROW_SIZE, MIB, align_down, align_up};

use crate::tree::DeviceTree;

const MIN_THIN_META_SIZE: u64 = 2 * MIB;
const MAX_THIN_META_SIZE: u64 = 16 * GIB;

/// Default metadata size of a thin pool of `pool_size` bytes.
pub fn thin_pool_metadata_size(pool_size: u64) -> u64 {
    align_up(
        (pool_size / 1000).clamp(MIN_THIN_META_SIZE, MAX_THIN_META_SIZE),
        MIB,
    )
}

/// Grow the new LVs of every VG into the free space of their VG.
///
/// LVs sized by percentage are computed first, then growable LVs share what
/// is left proportionally to their requested size, capped by their maximum.
/// Growable thin LVs finally fill their pools.
pub fn grow_lvm(tree: &mut DeviceTree) {
    let vgs: Vec<DeviceId> = tree.vgs().iter().map(|vg| vg.id).collect();
    for vg in vgs {
        grow_vg(tree, vg);
    }
}

fn grow_vg(tree: &mut DeviceTree, vg: DeviceId) {
    let pe = tree
        .get(vg)
        .and_then(Device::vg)
        .map(|data| data.pe_size)
        .unwrap_or(DEFAULT_PE_SIZE);
    let new_lvs: Vec<DeviceId> = tree
        .children(vg)
        .into_iter()
        .filter(|id| tree.get(*id).is_some_and(|d| d.is_lv() && !d.exists))
        .collect();
    if new_lvs.is_empty() {
        return;
    }

    let percent: Vec<(DeviceId, u8)> = new_lvs
        .iter()
        .filter_map(|id| {
            let lv = tree.get(*id)?.lv()?;
            lv.percent.map(|p| (*id, p.min(100)))
        })
        .collect();
    let growable: Vec<DeviceId> = new_lvs
        .iter()
        .copied()
        .filter(|id| {
            tree.get(*id)
                .and_then(Device::lv)
                .is_some_and(|lv| lv.req_grow && lv.percent.is_none())
        })
        .collect();

    for (id, _) in &percent {
        set_size(tree, *id, 0);
    }
    for id in &growable {
        let base = tree.get(*id).and_then(Device::lv).map(|lv| lv.req_size).unwrap_or(0);
        set_size(tree, *id, align_up(base, pe));
    }

    let free = tree.vg_free_space(vg);
    for (id, pct) in &percent {
        set_size(tree, *id, align_down(free / 100 * *pct as u64, pe));
    }

    let free = tree.vg_free_space(vg);
    distribute(tree, &growable, free, pe);
    fix_overcommit(tree, vg, &growable, pe);

    tracing::debug!(
        vg = tree.get(vg).map(|d| d.name.as_str()).unwrap_or_default(),
        free = tree.vg_free_space(vg),
        "grew logical volumes"
    );

    let pools: Vec<DeviceId> = tree
        .children(vg)
        .into_iter()
        .filter(|id| tree.get(*id).is_some_and(Device::is_thin_pool))
        .collect();
    for pool in pools {
        grow_pool(tree, pool, pe);
    }
}

fn grow_pool(tree: &mut DeviceTree, pool: DeviceId, pe: u64) {
    let growable: Vec<DeviceId> = tree
        .children(pool)
        .into_iter()
        .filter(|id| {
            tree.get(*id).is_some_and(|d| {
                !d.exists && d.lv().is_some_and(|lv| lv.req_grow)
            })
        })
        .collect();
    for id in &growable {
        let base = tree.get(*id).and_then(Device::lv).map(|lv| lv.req_size).unwrap_or(0);
        set_size(tree, *id, align_up(base, pe));
    }
    let free = tree.pool_free_space(pool);
    distribute(tree, &growable, free, pe);
}

/// Hand out `available` bytes to `ids` proportionally to their requested
/// size. Space refused by capped devices goes to the others.
fn distribute(tree: &mut DeviceTree, ids: &[DeviceId], available: u64, align: u64) {
    let mut remaining = available;
    let mut active: Vec<DeviceId> = ids.to_vec();
    while !active.is_empty() && remaining >= align {
        let weights: Vec<u64> = active.iter().map(|id| grow_base(tree, *id).max(1)).collect();
        let total: u128 = weights.iter().map(|w| *w as u128).sum();
        let mut handed = 0;
        let mut capped = Vec::new();
        for (id, weight) in active.iter().zip(&weights) {
            let share = (remaining as u128 * *weight as u128 / total) as u64;
            let Some(device) = tree.get(*id) else {
                continue;
            };
            let cap = grow_cap(device);
            let new_size = align_down((device.size + align_down(share, align)).min(cap), align).max(device.size);
            handed += new_size - device.size;
            if new_size >= align_down(cap, align) {
                capped.push(*id);
            }
            set_size(tree, *id, new_size);
        }
        remaining = remaining.saturating_sub(handed);
        if capped.is_empty() {
            break;
        }
        active.retain(|id| !capped.contains(id));
    }
}

fn grow_base(tree: &DeviceTree, id: DeviceId) -> u64 {
    tree.get(id)
        .and_then(Device::lv)
        .map(|lv| lv.req_size)
        .unwrap_or(0)
}

fn grow_cap(device: &Device) -> u64 {
    let requested = device
        .lv()
        .and_then(|lv| lv.req_max_size)
        .unwrap_or(MAX_GROW_SIZE);
    requested.min(device.format.max_size()).min(MAX_GROW_SIZE)
}

/// Thin pool metadata grows with the pool; give back what no longer fits.
fn fix_overcommit(tree: &mut DeviceTree, vg: DeviceId, growable: &[DeviceId], pe: u64) {
    for _ in 0..growable.len() {
        let vg_size = tree.get(vg).map(|d| d.size).unwrap_or(0);
        let needed = tree.vg_used_space(vg) + tree.vg_reserved_space(vg);
        if needed <= vg_size {
            return;
        }
        let excess = align_up(needed - vg_size, pe);
        let Some(largest) = growable
            .iter()
            .copied()
            .max_by_key(|id| tree.get(*id).map(|d| d.size).unwrap_or(0))
        else {
            return;
        };
        let Some(device) = tree.get(largest) else {
            return;
        };
        let floor = device.lv().map(|lv| lv.req_size).unwrap_or(0);
        let reduced = device.size.saturating_sub(excess).max(floor);
        set_size(tree, largest, reduced);
    }
}

fn set_size(tree: &mut DeviceTree, id: DeviceId, size: u64) {
    if let Some(device) = tree.get_mut(id) {
        device.size = size;
    }
}

#[cfg(test)]
mod tests {
    use storage_types::{DeviceKind, DiskData, Format, FormatType, LvData, LvRole, PartitionData, VgData};

    use super::*;

    fn vg_tree(pv_size: u64) -> (DeviceTree, DeviceId) {
        let mut tree = DeviceTree::new();
        let disk = tree
            .add_device(Device::new("sda", pv_size + 2 * MIB, DeviceKind::Disk(DiskData::default())))
            .unwrap();
        let pv = tree
            .add_device(
                Device::new("sda1", pv_size, DeviceKind::Partition(PartitionData::default()))
                    .with_parents(vec![disk])
                    .with_format(Format::new(FormatType::LvmPv)),
            )
            .unwrap();
        let vg = tree
            .add_device(Device::new("anaconda", 0, DeviceKind::LvmVg(VgData::default())).with_parents(vec![pv]))
            .unwrap();
        tree.refresh_derived_sizes();
        (tree, vg)
    }

    fn lv(tree: &mut DeviceTree, vg: DeviceId, name: &str, data: LvData) -> DeviceId {
        let size = data.req_size;
        tree.add_device(
            Device::new(format!("anaconda-{name}"), size, DeviceKind::LvmLv(LvData {
                lvname: name.to_string(),
                ..data
            }))
            .with_parents(vec![vg]),
        )
        .unwrap()
    }

    #[test]
    fn metadata_size_is_clamped() {
        assert_eq!(thin_pool_metadata_size(GIB), 2 * MIB);
        assert_eq!(thin_pool_metadata_size(100 * GIB), align_up(100 * GIB / 1000, MIB));
        assert_eq!(thin_pool_metadata_size(u64::MAX / 2), 16 * GIB);
    }

    #[test]
    fn growable_lvs_share_space_proportionally() {
        let (mut tree, vg) = vg_tree(41 * GIB);
        let root = lv(&mut tree, vg, "root", LvData {
            req_size: 2 * GIB,
            req_grow: true,
            ..Default::default()
        });
        let home = lv(&mut tree, vg, "home", LvData {
            req_size: GIB,
            req_grow: true,
            ..Default::default()
        });
        grow_lvm(&mut tree);
        let root_size = tree.get(root).unwrap().size;
        let home_size = tree.get(home).unwrap().size;
        assert!(root_size > home_size);
        assert!(tree.vg_free_space(vg) < 3 * DEFAULT_PE_SIZE);
        assert_eq!(root_size % DEFAULT_PE_SIZE, 0);
    }

    #[test]
    fn capped_lvs_leave_space_to_others() {
        let (mut tree, vg) = vg_tree(20 * GIB);
        let root = lv(&mut tree, vg, "root", LvData {
            req_size: GIB,
            req_grow: true,
            req_max_size: Some(5 * GIB),
            ..Default::default()
        });
        let home = lv(&mut tree, vg, "home", LvData {
            req_size: GIB,
            req_grow: true,
            ..Default::default()
        });
        grow_lvm(&mut tree);
        assert_eq!(tree.get(root).unwrap().size, 5 * GIB);
        assert!(tree.get(home).unwrap().size > 14 * GIB);
    }

    #[test]
    fn thin_pool_growth_never_overcommits() {
        let (mut tree, vg) = vg_tree(50 * GIB);
        let pool = lv(&mut tree, vg, "pool00", LvData {
            role: LvRole::ThinPool,
            req_size: GIB,
            req_grow: true,
            ..Default::default()
        });
        grow_lvm(&mut tree);
        let vg_size = tree.get(vg).unwrap().size;
        assert!(tree.vg_used_space(vg) <= vg_size);
        assert!(tree.get(pool).unwrap().size > 45 * GIB);
    }

    #[test]
    fn percent_lvs_take_share_of_free_space() {
        let (mut tree, vg) = vg_tree(10 * GIB + 4 * MIB);
        let half = lv(&mut tree, vg, "half", LvData {
            percent: Some(50),
            ..Default::default()
        });
        grow_lvm(&mut tree);
        let size = tree.get(half).unwrap().size;
        assert!(size >= 5 * GIB - DEFAULT_PE_SIZE && size <= 5 * GIB);
    }
}
