// SPDX-License-Identifier: GPL-3.0-only

use storage_types::{GIB, MIB, align_up};

/// Memory above which hibernation no longer adds to the swap size.
const HIBERNATION_LIMIT: u64 = 64 * GIB;

/// Recommended swap size for a machine with `total_memory` bytes of RAM.
///
/// Without hibernation the result never exceeds a tenth of `disk_space`,
/// when that is known.
pub fn suggest_swap_size(total_memory: u64, hibernation: bool, disk_space: Option<u64>) -> u64 {
    let memory = align_up(total_memory, 16 * MIB);
    let mut swap = if memory < 2 * GIB {
        2 * memory
    } else if memory < 8 * GIB {
        memory
    } else if memory < HIBERNATION_LIMIT {
        memory / 2
    } else {
        4 * GIB
    };

    if hibernation {
        if memory <= HIBERNATION_LIMIT {
            swap += memory;
        } else {
            tracing::info!("not adding memory size to swap: too much memory for hibernation");
        }
    } else if let Some(disk_space) = disk_space {
        let cap = disk_space / 10;
        if swap > cap {
            tracing::info!(suggested = swap, cap, "capping swap size to 10% of the disk space");
            swap = cap;
        }
    }
    swap
}
