// SPDX-License-Identifier: GPL-3.0-only

//! Device naming rules

use std::collections::BTreeSet;

/// Longest device name the device-mapper accepts.
pub const MAX_NAME_LENGTH: usize = 127;

/// Keep `[A-Za-z0-9._+-]`, replace everything else by `_`, truncate.
pub fn safe_device_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LENGTH)
        .collect()
}

/// Name of partition `number` on `disk` (`sda1`, `nvme0n1p1`).
pub fn partition_name(disk: &str, number: u32) -> String {
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{disk}p{number}")
    } else {
        format!("{disk}{number}")
    }
}

/// Full device name of an LV. Dashes in either part are doubled the way
/// device-mapper escapes them.
pub fn lv_device_name(vg: &str, lv: &str) -> String {
    format!("{}-{}", vg.replace('-', "--"), lv.replace('-', "--"))
}

/// Base name for a device holding `mountpoint`.
pub fn device_name_base(mountpoint: Option<&str>, swap: bool) -> String {
    if swap {
        return "swap".to_string();
    }
    match mountpoint {
        Some("/") => "root".to_string(),
        Some(mountpoint) if !mountpoint.trim_matches('/').is_empty() => {
            safe_device_name(&mountpoint.trim_start_matches('/').replace('/', "_"))
        }
        _ => "00".to_string(),
    }
}

/// First of `base`, `base00`, `base01`… for which `taken` returns false.
pub fn first_free_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (0..)
        .map(|n| format!("{base}{n:02}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Like [`first_free_name`] against a set of existing names.
pub fn unique_name(base: &str, names: &BTreeSet<String>) -> String {
    first_free_name(base, |candidate| names.contains(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_names_use_p_after_digits() {
        assert_eq!(partition_name("sda", 3), "sda3");
        assert_eq!(partition_name("nvme0n1", 2), "nvme0n1p2");
        assert_eq!(partition_name("md127", 1), "md127p1");
    }

    #[test]
    fn safe_names_replace_and_truncate() {
        assert_eq!(safe_device_name("my vg/1"), "my_vg_1");
        assert_eq!(safe_device_name(&"a".repeat(200)).len(), MAX_NAME_LENGTH);
    }

    #[test]
    fn names_are_suffixed_on_collision() {
        let names: BTreeSet<String> = ["anaconda", "anaconda00"].iter().map(|s| s.to_string()).collect();
        assert_eq!(unique_name("anaconda", &names), "anaconda01");
        assert_eq!(unique_name("fedora", &names), "fedora");
    }

    #[test]
    fn mountpoints_map_to_device_names() {
        assert_eq!(device_name_base(Some("/"), false), "root");
        assert_eq!(device_name_base(Some("/home"), false), "home");
        assert_eq!(device_name_base(Some("/var/log"), false), "var_log");
        assert_eq!(device_name_base(None, true), "swap");
        assert_eq!(lv_device_name("my-vg", "root"), "my--vg-root");
    }
}
