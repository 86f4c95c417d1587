// SPDX-License-Identifier: GPL-3.0-only

//! `/etc/mdadm.conf`

use storage_devicetree::Storage;
use storage_types::{Device, DeviceId};

pub const MDADM_CONF_HEADER: &str = "MAILADDR root\nAUTO +imsm +1.x -all\n";

/// One `ARRAY` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdArrayEntry {
    pub device: String,
    pub level: Option<String>,
    pub num_devices: Option<u32>,
    pub name: Option<String>,
    pub uuid: Option<String>,
}

pub fn parse_mdadm_conf(input: &str) -> Vec<MdArrayEntry> {
    input
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if !line.starts_with("ARRAY ") {
                return None;
            }

            let mut parts = line.split_whitespace();
            let _array = parts.next()?;
            let mut entry = MdArrayEntry {
                device: parts.next()?.to_string(),
                level: None,
                num_devices: None,
                name: None,
                uuid: None,
            };

            for token in parts {
                if let Some(value) = token.strip_prefix("level=") {
                    entry.level = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("num-devices=") {
                    entry.num_devices = value.parse().ok();
                } else if let Some(value) = token.strip_prefix("name=") {
                    entry.name = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("UUID=") {
                    entry.uuid = Some(value.to_string());
                }
            }

            Some(entry)
        })
        .collect()
}

/// `ARRAY` line of an MD array.
pub fn mdadm_conf_entry(device: &Device) -> Option<String> {
    let md = device.md()?;
    let members = if md.member_devices > 0 {
        md.member_devices
    } else {
        device.parents.len() as u32
    };
    let mut line = format!("ARRAY {} level={} num-devices={members}", device.path(), md.level);
    if let Some(uuid) = &device.uuid {
        line.push_str(&format!(" UUID={uuid}"));
    }
    Some(line)
}

/// Arrays some mounted file system or swap is built on.
fn arrays_in_use(storage: &Storage) -> Vec<DeviceId> {
    let mut users: Vec<DeviceId> = storage.mountpoints().into_values().collect();
    users.extend(storage.tree.swaps().into_iter().map(|d| d.id));
    storage
        .tree
        .mdarrays()
        .into_iter()
        .filter(|array| {
            users
                .iter()
                .any(|user| *user == array.id || storage.tree.depends_on(*user, array.id))
        })
        .map(|array| array.id)
        .collect()
}

/// Contents of mdadm.conf, or `None` when no array is in use.
pub fn mdadm_conf(storage: &Storage) -> Option<String> {
    let mut arrays: Vec<&Device> = arrays_in_use(storage)
        .into_iter()
        .filter_map(|id| storage.tree.get(id))
        .collect();
    if arrays.is_empty() {
        return None;
    }
    arrays.sort_by_key(|d| d.path());

    let mut conf = String::from(MDADM_CONF_HEADER);
    for array in arrays {
        if let Some(line) = mdadm_conf_entry(array) {
            conf.push_str(&line);
            conf.push('\n');
        }
    }
    Some(conf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_array_lines() {
        let entries = parse_mdadm_conf(
            "MAILADDR root\nARRAY /dev/md/root level=raid1 num-devices=2 UUID=a:b:c:d\nARRAY /dev/md0 name=host:0\n",
        );
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level.as_deref(), Some("raid1"));
        assert_eq!(entries[0].num_devices, Some(2));
        assert_eq!(entries[0].uuid.as_deref(), Some("a:b:c:d"));
        assert_eq!(entries[1].name.as_deref(), Some("host:0"));
    }
}
