// SPDX-License-Identifier: GPL-3.0-only

//! The blkid cache (`blkid.tab`), used to resolve `UUID=` and `LABEL=`
//! references the device graph cannot.

use std::path::Path;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlkidEntry {
    pub devname: String,
    pub uuid: Option<String>,
    pub label: Option<String>,
    pub fstype: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BlkidCache {
    entries: Vec<BlkidEntry>,
}

impl BlkidCache {
    pub fn parse(input: &str) -> Self {
        Self {
            entries: input.lines().filter_map(parse_line).collect(),
        }
    }

    /// Read a cache file; a missing file gives an empty cache.
    pub fn read(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn entries(&self) -> &[BlkidEntry] {
        &self.entries
    }

    /// Device name behind a `UUID=…` or `LABEL=…` spec.
    pub fn resolve(&self, spec: &str) -> Option<&str> {
        let entry = if let Some(uuid) = spec.strip_prefix("UUID=") {
            self.entries.iter().find(|e| e.uuid.as_deref() == Some(uuid))
        } else if let Some(label) = spec.strip_prefix("LABEL=") {
            self.entries.iter().find(|e| e.label.as_deref() == Some(label))
        } else {
            None
        };
        entry.map(|e| e.devname.as_str())
    }
}

/// `<device DEVNO="0x0801" UUID="…" TYPE="ext4">/dev/sda1</device>`
fn parse_line(line: &str) -> Option<BlkidEntry> {
    let line = line.trim();
    let rest = line.strip_prefix("<device")?;
    let (attributes, rest) = rest.split_once('>')?;
    let (devname, _) = rest.split_once("</device>")?;

    let mut entry = BlkidEntry {
        devname: devname.trim().to_string(),
        ..Default::default()
    };
    let mut remaining = attributes.trim();
    while let Some((key, value_start)) = remaining.split_once("=\"") {
        let (value, next) = value_start.split_once('"')?;
        match key.trim() {
            "UUID" => entry.uuid = Some(value.to_string()),
            "LABEL" => entry.label = Some(value.to_string()),
            "TYPE" => entry.fstype = Some(value.to_string()),
            _ => {}
        }
        remaining = next.trim_start();
    }
    Some(entry)
}
