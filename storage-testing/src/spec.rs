// SPDX-License-Identifier: GPL-3.0-only

//! Lab specs: device graphs described in TOML
//!
//! A lab spec lists the disks of a machine, the partitions already on them
//! and the files found in their file systems. Specs live in
//! `resources/lab-specs/<name>.toml` next to this crate.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use storage_devicetree::{DeviceTree, Storage, StorageSettings, partition_name};
use storage_types::{
    Device, DeviceKind, DiskData, DiskLabelType, Format, FormatType, MIB, PartitionData, Platform,
    PlatformKind,
};

use crate::errors::{Result, TestingError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabSpec {
    pub name: String,
    #[serde(default = "default_platform")]
    pub platform: PlatformKind,
    #[serde(default, with = "storage_types::common::human_size_opt")]
    pub total_memory: Option<u64>,
    pub disks: Vec<DiskSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskSpec {
    pub name: String,
    #[serde(with = "storage_types::common::human_size")]
    pub size: u64,
    #[serde(default)]
    pub label: Option<DiskLabelType>,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub partitions: Vec<PartitionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub index: u32,
    /// Defaults to the end of the previous partition (1 MiB for the first)
    #[serde(default, with = "storage_types::common::human_size_opt")]
    pub start: Option<u64>,
    #[serde(with = "storage_types::common::human_size")]
    pub size: u64,
    #[serde(default)]
    pub fs: Option<FormatType>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub protected: bool,
    /// Files of the file system, by path relative to its root
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

fn default_platform() -> PlatformKind {
    PlatformKind::X86
}

pub fn specs_root() -> PathBuf {
    if let Ok(value) = std::env::var("STORAGE_TESTING_SPECS") {
        return PathBuf::from(value);
    }
    Path::new(env!("CARGO_MANIFEST_DIR")).join("resources/lab-specs")
}

pub fn spec_path_for_name(spec_name: &str) -> PathBuf {
    specs_root().join(format!("{}.toml", spec_name))
}

pub fn load_by_name(spec_name: &str) -> Result<LabSpec> {
    let path = spec_path_for_name(spec_name);
    if !path.exists() {
        return Err(TestingError::SpecNotFound {
            spec_name: spec_name.to_string(),
        });
    }

    let raw = fs::read_to_string(&path).map_err(|error| TestingError::SpecInvalid {
        spec_name: spec_name.to_string(),
        reason: error.to_string(),
    })?;

    let spec: LabSpec = toml::from_str(&raw).map_err(|error| TestingError::SpecInvalid {
        spec_name: spec_name.to_string(),
        reason: error.to_string(),
    })?;

    validate(&spec)?;
    Ok(spec)
}

fn invalid(spec: &LabSpec, reason: impl Into<String>) -> TestingError {
    TestingError::SpecInvalid {
        spec_name: spec.name.clone(),
        reason: reason.into(),
    }
}

pub fn validate(spec: &LabSpec) -> Result<()> {
    if spec.name.is_empty() {
        return Err(TestingError::SpecInvalid {
            spec_name: "<unknown>".to_string(),
            reason: "name must not be empty".to_string(),
        });
    }

    if spec.disks.is_empty() {
        return Err(invalid(spec, "disks must not be empty"));
    }

    let mut names = BTreeSet::new();
    for disk in &spec.disks {
        if !names.insert(disk.name.as_str()) {
            return Err(invalid(spec, format!("disk {} is listed twice", disk.name)));
        }
        if !disk.partitions.is_empty() && disk.label.is_none() {
            return Err(invalid(spec, format!("disk {} has partitions but no label", disk.name)));
        }

        let mut indexes = BTreeSet::new();
        for (partition, start) in disk.partitions.iter().zip(partition_starts(disk)) {
            if !indexes.insert(partition.index) {
                return Err(invalid(
                    spec,
                    format!("partition {} of {} is listed twice", partition.index, disk.name),
                ));
            }
            if start + partition.size > disk.size {
                return Err(invalid(
                    spec,
                    format!("partition {} does not fit on {}", partition.index, disk.name),
                ));
            }
        }
    }

    Ok(())
}

fn partition_starts(disk: &DiskSpec) -> Vec<u64> {
    let mut next = MIB;
    disk.partitions
        .iter()
        .map(|partition| {
            let start = partition.start.unwrap_or(next);
            next = start + partition.size;
            start
        })
        .collect()
}

fn partition_format(partition: &PartitionSpec) -> Format {
    let Some(kind) = partition.fs else {
        return Format::none();
    };
    let mut format = Format::new(kind);
    if partition.uuid.is_some() {
        format.uuid = partition.uuid.clone();
    }
    format.label = partition.label.clone();
    format.resizable = kind.is_resizable();
    format
}

impl LabSpec {
    pub fn settings(&self) -> StorageSettings {
        let mut settings = StorageSettings::new(Platform::new(self.platform));
        if let Some(memory) = self.total_memory {
            settings.total_memory = memory;
        }
        settings
    }

    /// Graph of the existing devices the spec describes.
    pub fn tree(&self) -> Result<DeviceTree> {
        let mut tree = DeviceTree::new();
        for disk in &self.disks {
            let format = match disk.label {
                Some(label) => Format::new(FormatType::DiskLabel).with_disklabel(label),
                None => Format::none(),
            };
            let mut device = Device::new(&disk.name, disk.size, DeviceKind::Disk(DiskData::default()))
                .with_format(format)
                .into_existing();
            device.protected = disk.protected;
            let disk_id = tree.add_device(device)?;

            for (partition, start) in disk.partitions.iter().zip(partition_starts(disk)) {
                let mut device = Device::new(
                    partition_name(&disk.name, partition.index),
                    partition.size,
                    DeviceKind::Partition(PartitionData {
                        number: Some(partition.index),
                        start,
                        ..Default::default()
                    }),
                )
                .with_parents(vec![disk_id])
                .with_format(partition_format(partition))
                .into_existing();
                device.protected = partition.protected;
                device.resizable = true;
                tree.add_device(device)?;
            }
        }
        Ok(tree)
    }

    /// A storage session over the spec's graph with every disk selected.
    pub fn storage(&self) -> Result<Storage> {
        let mut storage = Storage::new(self.tree()?, self.settings());
        storage.selected_disks = storage.tree.disks().iter().map(|d| d.id).collect();
        Ok(storage)
    }

    /// File system contents by device name.
    pub fn files(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.disks
            .iter()
            .flat_map(|disk| {
                disk.partitions
                    .iter()
                    .filter(|partition| !partition.files.is_empty())
                    .map(|partition| (partition_name(&disk.name, partition.index), partition.files.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use storage_types::GIB;

    use super::*;

    #[test]
    fn resolves_spec_name_without_extension() {
        let spec = load_by_name("efi-empty").unwrap();
        assert_eq!(spec.name, "efi-empty");
        assert_eq!(spec.platform, PlatformKind::Efi);
    }

    #[test]
    fn missing_spec_is_reported() {
        assert!(matches!(
            load_by_name("no-such-lab"),
            Err(TestingError::SpecNotFound { .. })
        ));
    }

    #[test]
    fn partitions_follow_each_other() {
        let spec = load_by_name("fedora-installed").unwrap();
        let tree = spec.tree().unwrap();
        let sda1 = tree.get_device_by_name("sda1", false).unwrap();
        let sda2 = tree.get_device_by_name("sda2", false).unwrap();
        assert_eq!(sda1.partition().unwrap().start, MIB);
        assert_eq!(sda2.partition().unwrap().start, 2 * MIB);
        assert!(sda2.exists && sda2.format.exists);
        assert!(spec.files().contains_key("sda2"));
    }

    #[test]
    fn overlapping_partitions_are_rejected() {
        let spec: LabSpec = toml::from_str(
            r#"
name = "too-small"

[[disks]]
name = "vda"
size = "1 GiB"
label = "gpt"

[[disks.partitions]]
index = 1
size = "2 GiB"
"#,
        )
        .unwrap();
        assert!(matches!(validate(&spec), Err(TestingError::SpecInvalid { .. })));
        assert_eq!(spec.disks[0].size, GIB);
    }
}
