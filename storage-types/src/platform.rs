// SPDX-License-Identifier: GPL-3.0-only

//! Platform descriptors
//!
//! A platform is a static record describing where the first stage of the
//! bootloader can live on a given architecture and which partitions the
//! installer must create for it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::{GIB, MIB, TIB};
use crate::device::{DeviceClass, RaidLevel};
use crate::format::{DiskLabelType, FormatType};
use crate::partspec::PartSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformKind {
    #[serde(rename = "x86")]
    X86,
    #[serde(rename = "efi")]
    Efi,
    #[serde(rename = "mac_efi")]
    MacEfi,
    #[serde(rename = "aarch64_efi")]
    Aarch64Efi,
    #[serde(rename = "arm_efi")]
    ArmEfi,
    #[serde(rename = "ipseries_ppc")]
    IpSeriesPpc,
    #[serde(rename = "newworld_ppc")]
    NewWorldPpc,
    #[serde(rename = "powernv")]
    PowerNv,
    #[serde(rename = "ps3")]
    Ps3,
    #[serde(rename = "s390")]
    S390,
    #[serde(rename = "arm")]
    Arm,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Unsupported platform: {0}")]
    Unknown(String),
}

impl PlatformKind {
    pub fn parse(s: &str) -> Result<Self, PlatformError> {
        let kind = match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "x86" | "x86_64" | "bios" => Self::X86,
            "efi" | "x86_efi" => Self::Efi,
            "mac_efi" | "macefi" => Self::MacEfi,
            "aarch64_efi" | "aarch64" => Self::Aarch64Efi,
            "arm_efi" => Self::ArmEfi,
            "ipseries_ppc" | "ipseries" | "ppc64le" => Self::IpSeriesPpc,
            "newworld_ppc" | "newworld" => Self::NewWorldPpc,
            "powernv" => Self::PowerNv,
            "ps3" => Self::Ps3,
            "s390" | "s390x" => Self::S390,
            "arm" => Self::Arm,
            _ => return Err(PlatformError::Unknown(s.to_string())),
        };
        Ok(kind)
    }

    pub fn is_efi(&self) -> bool {
        matches!(self, Self::Efi | Self::MacEfi | Self::Aarch64Efi | Self::ArmEfi)
    }

    pub fn is_ppc(&self) -> bool {
        matches!(self, Self::IpSeriesPpc | Self::NewWorldPpc | Self::PowerNv | Self::Ps3)
    }
}

/// Where the first stage of the bootloader may be placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Stage1Constraints {
    pub device_types: Vec<DeviceClass>,
    pub format_types: Vec<FormatType>,
    pub mountpoints: Vec<String>,
    /// Highest byte offset the device may end at
    pub max_end: Option<u64>,
    pub raid_levels: Vec<RaidLevel>,
    pub raid_metadata: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub kind: PlatformKind,
    pub stage1_constraints: Stage1Constraints,
    pub stage1_descriptions: BTreeMap<DeviceClass, String>,
    pub stage1_suggestion: String,
    /// Default stage1 and `/boot` specs
    pub partitions: Vec<PartSpec>,
    pub non_linux_format_types: Vec<FormatType>,
    pub packages: Vec<String>,
    /// Labels usable for new partition tables, preferred first
    pub disklabel_types: Vec<DiskLabelType>,
}

const MD_METADATA_ANY: [&str; 4] = ["0", "0.90", "1.0", "1.2"];

fn boot_spec() -> PartSpec {
    PartSpec::builder().mountpoint("/boot").size(GIB).build()
}

fn efi_spec(fstype: FormatType) -> PartSpec {
    PartSpec::builder()
        .mountpoint("/boot/efi")
        .fstype(fstype)
        .size(500 * MIB)
        .max_size(Some(600 * MIB))
        .grow(true)
        .build()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

impl Platform {
    pub fn from_name(name: &str) -> Result<Self, PlatformError> {
        Ok(Self::new(PlatformKind::parse(name)?))
    }

    pub fn new(kind: PlatformKind) -> Self {
        let mut descriptions = BTreeMap::new();
        let (constraints, partitions, suggestion, packages, labels) = match kind {
            PlatformKind::X86 => {
                descriptions.insert(DeviceClass::Disk, "Master Boot Record".to_string());
                descriptions.insert(DeviceClass::Partition, "First sector of boot partition".to_string());
                descriptions.insert(DeviceClass::MdArray, "RAID Device".to_string());
                (
                    Stage1Constraints {
                        device_types: vec![DeviceClass::Disk],
                        raid_levels: vec![RaidLevel::Raid1],
                        raid_metadata: strings(&MD_METADATA_ANY),
                        ..Default::default()
                    },
                    vec![
                        PartSpec::builder().fstype(FormatType::BiosBoot).size(MIB).build(),
                        boot_spec(),
                    ],
                    "For a BIOS installation on a GPT-formatted disk, you must include a 1 MiB \
                     BIOS boot partition."
                        .to_string(),
                    strings(&["grub2-pc"]),
                    vec![DiskLabelType::Gpt, DiskLabelType::Msdos],
                )
            }
            PlatformKind::Efi | PlatformKind::Aarch64Efi | PlatformKind::ArmEfi | PlatformKind::MacEfi => {
                let fstype = if kind == PlatformKind::MacEfi {
                    FormatType::MacEfi
                } else {
                    FormatType::Efi
                };
                descriptions.insert(DeviceClass::Partition, "EFI System Partition".to_string());
                descriptions.insert(DeviceClass::MdArray, "RAID Device".to_string());
                let packages = match kind {
                    PlatformKind::MacEfi => strings(&["mactel-boot", "grub2-efi-x64", "shim-x64"]),
                    PlatformKind::Aarch64Efi => strings(&["efibootmgr", "grub2-efi-aa64", "shim-aa64"]),
                    PlatformKind::ArmEfi => strings(&["efibootmgr", "grub2-efi-arm"]),
                    _ => strings(&["efibootmgr", "grub2-efi-x64", "shim-x64"]),
                };
                (
                    Stage1Constraints {
                        device_types: vec![DeviceClass::Partition, DeviceClass::MdArray],
                        format_types: vec![fstype],
                        mountpoints: strings(&["/boot/efi"]),
                        raid_levels: vec![RaidLevel::Raid1],
                        raid_metadata: strings(&["1.0"]),
                        ..Default::default()
                    },
                    vec![efi_spec(fstype), boot_spec()],
                    "For a UEFI installation, you must include an EFI System Partition on a \
                     GPT-formatted disk, mounted at /boot/efi."
                        .to_string(),
                    packages,
                    vec![DiskLabelType::Gpt],
                )
            }
            PlatformKind::IpSeriesPpc => {
                descriptions.insert(DeviceClass::Partition, "PReP Boot Partition".to_string());
                (
                    Stage1Constraints {
                        device_types: vec![DeviceClass::Partition],
                        format_types: vec![FormatType::PrepBoot],
                        max_end: Some(4 * GIB),
                        ..Default::default()
                    },
                    vec![
                        PartSpec::builder().fstype(FormatType::PrepBoot).size(4 * MIB).build(),
                        boot_spec(),
                    ],
                    "You must include a PReP Boot Partition within the first 4GiB of an \
                     msdos- or GPT-formatted disk."
                        .to_string(),
                    strings(&["grub2-tools", "grub2-ppc64le", "powerpc-utils"]),
                    vec![DiskLabelType::Gpt, DiskLabelType::Msdos],
                )
            }
            PlatformKind::NewWorldPpc => {
                descriptions.insert(DeviceClass::Partition, "Apple Bootstrap Partition".to_string());
                (
                    Stage1Constraints {
                        device_types: vec![DeviceClass::Partition],
                        format_types: vec![FormatType::AppleBoot],
                        ..Default::default()
                    },
                    vec![
                        PartSpec::builder().fstype(FormatType::AppleBoot).size(MIB).build(),
                        boot_spec(),
                    ],
                    "You must include an Apple Bootstrap Partition on an Apple Partition \
                     Map-formatted disk."
                        .to_string(),
                    strings(&["grub2-ppc64", "hfsutils"]),
                    vec![DiskLabelType::Mac],
                )
            }
            PlatformKind::PowerNv | PlatformKind::Ps3 => {
                descriptions.insert(DeviceClass::Partition, "First sector of boot partition".to_string());
                descriptions.insert(DeviceClass::MdArray, "RAID Device".to_string());
                (
                    Stage1Constraints {
                        device_types: vec![DeviceClass::Partition, DeviceClass::MdArray],
                        mountpoints: strings(&["/boot"]),
                        raid_levels: vec![RaidLevel::Raid1],
                        raid_metadata: strings(&MD_METADATA_ANY),
                        ..Default::default()
                    },
                    vec![boot_spec()],
                    "You must include a /boot partition.".to_string(),
                    strings(&["grub2-tools"]),
                    vec![DiskLabelType::Gpt, DiskLabelType::Msdos],
                )
            }
            PlatformKind::S390 => {
                descriptions.insert(DeviceClass::Partition, "First sector of boot partition".to_string());
                descriptions.insert(DeviceClass::Disk, "DASD".to_string());
                (
                    Stage1Constraints {
                        device_types: vec![DeviceClass::Partition, DeviceClass::Disk],
                        mountpoints: strings(&["/boot"]),
                        ..Default::default()
                    },
                    vec![PartSpec::builder().mountpoint("/boot").size(GIB).lv(false).build()],
                    "You must include at least one disk as an install target.".to_string(),
                    strings(&["s390utils-base"]),
                    vec![DiskLabelType::Msdos, DiskLabelType::Dasd],
                )
            }
            PlatformKind::Arm => {
                descriptions.insert(DeviceClass::Disk, "Master Boot Record".to_string());
                (
                    Stage1Constraints {
                        device_types: vec![DeviceClass::Disk],
                        max_end: Some(2 * TIB),
                        ..Default::default()
                    },
                    vec![boot_spec()],
                    "You must include at least one MBR-formatted disk as an install target.".to_string(),
                    strings(&["uboot-tools"]),
                    vec![DiskLabelType::Msdos],
                )
            }
        };

        Self {
            kind,
            stage1_constraints: constraints,
            stage1_descriptions: descriptions,
            stage1_suggestion: suggestion,
            partitions,
            non_linux_format_types: vec![
                FormatType::Vfat,
                FormatType::Ntfs,
                FormatType::Hfs,
                FormatType::HfsPlus,
            ],
            packages,
            disklabel_types: labels,
        }
    }

    /// Preferred label for a new partition table on a disk of `disk_size` bytes.
    pub fn best_disklabel_type(&self, disk_size: u64) -> DiskLabelType {
        self.disklabel_types
            .iter()
            .copied()
            .find(|label| disk_size <= label.max_disk_size())
            .or_else(|| self.disklabel_types.first().copied())
            .unwrap_or(DiskLabelType::Gpt)
    }

    /// Allocation weight of a partition; heavier partitions are placed first.
    pub fn weight(&self, fstype: Option<FormatType>, mountpoint: Option<&str>) -> i32 {
        if let Some(fstype) = fstype
            && self.stage1_constraints.format_types.contains(&fstype)
        {
            return 5000;
        }
        match (fstype, mountpoint) {
            (Some(FormatType::BiosBoot), _) if self.kind == PlatformKind::X86 => 5000,
            (_, Some("/boot/efi")) if self.kind.is_efi() => 5000,
            (_, Some("/boot")) => 2000,
            _ => 0,
        }
    }

    /// Stage1 format types that only ever live on a partition.
    pub fn stage1_format_types(&self) -> Vec<FormatType> {
        let mut types = self.stage1_constraints.format_types.clone();
        if self.kind == PlatformKind::X86 {
            types.push(FormatType::BiosBoot);
        }
        types
    }

    pub fn description_for(&self, class: DeviceClass) -> Option<&str> {
        self.stage1_descriptions.get(&class).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_platform_is_rejected() {
        assert_eq!(
            Platform::from_name("vax").unwrap_err(),
            PlatformError::Unknown("vax".to_string())
        );
    }

    #[test]
    fn efi_defaults_put_esp_before_boot() {
        let platform = Platform::new(PlatformKind::Efi);
        let esp = &platform.partitions[0];
        assert_eq!(esp.mountpoint.as_deref(), Some("/boot/efi"));
        assert_eq!(esp.fstype, Some(FormatType::Efi));
        assert_eq!(esp.size, 500 * MIB);
        assert_eq!(esp.max_size, Some(600 * MIB));
        assert!(esp.grow);
        assert_eq!(platform.partitions[1].mountpoint.as_deref(), Some("/boot"));
        assert_eq!(platform.best_disklabel_type(20 * GIB), DiskLabelType::Gpt);
    }

    #[test]
    fn x86_weights_biosboot_over_boot() {
        let platform = Platform::new(PlatformKind::X86);
        assert_eq!(platform.weight(Some(FormatType::BiosBoot), None), 5000);
        assert_eq!(platform.weight(None, Some("/boot")), 2000);
        assert_eq!(platform.weight(Some(FormatType::Ext4), Some("/")), 0);
        assert_eq!(platform.partitions[0].size, MIB);
    }

    #[test]
    fn ppc_prep_must_end_below_4gib() {
        let platform = Platform::from_name("ppc64le").unwrap();
        assert_eq!(platform.stage1_constraints.max_end, Some(4 * GIB));
        assert_eq!(platform.stage1_format_types(), vec![FormatType::PrepBoot]);
    }
}
