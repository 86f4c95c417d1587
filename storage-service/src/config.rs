// SPDX-License-Identifier: GPL-3.0-only

//! Service configuration, read from TOML.
//!
//! Every key is optional. Sizes accept a byte count or a human string such
//! as `"4 GiB"`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use storage_devicetree::StorageSettings;
use storage_types::{
    AutoPartScheme, FormatType, GIB, LuksVersion, Platform, PlatformKind, ProductPartitionRow,
};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub platform: PlatformKind,
    pub default_fstype: FormatType,
    pub default_boot_fstype: FormatType,
    pub default_scheme: AutoPartScheme,
    pub luks_version: LuksVersion,
    /// Installed memory, used to size swap
    #[serde(with = "storage_types::common::human_size")]
    pub total_memory: u64,
    /// Where existing file systems are mounted while looking for installations
    pub physical_root: PathBuf,
    pub fips: bool,
    pub product_partitions: Vec<ProductPartitionRow>,
    pub required_mount_points: Vec<String>,
    /// Base name of new volume groups
    pub vg_name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            platform: PlatformKind::X86,
            default_fstype: FormatType::Ext4,
            default_boot_fstype: FormatType::Ext4,
            default_scheme: AutoPartScheme::Lvm,
            luks_version: LuksVersion::Luks2,
            total_memory: 4 * GIB,
            physical_root: PathBuf::from("/mnt/sysroot"),
            fips: false,
            product_partitions: Vec::new(),
            required_mount_points: vec!["/".to_string()],
            vg_name: "anaconda".to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load the configuration file; a missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let config = Self::from_toml(&text)?;
                tracing::debug!(path = %path.display(), "configuration loaded");
                Ok(config)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no configuration file, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Settings of the storage sessions built from this configuration.
    pub fn settings(&self) -> StorageSettings {
        StorageSettings {
            platform: Platform::new(self.platform),
            default_fstype: self.default_fstype,
            default_boot_fstype: self.default_boot_fstype,
            default_luks_version: self.luks_version,
            container_prefix: self.vg_name.clone(),
            fips: self.fips,
            total_memory: self.total_memory,
            required_mount_points: self.required_mount_points.clone(),
            product_partitions: self.product_partitions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use storage_types::MIB;

    use super::*;

    #[test]
    fn sizes_accept_strings_and_integers() {
        let config = ServiceConfig::from_toml(
            r#"
platform = "efi"
default_fstype = "xfs"
total_memory = "8 GiB"
fips = true
vg_name = "fedora"

[[product_partitions]]
name = "/"
min = "1 GiB"
max = 75161927680

[[product_partitions]]
name = "/home"
size = "500 MiB"
"#,
        )
        .unwrap();
        assert_eq!(config.platform, PlatformKind::Efi);
        assert_eq!(config.total_memory, 8 * GIB);
        assert_eq!(config.product_partitions[0].min, Some(GIB));
        assert_eq!(config.product_partitions[0].max, Some(70 * GIB));
        assert_eq!(config.product_partitions[1].size, Some(500 * MIB));

        let settings = config.settings();
        assert_eq!(settings.default_fstype, FormatType::Xfs);
        assert_eq!(settings.container_prefix, "fedora");
        assert!(settings.fips);
        assert_eq!(settings.default_boot_fstype, FormatType::Ext4);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig::load(&dir.path().join("storage.toml")).unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.physical_root, PathBuf::from("/mnt/sysroot"));
    }

    #[test]
    fn invalid_values_are_reported() {
        let error = ServiceConfig::from_toml("total_memory = \"lots\"").unwrap_err();
        assert!(matches!(error, crate::error::ServiceError::Config(_)));
    }
}
