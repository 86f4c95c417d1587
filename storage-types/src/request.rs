// SPDX-License-Identifier: GPL-3.0-only

//! Requests consumed by the automatic and manual planners and the
//! disk-initialization policy.

use serde::{Deserialize, Serialize};

use crate::format::{FormatType, LuksVersion};
use crate::partspec::AutoPartScheme;

/// Automatic partitioning request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PartitioningRequest {
    pub scheme: AutoPartScheme,
    /// Overrides the default filesystem type
    pub fstype: Option<FormatType>,
    pub excluded_mount_points: Vec<String>,
    pub reformatted_mount_points: Vec<String>,
    pub removed_mount_points: Vec<String>,
    pub reused_mount_points: Vec<String>,
    pub hibernation: bool,
    pub encrypted: bool,
    #[serde(skip_serializing)]
    pub passphrase: String,
    pub cipher: String,
    pub luks_version: Option<LuksVersion>,
    pub pbkdf: String,
    pub pbkdf_memory: u32,
    pub pbkdf_time: u32,
    pub pbkdf_iterations: u32,
    pub escrow_certificate: String,
    pub backup_passphrase_enabled: bool,
    #[serde(skip_serializing)]
    pub opal_admin_passphrase: String,
}

impl PartitioningRequest {
    /// Whether the request reuses parts of an existing installation.
    pub fn is_reuse(&self) -> bool {
        !self.reused_mount_points.is_empty()
            || !self.reformatted_mount_points.is_empty()
            || !self.removed_mount_points.is_empty()
    }
}

/// Manual assignment of a mount point to an existing device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MountPointRequest {
    /// Device name, path, `UUID=…`, `LABEL=…` or `UUID=…@subvol`
    pub device_spec: String,
    pub mount_point: String,
    pub reformat: bool,
    pub format_type: Option<FormatType>,
    pub format_options: String,
    pub mount_options: String,
}

impl MountPointRequest {
    pub fn for_device(device_spec: impl Into<String>) -> Self {
        Self {
            device_spec: device_spec.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InitializationMode {
    None,
    #[default]
    Default,
    All,
    Linux,
    List,
}

/// Which disks and partitions may be cleared or relabeled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DiskInitializationConfig {
    pub mode: InitializationMode,
    /// Disk names; empty means all selected disks
    pub drives_to_clear: Vec<String>,
    /// Device names or ids for the `list` mode
    pub devices_to_clear: Vec<String>,
    pub initialize_labels: bool,
    pub format_unrecognized: bool,
    pub clear_non_existent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitioning_request_from_toml() {
        let request: PartitioningRequest = toml::from_str(
            r#"
scheme = "lvm_thinp"
fstype = "xfs"
hibernation = true
encrypted = true
passphrase = "longenough"
luks_version = "luks2"
pbkdf = "argon2id"
"#,
        )
        .unwrap();
        assert_eq!(request.scheme, AutoPartScheme::LvmThinp);
        assert_eq!(request.fstype, Some(FormatType::Xfs));
        assert_eq!(request.luks_version, Some(LuksVersion::Luks2));
        assert!(!request.is_reuse());
    }

    #[test]
    fn disk_initialization_defaults() {
        let config: DiskInitializationConfig = toml::from_str("mode = \"linux\"").unwrap();
        assert_eq!(config.mode, InitializationMode::Linux);
        assert!(config.drives_to_clear.is_empty());
        assert!(!config.initialize_labels);
    }
}
