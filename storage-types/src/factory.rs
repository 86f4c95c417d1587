// SPDX-License-Identifier: GPL-3.0-only

//! Interactive device factory request and permissions

use serde::{Deserialize, Serialize};

use crate::device::RaidLevel;
use crate::format::{FormatType, LuksVersion};

/// Kind of device the factory builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    #[default]
    Lvm,
    Md,
    Partition,
    Btrfs,
    Disk,
    LvmThinp,
}

impl DeviceType {
    /// Types whose devices live inside a container the user can edit.
    pub fn is_container_type(&self) -> bool {
        matches!(self, Self::Lvm | Self::LvmThinp | Self::Btrfs)
    }

    pub fn supports_raid(&self) -> bool {
        matches!(self, Self::Md | Self::Btrfs)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lvm => "lvm",
            Self::Md => "md",
            Self::Partition => "partition",
            Self::Btrfs => "btrfs",
            Self::Disk => "disk",
            Self::LvmThinp => "lvm_thinp",
        }
    }
}

/// How a container is sized when its devices change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SizePolicy {
    /// Just large enough for its devices
    #[default]
    Auto,
    /// As large as possible
    Max,
    /// Fixed size in bytes
    Fixed(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeviceFactoryRequest {
    /// Id of the device being edited (empty for a new device)
    pub device_spec: String,
    /// Names of the disks the device may use
    pub disks: Vec<String>,
    pub mount_point: String,
    pub reformat: bool,
    pub format_type: Option<FormatType>,
    pub label: String,
    pub luks_version: Option<LuksVersion>,
    pub device_type: DeviceType,
    pub device_name: String,
    pub device_size: u64,
    pub device_raid_level: Option<RaidLevel>,
    pub device_encrypted: bool,
    /// Id of the container the device currently lives in
    pub container_spec: String,
    pub container_name: String,
    pub container_size_policy: SizePolicy,
    pub container_raid_level: Option<RaidLevel>,
    pub container_encrypted: bool,
    pub container_luks_version: Option<LuksVersion>,
}

impl DeviceFactoryRequest {
    /// Reset the container attributes to those of a fresh container.
    ///
    /// The container LUKS version is only cleared when the container was
    /// encrypted before the reset.
    pub fn reset_container_data(&mut self) {
        self.container_spec.clear();
        self.container_name.clear();
        self.container_size_policy = SizePolicy::Auto;
        self.container_raid_level = None;
        if self.container_encrypted {
            self.container_luks_version = None;
        }
        self.container_encrypted = false;
    }
}

/// Which attributes of a [`DeviceFactoryRequest`] the user may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeviceFactoryPermissions {
    pub mount_point: bool,
    pub reformat: bool,
    pub format_type: bool,
    pub label: bool,
    pub device_type: bool,
    pub device_name: bool,
    pub device_size: bool,
    pub device_raid_level: bool,
    pub device_encrypted: bool,
    pub disks: bool,
    pub container_spec: bool,
    pub container_name: bool,
    pub container_size_policy: bool,
    pub container_raid_level: bool,
    pub container_encrypted: bool,
}

impl DeviceFactoryPermissions {
    /// Whether the named request attribute may be changed.
    pub fn can_change(&self, attribute: &str) -> bool {
        match attribute {
            "mount_point" => self.mount_point,
            "reformat" => self.reformat,
            "format_type" => self.format_type,
            "label" => self.label,
            "device_type" => self.device_type,
            "device_name" => self.device_name,
            "device_size" => self.device_size,
            "device_raid_level" => self.device_raid_level,
            "device_encrypted" => self.device_encrypted,
            "disks" => self.disks,
            "container_spec" => self.container_spec,
            "container_name" => self.container_name,
            "container_size_policy" => self.container_size_policy,
            "container_raid_level" => self.container_raid_level,
            "container_encrypted" => self.container_encrypted,
            _ => false,
        }
    }
}
