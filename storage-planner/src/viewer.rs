// SPDX-License-Identifier: GPL-3.0-only

//! Read-only views of a plan for user interfaces.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use storage_devicetree::{Action, ActionKind, ActionTarget, Result, Storage};
use storage_types::{DeviceId, FormatType, MIB, align_up};

/// Size a device needs so that a file system of `fstype` offers `required`
/// bytes to its user.
pub fn get_required_device_size(required: u64, fstype: FormatType) -> u64 {
    // usable share of the device, in percent
    let usable = match fstype {
        FormatType::Ext2 | FormatType::Ext3 | FormatType::Ext4 => 93,
        FormatType::Xfs => 97,
        _ => 100,
    };
    let size = (required as u128 * 100).div_ceil(usable) as u64;
    align_up(size.max(fstype.min_size()), MIB)
}

/// Formats a user may pick for new file systems.
pub fn get_supported_file_systems() -> Vec<FormatType> {
    FormatType::ALL
        .into_iter()
        .filter(|kind| kind.is_formattable())
        .filter(|kind| kind.is_filesystem() || *kind == FormatType::Swap)
        .collect()
}

/// Formats the device `id` can be given.
pub fn get_file_systems_for_device(storage: &Storage, id: DeviceId) -> Result<Vec<FormatType>> {
    let device = storage.tree.device(id)?;
    if device.is_btrfs() {
        return Ok(vec![FormatType::Btrfs]);
    }
    let partition = device.is_partition();
    Ok(get_supported_file_systems()
        .into_iter()
        .filter(|kind| partition || !kind.is_partition_only())
        .collect())
}

/// Mount points of the plan and the devices holding them.
pub fn get_mount_points(storage: &Storage) -> BTreeMap<String, String> {
    storage
        .mountpoints()
        .into_iter()
        .filter_map(|(mountpoint, id)| storage.tree.get(id).map(|d| (mountpoint, d.name.clone())))
        .collect()
}

/// One scheduled action as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionInfo {
    pub action_type: String,
    pub action_description: String,
    pub object_type: String,
    pub object_description: String,
    pub device_id: DeviceId,
    pub device_name: String,
    pub mount_point: String,
}

fn action_info(storage: &Storage, action: &Action) -> ActionInfo {
    let device = storage.tree.get(action.device_id);
    let action_type = match action.kind {
        ActionKind::Create => "create",
        ActionKind::Destroy => "destroy",
        ActionKind::Resize => "resize",
        ActionKind::Reformat => "configure",
        ActionKind::AddMember => "add member",
        ActionKind::RemoveMember => "remove member",
    };
    let object_type = match action.target {
        ActionTarget::Device => device
            .map(|d| d.class().as_str().to_string())
            .unwrap_or_else(|| "device".to_string()),
        ActionTarget::Format => "format".to_string(),
    };
    ActionInfo {
        action_type: action_type.to_string(),
        action_description: action.describe(),
        object_type,
        object_description: device.map(|d| d.describe()).unwrap_or_default(),
        device_id: action.device_id,
        device_name: action.device_name.clone(),
        mount_point: device
            .and_then(|d| d.format.mountpoint.clone())
            .unwrap_or_default(),
    }
}

/// Scheduled actions in execution order.
pub fn get_actions(storage: &Storage) -> Vec<ActionInfo> {
    storage
        .tree
        .actions()
        .sorted()
        .iter()
        .map(|action| action_info(storage, action))
        .collect()
}
