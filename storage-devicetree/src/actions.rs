// SPDX-License-Identifier: GPL-3.0-only

//! Queued mutations of the device graph
//!
//! Actions are recorded in the order the planner issues them and handed to the
//! backend in [`ActionList::sorted`] order: destroys first (in the order they
//! were queued, which is leaves first), then new partition tables, then
//! shrinks, grows and finally creates (parents first, format after device).

use serde::{Deserialize, Serialize};
use storage_types::{DeviceId, Format, FormatType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Destroy,
    Resize,
    /// Change attributes of an existing format in place (label)
    Reformat,
    AddMember,
    RemoveMember,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTarget {
    Device,
    Format,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ActionPayload {
    None,
    Resize { old_size: u64, new_size: u64 },
    Format { format: Format },
    Member { member: DeviceId },
    Label { label: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Sequence number, unique within one list
    pub id: u32,
    pub kind: ActionKind,
    pub target: ActionTarget,
    pub device_id: DeviceId,
    pub device_name: String,
    pub payload: ActionPayload,
}

impl Action {
    pub fn is_create(&self) -> bool {
        self.kind == ActionKind::Create
    }

    pub fn is_destroy(&self) -> bool {
        self.kind == ActionKind::Destroy
    }

    pub fn is_resize(&self) -> bool {
        self.kind == ActionKind::Resize
    }

    pub fn is_device(&self) -> bool {
        self.target == ActionTarget::Device
    }

    pub fn is_format(&self) -> bool {
        self.target == ActionTarget::Format
    }

    pub fn is_shrink(&self) -> bool {
        matches!(self.payload, ActionPayload::Resize { old_size, new_size } if new_size < old_size)
    }

    /// Format carried by a format action.
    pub fn format(&self) -> Option<&Format> {
        match &self.payload {
            ActionPayload::Format { format } => Some(format),
            _ => None,
        }
    }

    /// Short name of the action (`create`, `add-format`, `destroy`, …).
    pub fn type_name(&self) -> &'static str {
        match (self.kind, self.target) {
            (ActionKind::Create, ActionTarget::Device) => "create",
            (ActionKind::Create, ActionTarget::Format) => "add-format",
            (ActionKind::Destroy, _) => "destroy",
            (ActionKind::Resize, _) => "resize",
            (ActionKind::Reformat, _) => "reformat",
            (ActionKind::AddMember, _) => "add-member",
            (ActionKind::RemoveMember, _) => "remove-member",
        }
    }

    pub fn describe(&self) -> String {
        let target = match self.target {
            ActionTarget::Device => "device",
            ActionTarget::Format => "format",
        };
        let verb = match self.kind {
            ActionKind::Create => "create",
            ActionKind::Destroy => "destroy",
            ActionKind::Resize => "resize",
            ActionKind::Reformat => "configure",
            ActionKind::AddMember => "add member to",
            ActionKind::RemoveMember => "remove member from",
        };
        let detail = match &self.payload {
            ActionPayload::Resize { old_size, new_size } => format!(
                " ({} -> {})",
                storage_types::bytes_to_pretty(old_size, false),
                storage_types::bytes_to_pretty(new_size, false)
            ),
            ActionPayload::Format { format } => format!(" {}", format.describe()),
            ActionPayload::Member { member } => format!(" {member}"),
            ActionPayload::Label { label } => {
                format!(" label={}", label.as_deref().unwrap_or(""))
            }
            ActionPayload::None => String::new(),
        };
        format!("{verb} {target} {}{detail}", self.device_name)
    }

    /// Position of the action in the execution order.
    fn phase(&self) -> u8 {
        match (self.kind, self.target) {
            (ActionKind::RemoveMember, _) => 0,
            (ActionKind::Destroy, _) => 1,
            (ActionKind::Create, ActionTarget::Format)
                if self.format().is_some_and(|f| f.kind == FormatType::DiskLabel) =>
            {
                2
            }
            (ActionKind::Resize, _) if self.is_shrink() => 3,
            (ActionKind::Resize, _) => 4,
            (ActionKind::Reformat, _) => 4,
            (ActionKind::Create, _) => 5,
            (ActionKind::AddMember, _) => 6,
        }
    }
}

/// Recorded actions of one device graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionList {
    actions: Vec<Action>,
    next_id: u32,
    /// Devices whose create action must run before the other creates
    #[serde(default)]
    early_creates: Vec<DeviceId>,
}

impl ActionList {
    pub fn add(
        &mut self,
        kind: ActionKind,
        target: ActionTarget,
        device_id: DeviceId,
        device_name: &str,
        payload: ActionPayload,
    ) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        tracing::debug!(
            action = id,
            kind = ?kind,
            target = ?target,
            device = device_name,
            "queued action"
        );
        self.actions.push(Action {
            id,
            kind,
            target,
            device_id,
            device_name: device_name.to_string(),
            payload,
        });
        id
    }

    /// Make the create actions of `device_id` run before the other creates.
    pub fn mark_early_create(&mut self, device_id: DeviceId) {
        if !self.early_creates.contains(&device_id) {
            self.early_creates.push(device_id);
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Actions in the order they were recorded.
    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    pub fn for_device(&self, device_id: DeviceId) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(move |a| a.device_id == device_id)
    }

    pub fn find(
        &self,
        device_id: DeviceId,
        kind: ActionKind,
        target: ActionTarget,
    ) -> Option<&Action> {
        self.actions
            .iter()
            .find(|a| a.device_id == device_id && a.kind == kind && a.target == target)
    }

    pub fn contains(&self, device_id: DeviceId, kind: ActionKind, target: ActionTarget) -> bool {
        self.find(device_id, kind, target).is_some()
    }

    /// Remove the actions of `device_id` matching `kind` and `target`.
    pub fn cancel(&mut self, device_id: DeviceId, kind: ActionKind, target: Option<ActionTarget>) -> usize {
        let before = self.actions.len();
        self.actions.retain(|a| {
            !(a.device_id == device_id && a.kind == kind && target.is_none_or(|t| a.target == t))
        });
        let removed = before - self.actions.len();
        if removed > 0 {
            tracing::debug!(device = %device_id, kind = ?kind, removed, "cancelled actions");
        }
        removed
    }

    /// Remove every action of `device_id`.
    pub fn cancel_all(&mut self, device_id: DeviceId) -> usize {
        let before = self.actions.len();
        self.actions.retain(|a| a.device_id != device_id);
        self.early_creates.retain(|id| *id != device_id);
        before - self.actions.len()
    }

    /// Follow a device rename in the recorded actions.
    pub fn rename_device(&mut self, device_id: DeviceId, name: &str) {
        for action in self.actions.iter_mut().filter(|a| a.device_id == device_id) {
            action.device_name = name.to_string();
        }
    }

    /// Replace the format carried by the pending create-format action.
    pub fn update_created_format(&mut self, device_id: DeviceId, format: &Format) {
        for action in self.actions.iter_mut().filter(|a| {
            a.device_id == device_id && a.kind == ActionKind::Create && a.target == ActionTarget::Format
        }) {
            action.payload = ActionPayload::Format {
                format: format.clone(),
            };
        }
    }

    pub fn clear(&mut self) {
        self.actions.clear();
        self.early_creates.clear();
    }

    /// Actions in execution order.
    pub fn sorted(&self) -> Vec<Action> {
        let mut sorted = self.actions.clone();
        sorted.sort_by_key(|a| {
            let early = a.kind == ActionKind::Create && self.early_creates.contains(&a.device_id);
            (a.phase(), !early, a.id)
        });
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label() -> ActionPayload {
        ActionPayload::Format {
            format: Format::new(FormatType::DiskLabel),
        }
    }

    #[test]
    fn destroys_run_before_creates_and_labels_right_after() {
        let mut list = ActionList::default();
        let disk = DeviceId(1);
        let part = DeviceId(2);
        let old = DeviceId(3);
        list.add(ActionKind::Create, ActionTarget::Device, part, "sda1", ActionPayload::None);
        list.add(ActionKind::Destroy, ActionTarget::Format, old, "sda9", ActionPayload::None);
        list.add(ActionKind::Create, ActionTarget::Format, disk, "sda", label());
        list.add(ActionKind::Destroy, ActionTarget::Device, old, "sda9", ActionPayload::None);
        list.add(
            ActionKind::Resize,
            ActionTarget::Device,
            DeviceId(4),
            "sdb1",
            ActionPayload::Resize { old_size: 10, new_size: 5 },
        );

        let order: Vec<_> = list.sorted().iter().map(|a| (a.device_id, a.kind, a.target)).collect();
        assert_eq!(
            order,
            vec![
                (old, ActionKind::Destroy, ActionTarget::Format),
                (old, ActionKind::Destroy, ActionTarget::Device),
                (disk, ActionKind::Create, ActionTarget::Format),
                (DeviceId(4), ActionKind::Resize, ActionTarget::Device),
                (part, ActionKind::Create, ActionTarget::Device),
            ]
        );
    }

    #[test]
    fn cancel_matches_device_and_kind() {
        let mut list = ActionList::default();
        let dev = DeviceId(7);
        list.add(ActionKind::Resize, ActionTarget::Format, dev, "sda1", ActionPayload::None);
        list.add(ActionKind::Resize, ActionTarget::Device, dev, "sda1", ActionPayload::None);
        list.add(ActionKind::Destroy, ActionTarget::Format, dev, "sda1", ActionPayload::None);
        assert_eq!(list.cancel(dev, ActionKind::Resize, None), 2);
        assert_eq!(list.len(), 1);
        assert_eq!(list.cancel_all(dev), 1);
        assert!(list.is_empty());
    }

    #[test]
    fn early_creates_precede_other_creates() {
        let mut list = ActionList::default();
        list.add(ActionKind::Create, ActionTarget::Device, DeviceId(5), "sda5", ActionPayload::None);
        list.add(ActionKind::Create, ActionTarget::Device, DeviceId(6), "sda4", ActionPayload::None);
        list.mark_early_create(DeviceId(6));
        let sorted = list.sorted();
        assert_eq!(sorted[0].device_id, DeviceId(6));
        assert_eq!(sorted[0].type_name(), "create");
    }
}
