// SPDX-License-Identifier: GPL-3.0-only

//! Declarative partitioning specs and automatic partitioning schemes

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::format::FormatType;

/// Device layout used by automatic partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutoPartScheme {
    Plain,
    #[default]
    Lvm,
    LvmThinp,
    Btrfs,
}

impl AutoPartScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Lvm => "lvm",
            Self::LvmThinp => "lvm_thinp",
            Self::Btrfs => "btrfs",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "partition" => Some(Self::Plain),
            "lvm" => Some(Self::Lvm),
            "lvm_thinp" | "thinp" => Some(Self::LvmThinp),
            "btrfs" => Some(Self::Btrfs),
            _ => None,
        }
    }

    pub fn is_lvm(&self) -> bool {
        matches!(self, Self::Lvm | Self::LvmThinp)
    }
}

/// Description of one wanted mount point (or swap).
///
/// Built through [`PartSpecBuilder`]; the planners only ever read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PartSpec {
    pub mountpoint: Option<String>,
    pub fstype: Option<FormatType>,
    pub size: u64,
    pub max_size: Option<u64>,
    pub grow: bool,
    /// May be an LVM logical volume
    pub lv: bool,
    /// May be a thin LV when the scheme is thin provisioning
    pub thin: bool,
    /// May be a btrfs subvolume
    pub btr: bool,
    pub weight: i32,
    /// Only scheduled when the container has at least this much space
    pub required_space: u64,
    pub encrypted: bool,
    /// Schemes this spec applies to (empty means all of them)
    pub schemes: BTreeSet<AutoPartScheme>,
}

impl PartSpec {
    pub fn builder() -> PartSpecBuilder {
        PartSpecBuilder::default()
    }

    pub fn applies_to(&self, scheme: AutoPartScheme) -> bool {
        self.schemes.is_empty() || self.schemes.contains(&scheme)
    }

    pub fn is_partition(&self, scheme: AutoPartScheme) -> bool {
        !self.is_volume(scheme)
    }

    pub fn is_volume(&self, scheme: AutoPartScheme) -> bool {
        match scheme {
            AutoPartScheme::Plain => false,
            AutoPartScheme::Lvm | AutoPartScheme::LvmThinp => self.lv,
            AutoPartScheme::Btrfs => self.btr,
        }
    }

    pub fn is_lvm_thin_volume(&self, scheme: AutoPartScheme) -> bool {
        scheme == AutoPartScheme::LvmThinp && self.lv && self.thin
    }

    pub fn is_btrfs_subvolume(&self, scheme: AutoPartScheme) -> bool {
        scheme == AutoPartScheme::Btrfs && self.btr
    }

    pub fn is_swap(&self) -> bool {
        self.fstype == Some(FormatType::Swap)
    }

    pub fn describe(&self) -> String {
        match (&self.mountpoint, self.fstype) {
            (Some(mountpoint), _) => mountpoint.clone(),
            (None, Some(fstype)) => fstype.to_string(),
            (None, None) => "unnamed".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PartSpecBuilder {
    spec: PartSpec,
}

impl PartSpecBuilder {
    pub fn mountpoint(mut self, mountpoint: impl Into<String>) -> Self {
        self.spec.mountpoint = Some(mountpoint.into());
        self
    }

    pub fn fstype(mut self, fstype: FormatType) -> Self {
        self.spec.fstype = Some(fstype);
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.spec.size = size;
        self
    }

    pub fn max_size(mut self, max_size: Option<u64>) -> Self {
        self.spec.max_size = max_size;
        self
    }

    pub fn grow(mut self, grow: bool) -> Self {
        self.spec.grow = grow;
        self
    }

    pub fn lv(mut self, lv: bool) -> Self {
        self.spec.lv = lv;
        self
    }

    pub fn thin(mut self, thin: bool) -> Self {
        self.spec.thin = thin;
        self
    }

    pub fn btr(mut self, btr: bool) -> Self {
        self.spec.btr = btr;
        self
    }

    pub fn weight(mut self, weight: i32) -> Self {
        self.spec.weight = weight;
        self
    }

    pub fn required_space(mut self, required_space: u64) -> Self {
        self.spec.required_space = required_space;
        self
    }

    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.spec.encrypted = encrypted;
        self
    }

    pub fn schemes(mut self, schemes: impl IntoIterator<Item = AutoPartScheme>) -> Self {
        self.spec.schemes = schemes.into_iter().collect();
        self
    }

    pub fn build(self) -> PartSpec {
        self.spec
    }
}

/// Product-configured default partitioning row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProductPartitionRow {
    /// Mount point, or `swap`
    pub name: String,
    /// Minimum size; growable rows grow from it
    #[serde(default, with = "crate::common::human_size_opt")]
    pub min: Option<u64>,
    /// Fixed size
    #[serde(default, with = "crate::common::human_size_opt")]
    pub size: Option<u64>,
    #[serde(default, with = "crate::common::human_size_opt")]
    pub max: Option<u64>,
    /// Free space the container must have for the row to be used
    #[serde(default, with = "crate::common::human_size_opt")]
    pub free: Option<u64>,
    /// Only used by the btrfs scheme
    #[serde(default)]
    pub btrfs: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::GIB;

    #[test]
    fn scheme_predicates() {
        let root = PartSpec::builder()
            .mountpoint("/")
            .size(GIB)
            .lv(true)
            .thin(true)
            .btr(true)
            .build();
        assert!(root.is_partition(AutoPartScheme::Plain));
        assert!(root.is_volume(AutoPartScheme::Lvm));
        assert!(root.is_lvm_thin_volume(AutoPartScheme::LvmThinp));
        assert!(!root.is_lvm_thin_volume(AutoPartScheme::Lvm));
        assert!(root.is_btrfs_subvolume(AutoPartScheme::Btrfs));

        let boot = PartSpec::builder().mountpoint("/boot").size(GIB).build();
        assert!(boot.is_partition(AutoPartScheme::Lvm));
        assert!(boot.is_partition(AutoPartScheme::Btrfs));
    }

    #[test]
    fn product_rows_accept_human_sizes() {
        let row: ProductPartitionRow = toml::from_str(
            r#"
name = "/home"
min = "500 MiB"
max = 53687091200
free = "50 GiB"
"#,
        )
        .unwrap();
        assert_eq!(row.min, Some(500 * crate::common::MIB));
        assert_eq!(row.max, Some(50 * GIB));
        assert_eq!(row.free, Some(50 * GIB));
        assert!(!row.btrfs);
    }
}
