// SPDX-License-Identifier: GPL-3.0-only

//! Default partitioning table
//!
//! The platform contributes its bootloader and `/boot` rows, the product
//! configuration the rest.

use storage_devicetree::StorageSettings;
use storage_types::{AutoPartScheme, FormatType, GIB, MIB, PartSpec, ProductPartitionRow};

/// Spec of one product partitioning row.
pub fn get_part_spec(row: &ProductPartitionRow) -> PartSpec {
    let swap = row.name == "swap";
    let mut builder = PartSpec::builder()
        .size(row.min.or(row.size).unwrap_or(0))
        .max_size(row.max)
        .grow(row.min.is_some())
        .lv(true)
        .thin(!swap)
        .btr(!swap)
        .required_space(row.free.unwrap_or(0))
        .encrypted(true);
    if swap {
        builder = builder.fstype(FormatType::Swap);
    } else {
        builder = builder.mountpoint(row.name.clone());
    }
    if row.btrfs {
        builder = builder.schemes([AutoPartScheme::Btrfs]);
    }
    builder.build()
}

/// Rows used when the product configures none.
pub fn fallback_product_rows() -> Vec<ProductPartitionRow> {
    vec![
        ProductPartitionRow {
            name: "/".to_string(),
            min: Some(GIB),
            max: Some(70 * GIB),
            ..Default::default()
        },
        ProductPartitionRow {
            name: "/home".to_string(),
            min: Some(500 * MIB),
            free: Some(50 * GIB),
            ..Default::default()
        },
    ]
}

/// Platform rows followed by the product rows.
pub fn get_default_partitioning(settings: &StorageSettings) -> Vec<PartSpec> {
    let product = if settings.product_partitions.is_empty() {
        fallback_product_rows()
    } else {
        settings.product_partitions.clone()
    };
    settings
        .platform
        .partitions
        .iter()
        .cloned()
        .chain(product.iter().map(get_part_spec))
        .collect()
}

#[cfg(test)]
mod tests {
    use storage_types::{Platform, PlatformKind};

    use super::*;

    #[test]
    fn swap_row_has_no_mountpoint() {
        let spec = get_part_spec(&ProductPartitionRow {
            name: "swap".to_string(),
            size: Some(2 * GIB),
            ..Default::default()
        });
        assert!(spec.is_swap());
        assert_eq!(spec.mountpoint, None);
        assert!(spec.lv);
        assert!(!spec.thin);
        assert!(!spec.btr);
        assert!(!spec.grow);
        assert_eq!(spec.size, 2 * GIB);
    }

    #[test]
    fn min_rows_grow() {
        let spec = get_part_spec(&ProductPartitionRow {
            name: "/home".to_string(),
            min: Some(500 * MIB),
            free: Some(50 * GIB),
            btrfs: true,
            ..Default::default()
        });
        assert_eq!(spec.mountpoint.as_deref(), Some("/home"));
        assert_eq!(spec.fstype, None);
        assert!(spec.grow);
        assert!(spec.encrypted);
        assert_eq!(spec.required_space, 50 * GIB);
        assert!(spec.applies_to(AutoPartScheme::Btrfs));
        assert!(!spec.applies_to(AutoPartScheme::Lvm));
    }

    #[test]
    fn platform_rows_come_first() {
        let mut settings = StorageSettings::new(Platform::new(PlatformKind::Efi));
        settings.product_partitions = vec![ProductPartitionRow {
            name: "/".to_string(),
            min: Some(GIB),
            max: Some(70 * GIB),
            ..Default::default()
        }];
        let table = get_default_partitioning(&settings);
        let mountpoints: Vec<_> = table.iter().map(|s| s.mountpoint.clone().unwrap_or_default()).collect();
        assert_eq!(mountpoints, vec!["/boot/efi", "/boot", "/"]);
    }
}
