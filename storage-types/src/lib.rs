// SPDX-License-Identifier: GPL-3.0-only

//! Domain models for the installer storage planner
//!
//! This crate defines the single source of truth for the planner's domain types.
//! These models are used throughout the stack:
//!
//! - **storage-devicetree**: Stores [`Device`] records in its arena graph
//! - **storage-planner**: Consumes the request types and [`Platform`] descriptors
//! - **storage-service**: Deserializes requests and graph snapshots from TOML/JSON
//!
//! ## Architecture
//!
//! - [`Device`] + [`DeviceKind`] → one graph node and its variant data
//! - [`Format`] + [`FormatType`] → what is on a device and what it can do
//! - [`PartSpec`] → a wanted mount point, before it is scheduled
//! - [`Platform`] → per-architecture bootloader constraints and defaults

pub mod common;
pub mod device;
pub mod factory;
pub mod format;
pub mod partspec;
pub mod platform;
pub mod request;

pub use common::{
    ByteRange, GIB, GPT_ALIGNMENT_BYTES, KIB, MIB, TIB, align_down, align_up, bytes_to_pretty,
    gib, mib, pretty_to_bytes,
};
pub use device::{
    BtrfsVolumeData, CacheMode, DEFAULT_PE_SIZE, Device, DeviceClass, DeviceId, DeviceKind,
    DiskData, LvData, LvRole, LvmCacheRequest, MdData, PV_METADATA_SIZE, PartitionData,
    PartitionFlag, PartitionRole, RaidLevel, ThinPoolReserve, VgData, is_supported_pe_size,
};
pub use factory::{DeviceFactoryPermissions, DeviceFactoryRequest, DeviceType, SizePolicy};
pub use format::{
    DiskLabelType, Format, FormatType, LuksParams, LuksVersion, MAX_GROW_SIZE, PbkdfArgs,
};
pub use partspec::{AutoPartScheme, PartSpec, PartSpecBuilder, ProductPartitionRow};
pub use platform::{Platform, PlatformError, PlatformKind, Stage1Constraints};
pub use request::{
    DiskInitializationConfig, InitializationMode, MountPointRequest, PartitioningRequest,
};
