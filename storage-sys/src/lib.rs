// SPDX-License-Identifier: GPL-3.0-only

//! Files of the installed system
//!
//! This crate reads and writes the text configuration a Linux installation
//! keeps about its storage:
//! - `/etc/fstab`, `/etc/crypttab` and `/etc/mdadm.conf`
//! - the blkid cache and the release files
//!
//! [`Discoverer`] uses them to find installations already on the disks and
//! [`Writer`] emits them for the system being installed.

pub mod blkid;
pub mod crypttab;
pub mod discover;
pub mod error;
pub mod fstab;
pub mod mdadm;
pub mod release;
pub mod writer;

pub use blkid::{BlkidCache, BlkidEntry};
pub use crypttab::{CrypttabEntry, parse_crypttab};
pub use discover::{DirectoryReader, DiscoveredRoot, Discoverer, MountingReader, RootReader};
pub use error::{Result, SysError};
pub use fstab::{Fstab, FstabEntry, parse_fstab};
pub use mdadm::{MdArrayEntry, mdadm_conf, mdadm_conf_entry, parse_mdadm_conf};
pub use release::Release;
pub use writer::Writer;
