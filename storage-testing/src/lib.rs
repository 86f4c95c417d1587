// SPDX-License-Identifier: GPL-3.0-only

//! Test support for the storage planner: device graphs described as TOML lab
//! specs, an in-memory [`BlockBackend`] and small graph builders.
//!
//! [`BlockBackend`]: storage_devicetree::BlockBackend

pub mod backend;
pub mod errors;
pub mod fixtures;
pub mod spec;

pub use backend::InMemoryBackend;
pub use errors::{Result, TestingError};
pub use spec::{LabSpec, load_by_name};
