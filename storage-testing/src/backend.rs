// SPDX-License-Identifier: GPL-3.0-only

//! In-memory block backend
//!
//! Scans return a fixed graph, executed actions are only recorded, and a
//! mount copies the device's file contents into the mount point so that the
//! discoverer can read them from disk.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use storage_contracts::BackendError;
use storage_devicetree::{Action, BlockBackend, DeviceTree};
use storage_types::Device;

use crate::errors::Result;
use crate::spec::LabSpec;

#[derive(Debug, Default)]
struct BackendState {
    tree: DeviceTree,
    executed: Vec<Action>,
    active: BTreeSet<String>,
    /// Mount point to device name and the files written there
    mounts: BTreeMap<PathBuf, (String, Vec<PathBuf>)>,
}

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    files: BTreeMap<String, BTreeMap<String, String>>,
    certificates: BTreeMap<String, String>,
    failing: BTreeSet<String>,
    unreadable: BTreeSet<String>,
    state: Mutex<BackendState>,
}

impl InMemoryBackend {
    pub fn new(tree: DeviceTree) -> Self {
        Self {
            state: Mutex::new(BackendState {
                tree,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn from_spec(spec: &LabSpec) -> Result<Self> {
        let mut backend = Self::new(spec.tree()?);
        backend.files = spec.files();
        Ok(backend)
    }

    pub fn with_file(mut self, device: &str, path: &str, content: &str) -> Self {
        self.files
            .entry(device.to_string())
            .or_default()
            .insert(path.to_string(), content.to_string());
        self
    }

    pub fn with_certificate(mut self, url: &str, pem: &str) -> Self {
        self.certificates.insert(url.to_string(), pem.to_string());
        self
    }

    /// Make every action on `device` fail.
    pub fn failing_on(mut self, device: &str) -> Self {
        self.failing.insert(device.to_string());
        self
    }

    /// Make activating `device` fail.
    pub fn unreadable(mut self, device: &str) -> Self {
        self.unreadable.insert(device.to_string());
        self
    }

    fn state(&self) -> std::result::Result<MutexGuard<'_, BackendState>, BackendError> {
        self.state
            .lock()
            .map_err(|_| BackendError::failed("lock", "in-memory backend state is poisoned"))
    }

    /// Graph returned by the next scans.
    pub fn set_tree(&self, tree: DeviceTree) -> std::result::Result<(), BackendError> {
        self.state()?.tree = tree;
        Ok(())
    }

    /// Actions executed so far, in execution order.
    pub fn executed(&self) -> Vec<Action> {
        self.state().map(|state| state.executed.clone()).unwrap_or_default()
    }

    /// Devices set up and not torn down yet.
    pub fn active(&self) -> BTreeSet<String> {
        self.state().map(|state| state.active.clone()).unwrap_or_default()
    }

    /// Mount points in use, with the device mounted there.
    pub fn mounted(&self) -> BTreeMap<PathBuf, String> {
        self.state()
            .map(|state| {
                state
                    .mounts
                    .iter()
                    .map(|(target, (device, _))| (target.clone(), device.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn io_failure(operation: &str, error: std::io::Error) -> BackendError {
    BackendError::failed(operation, error.to_string())
}

impl BlockBackend for InMemoryBackend {
    fn scan(&self) -> std::result::Result<DeviceTree, BackendError> {
        let state = self.state()?;
        tracing::debug!(devices = state.tree.all_devices().len(), "in-memory scan");
        Ok(state.tree.clone())
    }

    fn execute(&self, action: &Action, _tree: &DeviceTree) -> std::result::Result<(), BackendError> {
        if self.failing.contains(&action.device_name) {
            return Err(BackendError::failed(action.type_name(), format!("{} is failing", action.device_name)));
        }
        tracing::debug!(action = %action.describe(), "in-memory execute");
        self.state()?.executed.push(action.clone());
        Ok(())
    }

    fn setup(&self, device: &Device) -> std::result::Result<(), BackendError> {
        if self.unreadable.contains(&device.name) {
            return Err(BackendError::failed("setup", format!("{} cannot be activated", device.name)));
        }
        self.state()?.active.insert(device.name.clone());
        Ok(())
    }

    fn teardown(&self, device: &Device) -> std::result::Result<(), BackendError> {
        self.state()?.active.remove(&device.name);
        Ok(())
    }

    fn mount(&self, device: &Device, target: &Path, options: &str) -> std::result::Result<(), BackendError> {
        let mut state = self.state()?;
        if state.mounts.contains_key(target) {
            return Err(BackendError::failed("mount", format!("{} is busy", target.display())));
        }
        tracing::debug!(device = %device.name, target = %target.display(), options, "in-memory mount");

        let mut written = Vec::new();
        for (path, content) in self.files.get(&device.name).into_iter().flatten() {
            let file = target.join(path);
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent).map_err(|e| io_failure("mount", e))?;
            }
            std::fs::write(&file, content).map_err(|e| io_failure("mount", e))?;
            written.push(file);
        }
        state.mounts.insert(target.to_path_buf(), (device.name.clone(), written));
        Ok(())
    }

    fn unmount(&self, target: &Path) -> std::result::Result<(), BackendError> {
        let mut state = self.state()?;
        let Some((_, written)) = state.mounts.remove(target) else {
            return Err(BackendError::failed("unmount", format!("{} is not mounted", target.display())));
        };
        for file in written {
            std::fs::remove_file(&file).map_err(|e| io_failure("unmount", e))?;
        }
        Ok(())
    }

    fn escrow_certificate(&self, url: &str) -> std::result::Result<String, BackendError> {
        self.certificates
            .get(url)
            .cloned()
            .ok_or_else(|| BackendError::failed("fetch certificate", format!("nothing published at {url}")))
    }
}
