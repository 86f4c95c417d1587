// SPDX-License-Identifier: GPL-3.0-only

//! Storage session
//!
//! The session owns the *current* graph (the last scan plus any applied
//! partitioning) and one *playground* per partitioning module. Planners only
//! ever mutate a playground; applying a module replaces the current graph
//! with a copy of its playground.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use storage_contracts::{
    ModuleId, StorageError, StorageEvent, Task, TaskId, TaskMonitor, ValidationReport,
};
use storage_devicetree::{BlockBackend, DeviceTree, Storage, StorageSettings};
use storage_planner::viewer::{ActionInfo, get_actions};
use storage_planner::{
    CustomLayout, CustomPlanner, ManualPlanner, StorageChecker, do_autopart, gather_requests,
};
use storage_sys::{Discoverer, MountingReader, Writer};
use storage_types::{DiskInitializationConfig, MountPointRequest, PartitioningRequest};
use tokio::sync::broadcast;

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::tasks::{RunningTask, TaskRunner};

const EVENT_CAPACITY: usize = 256;

/// How a partitioning module builds its playground.
#[derive(Debug, Clone)]
pub enum PartitioningMethod {
    Automatic(PartitioningRequest),
    Custom(CustomLayout),
    Manual(Vec<MountPointRequest>),
    /// Devices are added and changed one by one through the device factory
    Interactive,
}

impl PartitioningMethod {
    fn name(&self) -> &'static str {
        match self {
            Self::Automatic(_) => "automatic",
            Self::Custom(_) => "custom",
            Self::Manual(_) => "manual",
            Self::Interactive => "interactive",
        }
    }
}

#[derive(Debug)]
struct PartitioningModule {
    method: PartitioningMethod,
    playground: Storage,
    report: Option<ValidationReport>,
}

#[derive(Debug)]
struct SessionState {
    /// Graph as scanned, before any partitioning
    scanned: Storage,
    current: Storage,
    modules: BTreeMap<ModuleId, PartitioningModule>,
    applied: Option<ModuleId>,
    next_module: u32,
}

impl SessionState {
    fn module_mut(&mut self, id: ModuleId) -> Result<&mut PartitioningModule> {
        self.modules.get_mut(&id).ok_or(ServiceError::UnknownModule(id))
    }

    /// Take `storage` as the new scan and drop every partitioning.
    fn replace(&mut self, storage: Storage, events: &broadcast::Sender<StorageEvent>) {
        self.scanned = storage.copy();
        self.current = storage;
        self.modules.clear();
        self.applied = None;
        let _ = events.send(StorageEvent::StorageChanged);
        let _ = events.send(StorageEvent::PartitioningReset);
    }
}

fn lock(state: &Mutex<SessionState>) -> std::result::Result<MutexGuard<'_, SessionState>, StorageError> {
    state
        .lock()
        .map_err(|_| StorageError::configuration("storage session state is poisoned"))
}

#[derive(Debug, Clone)]
pub struct StorageSession {
    config: ServiceConfig,
    backend: Option<Arc<dyn BlockBackend>>,
    state: Arc<Mutex<SessionState>>,
    events: broadcast::Sender<StorageEvent>,
    runner: TaskRunner,
}

impl StorageSession {
    /// A session with an empty graph.
    pub fn new(config: ServiceConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let storage = Storage::new(DeviceTree::new(), config.settings());
        Self {
            config,
            backend: None,
            state: Arc::new(Mutex::new(SessionState {
                scanned: storage.copy(),
                current: storage,
                modules: BTreeMap::new(),
                applied: None,
                next_module: 0,
            })),
            runner: TaskRunner::new(events.clone()),
            events,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn BlockBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn settings(&self) -> StorageSettings {
        self.config.settings()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionState>> {
        Ok(lock(&self.state)?)
    }

    fn backend(&self) -> Result<Arc<dyn BlockBackend>> {
        self.backend
            .clone()
            .ok_or_else(|| StorageError::unavailable_storage().into())
    }

    /// Copy of the current graph.
    pub fn storage(&self) -> Result<Storage> {
        Ok(self.lock()?.current.copy())
    }

    /// Replace the current graph, as a scan would.
    pub fn load(&self, storage: Storage) -> Result<()> {
        tracing::info!(devices = storage.tree.all_devices().len(), "loading storage");
        self.lock()?.replace(storage, &self.events);
        Ok(())
    }

    /// Pick the disks to install to and how they may be cleared.
    pub fn select_disks(&self, names: &[String], init: DiskInitializationConfig) -> Result<()> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let mut selected = Vec::new();
        for name in names {
            let disk = state
                .current
                .tree
                .get_device_by_name(name, false)
                .filter(|d| d.is_disk())
                .ok_or_else(|| StorageError::unknown_device(name))?;
            selected.push(disk.id);
        }
        tracing::info!(disks = ?names, mode = ?init.mode, "disk selection changed");
        for storage in [&mut state.scanned, &mut state.current] {
            storage.selected_disks = selected.clone();
            storage.disk_init = init.clone();
        }
        Ok(())
    }

    /// Rescan the system and look for existing installations.
    pub fn scan(&self) -> Result<RunningTask<()>> {
        let task = ScanTask {
            id: TaskId::new(),
            backend: self.backend()?,
            settings: self.settings(),
            physical_root: self.config.physical_root.clone(),
            state: self.state.clone(),
            events: self.events.clone(),
        };
        Ok(self.runner.spawn(task))
    }

    pub fn create_partitioning(&self, method: PartitioningMethod) -> Result<ModuleId> {
        let mut state = self.lock()?;
        state.next_module += 1;
        let id = ModuleId::new(state.next_module);
        tracing::info!(module = %id, method = method.name(), "partitioning created");
        let playground = state.current.copy();
        state.modules.insert(
            id,
            PartitioningModule {
                method,
                playground,
                report: None,
            },
        );
        let _ = self.events.send(StorageEvent::PartitioningCreated(id));
        Ok(id)
    }

    /// Run the module's planner on a fresh copy of the current graph.
    pub fn run_partitioning(&self, id: ModuleId) -> Result<RunningTask<ValidationReport>> {
        let (method, playground) = {
            let mut state = self.lock()?;
            let playground = state.current.copy();
            let module = state.module_mut(id)?;
            (module.method.clone(), playground)
        };
        let task = PartitioningTask {
            id: TaskId::new(),
            module: id,
            method,
            playground,
            state: self.state.clone(),
        };
        Ok(self.runner.spawn(task))
    }

    /// Copy of a module's playground.
    pub fn playground(&self, id: ModuleId) -> Result<Storage> {
        Ok(self.lock()?.module_mut(id)?.playground.copy())
    }

    /// Edit a module's playground in place, as the device factory does.
    pub fn update_playground<R>(
        &self,
        id: ModuleId,
        edit: impl FnOnce(&mut Storage) -> storage_contracts::Result<R>,
    ) -> Result<R> {
        let mut state = self.lock()?;
        let module = state.module_mut(id)?;
        let result = edit(&mut module.playground)?;
        module.report = None;
        Ok(result)
    }

    pub fn validate(&self, id: ModuleId) -> Result<ValidationReport> {
        let mut state = self.lock()?;
        let module = state.module_mut(id)?;
        let report = StorageChecker::default().check(&module.playground);
        module.report = Some(report.clone());
        Ok(report)
    }

    /// Validate a module and make its playground the current graph.
    pub fn apply_partitioning(&self, id: ModuleId) -> Result<ValidationReport> {
        let mut state = self.lock()?;
        let module = state.module_mut(id)?;
        let report = StorageChecker::default().check(&module.playground);
        module.report = Some(report.clone());
        let report = report.into_result()?;
        let playground = module.playground.copy();
        state.current = playground;
        state.applied = Some(id);
        tracing::info!(module = %id, warnings = report.warnings.len(), "partitioning applied");
        let _ = self.events.send(StorageEvent::PartitioningApplied(id));
        Ok(report)
    }

    pub fn applied_partitioning(&self) -> Result<Option<ModuleId>> {
        Ok(self.lock()?.applied)
    }

    /// Drop every partitioning and go back to the scanned graph.
    pub fn reset_partitioning(&self) -> Result<()> {
        let mut state = self.lock()?;
        let scanned = state.scanned.copy();
        state.replace(scanned, &self.events);
        tracing::info!("partitioning reset");
        Ok(())
    }

    /// Actions of the current graph in execution order.
    pub fn actions(&self) -> Result<Vec<ActionInfo>> {
        Ok(get_actions(&self.lock()?.current))
    }

    /// Hand the current actions to the backend.
    pub fn execute(&self) -> Result<RunningTask<()>> {
        let task = ExecuteTask {
            id: TaskId::new(),
            backend: self.backend()?,
            storage: self.storage()?,
        };
        Ok(self.runner.spawn(task))
    }

    /// Write fstab, crypttab and mdadm.conf of the current graph under `target`.
    pub fn write_configuration(&self, target: &Path) -> Result<Vec<PathBuf>> {
        let storage = self.storage()?;
        Ok(Writer::new().write(&storage, target)?)
    }
}

struct ScanTask {
    id: TaskId,
    backend: Arc<dyn BlockBackend>,
    settings: StorageSettings,
    physical_root: PathBuf,
    state: Arc<Mutex<SessionState>>,
    events: broadcast::Sender<StorageEvent>,
}

impl Task for ScanTask {
    type Output = ();

    fn id(&self) -> TaskId {
        self.id
    }

    fn description(&self) -> String {
        "Scan the storage devices".to_string()
    }

    fn run(self: Box<Self>, monitor: &dyn TaskMonitor) -> std::result::Result<(), StorageError> {
        monitor.report_progress("Scanning the storage devices");
        let mut storage = Storage::new(DeviceTree::new(), self.settings).with_backend(self.backend.clone());
        storage.reset()?;
        {
            // keep the disk selection across rescans
            let state = lock(&self.state)?;
            storage.disk_init = state.scanned.disk_init.clone();
            storage.selected_disks = state
                .scanned
                .selected_disks
                .iter()
                .filter_map(|id| state.scanned.tree.get(*id))
                .filter_map(|disk| storage.tree.get_device_by_name(&disk.name, false))
                .map(|disk| disk.id)
                .collect();
        }

        monitor.check_cancel()?;
        let reader = MountingReader::new(self.backend.clone(), &self.physical_root);
        let found = Discoverer::new(&reader).find_existing_installations(&mut storage, monitor)?;
        for root in &found {
            for warning in &root.warnings {
                tracing::warn!(root = %root.root.name, "{warning}");
            }
        }

        monitor.check_cancel()?;
        lock(&self.state)?.replace(storage, &self.events);
        Ok(())
    }
}

struct PartitioningTask {
    id: TaskId,
    module: ModuleId,
    method: PartitioningMethod,
    playground: Storage,
    state: Arc<Mutex<SessionState>>,
}

impl Task for PartitioningTask {
    type Output = ValidationReport;

    fn id(&self) -> TaskId {
        self.id
    }

    fn description(&self) -> String {
        format!("Run the {} partitioning", self.method.name())
    }

    fn run(self: Box<Self>, monitor: &dyn TaskMonitor) -> std::result::Result<ValidationReport, StorageError> {
        let Self {
            module,
            method,
            mut playground,
            state,
            ..
        } = *self;
        match &method {
            PartitioningMethod::Automatic(request) => do_autopart(&mut playground, request, monitor)?,
            PartitioningMethod::Custom(layout) => CustomPlanner::new(&mut playground).execute(layout, monitor)?,
            PartitioningMethod::Manual(requests) => {
                let requests = gather_requests(&playground, requests);
                ManualPlanner::new(requests).execute(&mut playground, monitor)?
            }
            PartitioningMethod::Interactive => {}
        }

        monitor.report_progress("Checking the storage configuration");
        let report = StorageChecker::default().check(&playground);

        monitor.check_cancel()?;
        let mut state = lock(&state)?;
        let Some(entry) = state.modules.get_mut(&module) else {
            return Err(StorageError::invalid_input(format!("Unknown partitioning: {module}")));
        };
        entry.playground = playground;
        entry.report = Some(report.clone());
        Ok(report)
    }
}

struct ExecuteTask {
    id: TaskId,
    backend: Arc<dyn BlockBackend>,
    storage: Storage,
}

impl Task for ExecuteTask {
    type Output = ();

    fn id(&self) -> TaskId {
        self.id
    }

    fn description(&self) -> String {
        "Execute the storage actions".to_string()
    }

    fn run(self: Box<Self>, monitor: &dyn TaskMonitor) -> std::result::Result<(), StorageError> {
        let actions = self.storage.tree.actions().sorted();
        tracing::info!(actions = actions.len(), "executing actions");
        for action in &actions {
            monitor.check_cancel()?;
            monitor.report_progress(&action.describe());
            self.backend.execute(action, &self.storage.tree)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use storage_types::{Device, DeviceKind, DiskData, DiskLabelType, Format, FormatType, GIB};

    use super::*;

    fn session_with_disk() -> StorageSession {
        let session = StorageSession::new(ServiceConfig::default());
        let mut storage = Storage::new(DeviceTree::new(), session.settings());
        storage
            .tree
            .add_device(
                Device::new("vda", 20 * GIB, DeviceKind::Disk(DiskData::default()))
                    .with_format(Format::new(FormatType::DiskLabel).with_disklabel(DiskLabelType::Msdos))
                    .into_existing(),
            )
            .unwrap();
        session.load(storage).unwrap();
        session
    }

    #[test]
    fn load_publishes_changed_before_reset() {
        let session = StorageSession::new(ServiceConfig::default());
        let mut events = session.subscribe();
        session
            .load(Storage::new(DeviceTree::new(), session.settings()))
            .unwrap();
        assert_eq!(events.try_recv().unwrap(), StorageEvent::StorageChanged);
        assert_eq!(events.try_recv().unwrap(), StorageEvent::PartitioningReset);
    }

    #[test]
    fn unknown_modules_and_disks_are_rejected() {
        let session = session_with_disk();
        assert!(matches!(
            session.validate(ModuleId::new(7)),
            Err(ServiceError::UnknownModule(_))
        ));
        assert!(
            session
                .select_disks(&["sdz".to_string()], DiskInitializationConfig::default())
                .is_err()
        );
        session
            .select_disks(&["vda".to_string()], DiskInitializationConfig::default())
            .unwrap();
        assert_eq!(session.storage().unwrap().selected_disks.len(), 1);
    }

    #[test]
    fn scanning_needs_a_backend() {
        let session = StorageSession::new(ServiceConfig::default());
        let error = session.scan().unwrap_err();
        assert!(matches!(error, ServiceError::Storage(_)));
    }

    #[test]
    fn failed_validation_keeps_the_current_graph() {
        let session = session_with_disk();
        let module = session.create_partitioning(PartitioningMethod::Interactive).unwrap();
        // nothing is mounted at / yet
        assert!(session.apply_partitioning(module).is_err());
        assert_eq!(session.applied_partitioning().unwrap(), None);
        assert!(session.actions().unwrap().is_empty());
    }
}
