// SPDX-License-Identifier: GPL-3.0-only

//! Discovery of installed systems
//!
//! Every Linux file system on the disks is looked into for an fstab. The
//! fstab, helped by the crypttab and the blkid cache, maps mount points back
//! to devices of the graph; the result is a [`Root`] per installation.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use storage_contracts::TaskMonitor;
use storage_devicetree::{BlockBackend, Root, Storage};
use storage_types::{Device, DeviceId, FormatType};

use crate::blkid::BlkidCache;
use crate::crypttab::{CrypttabEntry, parse_crypttab};
use crate::fstab::{FstabEntry, parse_fstab};
use crate::release::{RELEASE_FILES, Release};
use crate::Result;

pub const FSTAB_PATH: &str = "etc/fstab";
pub const CRYPTTAB_PATH: &str = "etc/crypttab";
pub const BLKID_PATH: &str = "etc/blkid/blkid.tab";

/// Access to the files of a file system found on a device.
pub trait RootReader {
    /// Contents of the files among `paths` (relative to the file system
    /// root) that exist on `device`.
    fn read_files(&self, device: &Device, paths: &[&str]) -> Result<BTreeMap<String, String>>;
}

fn read_existing(base: &Path, paths: &[&str]) -> Result<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();
    for path in paths {
        match std::fs::read_to_string(base.join(path)) {
            Ok(content) => {
                files.insert(path.to_string(), content);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(files)
}

/// Reads file systems unpacked under `<base>/<device name>/`.
#[derive(Debug, Clone)]
pub struct DirectoryReader {
    base: PathBuf,
}

impl DirectoryReader {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl RootReader for DirectoryReader {
    fn read_files(&self, device: &Device, paths: &[&str]) -> Result<BTreeMap<String, String>> {
        read_existing(&self.base.join(&device.name), paths)
    }
}

/// Mounts each device read-only through the block backend.
#[derive(Debug, Clone)]
pub struct MountingReader {
    backend: Arc<dyn BlockBackend>,
    mount_point: PathBuf,
}

impl MountingReader {
    pub fn new(backend: Arc<dyn BlockBackend>, mount_point: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            mount_point: mount_point.into(),
        }
    }
}

impl RootReader for MountingReader {
    fn read_files(&self, device: &Device, paths: &[&str]) -> Result<BTreeMap<String, String>> {
        self.backend.setup(device)?;
        self.backend.mount(device, &self.mount_point, "ro")?;
        let files = read_existing(&self.mount_point, paths);
        let unmounted = self.backend.unmount(&self.mount_point);
        self.backend.teardown(device)?;
        unmounted?;
        files
    }
}

/// An installation found on the disks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredRoot {
    pub root: Root,
    /// fstab lines that name nothing in the graph
    pub preserved_lines: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct Discoverer<'a> {
    reader: &'a dyn RootReader,
    blkid: Option<&'a BlkidCache>,
}

impl<'a> Discoverer<'a> {
    pub fn new(reader: &'a dyn RootReader) -> Self {
        Self { reader, blkid: None }
    }

    pub fn with_blkid(mut self, blkid: &'a BlkidCache) -> Self {
        self.blkid = Some(blkid);
        self
    }

    /// File systems that may hold an installation.
    fn candidates(storage: &Storage) -> Vec<&Device> {
        storage
            .tree
            .leaves()
            .into_iter()
            .filter(|d| d.exists && d.controllable && d.format.exists)
            .filter(|d| d.format.is_mountable() && d.format.is_linux_native())
            .collect()
    }

    /// Look for installations and record them in `storage.roots`.
    pub fn find_existing_installations(
        &self,
        storage: &mut Storage,
        monitor: &dyn TaskMonitor,
    ) -> storage_devicetree::Result<Vec<DiscoveredRoot>> {
        let mut found = Vec::new();
        let candidates: Vec<Device> = Self::candidates(storage).into_iter().cloned().collect();
        tracing::info!(candidates = candidates.len(), "looking for existing installations");

        for device in candidates {
            monitor.check_cancel()?;
            monitor.report_progress(&format!("Looking for installations on {}", device.name));
            match self.examine(storage, &device) {
                Ok(Some(root)) => {
                    tracing::info!(device = %device.name, root = %root.root.describe(), "found installation");
                    found.push(root);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(device = %device.name, error = %err, "cannot examine file system");
                }
            }
        }

        let mut names = BTreeSet::new();
        for discovered in &mut found {
            let base = discovered.root.name.clone();
            let mut suffix = 2;
            while !names.insert(discovered.root.name.clone()) {
                discovered.root.name = format!("{base} ({suffix})");
                suffix += 1;
            }
        }
        storage.roots = found.iter().map(|d| d.root.clone()).collect();
        Ok(found)
    }

    fn examine(&self, storage: &Storage, device: &Device) -> Result<Option<DiscoveredRoot>> {
        let mut paths = vec![FSTAB_PATH, CRYPTTAB_PATH, BLKID_PATH];
        paths.extend_from_slice(RELEASE_FILES);
        let files = self.reader.read_files(device, &paths)?;
        let Some(fstab) = files.get(FSTAB_PATH) else {
            return Ok(None);
        };
        let fstab = parse_fstab(fstab);
        if fstab.entries.is_empty() {
            tracing::debug!(device = %device.name, "empty fstab");
            return Ok(None);
        }
        let blkid = files.get(BLKID_PATH).map(|b| BlkidCache::parse(b)).unwrap_or_default();
        let crypttab = files.get(CRYPTTAB_PATH).map(|c| parse_crypttab(c)).unwrap_or_default();
        let release = RELEASE_FILES
            .iter()
            .filter_map(|file| files.get(*file).map(|content| Release::parse(file, content)))
            .find(|release| !release.is_empty())
            .unwrap_or_default();

        let name = match (&release.product, &release.version) {
            (Some(product), Some(version)) => format!("{product} {version}"),
            (Some(product), None) => product.clone(),
            _ => "Unknown Linux".to_string(),
        };
        let mut discovered = DiscoveredRoot {
            root: Root {
                name,
                product: release.product,
                version: release.version,
                ..Default::default()
            },
            preserved_lines: fstab.invalid.clone(),
            warnings: Vec::new(),
        };

        for entry in &fstab.entries {
            let Some(id) = self.resolve_entry(storage, entry, &crypttab, &blkid) else {
                discovered.warnings.push(format!(
                    "{} in the fstab of {} was not found",
                    entry.spec, device.name
                ));
                discovered.preserved_lines.push(entry.to_string());
                continue;
            };
            if entry.is_swap() {
                discovered.root.swaps.push(id);
            } else if entry.file.starts_with('/') {
                discovered.root.mounts.insert(entry.file.clone(), id);
                discovered.root.mountopts.insert(entry.file.clone(), entry.options.clone());
            }
        }

        match discovered.root.mounts.get("/") {
            Some(root) if *root != device.id => {
                tracing::debug!(device = %device.name, "fstab belongs to another root file system");
                return Ok(None);
            }
            Some(_) => {}
            None => {
                discovered.root.mounts.insert("/".to_string(), device.id);
            }
        }

        let mut devices = BTreeSet::new();
        for id in discovered.root.mounts.values().chain(&discovered.root.swaps) {
            devices.insert(*id);
            devices.extend(storage.tree.ancestors(*id));
        }
        discovered.root.devices = devices.into_iter().collect();
        Ok(Some(discovered))
    }

    /// Resolve through the graph, then the installation's blkid cache, then
    /// the one given to the discoverer.
    fn lookup<'s>(&self, storage: &'s Storage, spec: &str, blkid: &BlkidCache) -> Option<&'s Device> {
        let tree = &storage.tree;
        if let Some(device) = tree.resolve_device(spec) {
            return Some(device);
        }
        blkid
            .resolve(spec)
            .or_else(|| self.blkid.and_then(|cache| cache.resolve(spec)))
            .and_then(|devname| tree.get_device_by_path(devname, true))
    }

    fn resolve_spec(
        &self,
        storage: &Storage,
        spec: &str,
        crypttab: &[CrypttabEntry],
        blkid: &BlkidCache,
    ) -> Option<DeviceId> {
        if let Some(device) = self.lookup(storage, spec, blkid) {
            return Some(device.id);
        }
        // a mapping that is not open: find it through the device it encrypts
        let name = spec.strip_prefix("/dev/mapper/")?;
        let entry = crypttab.iter().find(|e| e.name == name)?;
        let backing = self.lookup(storage, &entry.device, blkid)?;
        let tree = &storage.tree;
        tree.children(backing.id)
            .into_iter()
            .find(|c| tree.get(*c).is_some_and(Device::is_luks))
    }

    fn resolve_entry(
        &self,
        storage: &Storage,
        entry: &FstabEntry,
        crypttab: &[CrypttabEntry],
        blkid: &BlkidCache,
    ) -> Option<DeviceId> {
        let id = self.resolve_spec(storage, &entry.spec, crypttab, blkid)?;
        if entry.vfstype != FormatType::Btrfs.to_string() {
            return Some(id);
        }
        let Some(subvol) = entry.option_value("subvol") else {
            return Some(id);
        };
        let subvol = subvol.trim_start_matches('/');
        let tree = &storage.tree;
        let device = tree.get(id)?;
        let volume = if device.is_btrfs_subvolume() {
            device.parents.first().copied()?
        } else {
            id
        };
        let found = tree
            .subvolumes()
            .into_iter()
            .find(|s| s.name == subvol && tree.depends_on(s.id, volume))
            .map(|s| s.id);
        if found.is_none() {
            tracing::warn!(spec = %entry.spec, subvol, "btrfs subvolume not found");
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use storage_contracts::NullMonitor;
    use storage_devicetree::{DeviceTree, StorageSettings};
    use storage_types::{
        DeviceKind, DiskData, DiskLabelType, Format, GIB, MIB, PartitionData, Platform, PlatformKind,
    };

    use super::*;

    fn partition(storage: &mut Storage, disk: DeviceId, number: u32, format: Format) -> DeviceId {
        let device = Device::new(
            format!("sda{number}"),
            4 * GIB,
            DeviceKind::Partition(PartitionData {
                number: Some(number),
                start: MIB + u64::from(number - 1) * 4 * GIB,
                ..Default::default()
            }),
        )
        .with_parents(vec![disk])
        .with_format(format)
        .into_existing();
        storage.tree.add_device(device).unwrap()
    }

    fn with_uuid(kind: FormatType, uuid: &str) -> Format {
        let mut format = Format::new(kind);
        format.uuid = Some(uuid.to_string());
        format
    }

    /// sda1 ext4 root, sda2 swap, sda3 LUKS holding an xfs home.
    fn installed() -> Storage {
        let mut storage = Storage::new(
            DeviceTree::new(),
            StorageSettings::new(Platform::new(PlatformKind::X86)),
        );
        let disk = storage
            .tree
            .add_device(
                Device::new("sda", 20 * GIB, DeviceKind::Disk(DiskData::default()))
                    .with_format(Format::new(FormatType::DiskLabel).with_disklabel(DiskLabelType::Msdos))
                    .into_existing(),
            )
            .unwrap();
        partition(&mut storage, disk, 1, with_uuid(FormatType::Ext4, "1111"));
        partition(&mut storage, disk, 2, with_uuid(FormatType::Swap, "2222"));
        let sda3 = partition(&mut storage, disk, 3, with_uuid(FormatType::Luks, "3333"));
        storage
            .tree
            .add_device(
                Device::new("luks-3333", 4 * GIB, DeviceKind::Luks)
                    .with_parents(vec![sda3])
                    .with_format(with_uuid(FormatType::Xfs, "4444"))
                    .into_existing(),
            )
            .unwrap();
        storage
    }

    fn write(base: &Path, device: &str, path: &str, content: &str) {
        let file = base.join(device).join(path);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, content).unwrap();
    }

    #[test]
    fn finds_an_installation_from_its_fstab() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "sda1",
            FSTAB_PATH,
            "UUID=1111 / ext4 defaults 1 1\n\
             UUID=2222 none swap defaults 0 0\n\
             /dev/mapper/home-crypt /home xfs defaults 0 2\n\
             tmpfs /tmp tmpfs defaults 0 0\n\
             not-a-line\n",
        );
        write(dir.path(), "sda1", CRYPTTAB_PATH, "home-crypt UUID=3333 none\n");
        write(dir.path(), "sda1", "etc/os-release", "NAME=Fedora\nVERSION_ID=40\n");

        let mut storage = installed();
        let reader = DirectoryReader::new(dir.path());
        let found = Discoverer::new(&reader)
            .find_existing_installations(&mut storage, &NullMonitor)
            .unwrap();

        assert_eq!(found.len(), 1);
        let root = &found[0].root;
        assert_eq!(root.name, "Fedora 40");
        let name_of = |id: &DeviceId| storage.tree.get(*id).unwrap().name.clone();
        assert_eq!(name_of(&root.mounts["/"]), "sda1");
        assert_eq!(name_of(&root.mounts["/home"]), "luks-3333");
        assert_eq!(root.swaps.iter().map(name_of).collect::<Vec<_>>(), ["sda2"]);
        assert_eq!(root.mountopts["/"], "defaults");
        // the disk and the encrypted partition come along
        assert_eq!(root.devices.len(), 5);

        assert_eq!(found[0].preserved_lines.len(), 2);
        assert!(found[0].preserved_lines.iter().any(|l| l.starts_with("tmpfs")));
        assert_eq!(found[0].warnings.len(), 1);
        assert_eq!(storage.roots.len(), 1);
    }

    #[test]
    fn file_systems_without_fstab_or_for_another_root_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        // an old /etc copied onto the home file system
        write(dir.path(), "luks-3333", FSTAB_PATH, "UUID=1111 / ext4 defaults 1 1\n");

        let mut storage = installed();
        let reader = DirectoryReader::new(dir.path());
        let found = Discoverer::new(&reader)
            .find_existing_installations(&mut storage, &NullMonitor)
            .unwrap();
        assert!(found.is_empty());
        assert!(storage.roots.is_empty());
    }

    #[test]
    fn blkid_cache_resolves_what_the_graph_cannot() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "sda1",
            FSTAB_PATH,
            "LABEL=old-root / ext4 defaults 1 1\nUUID=9999 none swap sw 0 0\n",
        );
        let cache = BlkidCache::parse(
            "<device UUID=\"9999\" TYPE=\"swap\">/dev/sda2</device>\n\
             <device LABEL=\"old-root\" TYPE=\"ext4\">/dev/sda1</device>\n",
        );

        let mut storage = installed();
        let reader = DirectoryReader::new(dir.path());
        let found = Discoverer::new(&reader)
            .with_blkid(&cache)
            .find_existing_installations(&mut storage, &NullMonitor)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].root.name, "Unknown Linux");
        assert_eq!(found[0].root.swaps.len(), 1);
        assert!(found[0].preserved_lines.is_empty());
    }
}
