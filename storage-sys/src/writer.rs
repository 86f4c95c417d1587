// SPDX-License-Identifier: GPL-3.0-only

//! Configuration of the installed system: `/etc/fstab`, `/etc/crypttab`,
//! `/etc/mdadm.conf`, the mtab link and the multipath files.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use storage_devicetree::Storage;
use storage_types::{Device, DeviceId};

use crate::Result;
use crate::crypttab::CrypttabEntry;
use crate::fstab::FstabEntry;
use crate::mdadm::mdadm_conf;

/// Multipath configuration copied from the running system.
pub const MULTIPATH_FILES: &[&str] = &[
    "etc/multipath.conf",
    "etc/multipath/wwids",
    "etc/multipath/bindings",
];

const DEVICE_TIMEOUT_OPTION: &str = "x-systemd.device-timeout=0";
const INITRD_MOUNT_OPTION: &str = "x-initrd.mount";
const MTAB_TARGET: &str = "/proc/self/mounts";

pub struct Writer {
    timestamp: DateTime<Local>,
    source_root: PathBuf,
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer {
    pub fn new() -> Self {
        Self {
            timestamp: Local::now(),
            source_root: PathBuf::from("/"),
        }
    }

    /// Stamp the fstab header with a fixed time.
    pub fn at(mut self, timestamp: DateTime<Local>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Root of the system the multipath files are copied from.
    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_root = root.into();
        self
    }

    /// fstab lines for the mount points, then the swaps.
    pub fn fstab_entries(&self, storage: &Storage) -> Vec<FstabEntry> {
        let tree = &storage.tree;
        let network_root = storage
            .mountpoints()
            .get("/")
            .is_some_and(|root| is_network_backed(storage, *root));

        let mut entries = Vec::new();
        for (mountpoint, id) in storage.mountpoints() {
            let Some(device) = tree.get(id) else {
                continue;
            };
            if device.is_optical() {
                continue;
            }
            let format = &device.format;
            let mut options: Vec<String> = format.mount_options().split(',').map(str::to_string).collect();
            if device.is_btrfs_subvolume() && !options.iter().any(|o| o.starts_with("subvol=")) {
                options.push(format!("subvol={}", device.name));
            }
            if is_encrypted(storage, id) {
                options.push(DEVICE_TIMEOUT_OPTION.to_string());
            }
            if network_root && mountpoint == "/var" {
                options.push(INITRD_MOUNT_OPTION.to_string());
            }
            let passno = match (format.kind.check_on_boot(), mountpoint == "/") {
                (false, _) => 0,
                (true, true) => 1,
                (true, false) => 2,
            };
            entries.push(FstabEntry {
                spec: fstab_spec(storage, device),
                file: mountpoint,
                vfstype: format.kind.vfs_type().to_string(),
                options: options.join(","),
                freq: 0,
                passno,
            });
        }

        for id in storage.fstab_swaps() {
            let Some(device) = tree.get(*id) else {
                continue;
            };
            let mut options = device.format.mount_options();
            if is_encrypted(storage, *id) {
                options.push(',');
                options.push_str(DEVICE_TIMEOUT_OPTION);
            }
            entries.push(FstabEntry {
                spec: fstab_spec(storage, device),
                file: "none".to_string(),
                vfstype: "swap".to_string(),
                options,
                freq: 0,
                passno: 0,
            });
        }
        entries
    }

    pub fn fstab(&self, storage: &Storage) -> String {
        let mut fstab = format!(
            "\n#\n# /etc/fstab\n# Created by storage-planner on {}\n#\n",
            self.timestamp.format("%a %b %e %H:%M:%S %Y")
        );
        for entry in self.fstab_entries(storage) {
            fstab.push_str(&entry.to_string());
            fstab.push('\n');
        }
        for line in &storage.preserved_fstab_lines {
            fstab.push_str(line);
            fstab.push('\n');
        }
        fstab
    }

    /// Mappings the installed system needs to open at boot.
    pub fn crypttab_entries(&self, storage: &Storage) -> Vec<CrypttabEntry> {
        let tree = &storage.tree;
        let users = in_use(storage);
        tree.devices()
            .into_iter()
            .filter(|d| d.is_luks())
            .filter(|d| users.iter().any(|user| *user == d.id || tree.depends_on(*user, d.id)))
            .filter_map(|mapping| {
                let backing = tree.get(*mapping.parents.first()?)?;
                let format = &backing.format;
                let device = match &format.uuid {
                    Some(uuid) => format!("UUID={uuid}"),
                    None => backing.path(),
                };
                Some(CrypttabEntry {
                    name: mapping.name.clone(),
                    device,
                    keyfile: format
                        .luks
                        .as_ref()
                        .and_then(|luks| luks.key_file.clone())
                        .unwrap_or_else(|| "none".to_string()),
                    options: format.options.clone().unwrap_or_default(),
                })
            })
            .collect()
    }

    pub fn crypttab(&self, storage: &Storage) -> String {
        self.crypttab_entries(storage)
            .into_iter()
            .map(|entry| format!("{entry}\n"))
            .collect()
    }

    /// Write the configuration into `<target>/etc`. Returns the files written.
    pub fn write(&self, storage: &Storage, target: &Path) -> Result<Vec<PathBuf>> {
        let etc = target.join("etc");
        fs::create_dir_all(&etc)?;
        let mut written = Vec::new();

        let fstab = etc.join("fstab");
        fs::write(&fstab, self.fstab(storage))?;
        written.push(fstab);

        let crypttab = etc.join("crypttab");
        fs::write(&crypttab, self.crypttab(storage))?;
        fs::set_permissions(&crypttab, fs::Permissions::from_mode(0o600))?;
        written.push(crypttab);

        if let Some(conf) = mdadm_conf(storage) {
            let path = etc.join("mdadm.conf");
            fs::write(&path, conf)?;
            written.push(path);
        }

        if let Some(mtab) = self.make_mtab(target)? {
            written.push(mtab);
        }

        if storage.tree.disks().iter().any(|disk| disk.is_multipath()) {
            for file in MULTIPATH_FILES {
                let source = self.source_root.join(file);
                if !source.exists() {
                    tracing::debug!(path = %source.display(), "no multipath file to copy");
                    continue;
                }
                let destination = target.join(file);
                if let Some(parent) = destination.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(&source, &destination)?;
                written.push(destination);
            }
        }

        tracing::info!(target = %target.display(), files = written.len(), "wrote system configuration");
        Ok(written)
    }

    /// Point `etc/mtab` of the target at the kernel's mount table, unless
    /// something is already there.
    pub fn make_mtab(&self, target: &Path) -> Result<Option<PathBuf>> {
        let mtab = target.join("etc/mtab");
        if fs::symlink_metadata(&mtab).is_ok() {
            tracing::debug!(path = %mtab.display(), "keeping existing mtab");
            return Ok(None);
        }
        std::os::unix::fs::symlink(MTAB_TARGET, &mtab)?;
        Ok(Some(mtab))
    }
}

/// `UUID=` when the format has one, else the device path.
fn fstab_spec(storage: &Storage, device: &Device) -> String {
    if device.format.kind.is_nodev() {
        return device.format.kind.vfs_type().to_string();
    }
    // subvolumes are mounted through their volume
    let source = if device.is_btrfs_subvolume() {
        device
            .parents
            .first()
            .and_then(|parent| storage.tree.get(*parent))
            .unwrap_or(device)
    } else {
        device
    };
    match source.format.uuid.as_ref().or(device.format.uuid.as_ref()) {
        Some(uuid) => format!("UUID={uuid}"),
        None => source.path(),
    }
}

fn is_encrypted(storage: &Storage, id: DeviceId) -> bool {
    let tree = &storage.tree;
    std::iter::once(id)
        .chain(tree.ancestors(id))
        .any(|d| tree.get(d).is_some_and(Device::is_luks))
}

fn is_network_backed(storage: &Storage, id: DeviceId) -> bool {
    let tree = &storage.tree;
    tree.ancestors(id)
        .into_iter()
        .filter_map(|d| tree.get(d))
        .any(|d| d.disk_data().is_some_and(|disk| disk.network))
}

/// Devices the installed system mounts or swaps on.
fn in_use(storage: &Storage) -> Vec<DeviceId> {
    let mut users: Vec<DeviceId> = storage.mountpoints().into_values().collect();
    users.extend(storage.fstab_swaps().iter().copied());
    users.extend(storage.tree.swaps().into_iter().map(|d| d.id));
    users
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use storage_devicetree::{DeviceTree, StorageSettings};
    use storage_types::{
        DeviceKind, DiskData, DiskLabelType, Format, FormatType, GIB, MIB, PartitionData, Platform,
        PlatformKind,
    };

    use super::*;
    use crate::fstab::parse_fstab;

    fn storage() -> Storage {
        Storage::new(
            DeviceTree::new(),
            StorageSettings::new(Platform::new(PlatformKind::Efi)),
        )
    }

    fn disk(storage: &mut Storage, data: DiskData) -> DeviceId {
        storage
            .tree
            .add_device(
                Device::new("vda", 20 * GIB, DeviceKind::Disk(data))
                    .with_format(Format::new(FormatType::DiskLabel).with_disklabel(DiskLabelType::Gpt))
                    .into_existing(),
            )
            .unwrap()
    }

    fn partition(storage: &mut Storage, disk: DeviceId, number: u32, format: Format) -> DeviceId {
        storage
            .tree
            .add_device(
                Device::new(
                    format!("vda{number}"),
                    2 * GIB,
                    DeviceKind::Partition(PartitionData {
                        number: Some(number),
                        start: MIB + u64::from(number - 1) * 2 * GIB,
                        ..Default::default()
                    }),
                )
                .with_parents(vec![disk])
                .with_format(format),
            )
            .unwrap()
    }

    fn with_uuid(format: Format, uuid: &str) -> Format {
        let mut format = format;
        format.uuid = Some(uuid.to_string());
        format
    }

    fn writer() -> Writer {
        Writer::new().at(Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn fstab_lists_mounts_then_swaps() {
        let mut storage = storage();
        let vda = disk(&mut storage, DiskData::default());
        partition(
            &mut storage,
            vda,
            1,
            with_uuid(Format::new(FormatType::Efi).with_mountpoint("/boot/efi"), "AAAA-BBBB"),
        );
        partition(&mut storage, vda, 2, with_uuid(Format::new(FormatType::Xfs).with_mountpoint("/"), "root-uuid"));
        let swap = partition(&mut storage, vda, 3, with_uuid(Format::new(FormatType::Swap), "swap-uuid"));
        storage.set_fstab_swaps(&[swap]);
        storage.preserved_fstab_lines.push("nfs:/srv /srv nfs defaults 0 0".to_string());

        let fstab = writer().fstab(&storage);
        assert!(fstab.contains("# Created by storage-planner on Wed May  1 12:00:00 2024"));
        let parsed = parse_fstab(&fstab);
        let files: Vec<&str> = parsed.entries.iter().map(|e| e.file.as_str()).collect();
        assert_eq!(files, ["/", "/boot/efi", "none", "/srv"]);

        let root = &parsed.entries[0];
        assert_eq!(root.spec, "UUID=root-uuid");
        assert_eq!((root.vfstype.as_str(), root.passno), ("xfs", 0));
        let efi = &parsed.entries[1];
        assert_eq!(efi.vfstype, "vfat");
        assert_eq!(efi.options, "umask=0077,shortname=winnt");
        assert_eq!(efi.passno, 2);
        assert!(parsed.entries[2].is_swap());
        assert!(parsed.invalid.is_empty());
    }

    #[test]
    fn encrypted_and_network_options() {
        let mut storage = storage();
        let vda = disk(
            &mut storage,
            DiskData {
                network: true,
                ..Default::default()
            },
        );
        partition(&mut storage, vda, 1, with_uuid(Format::new(FormatType::Ext4).with_mountpoint("/"), "r"));
        partition(&mut storage, vda, 2, with_uuid(Format::new(FormatType::Ext4).with_mountpoint("/var"), "v"));
        let sda3 = partition(&mut storage, vda, 3, with_uuid(Format::new(FormatType::Luks), "crypt"));
        storage
            .tree
            .add_device(
                Device::new("luks-crypt", 2 * GIB, DeviceKind::Luks)
                    .with_parents(vec![sda3])
                    .with_format(with_uuid(Format::new(FormatType::Ext4).with_mountpoint("/home"), "h")),
            )
            .unwrap();

        let entries = writer().fstab_entries(&storage);
        let options = |file: &str| entries.iter().find(|e| e.file == file).unwrap().options.clone();
        assert_eq!(options("/"), "defaults");
        assert_eq!(options("/var"), "defaults,x-initrd.mount");
        assert_eq!(options("/home"), "defaults,x-systemd.device-timeout=0");
        assert_eq!(entries.iter().find(|e| e.file == "/").unwrap().passno, 1);

        assert_eq!(writer().crypttab(&storage), "luks-crypt UUID=crypt none\n");
    }

    #[test]
    fn unused_mappings_are_left_out_of_crypttab() {
        let mut storage = storage();
        let vda = disk(&mut storage, DiskData::default());
        let vda1 = partition(&mut storage, vda, 1, with_uuid(Format::new(FormatType::Luks), "old"));
        storage
            .tree
            .add_device(
                Device::new("luks-old", 2 * GIB, DeviceKind::Luks)
                    .with_parents(vec![vda1])
                    .with_format(Format::new(FormatType::Ext4)),
            )
            .unwrap();
        assert!(writer().crypttab_entries(&storage).is_empty());
    }

    #[test]
    fn writes_the_target_etc() {
        let dir = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        fs::create_dir_all(source.path().join("etc/multipath")).unwrap();
        fs::write(source.path().join("etc/multipath.conf"), "defaults {}\n").unwrap();
        fs::write(source.path().join("etc/multipath/wwids"), "/3600a/\n").unwrap();

        let mut storage = storage();
        let vda = disk(
            &mut storage,
            DiskData {
                multipath: true,
                ..Default::default()
            },
        );
        partition(&mut storage, vda, 1, with_uuid(Format::new(FormatType::Ext4).with_mountpoint("/"), "r"));

        let written = writer()
            .with_source_root(source.path())
            .write(&storage, dir.path())
            .unwrap();
        assert_eq!(written.len(), 5);
        assert!(dir.path().join("etc/fstab").exists());
        assert_eq!(
            fs::read_link(dir.path().join("etc/mtab")).unwrap(),
            Path::new("/proc/self/mounts")
        );
        // a second run leaves the link alone
        assert_eq!(writer().make_mtab(dir.path()).unwrap(), None);
        assert!(dir.path().join("etc/multipath/wwids").exists());
        assert!(!dir.path().join("etc/mdadm.conf").exists());
        let mode = fs::metadata(dir.path().join("etc/crypttab")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
