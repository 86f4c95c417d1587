// SPDX-License-Identifier: GPL-3.0-only

//! LUKS helpers shared by the planners

use storage_contracts::StorageError;
use storage_devicetree::{Result, Storage};
use storage_types::{
    Device, DeviceId, Format, FormatType, LuksParams, LuksVersion, PartitioningRequest, PbkdfArgs,
};

/// Shortest passphrase accepted in FIPS mode.
pub const FIPS_MIN_PASSPHRASE_LENGTH: usize = 8;

/// Key derivation arguments, only for LUKS2 and only when something is set.
pub fn get_pbkdf_args(
    version: LuksVersion,
    pbkdf_type: Option<&str>,
    max_memory_kb: u32,
    iterations: u32,
    time_ms: u32,
) -> Option<PbkdfArgs> {
    if version != LuksVersion::Luks2 {
        return None;
    }
    let pbkdf_type = pbkdf_type.filter(|t| !t.is_empty());
    if pbkdf_type.is_none() && max_memory_kb == 0 && iterations == 0 && time_ms == 0 {
        return None;
    }
    Some(PbkdfArgs {
        pbkdf_type: pbkdf_type.map(str::to_string),
        max_memory_kb,
        iterations,
        time_ms,
    })
}

pub fn check_passphrase(fips: bool, passphrase: &str) -> Result<()> {
    if passphrase.is_empty() {
        return Err(StorageError::invalid_input("The passphrase must not be empty"));
    }
    if fips && passphrase.chars().count() < FIPS_MIN_PASSPHRASE_LENGTH {
        return Err(StorageError::invalid_input(format!(
            "Passphrase given must be {FIPS_MIN_PASSPHRASE_LENGTH} characters long"
        )));
    }
    Ok(())
}

/// LUKS parameters of an automatic partitioning request, `None` when the
/// request is not encrypted.
pub fn luks_format_args(storage: &mut Storage, request: &PartitioningRequest) -> Result<Option<LuksParams>> {
    if !request.encrypted {
        return Ok(None);
    }
    check_passphrase(storage.settings.fips, &request.passphrase)?;
    let version = request.luks_version.unwrap_or(storage.settings.default_luks_version);
    let escrow_cert = match request.escrow_certificate.as_str() {
        "" => None,
        url => Some(storage.get_escrow_certificate(url)?),
    };
    Ok(Some(LuksParams {
        version,
        passphrase: Some(request.passphrase.clone()),
        cipher: Some(request.cipher.clone()).filter(|c| !c.is_empty()),
        key_size: None,
        pbkdf_args: get_pbkdf_args(
            version,
            Some(request.pbkdf.as_str()),
            request.pbkdf_memory,
            request.pbkdf_iterations,
            request.pbkdf_time,
        ),
        key_file: None,
        map_name: None,
        escrow_cert,
        add_backup_passphrase: request.backup_passphrase_enabled,
        opal_admin_passphrase: Some(request.opal_admin_passphrase.clone()).filter(|p| !p.is_empty()),
    }))
}

/// Create `device` with a LUKS format and a mapping carrying `inner`.
///
/// Returns the ids of the backing device and of the mapping.
pub fn create_encrypted(
    storage: &mut Storage,
    mut device: Device,
    params: LuksParams,
    inner: Format,
) -> Result<(DeviceId, DeviceId)> {
    device.format = Format::new(FormatType::Luks).with_luks(params);
    let backing = storage.create_device(device)?;
    let mapping = storage.new_luks(backing, inner)?;
    let mapping = storage.create_device(mapping)?;
    Ok((backing, mapping))
}

/// The LUKS mapping on top of `id`, if any.
pub fn luks_child(storage: &Storage, id: DeviceId) -> Option<DeviceId> {
    storage
        .tree
        .children(id)
        .into_iter()
        .find(|child| storage.tree.get(*child).is_some_and(Device::is_luks))
}

#[cfg(test)]
mod tests {
    use storage_types::{GIB, PlatformKind};

    use super::*;
    use crate::test_support::{disk, storage};

    #[test]
    fn pbkdf_args_only_for_luks2() {
        assert_eq!(get_pbkdf_args(LuksVersion::Luks1, Some("argon2i"), 64, 0, 0), None);
        assert_eq!(get_pbkdf_args(LuksVersion::Luks2, Some(""), 0, 0, 0), None);
        let args = get_pbkdf_args(LuksVersion::Luks2, None, 0, 0, 2000).unwrap();
        assert_eq!(args.time_ms, 2000);
        assert_eq!(args.pbkdf_type, None);
    }

    #[test]
    fn fips_requires_long_passphrases() {
        assert!(check_passphrase(false, "weak").is_ok());
        assert_eq!(
            check_passphrase(true, "weak").unwrap_err().kind,
            storage_contracts::StorageErrorKind::InvalidInput
        );
        assert!(check_passphrase(true, "longenough").is_ok());
        assert!(check_passphrase(false, "").is_err());
    }

    #[test]
    fn escrow_certificates_are_looked_up() {
        let mut storage = storage(PlatformKind::X86);
        disk(&mut storage, "sda", 10 * GIB, None);
        storage.add_escrow_certificate("file:///cert.pem", "CERT");
        let request = PartitioningRequest {
            encrypted: true,
            passphrase: "passphrase".to_string(),
            escrow_certificate: "file:///cert.pem".to_string(),
            ..Default::default()
        };
        let params = luks_format_args(&mut storage, &request).unwrap().unwrap();
        assert_eq!(params.escrow_cert.as_deref(), Some("CERT"));
        assert_eq!(params.version, LuksVersion::Luks2);
        assert_eq!(params.pbkdf_args, None);

        let missing = PartitioningRequest {
            escrow_certificate: "https://example.com/cert".to_string(),
            ..request
        };
        assert!(luks_format_args(&mut storage, &missing).is_err());
    }
}
