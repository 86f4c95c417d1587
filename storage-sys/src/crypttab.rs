// SPDX-License-Identifier: GPL-3.0-only

//! `/etc/crypttab` entries

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrypttabEntry {
    /// Name of the mapping under `/dev/mapper`
    pub name: String,
    /// `UUID=…` of the LUKS device, or its path
    pub device: String,
    /// Key file, `none` to ask for a passphrase
    pub keyfile: String,
    pub options: String,
}

impl CrypttabEntry {
    /// UUID of the encrypted device when it is referenced by UUID.
    pub fn uuid(&self) -> Option<&str> {
        self.device.strip_prefix("UUID=")
    }
}

impl fmt::Display for CrypttabEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.device, self.keyfile)?;
        if !self.options.is_empty() {
            write!(f, " {}", self.options)?;
        }
        Ok(())
    }
}

/// Parse a crypttab. Rows with only a name and a device are accepted and
/// ask for a passphrase; rows with fewer fields are dropped.
pub fn parse_crypttab(input: &str) -> Vec<CrypttabEntry> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 2 {
                tracing::warn!(line, "ignoring invalid crypttab line");
                return None;
            }
            Some(CrypttabEntry {
                name: fields[0].to_string(),
                device: fields[1].to_string(),
                keyfile: fields.get(2).copied().unwrap_or("none").to_string(),
                options: fields.get(3..).map(|rest| rest.join(" ")).unwrap_or_default(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_rows_default_to_a_passphrase() {
        let entries = parse_crypttab(
            "# comment\nluks-1 UUID=1\nluks-2 UUID=2 /etc/key discard\nbroken\n",
        );
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].keyfile, "none");
        assert_eq!(entries[0].uuid(), Some("1"));
        assert_eq!(entries[1].options, "discard");
        assert_eq!(entries[0].to_string(), "luks-1 UUID=1 none");
        assert_eq!(entries[1].to_string(), "luks-2 UUID=2 /etc/key discard");
    }
}
