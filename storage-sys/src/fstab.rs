// SPDX-License-Identifier: GPL-3.0-only

//! `/etc/fstab` entries

use std::fmt;

use serde::{Deserialize, Serialize};

/// One line of an fstab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FstabEntry {
    /// `UUID=…`, `LABEL=…` or a device path
    pub spec: String,
    pub file: String,
    pub vfstype: String,
    pub options: String,
    pub freq: u32,
    pub passno: u32,
}

impl FstabEntry {
    pub fn is_swap(&self) -> bool {
        self.vfstype == "swap"
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.split(',').any(|o| o == option)
    }

    /// Value of a `key=value` mount option.
    pub fn option_value(&self, key: &str) -> Option<&str> {
        self.options
            .split(',')
            .find_map(|o| o.strip_prefix(key).and_then(|rest| rest.strip_prefix('=')))
    }
}

impl fmt::Display for FstabEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<56} {:<24} {:<7} {:<15} {} {}",
            escape_field(&self.spec),
            escape_field(&self.file),
            self.vfstype,
            self.options,
            self.freq,
            self.passno
        )
    }
}

/// Parsed fstab. Lines that could not be understood are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fstab {
    pub entries: Vec<FstabEntry>,
    pub invalid: Vec<String>,
}

pub fn parse_fstab(input: &str) -> Fstab {
    let mut fstab = Fstab::default();
    for line in input.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match parse_line(trimmed) {
            Some(entry) => fstab.entries.push(entry),
            None => {
                tracing::warn!(line = trimmed, "ignoring invalid fstab line");
                fstab.invalid.push(line.to_string());
            }
        }
    }
    fstab
}

fn parse_line(line: &str) -> Option<FstabEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 3 || fields.len() > 6 {
        return None;
    }
    let number = |index: usize| -> Option<u32> {
        match fields.get(index) {
            Some(field) => field.parse().ok(),
            None => Some(0),
        }
    };
    Some(FstabEntry {
        spec: unescape_field(fields[0]),
        file: unescape_field(fields[1]),
        vfstype: fields[2].to_string(),
        options: fields.get(3).copied().unwrap_or("defaults").to_string(),
        freq: number(4)?,
        passno: number(5)?,
    })
}

/// Replace `\NNN` octal escapes.
pub fn unescape_field(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1..index + 4].iter().all(u8::is_ascii_digit)
            && let Ok(num) = u8::from_str_radix(&value[index + 1..index + 4], 8)
        {
            output.push(num as char);
            index += 4;
            continue;
        }
        let ch = value[index..].chars().next().unwrap_or('\u{fffd}');
        output.push(ch);
        index += ch.len_utf8();
    }

    output
}

fn escape_field(value: &str) -> String {
    value
        .replace('\\', "\\134")
        .replace(' ', "\\040")
        .replace('\t', "\\011")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FSTAB: &str = "\
#
# /etc/fstab
#
UUID=1111 /                       xfs     defaults        0 0
UUID=2222 /boot                   ext4    defaults        1 2
LABEL=data /srv/my\\040data ext4 noatime,subvol=data
/dev/mapper/luks-3333 none swap defaults 0 0
broken
server:/export /mnt/nfs nfs defaults 0 zero
";

    #[test]
    fn parses_entries_and_keeps_invalid_lines() {
        let fstab = parse_fstab(FSTAB);
        assert_eq!(fstab.entries.len(), 4);
        assert_eq!(fstab.invalid, vec!["broken", "server:/export /mnt/nfs nfs defaults 0 zero"]);

        let data = &fstab.entries[2];
        assert_eq!(data.file, "/srv/my data");
        assert_eq!(data.freq, 0);
        assert_eq!(data.option_value("subvol"), Some("data"));
        assert!(data.has_option("noatime"));
        assert!(fstab.entries[3].is_swap());
    }

    #[test]
    fn display_escapes_spaces() {
        let entry = FstabEntry {
            spec: "UUID=1".to_string(),
            file: "/srv/my data".to_string(),
            vfstype: "ext4".to_string(),
            options: "defaults".to_string(),
            freq: 0,
            passno: 2,
        };
        let line = entry.to_string();
        assert!(line.contains("/srv/my\\040data"));
        assert_eq!(parse_fstab(&line).entries, vec![entry]);
    }
}
