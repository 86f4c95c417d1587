// SPDX-License-Identifier: GPL-3.0-only

//! Common utility types shared across models

use anyhow::Result;
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Deserializer, Serialize};

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

/// Partition alignment boundary (1 MiB) - standard for modern disks
pub const GPT_ALIGNMENT_BYTES: u64 = MIB;

/// A byte range representing a contiguous region (free regions, GPT usable space, etc.)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ByteRange {
    /// Start byte (inclusive)
    pub start: u64,

    /// End byte (exclusive)
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Get the size of this range in bytes
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn contains(&self, other: &ByteRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

pub fn mib(value: u64) -> u64 {
    value * MIB
}

pub fn gib(value: u64) -> u64 {
    value * GIB
}

/// Round `size` down to a multiple of `alignment`.
pub fn align_down(size: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return size;
    }
    size - size % alignment
}

/// Round `size` up to a multiple of `alignment`.
pub fn align_up(size: u64, alignment: u64) -> u64 {
    if alignment == 0 || size % alignment == 0 {
        return size;
    }
    size.saturating_add(alignment - size % alignment)
}

/// Convert bytes to human-readable format (e.g., "1.50 GiB")
pub fn bytes_to_pretty(bytes: &u64, add_bytes: bool) -> String {
    let mut steps = 0;
    let mut val: f64 = *bytes as f64;

    while val >= 1024. && steps < 8 {
        val /= 1024.;
        steps += 1;
    }

    let unit = match steps {
        0 => "B",
        1 => "KiB",
        2 => "MiB",
        3 => "GiB",
        4 => "TiB",
        5 => "PiB",
        6 => "EiB",
        7 => "ZiB",
        _ => "YiB",
    };

    if add_bytes {
        let bytes_str = bytes.to_formatted_string(&Locale::en);
        format!("{:.2} {} ({} bytes)", val, unit, bytes_str)
    } else {
        format!("{:.2} {}", val, unit)
    }
}

fn unit_multiplier(unit: &str) -> Option<u64> {
    let multiplier = match unit.to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => KIB,
        "m" | "mb" | "mib" => MIB,
        "g" | "gb" | "gib" => GIB,
        "t" | "tb" | "tib" => TIB,
        "p" | "pb" | "pib" => 1024 * TIB,
        _ => return None,
    };
    Some(multiplier)
}

/// Parse human-readable format to bytes (e.g., "1.5 GiB", "500MiB", "4096")
///
/// Decimal and binary unit spellings are both treated as binary units.
pub fn pretty_to_bytes(pretty: &str) -> Result<u64> {
    let trimmed = pretty.trim();
    if trimmed.is_empty() {
        return Err(anyhow::anyhow!("Invalid input"));
    }

    let split_at = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split_at);

    let val: f64 = number.parse()?;
    let multiplier = unit_multiplier(unit.trim())
        .ok_or_else(|| anyhow::anyhow!("Invalid unit: {}", unit.trim()))?;

    let bytes = val * multiplier as f64;
    if !bytes.is_finite() || bytes > u64::MAX as f64 {
        return Err(anyhow::anyhow!("Use a valid integer"));
    }

    Ok(bytes as u64)
}

/// Serde helper accepting either a byte count or a human-readable size string.
pub mod human_size {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bytes(u64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Bytes(value) => Ok(value),
            Raw::Text(text) => pretty_to_bytes(&text).map_err(serde::de::Error::custom),
        }
    }

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(*value)
    }
}

/// Same as [`human_size`] for optional values.
pub mod human_size_opt {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bytes(u64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Bytes(value)) => Ok(Some(value)),
            Some(Raw::Text(text)) => pretty_to_bytes(&text)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }

    pub fn serialize<S>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match value {
            Some(value) => serializer.serialize_some(value),
            None => serializer.serialize_none(),
        }
    }
}
