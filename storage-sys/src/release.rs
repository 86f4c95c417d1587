// SPDX-License-Identifier: GPL-3.0-only

//! Product name and version of an installed system

/// Release files looked at, in order of preference.
pub const RELEASE_FILES: &[&str] = &["etc/os-release", "usr/lib/os-release", "etc/redhat-release"];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Release {
    pub product: Option<String>,
    pub version: Option<String>,
}

impl Release {
    /// Parse a release file by its path relative to the root.
    pub fn parse(file: &str, content: &str) -> Self {
        if file.ends_with("os-release") {
            parse_os_release(content)
        } else {
            parse_release_line(content)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.product.is_none()
    }
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
        .to_string()
}

/// `NAME=` and `VERSION_ID=` of an os-release file.
pub fn parse_os_release(content: &str) -> Release {
    let mut release = Release::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "NAME" => release.product = Some(unquote(value)),
            "VERSION_ID" => release.version = Some(unquote(value)),
            _ => {}
        }
    }
    release
}

/// `Fedora release 40 (Forty)` style one-liners.
pub fn parse_release_line(content: &str) -> Release {
    let line = content.lines().next().unwrap_or_default().trim();
    match line.split_once(" release ") {
        Some((product, rest)) => Release {
            product: Some(product.trim().to_string()),
            version: rest.split_whitespace().next().map(str::to_string),
        },
        None if line.is_empty() => Release::default(),
        None => Release {
            product: Some(line.to_string()),
            version: None,
        },
    }
}
