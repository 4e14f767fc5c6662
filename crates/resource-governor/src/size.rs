// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Human-readable byte sizes for configuration.

use crate::GovernorError;
use std::fmt;

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// A byte count that reads and writes as `"512M"`, `"8G"`, `"6K"` or a raw
/// number.
///
/// # Parsing
/// - `"512M"` or `"512MB"` → 512 × 1024² bytes
/// - `"1G"` or `"1GB"` → 1 × 1024³ bytes
/// - `"2048K"` or `"2048KB"` → 2048 × 1024 bytes
/// - `"1073741824"` → raw byte count
///
/// ```
/// use resource_governor::ByteSize;
///
/// assert_eq!(ByteSize::parse("1G").unwrap().as_mb(), 1024);
/// assert_eq!(ByteSize::from_mb(256).to_string(), "256M");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteSize(u64);

impl ByteSize {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn from_kb(kb: u64) -> Self {
        Self(kb * KB)
    }

    pub const fn from_mb(mb: u64) -> Self {
        Self(mb * MB)
    }

    pub const fn from_gb(gb: u64) -> Self {
        Self(gb * GB)
    }

    pub const fn as_bytes(self) -> u64 {
        self.0
    }

    /// Returns the size in megabytes (truncated).
    pub const fn as_mb(self) -> u64 {
        self.0 / MB
    }

    /// Parses a size string. Case-insensitive; zero is allowed.
    pub fn parse(s: &str) -> Result<Self, GovernorError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(GovernorError::Config("empty size string".to_string()));
        }

        let upper = s.to_uppercase();
        let suffixes = [
            ("GB", GB),
            ("G", GB),
            ("MB", MB),
            ("M", MB),
            ("KB", KB),
            ("K", KB),
            ("B", 1),
        ];
        let (digits, multiplier) = suffixes
            .iter()
            .find(|(suffix, _)| upper.ends_with(suffix))
            .map_or((s, 1), |(suffix, m)| (&s[..s.len() - suffix.len()], *m));

        let value: u64 = digits.trim().parse().map_err(|_| {
            GovernorError::Config(format!(
                "invalid size '{s}': expected a number with an optional K, M or G suffix"
            ))
        })?;
        value
            .checked_mul(multiplier)
            .map(Self)
            .ok_or_else(|| GovernorError::Config(format!("size overflow: '{s}'")))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        if b >= GB && b % GB == 0 {
            write!(f, "{}G", b / GB)
        } else if b >= MB && b % MB == 0 {
            write!(f, "{}M", b / MB)
        } else if b >= KB && b % KB == 0 {
            write!(f, "{}K", b / KB)
        } else {
            write!(f, "{b}")
        }
    }
}

impl std::str::FromStr for ByteSize {
    type Err = GovernorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for ByteSize {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for ByteSize {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(serde::Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bytes(u64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Bytes(b) => Ok(Self(b)),
            Repr::Text(s) => Self::parse(&s).map_err(serde::de::Error::custom),
        }
    }
}
