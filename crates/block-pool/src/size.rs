// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Human-readable byte sizes for provisioning requests.
//!
//! A [`ByteSize`] is what callers hand to the pool when they ask for
//! capacity. It parses the suffixes accepted on the command line and in
//! configuration files, and knows how many whole blocks it spans.

use crate::{PoolError, BLOCK_SIZE};
use std::fmt;

const KIB: usize = 1024;
const MIB: usize = 1024 * 1024;
const GIB: usize = 1024 * 1024 * 1024;

/// A byte count.
///
/// # Parsing
/// Binary suffixes are single letters, decimal suffixes end in `B`:
/// - `"512K"` → 512 × 1024, `"512KB"` → 512 × 1000
/// - `"64M"` → 64 × 1024², `"64MB"` → 64 × 1000²
/// - `"2G"` → 2 × 1024³, `"2GB"` → 2 × 1000³
/// - `"131072"` → raw byte count
///
/// # Examples
/// ```
/// use block_pool::ByteSize;
///
/// let s = ByteSize::parse("64M").unwrap();
/// assert_eq!(s.as_bytes(), 64 * 1024 * 1024);
/// assert_eq!(s.blocks(), 512);
///
/// assert_eq!(ByteSize::parse("1KB").unwrap().as_bytes(), 1000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ByteSize {
    bytes: usize,
}

impl ByteSize {
    /// Creates a size from a byte count.
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    /// Creates a size from mebibytes.
    pub fn from_mb(mb: usize) -> Self {
        Self { bytes: mb * MIB }
    }

    /// Creates a size from a block count.
    pub fn from_blocks(blocks: usize) -> Self {
        Self {
            bytes: blocks * BLOCK_SIZE,
        }
    }

    /// Returns the size in bytes.
    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// Returns the number of whole blocks needed to hold this many bytes.
    pub fn blocks(&self) -> usize {
        self.bytes.div_ceil(BLOCK_SIZE)
    }

    /// Parses a size string. Case-insensitive; whitespace around the
    /// string is ignored. Zero is rejected.
    pub fn parse(s: &str) -> Result<Self, PoolError> {
        let input = s.trim();
        let invalid = |detail: &str| PoolError::InvalidSize {
            input: s.to_string(),
            detail: detail.to_string(),
        };

        if input.is_empty() {
            return Err(invalid("empty string"));
        }

        let upper = input.to_ascii_uppercase();
        let split = upper
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(upper.len());
        let (digits, suffix) = upper.split_at(split);

        let multiplier = match suffix {
            "" => 1,
            "K" => KIB,
            "KB" => 1000,
            "M" => MIB,
            "MB" => 1000 * 1000,
            "G" => GIB,
            "GB" => 1000 * 1000 * 1000,
            _ => return Err(invalid("expected a number followed by K, KB, M, MB, G or GB")),
        };

        if digits.is_empty() {
            return Err(invalid("missing number"));
        }
        let value: usize = digits.parse().map_err(|_| invalid("number too large"))?;
        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| invalid("size overflows"))?;

        if bytes == 0 {
            return Err(invalid("size must be non-zero"));
        }

        Ok(Self { bytes })
    }
}

impl std::str::FromStr for ByteSize {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bytes >= GIB && self.bytes % GIB == 0 {
            write!(f, "{} GiB", self.bytes / GIB)
        } else if self.bytes >= MIB && self.bytes % MIB == 0 {
            write!(f, "{} MiB", self.bytes / MIB)
        } else if self.bytes >= KIB && self.bytes % KIB == 0 {
            write!(f, "{} KiB", self.bytes / KIB)
        } else {
            write!(f, "{} B", self.bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_suffixes() {
        assert_eq!(ByteSize::parse("128K").unwrap().as_bytes(), 128 * 1024);
        assert_eq!(ByteSize::parse("64M").unwrap().as_bytes(), 64 * MIB);
        assert_eq!(ByteSize::parse("2G").unwrap().as_bytes(), 2 * GIB);
    }

    #[test]
    fn test_decimal_suffixes() {
        assert_eq!(ByteSize::parse("5KB").unwrap().as_bytes(), 5_000);
        assert_eq!(ByteSize::parse("5MB").unwrap().as_bytes(), 5_000_000);
        assert_eq!(ByteSize::parse("1GB").unwrap().as_bytes(), 1_000_000_000);
    }

    #[test]
    fn test_case_and_whitespace() {
        assert_eq!(ByteSize::parse("  64m ").unwrap().as_bytes(), 64 * MIB);
        assert_eq!(ByteSize::parse("5kb").unwrap().as_bytes(), 5_000);
    }

    #[test]
    fn test_raw_bytes() {
        assert_eq!(ByteSize::parse("131072").unwrap().as_bytes(), BLOCK_SIZE);
    }

    #[test]
    fn test_invalid() {
        assert!(ByteSize::parse("").is_err());
        assert!(ByteSize::parse("abc").is_err());
        assert!(ByteSize::parse("M").is_err());
        assert!(ByteSize::parse("0").is_err());
        assert!(ByteSize::parse("0M").is_err());
        assert!(ByteSize::parse("12T").is_err());
        assert!(ByteSize::parse("1.5G").is_err());
        assert!(ByteSize::parse("-4K").is_err());
        assert!(ByteSize::parse("99999999999999999999999G").is_err());
    }

    #[test]
    fn test_blocks_round_up() {
        assert_eq!(ByteSize::from_bytes(1).blocks(), 1);
        assert_eq!(ByteSize::from_bytes(BLOCK_SIZE).blocks(), 1);
        assert_eq!(ByteSize::from_bytes(BLOCK_SIZE + 1).blocks(), 2);
        assert_eq!(ByteSize::from_mb(1).blocks(), 8);
        assert_eq!(ByteSize::from_blocks(3).as_bytes(), 3 * BLOCK_SIZE);
    }

    #[test]
    fn test_display() {
        assert_eq!(ByteSize::from_bytes(2 * GIB).to_string(), "2 GiB");
        assert_eq!(ByteSize::from_mb(512).to_string(), "512 MiB");
        assert_eq!(ByteSize::from_bytes(BLOCK_SIZE).to_string(), "128 KiB");
        assert_eq!(ByteSize::from_bytes(1000).to_string(), "1000 B");
    }

    #[test]
    fn test_from_str() {
        let s: ByteSize = "1M".parse().unwrap();
        assert_eq!(s, ByteSize::from_mb(1));
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&ByteSize::from_bytes(4096)).unwrap();
        assert_eq!(json, "4096");
        let back: ByteSize = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_bytes(), 4096);
    }
}
