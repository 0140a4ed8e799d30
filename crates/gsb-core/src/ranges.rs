//! Chunk number ranges
//!
//! Stored chunk numbers are reported to the server as compressed ranges
//! (`1-3,5,8-9`), and deletion directives arrive in the same notation.

use std::fmt;

use crate::types::ChunkKind;

/// Error type for range parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("Invalid chunk range: {0:?}")]
    Invalid(String),
    #[error("Chunk range {start}-{end} is reversed")]
    Reversed { start: u32, end: u32 },
}

/// Inclusive range of chunk numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkRange {
    pub start: u32,
    pub end: u32,
}

impl ChunkRange {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub const fn single(n: u32) -> Self {
        Self { start: n, end: n }
    }

    #[inline]
    pub fn contains(&self, n: u32) -> bool {
        self.start <= n && n <= self.end
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Ranges held locally for one (list, kind) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRangeSet {
    pub list: String,
    pub kind: ChunkKind,
    pub ranges: Vec<ChunkRange>,
}

impl ListRangeSet {
    pub fn from_numbers(list: impl Into<String>, kind: ChunkKind, numbers: &[u32]) -> Self {
        Self {
            list: list.into(),
            kind,
            ranges: compress(numbers),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Compress chunk numbers into sorted, non-overlapping, maximal ranges.
/// Input order and duplicates do not matter.
pub fn compress(numbers: &[u32]) -> Vec<ChunkRange> {
    let mut sorted = numbers.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges: Vec<ChunkRange> = Vec::new();
    for n in sorted {
        match ranges.last_mut() {
            Some(last) if last.end.checked_add(1) == Some(n) => last.end = n,
            _ => ranges.push(ChunkRange::single(n)),
        }
    }
    ranges
}

/// Render ranges as `1-3,5`.
pub fn format_ranges(ranges: &[ChunkRange]) -> String {
    ranges
        .iter()
        .map(ChunkRange::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse `1-3,5`. Empty input yields no ranges.
pub fn parse_ranges(text: &str) -> Result<Vec<ChunkRange>, RangeError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    text.split(',')
        .map(|part| {
            let part = part.trim();
            let invalid = || RangeError::Invalid(part.to_string());
            match part.split_once('-') {
                Some((a, b)) => {
                    let start: u32 = a.parse().map_err(|_| invalid())?;
                    let end: u32 = b.parse().map_err(|_| invalid())?;
                    if start > end {
                        return Err(RangeError::Reversed { start, end });
                    }
                    Ok(ChunkRange::new(start, end))
                }
                None => part.parse().map(ChunkRange::single).map_err(|_| invalid()),
            }
        })
        .collect()
}
