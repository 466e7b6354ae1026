//! Slot numbering
//!
//! Defines the slot space and slot range parsing/formatting used by the
//! `CLUSTER NODES` format and the configuration signature.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ParseError;

/// Total number of slots (consistent with Redis Cluster)
pub const TOTAL_SLOTS: u16 = 16384;

/// Slot number, `0..TOTAL_SLOTS`
pub type Slot = u16;

/// Inclusive slot range, as written in `CLUSTER NODES` (`0-5460`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRange {
    /// Start slot (inclusive)
    pub start: Slot,
    /// End slot (inclusive)
    pub end: Slot,
}

impl SlotRange {
    pub fn new(start: Slot, end: Slot) -> Self {
        Self { start, end }
    }

    /// Parse `N` or `A-B`
    pub fn parse(token: &str) -> Result<Self, ParseError> {
        match token.split_once('-') {
            Some((a, b)) => {
                let start = parse_slot(a)?;
                let end = parse_slot(b)?;
                if start > end {
                    return Err(ParseError::InvalidSlot(token.to_string()));
                }
                Ok(Self::new(start, end))
            }
            None => {
                let slot = parse_slot(token)?;
                Ok(Self::new(slot, slot))
            }
        }
    }

    pub fn contains(&self, slot: Slot) -> bool {
        slot >= self.start && slot <= self.end
    }

    /// Get slot count for this range
    pub fn slot_count(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    pub fn iter(&self) -> impl Iterator<Item = Slot> {
        self.start..=self.end
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Parse a single slot number, rejecting anything outside the slot space
pub fn parse_slot(s: &str) -> Result<Slot, ParseError> {
    s.parse::<Slot>()
        .ok()
        .filter(|slot| *slot < TOTAL_SLOTS)
        .ok_or_else(|| ParseError::InvalidSlot(s.to_string()))
}

/// Collapse ascending slots into ranges
pub fn compact_ranges<'a>(slots: impl IntoIterator<Item = &'a Slot>) -> Vec<SlotRange> {
    let mut ranges: Vec<SlotRange> = Vec::new();
    for &slot in slots {
        match ranges.last_mut() {
            Some(last) if last.end.checked_add(1) == Some(slot) => last.end = slot,
            Some(last) if last.end == slot => {}
            _ => ranges.push(SlotRange::new(slot, slot)),
        }
    }
    ranges
}

/// `0-5460,5462` style rendering of ascending slots
pub fn format_ranges<'a>(slots: impl IntoIterator<Item = &'a Slot>) -> String {
    compact_ranges(slots)
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Comma separated list of individual slots
pub fn format_slot_list(slots: &[Slot]) -> String {
    slots
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
