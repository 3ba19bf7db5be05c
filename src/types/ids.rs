//! Dense integer identifiers used across the engine.
//!
//! Realizations, groups and sites are represented by dense indices assigned
//! at load time, so accumulators can be backed by indexed arrays instead of
//! open-ended maps. The widths encode the global bounds: at most 2^16 sites,
//! 2^16 realizations/groups and 2^32 distinct events.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a site in the site collection.
///
/// Stored as `u32` in persisted rows; the engine enforces the 65,536-site
/// ceiling before any computation starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiteId(pub u32);

impl SiteId {
    /// Index into site-ordered arrays.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Global event identifier, unique across the whole run.
///
/// Event ids are assigned densely by the reducer: the full used index space
/// `0..num_events` has no gaps once the run completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a logic-tree realization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RealizationId(pub u16);

impl RealizationId {
    /// Index into realization-ordered arrays.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RealizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a logic-tree source group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u16);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grp-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_id_ordering() {
        assert!(SiteId(1) < SiteId(2));
        assert_eq!(SiteId(7).index(), 7);
    }

    #[test]
    fn test_event_id_ordering() {
        assert!(EventId(0) < EventId(u64::from(u32::MAX)));
    }

    #[test]
    fn test_display() {
        assert_eq!(GroupId(3).to_string(), "grp-3");
        assert_eq!(RealizationId(12).to_string(), "12");
    }
}
