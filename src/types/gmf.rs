//! Ground-motion field row types.

use serde::{Deserialize, Serialize};

use super::ids::{EventId, RealizationId, SiteId};

/// One ground-motion field row: the simulated intensity at one site for one
/// event under one realization.
///
/// Rows are append-only and immutable. Within one task result they are
/// produced site-major, so every site's rows form one contiguous run; the
/// reducer translates the task-relative runs into global row ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GmfRow {
    /// Realization the row belongs to.
    pub rlz: RealizationId,
    /// Site the ground motion was simulated at.
    pub sid: SiteId,
    /// Event that generated the ground motion.
    pub eid: EventId,
    /// Ground-motion values, one per intensity measure type.
    pub gmvs: Vec<f32>,
}

impl GmfRow {
    /// Nominal persisted size of one row in bytes.
    ///
    /// Mirrors the packed layout (u16 rlz + u32 sid + u64 eid + f32 per IMT)
    /// used for size estimates and progress accounting.
    pub fn nominal_size(num_imts: usize) -> u64 {
        2 + 4 + 8 + 4 * num_imts as u64
    }
}

/// A task-relative run of rows belonging to one site: rows
/// `[start, stop)` of the task's row vector are all for `sid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRange {
    /// Site the range belongs to.
    pub sid: SiteId,
    /// First row of the run (inclusive).
    pub start: u32,
    /// One past the last row of the run.
    pub stop: u32,
}

/// A persisted, globally translated row range for one site.
///
/// Ranges from distinct tasks are concatenated, never merged: each one is a
/// logically distinct interval contributed by a distinct batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSiteRange {
    /// Site the range belongs to.
    pub sid: SiteId,
    /// First global row index (inclusive).
    pub start: u32,
    /// One past the last global row index.
    pub stop: u32,
}

impl GlobalSiteRange {
    /// Number of rows covered by this range.
    pub fn len(&self) -> u32 {
        self.stop - self.start
    }

    /// Whether the range covers no rows.
    pub fn is_empty(&self) -> bool {
        self.stop == self.start
    }
}
