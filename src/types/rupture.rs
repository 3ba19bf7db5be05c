//! Sampled rupture types.

use serde::{Deserialize, Serialize};

use super::ids::GroupId;
use super::source::Hypocenter;

/// One sampled earthquake rupture.
///
/// Immutable once sampled. The `serial` is the deterministic sampling index
/// (monotonic over the run, possibly with holes for magnitude bins that drew
/// zero occurrences); `n_occ` is the number of occurrences drawn across all
/// stochastic event sets, since one physical rupture can recur.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rupture {
    /// Deterministic sampling index.
    pub serial: u32,
    /// Logic-tree group that produced this rupture.
    pub group_id: GroupId,
    /// Identifier of the originating source.
    pub source_id: String,
    /// Moment magnitude.
    pub magnitude: f64,
    /// Rupture location.
    pub hypocenter: Hypocenter,
    /// Occurrence multiplicity over all stochastic event sets.
    pub n_occ: u32,
}

/// A block of ruptures from a single group, sized by occurrence budget.
///
/// Blocks are the unit of work handed to the scheduler: bounded occupancy
/// keeps peak memory flat and gives the worker pool evenly sized tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuptureBlock {
    /// Group shared by every rupture in the block.
    pub group_id: GroupId,
    /// Ruptures in serial order.
    pub ruptures: Vec<Rupture>,
}

impl RuptureBlock {
    /// Total occurrence count carried by the block.
    pub fn occurrence_count(&self) -> u64 {
        self.ruptures.iter().map(|r| u64::from(r.n_occ)).sum()
    }

    /// Number of ruptures in the block.
    pub fn len(&self) -> usize {
        self.ruptures.len()
    }

    /// Whether the block is empty.
    pub fn is_empty(&self) -> bool {
        self.ruptures.is_empty()
    }
}
