//! Probability-of-exceedance maps.
//!
//! A `ProbabilityMap` holds, per site, the probability that ground motion
//! exceeds each (IMT, level) cell at least once within the simulated time
//! span. Contributions are folded in with the Bernoulli combination rule
//!
//! ```text
//! p' = 1 - (1 - p) * (1 - poe)
//! ```
//!
//! which models events as independent exceedance trials. The rule is
//! commutative and associative, so the map tolerates the scheduler's
//! arbitrary reduction order; a `poe = 0` contribution is the identity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::SiteId;

/// Error raised when a contribution does not match the map's cell layout.
#[derive(Debug, Clone, thiserror::Error)]
#[error("probability contribution has {got} levels, map expects {expected}")]
pub struct LevelMismatch {
    /// Levels expected by the map.
    pub expected: usize,
    /// Levels carried by the contribution.
    pub got: usize,
}

/// Fixed-length probability-of-exceedance vector for one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityCurve {
    /// One probability per (IMT, level) cell, flattened IMT-major.
    pub poes: Vec<f64>,
}

impl ProbabilityCurve {
    /// A curve of zeros (no exceedance observed yet).
    pub fn zero(num_levels: usize) -> Self {
        Self {
            poes: vec![0.0; num_levels],
        }
    }

    /// Fold one contribution into this curve with the Bernoulli rule.
    ///
    /// Zero contributions are skipped so the identity holds exactly, not
    /// just up to rounding.
    fn combine(&mut self, poes: &[f64]) {
        for (p, &poe) in self.poes.iter_mut().zip(poes) {
            if poe != 0.0 {
                *p = 1.0 - (1.0 - *p) * (1.0 - poe);
            }
        }
    }
}

/// Per-realization probability map: site id to exceedance curve.
///
/// Created empty at run start, mutated in place by every reduction step and
/// read-only once the parallel reduction completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityMap {
    num_levels: usize,
    curves: BTreeMap<SiteId, ProbabilityCurve>,
}

impl ProbabilityMap {
    /// Create an empty map over `num_levels` (IMT, level) cells.
    pub fn new(num_levels: usize) -> Self {
        Self {
            num_levels,
            curves: BTreeMap::new(),
        }
    }

    /// Number of (IMT, level) cells per site.
    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    /// Fold a per-site contribution into the map.
    pub fn update(&mut self, sid: SiteId, poes: &[f64]) -> Result<(), LevelMismatch> {
        if poes.len() != self.num_levels {
            return Err(LevelMismatch {
                expected: self.num_levels,
                got: poes.len(),
            });
        }
        self.curves
            .entry(sid)
            .or_insert_with(|| ProbabilityCurve::zero(self.num_levels))
            .combine(poes);
        Ok(())
    }

    /// Fold an entire map into this one, cell by cell.
    pub fn combine(&mut self, other: &ProbabilityMap) -> Result<(), LevelMismatch> {
        for (sid, curve) in &other.curves {
            self.update(*sid, &curve.poes)?;
        }
        Ok(())
    }

    /// Curve for one site, if any contribution has touched it.
    pub fn get(&self, sid: SiteId) -> Option<&ProbabilityCurve> {
        self.curves.get(&sid)
    }

    /// Sites touched so far, in id order.
    pub fn sites(&self) -> impl Iterator<Item = SiteId> + '_ {
        self.curves.keys().copied()
    }

    /// Number of sites with at least one contribution.
    pub fn num_sites(&self) -> usize {
        self.curves.len()
    }

    /// Whether no contribution has been folded in yet.
    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }

    /// Largest absolute cell difference against another map.
    ///
    /// Sites present in only one of the maps compare against zero curves.
    pub fn max_abs_diff(&self, other: &ProbabilityMap) -> f64 {
        let zero = ProbabilityCurve::zero(self.num_levels);
        let mut max = 0.0f64;
        let sids: std::collections::BTreeSet<SiteId> =
            self.sites().chain(other.sites()).collect();
        for sid in sids {
            let a = self.get(sid).unwrap_or(&zero);
            let b = other.get(sid).unwrap_or(&zero);
            for (x, y) in a.poes.iter().zip(&b.poes) {
                max = max.max((x - y).abs());
            }
        }
        max
    }
}
