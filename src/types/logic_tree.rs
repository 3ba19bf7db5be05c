//! Logic-tree realizations and their association to source groups.
//!
//! Realizations are dense indices assigned at load time; the per-group
//! association is either full enumeration (every realization mapped to the
//! group applies to every rupture of the group) or a seeded random subsample
//! when the group uses GSIM sampling.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::seeds::derive_seed;

use super::ids::{GroupId, RealizationId};

/// Error for malformed logic trees.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LogicTreeError {
    /// No realizations were supplied.
    #[error("logic tree has no realizations")]
    Empty,
    /// A group references a realization index outside the dense range.
    #[error("group {group} references unknown realization {rlz}")]
    UnknownRealization {
        /// Offending group.
        group: GroupId,
        /// Out-of-range realization index.
        rlz: RealizationId,
    },
    /// A sampling factor is larger than the group's realization count.
    #[error("group {group} samples {samples} realizations but only has {available}")]
    OversizedSample {
        /// Offending group.
        group: GroupId,
        /// Requested sample size.
        samples: usize,
        /// Realizations actually mapped to the group.
        available: usize,
    },
}

/// One fully-specified combination of logic-tree branch choices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Realization {
    /// Dense realization index.
    pub id: RealizationId,
    /// Logic-tree weight of this realization.
    pub weight: f64,
}

/// Persisted association record: the realizations applying to one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRealizations {
    /// The group.
    pub group_id: GroupId,
    /// Realization indices mapped to the group, ascending.
    pub rlz_ids: Vec<RealizationId>,
}

/// The loaded logic tree: dense realizations plus per-group associations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicTree {
    realizations: Vec<Realization>,
    rlzs_by_group: BTreeMap<GroupId, Vec<RealizationId>>,
    samples_by_group: BTreeMap<GroupId, usize>,
}

impl LogicTree {
    /// Build a logic tree from dense realizations and per-group mappings.
    ///
    /// `samples_by_group` entries switch a group from full enumeration to
    /// GSIM sampling with the given sample size.
    pub fn new(
        realizations: Vec<Realization>,
        rlzs_by_group: BTreeMap<GroupId, Vec<RealizationId>>,
        samples_by_group: BTreeMap<GroupId, usize>,
    ) -> Result<Self, LogicTreeError> {
        if realizations.is_empty() {
            return Err(LogicTreeError::Empty);
        }
        let num = realizations.len();
        for (group, rlzs) in &rlzs_by_group {
            for rlz in rlzs {
                if rlz.index() >= num {
                    return Err(LogicTreeError::UnknownRealization {
                        group: *group,
                        rlz: *rlz,
                    });
                }
            }
            if let Some(&samples) = samples_by_group.get(group) {
                if samples > rlzs.len() {
                    return Err(LogicTreeError::OversizedSample {
                        group: *group,
                        samples,
                        available: rlzs.len(),
                    });
                }
            }
        }
        let mut rlzs_by_group = rlzs_by_group;
        for rlzs in rlzs_by_group.values_mut() {
            rlzs.sort();
            rlzs.dedup();
        }
        Ok(Self {
            realizations,
            rlzs_by_group,
            samples_by_group,
        })
    }

    /// Convenience constructor: full enumeration, every realization applies
    /// to every listed group, all weights equal.
    pub fn full_enumeration(num_rlzs: u16, groups: &[GroupId]) -> Result<Self, LogicTreeError> {
        let weight = 1.0 / f64::from(num_rlzs.max(1));
        let realizations = (0..num_rlzs)
            .map(|i| Realization {
                id: RealizationId(i),
                weight,
            })
            .collect();
        let all: Vec<RealizationId> = (0..num_rlzs).map(RealizationId).collect();
        let rlzs_by_group = groups.iter().map(|g| (*g, all.clone())).collect();
        Self::new(realizations, rlzs_by_group, BTreeMap::new())
    }

    /// Total number of realizations (the `R` of the run).
    pub fn num_realizations(&self) -> usize {
        self.realizations.len()
    }

    /// All realizations in dense index order.
    pub fn realizations(&self) -> &[Realization] {
        &self.realizations
    }

    /// Logic-tree weights in realization order.
    pub fn weights(&self) -> Vec<f64> {
        self.realizations.iter().map(|r| r.weight).collect()
    }

    /// Groups known to the tree, ascending.
    pub fn groups(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.rlzs_by_group.keys().copied()
    }

    /// Realizations mapped to one group under full enumeration.
    pub fn realizations_for(&self, group: GroupId) -> &[RealizationId] {
        self.rlzs_by_group
            .get(&group)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Realizations that effectively apply to a group's ruptures.
    ///
    /// For a sampled group this is a deterministic subsample seeded from the
    /// master seed and the group id, returned in ascending order so the
    /// expansion order never depends on shuffle internals.
    pub fn effective_realizations(&self, group: GroupId, master_seed: u64) -> Vec<RealizationId> {
        let all = self.realizations_for(group);
        match self.samples_by_group.get(&group) {
            Some(&samples) if samples < all.len() => {
                let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(master_seed, u64::from(group.0)));
                let mut picked: Vec<RealizationId> =
                    all.choose_multiple(&mut rng, samples).copied().collect();
                picked.sort();
                picked
            }
            _ => all.to_vec(),
        }
    }

    /// Association records for persistence, one per group.
    pub fn group_records(&self) -> Vec<GroupRealizations> {
        self.rlzs_by_group
            .iter()
            .map(|(group_id, rlz_ids)| GroupRealizations {
                group_id: *group_id,
                rlz_ids: rlz_ids.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_enumeration_maps_everything() {
        let lt = LogicTree::full_enumeration(3, &[GroupId(0), GroupId(1)]).unwrap();
        assert_eq!(lt.num_realizations(), 3);
        assert_eq!(lt.realizations_for(GroupId(1)).len(), 3);
        let w: f64 = lt.weights().iter().sum();
        assert!((w - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_realization_rejected() {
        let realizations = vec![Realization {
            id: RealizationId(0),
            weight: 1.0,
        }];
        let mut by_group = BTreeMap::new();
        by_group.insert(GroupId(0), vec![RealizationId(5)]);
        let err = LogicTree::new(realizations, by_group, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, LogicTreeError::UnknownRealization { .. }));
    }

    #[test]
    fn test_sampled_group_is_deterministic() {
        let lt = {
            let realizations = (0..8)
                .map(|i| Realization {
                    id: RealizationId(i),
                    weight: 0.125,
                })
                .collect();
            let mut by_group = BTreeMap::new();
            by_group.insert(GroupId(0), (0..8).map(RealizationId).collect());
            let mut samples = BTreeMap::new();
            samples.insert(GroupId(0), 3);
            LogicTree::new(realizations, by_group, samples).unwrap()
        };

        let a = lt.effective_realizations(GroupId(0), 42);
        let b = lt.effective_realizations(GroupId(0), 42);
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_oversized_sample_rejected() {
        let realizations = vec![Realization {
            id: RealizationId(0),
            weight: 1.0,
        }];
        let mut by_group = BTreeMap::new();
        by_group.insert(GroupId(0), vec![RealizationId(0)]);
        let mut samples = BTreeMap::new();
        samples.insert(GroupId(0), 2);
        let err = LogicTree::new(realizations, by_group, samples).unwrap_err();
        assert!(matches!(err, LogicTreeError::OversizedSample { .. }));
    }
}
