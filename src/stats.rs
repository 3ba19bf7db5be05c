//! Realization-weighted statistics over probability maps.
//!
//! Once the parallel reduction completes, the per-realization maps are
//! combined into weighted statistics (mean, quantiles) and optionally
//! inverted into hazard maps (intensity at a target probability of
//! exceedance).

use std::collections::{BTreeMap, BTreeSet};

use crate::params::ImtLevels;
use crate::types::{ProbabilityCurve, ProbabilityMap, SiteId};

/// Tolerance for the logic-tree weight sum check.
const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Error raised while computing statistics.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StatsError {
    /// The number of maps does not match the number of weights. This should
    /// never happen unless the logic-tree reduction mechanism is broken.
    #[error("expected {weights} probability maps, got {pmaps}")]
    CountMismatch {
        /// Number of weights supplied.
        weights: usize,
        /// Number of maps supplied.
        pmaps: usize,
    },
    /// Maps disagree on the number of (IMT, level) cells.
    #[error("probability maps disagree on level count: {first} vs {other}")]
    LevelCountMismatch {
        /// Cell count of the first map.
        first: usize,
        /// Conflicting cell count.
        other: usize,
    },
}

/// A requested statistic over the realization axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Statistic {
    /// Weighted mean.
    Mean,
    /// Weighted quantile at the given level in (0, 1).
    Quantile(f64),
}

impl Statistic {
    /// Name used as the dataset suffix (`hcurves/<name>`).
    pub fn name(&self) -> String {
        match self {
            Statistic::Mean => "mean".to_string(),
            Statistic::Quantile(q) => format!("quantile-{q}"),
        }
    }
}

/// Combine per-realization maps into weighted statistics.
///
/// Weights not summing to one within tolerance are a modeling concern, not a
/// computation bug: the mismatch is logged and the computation proceeds. A
/// maps/weights count mismatch is fatal.
pub fn compute_pmap_stats(
    pmaps: &[ProbabilityMap],
    weights: &[f64],
    stats: &[Statistic],
) -> Result<BTreeMap<String, ProbabilityMap>, StatsError> {
    if pmaps.len() != weights.len() {
        return Err(StatsError::CountMismatch {
            weights: weights.len(),
            pmaps: pmaps.len(),
        });
    }
    let num_levels = pmaps.first().map(ProbabilityMap::num_levels).unwrap_or(0);
    for pmap in pmaps {
        if pmap.num_levels() != num_levels {
            return Err(StatsError::LevelCountMismatch {
                first: num_levels,
                other: pmap.num_levels(),
            });
        }
    }

    let weight_sum: f64 = weights.iter().sum();
    if (weight_sum - 1.0).abs() > WEIGHT_TOLERANCE {
        tracing::warn!(
            weight_sum,
            "logic-tree weights do not sum to one; statistics are computed as supplied"
        );
    }

    let sids: BTreeSet<SiteId> = pmaps.iter().flat_map(|p| p.sites()).collect();
    let zero = ProbabilityCurve::zero(num_levels);

    let mut out = BTreeMap::new();
    for stat in stats {
        let mut result = ProbabilityMap::new(num_levels);
        for &sid in &sids {
            let cell_values: Vec<&ProbabilityCurve> = pmaps
                .iter()
                .map(|p| p.get(sid).unwrap_or(&zero))
                .collect();
            let poes: Vec<f64> = (0..num_levels)
                .map(|cell| {
                    let values: Vec<f64> = cell_values.iter().map(|c| c.poes[cell]).collect();
                    match stat {
                        Statistic::Mean => weighted_mean(&values, weights),
                        Statistic::Quantile(q) => weighted_quantile(&values, weights, *q),
                    }
                })
                .collect();
            // A fresh map always accepts a contribution of its own width.
            result
                .update(sid, &poes)
                .expect("statistic curve has the map's own level count");
        }
        out.insert(stat.name(), result);
    }
    Ok(out)
}

/// Weighted mean of one cell across realizations.
fn weighted_mean(values: &[f64], weights: &[f64]) -> f64 {
    values
        .iter()
        .zip(weights)
        .map(|(v, w)| v * w)
        .sum::<f64>()
}

/// Weighted quantile of one cell across realizations.
///
/// Sorts the values and picks the first whose cumulative weight reaches
/// `q * total_weight`, the standard step interpolation for logic-tree
/// quantiles.
fn weighted_quantile(values: &[f64], weights: &[f64], q: f64) -> f64 {
    let mut pairs: Vec<(f64, f64)> = values.iter().copied().zip(weights.iter().copied()).collect();
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    let total: f64 = weights.iter().sum();
    let target = q * total;
    let mut cumulative = 0.0;
    for (value, weight) in &pairs {
        cumulative += weight;
        if cumulative >= target - WEIGHT_TOLERANCE {
            return *value;
        }
    }
    pairs.last().map(|(v, _)| *v).unwrap_or(0.0)
}

/// Hazard map for one statistic: per site, the intensity level matching each
/// requested probability of exceedance, flattened (IMT, poe)-major.
#[derive(Debug, Clone, PartialEq)]
pub struct HazardMap {
    /// Requested probability targets.
    pub poes: Vec<f64>,
    /// Site to interpolated intensity levels, `num_imts * poes.len()` wide.
    pub levels_by_site: BTreeMap<SiteId, Vec<f64>>,
}

/// Invert hazard curves into a hazard map.
///
/// For each (site, IMT, target poe), interpolates linearly between the two
/// bracketing levels of the curve. Targets above the curve's maximum clamp
/// to the lowest level, targets below its minimum clamp to the highest.
pub fn make_hazard_map(pmap: &ProbabilityMap, imtls: &ImtLevels, poes: &[f64]) -> HazardMap {
    let mut levels_by_site = BTreeMap::new();
    for sid in pmap.sites() {
        let curve = pmap.get(sid).expect("site listed by the map");
        let mut values = Vec::with_capacity(imtls.num_imts() * poes.len());
        for imt_index in 0..imtls.num_imts() {
            let range = imtls.cell_range(imt_index);
            let curve_poes = &curve.poes[range];
            let levels = imtls.levels_for(imt_index);
            for &target in poes {
                values.push(invert_curve(levels, curve_poes, target));
            }
        }
        levels_by_site.insert(sid, values);
    }
    HazardMap {
        poes: poes.to_vec(),
        levels_by_site,
    }
}

/// Interpolate the intensity level at one target poe on a single-IMT curve.
///
/// Exceedance probabilities decrease with level; the interpolation walks the
/// curve until the target is bracketed.
fn invert_curve(levels: &[f64], poes: &[f64], target: f64) -> f64 {
    debug_assert_eq!(levels.len(), poes.len());
    if poes.is_empty() {
        return 0.0;
    }
    if target >= poes[0] {
        return levels[0];
    }
    for i in 1..poes.len() {
        let (p_hi, p_lo) = (poes[i - 1], poes[i]);
        if target >= p_lo {
            if (p_hi - p_lo).abs() < f64::EPSILON {
                return levels[i];
            }
            let t = (p_hi - target) / (p_hi - p_lo);
            return levels[i - 1] + t * (levels[i] - levels[i - 1]);
        }
    }
    levels[levels.len() - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pmap(site_poes: &[(u32, Vec<f64>)], num_levels: usize) -> ProbabilityMap {
        let mut p = ProbabilityMap::new(num_levels);
        for (sid, poes) in site_poes {
            p.update(SiteId(*sid), poes).unwrap();
        }
        p
    }

    #[test]
    fn test_count_mismatch_is_fatal() {
        let maps = vec![ProbabilityMap::new(2)];
        let err = compute_pmap_stats(&maps, &[0.5, 0.5], &[Statistic::Mean]).unwrap_err();
        assert!(matches!(
            err,
            StatsError::CountMismatch {
                weights: 2,
                pmaps: 1
            }
        ));
    }

    #[test]
    fn test_equal_weights_mean_is_plain_average() {
        let a = pmap(&[(0, vec![0.2, 0.4])], 2);
        let b = pmap(&[(0, vec![0.6, 0.0])], 2);
        let stats =
            compute_pmap_stats(&[a, b], &[0.5, 0.5], &[Statistic::Mean]).unwrap();
        let mean = &stats["mean"];
        let curve = mean.get(SiteId(0)).unwrap();
        assert!((curve.poes[0] - 0.4).abs() < 1e-12);
        assert!((curve.poes[1] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_mean_treats_missing_sites_as_zero() {
        let a = pmap(&[(0, vec![0.4])], 1);
        let b = pmap(&[(1, vec![0.8])], 1);
        let stats =
            compute_pmap_stats(&[a, b], &[0.5, 0.5], &[Statistic::Mean]).unwrap();
        let mean = &stats["mean"];
        assert!((mean.get(SiteId(0)).unwrap().poes[0] - 0.2).abs() < 1e-12);
        assert!((mean.get(SiteId(1)).unwrap().poes[0] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_median_of_three_equal_weights() {
        let a = pmap(&[(0, vec![0.1])], 1);
        let b = pmap(&[(0, vec![0.5])], 1);
        let c = pmap(&[(0, vec![0.9])], 1);
        let w = 1.0 / 3.0;
        let stats =
            compute_pmap_stats(&[a, b, c], &[w, w, w], &[Statistic::Quantile(0.5)]).unwrap();
        let median = &stats["quantile-0.5"];
        assert!((median.get(SiteId(0)).unwrap().poes[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_statistic_names() {
        assert_eq!(Statistic::Mean.name(), "mean");
        assert_eq!(Statistic::Quantile(0.15).name(), "quantile-0.15");
    }

    #[test]
    fn test_invert_curve_brackets_target() {
        let levels = [0.1, 0.2, 0.4];
        let poes = [0.9, 0.5, 0.1];
        // Halfway between 0.5 and 0.1 -> halfway between 0.2 and 0.4.
        let level = invert_curve(&levels, &poes, 0.3);
        assert!((level - 0.3).abs() < 1e-12);
        // Above the maximum poe clamps to the lowest level.
        assert_eq!(invert_curve(&levels, &poes, 0.95), 0.1);
        // Below the minimum poe clamps to the highest level.
        assert_eq!(invert_curve(&levels, &poes, 0.01), 0.4);
    }

    #[test]
    fn test_make_hazard_map_shape() {
        let imtls = ImtLevels::new(vec![
            ("PGA".to_string(), vec![0.1, 0.2, 0.4]),
            ("SA(0.5)".to_string(), vec![0.05, 0.1]),
        ])
        .unwrap();
        let map = pmap(&[(0, vec![0.9, 0.5, 0.1, 0.8, 0.2])], 5);
        let hmap = make_hazard_map(&map, &imtls, &[0.5, 0.1]);
        let row = &hmap.levels_by_site[&SiteId(0)];
        // 2 IMTs x 2 targets.
        assert_eq!(row.len(), 4);
        assert!((row[0] - 0.2).abs() < 1e-12);
        assert!((row[1] - 0.4).abs() < 1e-12);
    }
}
