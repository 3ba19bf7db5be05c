//! Stochastic rupture sampling.
//!
//! Each source draws occurrence counts for its magnitude bins from a Poisson
//! distribution with mean `annual_rate * investigation_time * ses`, using a
//! ChaCha stream seeded from `(master_seed, source_index)`. Serial numbers
//! come from per-source ranges pre-assigned over the static bin counts, so
//! the sampled output is bit-identical regardless of worker count or task
//! completion order.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

use crate::params::EngineParams;
use crate::seeds::{derive_seed, standard_normal};
use crate::types::{GeometryError, GroupId, Rupture, RuptureBlock, SeismicSource};

/// Error raised during rupture sampling.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SamplerError {
    /// A source carries invalid geometry; the run aborts.
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    /// The pre-assigned serial ranges overflowed the 32-bit serial space.
    #[error("serial space exhausted: {needed} ruptures cannot be numbered from base {base}")]
    SerialOverflow {
        /// Serial base that overflowed.
        base: u32,
        /// Bins that needed numbering.
        needed: usize,
    },
}

/// A source paired with its pre-assigned serial base.
#[derive(Debug, Clone)]
pub struct NumberedSource<'a> {
    /// The source to sample.
    pub source: &'a SeismicSource,
    /// Position of the source in the input order (seeds the RNG stream).
    pub source_index: usize,
    /// First serial of this source's range.
    pub serial_base: u32,
}

/// Assign disjoint serial ranges to sources in input order.
///
/// Ranges are sized by `max_ruptures`, so they only depend on the static
/// rate models, never on the draws.
pub fn number_sources<'a>(
    sources: &'a [SeismicSource],
) -> Result<Vec<NumberedSource<'a>>, SamplerError> {
    let mut base = 0u32;
    let mut numbered = Vec::with_capacity(sources.len());
    for (source_index, source) in sources.iter().enumerate() {
        numbered.push(NumberedSource {
            source,
            source_index,
            serial_base: base,
        });
        let needed = source.max_ruptures();
        base = base
            .checked_add(needed as u32)
            .ok_or(SamplerError::SerialOverflow { base, needed })?;
    }
    Ok(numbered)
}

/// Sample one source, producing its ruptures in serial order.
///
/// Bins that draw zero occurrences contribute nothing (their serials stay
/// unused). A source with no bins, or all-zero draws, yields an empty
/// vector.
pub fn sample_source(
    numbered: &NumberedSource<'_>,
    params: &EngineParams,
) -> Result<Vec<Rupture>, SamplerError> {
    let source = numbered.source;
    source.validate()?;

    let seed = derive_seed(params.master_seed, numbered.source_index as u64);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let trials = f64::from(params.ses_per_logic_tree_path);

    let mut ruptures = Vec::new();
    for (bin, rate) in source.rates.iter().enumerate() {
        let mean = rate.annual_rate * params.investigation_time * trials;
        let n_occ = poisson(&mut rng, mean);
        if n_occ == 0 {
            continue;
        }
        ruptures.push(Rupture {
            serial: numbered.serial_base + bin as u32,
            group_id: source.group_id,
            source_id: source.id.clone(),
            magnitude: rate.magnitude,
            hypocenter: source.hypocenter,
            n_occ,
        });
    }
    Ok(ruptures)
}

/// Split sampled ruptures into per-group blocks bounded by the occurrence
/// budget.
///
/// A block is flushed once its running occurrence count exceeds the budget,
/// so the scheduler receives evenly sized units of work. Blocks never mix
/// groups and keep ruptures in serial order.
pub fn build_blocks(ruptures: Vec<Rupture>, budget: u64) -> Vec<RuptureBlock> {
    let mut by_group: BTreeMap<GroupId, Vec<Rupture>> = BTreeMap::new();
    for rupture in ruptures {
        by_group.entry(rupture.group_id).or_default().push(rupture);
    }

    let mut blocks = Vec::new();
    for (group_id, mut group_ruptures) in by_group {
        group_ruptures.sort_by_key(|r| r.serial);
        let mut open: Vec<Rupture> = Vec::new();
        let mut occupancy = 0u64;
        for rupture in group_ruptures {
            occupancy += u64::from(rupture.n_occ);
            open.push(rupture);
            if occupancy > budget {
                blocks.push(RuptureBlock {
                    group_id,
                    ruptures: std::mem::take(&mut open),
                });
                occupancy = 0;
            }
        }
        if !open.is_empty() {
            blocks.push(RuptureBlock {
                group_id,
                ruptures: open,
            });
        }
    }
    blocks
}

/// Poisson draw with Knuth's method, switching to a normal approximation
/// for large means where the product underflows.
fn poisson(rng: &mut ChaCha8Rng, mean: f64) -> u32 {
    if mean <= 0.0 {
        return 0;
    }
    if mean > 30.0 {
        // Normal approximation, adequate at this size.
        let z = standard_normal(rng);
        let value = mean + mean.sqrt() * z;
        return value.round().max(0.0) as u32;
    }
    let limit = (-mean).exp();
    let mut k = 0u32;
    let mut product = 1.0f64;
    loop {
        product *= rng.gen::<f64>();
        if product <= limit {
            return k;
        }
        k += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{EngineParams, ImtLevels};
    use crate::types::{Hypocenter, MagnitudeRate};

    fn params() -> EngineParams {
        let imtls = ImtLevels::new(vec![("PGA".to_string(), vec![0.1])]).unwrap();
        let mut p = EngineParams::new(imtls);
        p.ses_per_logic_tree_path = 10;
        p.investigation_time = 50.0;
        p
    }

    fn source(id: &str, group: u16, rates: Vec<MagnitudeRate>) -> SeismicSource {
        SeismicSource {
            id: id.to_string(),
            group_id: GroupId(group),
            hypocenter: Hypocenter {
                lon: 10.0,
                lat: 45.0,
                depth_km: 8.0,
            },
            rates,
        }
    }

    fn rate(magnitude: f64, annual_rate: f64) -> MagnitudeRate {
        MagnitudeRate {
            magnitude,
            annual_rate,
        }
    }

    #[test]
    fn test_sampling_is_deterministic() {
        let src = source("a", 0, vec![rate(5.5, 0.2), rate(6.5, 0.05)]);
        let numbered = number_sources(std::slice::from_ref(&src)).unwrap();
        let p = params();

        let first = sample_source(&numbered[0], &p).unwrap();
        let second = sample_source(&numbered[0], &p).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_serial_ranges_are_disjoint_and_ordered() {
        let sources = vec![
            source("a", 0, vec![rate(5.5, 1.0), rate(6.0, 1.0)]),
            source("b", 0, vec![rate(5.5, 1.0)]),
        ];
        let numbered = number_sources(&sources).unwrap();
        assert_eq!(numbered[0].serial_base, 0);
        assert_eq!(numbered[1].serial_base, 2);

        let p = params();
        let mut all = Vec::new();
        for n in &numbered {
            all.extend(sample_source(n, &p).unwrap());
        }
        let serials: Vec<u32> = all.iter().map(|r| r.serial).collect();
        let mut sorted = serials.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(serials.len(), sorted.len(), "serials must be unique");
    }

    #[test]
    fn test_zero_rate_source_contributes_nothing() {
        let src = source("empty", 0, vec![rate(5.5, 0.0)]);
        let numbered = number_sources(std::slice::from_ref(&src)).unwrap();
        let sampled = sample_source(&numbered[0], &params()).unwrap();
        assert!(sampled.is_empty());
    }

    #[test]
    fn test_invalid_geometry_aborts() {
        let mut src = source("bad", 0, vec![rate(5.5, 1.0)]);
        src.hypocenter.lat = 400.0;
        let numbered = number_sources(std::slice::from_ref(&src)).unwrap();
        assert!(matches!(
            sample_source(&numbered[0], &params()),
            Err(SamplerError::Geometry(_))
        ));
    }

    #[test]
    fn test_blocks_respect_budget_and_group() {
        let mk = |serial: u32, group: u16, n_occ: u32| Rupture {
            serial,
            group_id: GroupId(group),
            source_id: "s".to_string(),
            magnitude: 6.0,
            hypocenter: Hypocenter {
                lon: 0.0,
                lat: 0.0,
                depth_km: 5.0,
            },
            n_occ,
        };
        let ruptures = vec![mk(0, 0, 3), mk(1, 0, 3), mk(2, 1, 1), mk(3, 0, 3)];
        let blocks = build_blocks(ruptures, 5);

        for block in &blocks {
            assert!(block.ruptures.iter().all(|r| r.group_id == block.group_id));
            assert!(block
                .ruptures
                .windows(2)
                .all(|w| w[0].serial < w[1].serial));
        }
        // Group 0 has 9 occurrences with budget 5: flushed after exceeding.
        let group0: Vec<_> = blocks.iter().filter(|b| b.group_id == GroupId(0)).collect();
        assert_eq!(group0.len(), 2);
        assert_eq!(group0[0].occurrence_count(), 6);
        assert_eq!(group0[1].occurrence_count(), 3);
    }

    #[test]
    fn test_poisson_mean_roughly_respected() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let n = 2000;
        let total: u64 = (0..n).map(|_| u64::from(poisson(&mut rng, 4.0))).sum();
        let mean = total as f64 / n as f64;
        assert!((mean - 4.0).abs() < 0.3, "empirical mean {mean}");
    }

    #[test]
    fn test_poisson_large_mean_uses_approximation() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let draw = poisson(&mut rng, 10_000.0);
        assert!(draw > 9_000 && draw < 11_000);
    }
}
