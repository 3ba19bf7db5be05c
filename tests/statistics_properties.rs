//! Property tests for the aggregation algebra.
//!
//! The parallel reduction relies on the probability fold being commutative
//! and on the identity contribution leaving maps unchanged; these laws are
//! first-class contracts, tested here rather than assumed.

use proptest::prelude::*;

use hazard_kernel::{
    compute_pmap_stats, ProbabilityMap, SiteId, Statistic,
};

/// Strategy: a batch of (site, poe vector) contributions.
fn contributions(
    num_levels: usize,
    max_sites: u32,
) -> impl Strategy<Value = Vec<(u32, Vec<f64>)>> {
    prop::collection::vec(
        (
            0..max_sites,
            prop::collection::vec(0.0f64..=1.0, num_levels),
        ),
        1..24,
    )
}

fn fold(contributions: &[(u32, Vec<f64>)], num_levels: usize) -> ProbabilityMap {
    let mut pmap = ProbabilityMap::new(num_levels);
    for (sid, poes) in contributions {
        pmap.update(SiteId(*sid), poes).unwrap();
    }
    pmap
}

proptest! {
    /// Folding contributions in any order yields the same map within
    /// floating-point tolerance.
    #[test]
    fn fold_is_commutative(
        batch in contributions(3, 8),
        seed in any::<u64>(),
    ) {
        let forward = fold(&batch, 3);

        // Deterministic shuffle driven by the seed.
        let mut shuffled = batch.clone();
        let mut state = seed | 1;
        for i in (1..shuffled.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let j = (state >> 33) as usize % (i + 1);
            shuffled.swap(i, j);
        }
        let backward = fold(&shuffled, 3);

        prop_assert!(forward.max_abs_diff(&backward) < 1e-9);
    }

    /// A zero contribution is the identity of the fold.
    #[test]
    fn zero_contribution_is_identity(batch in contributions(3, 8)) {
        let reference = fold(&batch, 3);
        let mut with_zeros = fold(&batch, 3);
        for sid in 0..8 {
            with_zeros.update(SiteId(sid), &[0.0, 0.0, 0.0]).unwrap();
        }
        prop_assert!(reference.max_abs_diff(&with_zeros) == 0.0);
    }

    /// Probabilities stay inside [0, 1] no matter how many contributions
    /// are folded in.
    #[test]
    fn probabilities_stay_bounded(batch in contributions(2, 4)) {
        let pmap = fold(&batch, 2);
        for sid in pmap.sites() {
            let curve = pmap.get(sid).unwrap();
            prop_assert!(curve.poes.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
    }

    /// With equal weights the weighted mean is the plain average.
    #[test]
    fn equal_weight_mean_is_plain_average(
        values in prop::collection::vec(0.0f64..=1.0, 2..6),
    ) {
        let pmaps: Vec<ProbabilityMap> = values
            .iter()
            .map(|&v| {
                let mut p = ProbabilityMap::new(1);
                p.update(SiteId(0), &[v]).unwrap();
                p
            })
            .collect();
        let weights = vec![1.0 / values.len() as f64; values.len()];

        let stats = compute_pmap_stats(&pmaps, &weights, &[Statistic::Mean]).unwrap();
        let mean = stats["mean"].get(SiteId(0)).unwrap().poes[0];
        let plain = values.iter().sum::<f64>() / values.len() as f64;
        prop_assert!((mean - plain).abs() < 1e-12);
    }

    /// A weighted quantile is always one of the input values.
    #[test]
    fn quantile_picks_an_input_value(
        values in prop::collection::vec(0.0f64..=1.0, 2..6),
        q in 0.01f64..0.99,
    ) {
        let pmaps: Vec<ProbabilityMap> = values
            .iter()
            .map(|&v| {
                let mut p = ProbabilityMap::new(1);
                p.update(SiteId(0), &[v]).unwrap();
                p
            })
            .collect();
        let weights = vec![1.0 / values.len() as f64; values.len()];

        let stats = compute_pmap_stats(&pmaps, &weights, &[Statistic::Quantile(q)]).unwrap();
        let quantile = stats[&format!("quantile-{q}")].get(SiteId(0)).unwrap().poes[0];
        prop_assert!(values.iter().any(|&v| (v - quantile).abs() < 1e-15));
    }
}
