//! Event-based loss statistics.
//!
//! Converts simulated ground motion into loss ratios through a
//! vulnerability function and aggregates them into exceedance statistics
//! over the total simulated time span. The conversion itself is a pure
//! function from intensity to loss ratio; everything here consumes it.

use std::collections::BTreeMap;

use crate::types::{EventId, GmfRow};

/// Number of bins of the canonical loss-ratio range.
const LOSS_RATIO_BINS: usize = 25;

/// Error for malformed vulnerability functions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VulnerabilityError {
    /// Fewer than two points: nothing to interpolate.
    #[error("vulnerability function needs at least two points, got {0}")]
    TooFewPoints(usize),
    /// Intensity abscissae must strictly increase.
    #[error("vulnerability function intensities must be strictly increasing")]
    NonIncreasingImls,
    /// Loss ratios must stay inside [0, 1].
    #[error("loss ratio {0} is outside [0, 1]")]
    RatioOutOfRange(f64),
}

/// Piecewise-linear vulnerability function: intensity to mean loss ratio.
#[derive(Debug, Clone, PartialEq)]
pub struct VulnerabilityFunction {
    imls: Vec<f64>,
    ratios: Vec<f64>,
}

impl VulnerabilityFunction {
    /// Build from (intensity, loss ratio) pairs.
    pub fn new(points: Vec<(f64, f64)>) -> Result<Self, VulnerabilityError> {
        if points.len() < 2 {
            return Err(VulnerabilityError::TooFewPoints(points.len()));
        }
        if !points.windows(2).all(|w| w[0].0 < w[1].0) {
            return Err(VulnerabilityError::NonIncreasingImls);
        }
        for &(_, ratio) in &points {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(VulnerabilityError::RatioOutOfRange(ratio));
            }
        }
        let (imls, ratios) = points.into_iter().unzip();
        Ok(Self { imls, ratios })
    }

    /// Loss ratio for one ground-motion value.
    ///
    /// Below the defined range the ratio is zero (no damage); above it the
    /// last ratio applies; inside, linear interpolation.
    pub fn loss_ratio(&self, gmv: f64) -> f64 {
        let first = self.imls[0];
        let last = self.imls[self.imls.len() - 1];
        if gmv < first {
            return 0.0;
        }
        if gmv > last {
            return self.ratios[self.ratios.len() - 1];
        }
        match self.imls.binary_search_by(|iml| iml.partial_cmp(&gmv).unwrap_or(std::cmp::Ordering::Less)) {
            Ok(i) => self.ratios[i],
            Err(i) => {
                let (x0, x1) = (self.imls[i - 1], self.imls[i]);
                let (y0, y1) = (self.ratios[i - 1], self.ratios[i]);
                y0 + (gmv - x0) / (x1 - x0) * (y1 - y0)
            }
        }
    }

    /// Largest loss ratio the function can produce.
    pub fn max_loss_ratio(&self) -> f64 {
        self.ratios.iter().copied().fold(0.0, f64::max)
    }
}

/// Loss ratios for a sequence of ground-motion values.
pub fn compute_loss_ratios(vf: &VulnerabilityFunction, gmvs: &[f64]) -> Vec<f64> {
    gmvs.iter().map(|&gmv| vf.loss_ratio(gmv)).collect()
}

/// Canonical loss-ratio bin edges: a linear range from zero to the
/// function's largest ratio.
pub fn loss_ratio_range(vf: &VulnerabilityFunction) -> Vec<f64> {
    let max = vf.max_loss_ratio();
    (0..LOSS_RATIO_BINS)
        .map(|i| max * i as f64 / (LOSS_RATIO_BINS - 1) as f64)
        .collect()
}

/// Cumulative exceedance histogram: for each bin edge, how many loss ratios
/// reach or exceed it.
pub fn cumulative_exceedance_histogram(loss_ratios: &[f64], range: &[f64]) -> Vec<u64> {
    range
        .iter()
        .map(|&edge| loss_ratios.iter().filter(|&&r| r >= edge).count() as u64)
        .collect()
}

/// Rates of exceedance over the total simulated time span.
pub fn rates_of_exceedance(cumulative_histogram: &[u64], tses: f64) -> Vec<f64> {
    cumulative_histogram
        .iter()
        .map(|&count| count as f64 / tses)
        .collect()
}

/// Per-event aggregate loss ratio over all sites, from GMF rows of one IMT.
///
/// Rows are grouped by event; each event's loss is the mean loss ratio over
/// the rows that reference it.
pub fn event_loss_table(
    rows: &[GmfRow],
    imt_index: usize,
    vf: &VulnerabilityFunction,
) -> Vec<(EventId, f64)> {
    let mut sums: BTreeMap<EventId, (f64, u64)> = BTreeMap::new();
    for row in rows {
        let gmv = f64::from(row.gmvs[imt_index]);
        let entry = sums.entry(row.eid).or_insert((0.0, 0));
        entry.0 += vf.loss_ratio(gmv);
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(eid, (sum, count))| (eid, sum / count as f64))
        .collect()
}
