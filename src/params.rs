//! Engine configuration.
//!
//! `EngineParams` plays the role the job configuration plays in a full
//! deployment: everything the core needs to run one calculation, validated
//! up front and fingerprinted for reproducibility audits.

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::canonical::fingerprint_hex;

/// Error for invalid engine configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParamsError {
    /// No intensity measure types were configured.
    #[error("no intensity measure types configured")]
    NoImts,
    /// An IMT has no levels or non-increasing levels.
    #[error("levels for {imt} must be a non-empty strictly increasing sequence")]
    BadLevels {
        /// Offending IMT name.
        imt: String,
    },
    /// The minimum-intensity vector does not match the IMT list.
    #[error("minimum intensity has {got} entries, expected one per IMT ({expected})")]
    BadMinIntensity {
        /// Expected entry count (number of IMTs).
        expected: usize,
        /// Supplied entry count.
        got: usize,
    },
    /// A quantile or hazard-map target is outside (0, 1).
    #[error("probability target {value} is outside (0, 1)")]
    BadProbability {
        /// Offending value.
        value: f64,
    },
    /// Zero stochastic event sets were requested.
    #[error("ses_per_logic_tree_path must be at least 1")]
    NoEventSets,
    /// Non-positive investigation time.
    #[error("investigation_time must be positive, got {0}")]
    BadInvestigationTime(f64),
}

/// Intensity measure types with their exceedance levels.
///
/// Levels are flattened IMT-major into one vector of length `L`; curve and
/// map arrays are indexed by the flattened cell index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImtLevels {
    imts: Vec<String>,
    levels: Vec<Vec<f64>>,
}

impl ImtLevels {
    /// Build from (IMT name, levels) pairs.
    ///
    /// Levels must be non-empty and strictly increasing per IMT.
    pub fn new(pairs: Vec<(String, Vec<f64>)>) -> Result<Self, ParamsError> {
        if pairs.is_empty() {
            return Err(ParamsError::NoImts);
        }
        for (imt, levels) in &pairs {
            let increasing = levels.windows(2).all(|w| w[0] < w[1]);
            if levels.is_empty() || !increasing {
                return Err(ParamsError::BadLevels { imt: imt.clone() });
            }
        }
        let (imts, levels) = pairs.into_iter().unzip();
        Ok(Self { imts, levels })
    }

    /// Number of intensity measure types.
    pub fn num_imts(&self) -> usize {
        self.imts.len()
    }

    /// Total number of (IMT, level) cells, the `L` of the run.
    pub fn total_levels(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// IMT names in configuration order.
    pub fn imt_names(&self) -> &[String] {
        &self.imts
    }

    /// Levels of the IMT at `imt_index`.
    pub fn levels_for(&self, imt_index: usize) -> &[f64] {
        &self.levels[imt_index]
    }

    /// Range of flattened cell indices covered by one IMT.
    pub fn cell_range(&self, imt_index: usize) -> Range<usize> {
        let start: usize = self.levels[..imt_index].iter().map(Vec::len).sum();
        start..start + self.levels[imt_index].len()
    }
}

/// How a zero-GMF outcome is interpreted.
///
/// For Poissonian source models an empty GMF table with ground-motion output
/// requested means the minimum intensity was set above everything the model
/// produces, which is a configuration mistake. Rupture-forecast models can
/// legitimately produce empty event sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForecastVariant {
    /// Classic Poissonian source model: zero GMFs is a fatal configuration
    /// error when GMF output was requested.
    Poissonian,
    /// Rupture-forecast model (UCERF-like): an empty result is expected and
    /// silent.
    RuptureForecast,
}

/// Full configuration of one event-based calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineParams {
    /// Number of stochastic event sets per logic-tree path.
    pub ses_per_logic_tree_path: u32,
    /// Investigation time span in years.
    pub investigation_time: f64,
    /// Occurrence budget per rupture block handed to the scheduler.
    pub rupture_budget: u64,
    /// Epsilon truncation for ground-motion sampling, in standard
    /// deviations; `None` means untruncated.
    pub truncation_level: Option<f64>,
    /// Intensity measure types and levels.
    pub imtls: ImtLevels,
    /// Per-IMT minimum intensity; ground motions below the threshold for
    /// every IMT are dropped. `None` disables filtering.
    pub min_intensity: Option<Vec<f32>>,
    /// Whether GMF rows are persisted.
    pub ground_motion_fields: bool,
    /// Whether hazard curves are accumulated from the GMFs in the same pass.
    pub hazard_curves_from_gmfs: bool,
    /// Whether the weighted mean curve is computed.
    pub mean_hazard_curves: bool,
    /// Quantile levels for statistical curves.
    pub quantiles: Vec<f64>,
    /// Probability-of-exceedance targets for hazard maps.
    pub poes: Vec<f64>,
    /// Master seed for all stochastic draws.
    pub master_seed: u64,
    /// Worker threads for the pool; 0 picks the scheduler default.
    pub num_workers: usize,
    /// Zero-GMF interpretation for this run.
    pub forecast_variant: ForecastVariant,
}

impl EngineParams {
    /// Create a configuration with library defaults for everything except
    /// the intensity measure levels.
    pub fn new(imtls: ImtLevels) -> Self {
        Self {
            ses_per_logic_tree_path: 1,
            investigation_time: 1.0,
            rupture_budget: 1000,
            truncation_level: Some(3.0),
            imtls,
            min_intensity: None,
            ground_motion_fields: true,
            hazard_curves_from_gmfs: false,
            mean_hazard_curves: true,
            quantiles: Vec::new(),
            poes: Vec::new(),
            master_seed: 42,
            num_workers: 0,
            forecast_variant: ForecastVariant::Poissonian,
        }
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.ses_per_logic_tree_path == 0 {
            return Err(ParamsError::NoEventSets);
        }
        if !(self.investigation_time > 0.0) {
            return Err(ParamsError::BadInvestigationTime(self.investigation_time));
        }
        if let Some(min_iml) = &self.min_intensity {
            if min_iml.len() != self.imtls.num_imts() {
                return Err(ParamsError::BadMinIntensity {
                    expected: self.imtls.num_imts(),
                    got: min_iml.len(),
                });
            }
        }
        for &value in self.quantiles.iter().chain(&self.poes) {
            if !(0.0..1.0).contains(&value) || value == 0.0 {
                return Err(ParamsError::BadProbability { value });
            }
        }
        Ok(())
    }

    /// Number of exceedance trials per realization: one per stochastic
    /// event set.
    pub fn trials_per_realization(&self) -> u64 {
        u64::from(self.ses_per_logic_tree_path)
    }

    /// Canonical fingerprint of the configuration.
    pub fn params_hash(&self) -> String {
        fingerprint_hex(self)
    }
}
