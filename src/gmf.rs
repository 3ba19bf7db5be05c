//! Ground-motion field computation.
//!
//! For a block of ruptures and a site collection, draws per-site, per-IMT,
//! per-event ground-motion values from the distributions supplied by the
//! external ground-motion model, optionally filters values below the
//! configured minimum intensity, and (when hazard curves are requested)
//! converts the same values into probability-of-exceedance contributions in
//! a single pass, avoiding a second read of the GMF table.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

use crate::expander::ExpanderError;
use crate::params::EngineParams;
use crate::seeds::{derive_seed2, standard_normal};
use crate::store::{paths, Datastore};
use crate::types::{
    Event, GmfRow, GroupId, RealizationId, Rupture, RuptureBlock, SiteCollection, SiteId,
    SiteRange,
};

/// Domain error from the external ground-motion model.
///
/// Fatal and never retried: no meaningful fallback ground motion exists for
/// a rupture/site combination the model cannot handle.
#[derive(Debug, Clone, thiserror::Error)]
#[error("ground-motion model failed on rupture {serial}: {reason}")]
pub struct GmmError {
    /// Serial of the offending rupture.
    pub serial: u32,
    /// Model-supplied failure description.
    pub reason: String,
}

/// Error raised during ground-motion computation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GmfError {
    /// The ground-motion model failed.
    #[error(transparent)]
    Gmm(#[from] GmmError),
    /// The model returned arrays of the wrong shape.
    #[error("ground-motion model returned {got_sites}x{got_imts} values, expected {sites}x{imts}")]
    BadModelOutput {
        /// Expected site count.
        sites: usize,
        /// Expected IMT count.
        imts: usize,
        /// Returned site count.
        got_sites: usize,
        /// Returned IMT count.
        got_imts: usize,
    },
    /// Event expansion failed while resolving a stored batch.
    #[error(transparent)]
    Expansion(#[from] ExpanderError),
    /// Underlying datastore failure while resolving a stored batch.
    #[error("datastore error: {0}")]
    Store(String),
}

impl GmfError {
    /// Wrap a store error.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::Store(e.to_string())
    }
}

/// Log-space ground-motion distribution for one rupture: per-site, per-IMT
/// mean and standard deviation of `ln(gmv)`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundMotion {
    /// `means[site][imt]`.
    pub means: Vec<Vec<f64>>,
    /// `stddevs[site][imt]`.
    pub stddevs: Vec<Vec<f64>>,
}

/// External ground-motion model: pure and deterministic.
pub trait GroundMotionModel: Send + Sync {
    /// Evaluate the log-space ground-motion distribution of one rupture at
    /// every site, for every configured IMT.
    fn evaluate(
        &self,
        rupture: &Rupture,
        sites: &SiteCollection,
        imts: &[String],
    ) -> Result<GroundMotion, GmmError>;
}

/// Reference attenuation model for tests and demonstration runs.
///
/// Log-mean decays with epicentral distance and grows with magnitude; the
/// per-IMT scale drops geometrically so different IMTs produce different
/// values.
#[derive(Debug, Clone)]
pub struct SimpleAttenuationModel {
    /// Base log-intensity at zero distance for magnitude zero.
    pub base: f64,
    /// Magnitude scaling coefficient.
    pub mag_coeff: f64,
    /// Distance attenuation coefficient.
    pub dist_coeff: f64,
    /// Log-space standard deviation, identical across sites and IMTs.
    pub stddev: f64,
}

impl Default for SimpleAttenuationModel {
    fn default() -> Self {
        Self {
            base: -4.0,
            mag_coeff: 1.0,
            dist_coeff: 1.5,
            stddev: 0.5,
        }
    }
}

impl GroundMotionModel for SimpleAttenuationModel {
    fn evaluate(
        &self,
        rupture: &Rupture,
        sites: &SiteCollection,
        imts: &[String],
    ) -> Result<GroundMotion, GmmError> {
        let mut means = Vec::with_capacity(sites.len());
        let mut stddevs = Vec::with_capacity(sites.len());
        for site in sites.sites() {
            let dx = site.lon - rupture.hypocenter.lon;
            let dy = site.lat - rupture.hypocenter.lat;
            // Flat-earth degrees are fine for a reference model.
            let distance = (dx * dx + dy * dy).sqrt() * 111.0 + rupture.hypocenter.depth_km;
            let base_mean =
                self.base + self.mag_coeff * rupture.magnitude - self.dist_coeff * (distance + 10.0).ln();
            let site_means: Vec<f64> = (0..imts.len())
                .map(|i| base_mean - 0.3 * i as f64)
                .collect();
            means.push(site_means);
            stddevs.push(vec![self.stddev; imts.len()]);
        }
        Ok(GroundMotion { means, stddevs })
    }
}

/// Input of one ground-motion task: either freshly sampled ruptures carried
/// in memory, or a reference into the persisted rupture store for
/// re-simulation runs.
#[derive(Debug, Clone)]
pub enum RuptureInput {
    /// Ruptures and their expanded events from the current sampling run.
    Fresh {
        /// The rupture block.
        block: RuptureBlock,
        /// Events of the block's ruptures, in eid order.
        events: Vec<Event>,
    },
    /// Ruptures to reload from the datastore.
    Stored {
        /// Group to replay.
        group_id: GroupId,
        /// Serial range `[start, stop)` of the ruptures to reload.
        serials: (u32, u32),
    },
}

/// A resolved batch: concrete ruptures plus their events.
#[derive(Debug, Clone)]
pub struct ResolvedBatch {
    /// The rupture block.
    pub block: RuptureBlock,
    /// Events of the block's ruptures.
    pub events: Vec<Event>,
}

impl RuptureInput {
    /// Resolve to concrete ruptures, reading the `ruptures` and `events`
    /// datasets for stored batches.
    pub fn resolve<D: Datastore>(self, store: &D) -> Result<ResolvedBatch, GmfError> {
        match self {
            RuptureInput::Fresh { block, events } => Ok(ResolvedBatch { block, events }),
            RuptureInput::Stored { group_id, serials } => {
                let (start, stop) = serials;
                let mut ruptures: Vec<Rupture> = store
                    .read::<Rupture>(paths::RUPTURES)
                    .map_err(GmfError::from_store)?
                    .into_iter()
                    .filter(|r| r.group_id == group_id && r.serial >= start && r.serial < stop)
                    .collect();
                ruptures.sort_by_key(|r| r.serial);
                let events: Vec<Event> = store
                    .read::<Event>(paths::EVENTS)
                    .map_err(GmfError::from_store)?
                    .into_iter()
                    .filter(|e| {
                        e.group_id == group_id
                            && e.rupture_serial >= start
                            && e.rupture_serial < stop
                    })
                    .collect();
                Ok(ResolvedBatch {
                    block: RuptureBlock { group_id, ruptures },
                    events,
                })
            }
        }
    }
}

/// Per-site probability-of-exceedance contribution for one realization.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveContribution {
    /// Realization the contribution belongs to.
    pub rlz: RealizationId,
    /// Site the contribution belongs to.
    pub sid: SiteId,
    /// One probability per flattened (IMT, level) cell.
    pub poes: Vec<f64>,
}

/// Result of one ground-motion task, consumed by the reducer.
#[derive(Debug, Clone)]
pub struct GmfResult {
    /// Group the batch came from.
    pub group_id: GroupId,
    /// Rows in site-major order; empty when GMF persistence is disabled.
    pub rows: Vec<GmfRow>,
    /// Task-relative contiguous row runs, one per site with rows.
    pub site_ranges: Vec<SiteRange>,
    /// Curve contributions; empty unless hazard curves were requested.
    pub curves: Vec<CurveContribution>,
}

/// Computes ground-motion fields for rupture batches.
pub struct GmfComputer<'a, G: GroundMotionModel> {
    gmm: &'a G,
    sites: &'a SiteCollection,
    params: &'a EngineParams,
}

impl<'a, G: GroundMotionModel> GmfComputer<'a, G> {
    /// Create a computer over one site collection and configuration.
    pub fn new(gmm: &'a G, sites: &'a SiteCollection, params: &'a EngineParams) -> Self {
        Self { gmm, sites, params }
    }

    /// Compute GMFs (and optionally curve contributions) for one batch.
    pub fn compute(&self, batch: &ResolvedBatch) -> Result<GmfResult, GmfError> {
        let imts = self.params.imtls.imt_names();
        let num_imts = imts.len();
        let num_sites = self.sites.len();

        // Evaluate the model once per rupture, validating shapes up front.
        let mut motions = Vec::with_capacity(batch.block.len());
        for rupture in &batch.block.ruptures {
            let gm = self.gmm.evaluate(rupture, self.sites, imts)?;
            if gm.means.len() != num_sites
                || gm.stddevs.len() != num_sites
                || gm.means.iter().any(|m| m.len() != num_imts)
                || gm.stddevs.iter().any(|s| s.len() != num_imts)
            {
                return Err(GmfError::BadModelOutput {
                    sites: num_sites,
                    imts: num_imts,
                    got_sites: gm.means.len(),
                    got_imts: gm.means.first().map(Vec::len).unwrap_or(0),
                });
            }
            motions.push(gm);
        }

        let events_by_serial = group_events(&batch.events);
        let truncation = self.params.truncation_level;
        let min_iml = self.params.min_intensity.as_deref();
        let want_rows = self.params.ground_motion_fields;
        let want_curves = self.params.hazard_curves_from_gmfs;
        let trials = self.params.trials_per_realization() as f64;

        let mut rows: Vec<GmfRow> = Vec::new();
        let mut site_ranges: Vec<SiteRange> = Vec::new();
        // (rlz, sid) -> exceedance counts per flattened cell.
        let mut counts: BTreeMap<(RealizationId, SiteId), Vec<u64>> = BTreeMap::new();

        // Site-major iteration keeps each site's rows contiguous within the
        // task, which is what the per-site range bookkeeping relies on.
        for site in self.sites.sites() {
            let site_start = rows.len() as u32;
            let site_index = site.sid.index();
            for (rupture, gm) in batch.block.ruptures.iter().zip(&motions) {
                let Some(events) = events_by_serial.get(&rupture.serial) else {
                    continue;
                };
                let means = &gm.means[site_index];
                let stddevs = &gm.stddevs[site_index];
                for event in events {
                    let gmvs = draw_gmvs(
                        self.params.master_seed,
                        event.eid.0,
                        u64::from(site.sid.0),
                        means,
                        stddevs,
                        truncation,
                    );
                    let gmvs = match apply_min_intensity(gmvs, min_iml) {
                        Some(gmvs) => gmvs,
                        // Below threshold everywhere: the row is silently
                        // omitted, reflected only in the row count.
                        None => continue,
                    };

                    if want_curves {
                        let cells = counts
                            .entry((event.rlz, site.sid))
                            .or_insert_with(|| vec![0; self.params.imtls.total_levels()]);
                        accumulate_exceedances(&self.params.imtls, &gmvs, cells);
                    }
                    if want_rows {
                        rows.push(GmfRow {
                            rlz: event.rlz,
                            sid: site.sid,
                            eid: event.eid,
                            gmvs,
                        });
                    }
                }
            }
            let site_stop = rows.len() as u32;
            if site_stop > site_start {
                site_ranges.push(SiteRange {
                    sid: site.sid,
                    start: site_start,
                    stop: site_stop,
                });
            }
        }

        let curves = counts
            .into_iter()
            .map(|((rlz, sid), cells)| CurveContribution {
                rlz,
                sid,
                poes: cells
                    .into_iter()
                    .map(|c| (c as f64 / trials).min(1.0))
                    .collect(),
            })
            .collect();

        Ok(GmfResult {
            group_id: batch.block.group_id,
            rows,
            site_ranges,
            curves,
        })
    }
}

/// Group events by rupture serial, preserving eid order within a rupture.
fn group_events(events: &[Event]) -> BTreeMap<u32, Vec<Event>> {
    let mut by_serial: BTreeMap<u32, Vec<Event>> = BTreeMap::new();
    for event in events {
        by_serial.entry(event.rupture_serial).or_default().push(*event);
    }
    by_serial
}

/// Draw the per-IMT ground-motion values of one (event, site) pair.
///
/// The ChaCha stream is seeded from (master, eid, sid), so a value depends
/// only on identities, never on iteration order.
fn draw_gmvs(
    master_seed: u64,
    eid: u64,
    sid: u64,
    means: &[f64],
    stddevs: &[f64],
    truncation: Option<f64>,
) -> Vec<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(derive_seed2(master_seed, eid, sid));
    means
        .iter()
        .zip(stddevs)
        .map(|(&mean, &stddev)| {
            let mut eps = standard_normal(&mut rng);
            if let Some(t) = truncation {
                eps = eps.clamp(-t, t);
            }
            (mean + eps * stddev).exp() as f32
        })
        .collect()
}

/// Zero out sub-threshold values; `None` when every IMT is below threshold.
fn apply_min_intensity(mut gmvs: Vec<f32>, min_iml: Option<&[f32]>) -> Option<Vec<f32>> {
    let Some(min_iml) = min_iml else {
        return Some(gmvs);
    };
    let mut any = false;
    for (gmv, &min) in gmvs.iter_mut().zip(min_iml) {
        if *gmv < min {
            *gmv = 0.0;
        } else {
            any = true;
        }
    }
    any.then_some(gmvs)
}

/// Add one event's exceedances into the per-cell counters.
fn accumulate_exceedances(
    imtls: &crate::params::ImtLevels,
    gmvs: &[f32],
    cells: &mut [u64],
) {
    for imt_index in 0..imtls.num_imts() {
        let gmv = f64::from(gmvs[imt_index]);
        let range = imtls.cell_range(imt_index);
        for (cell, &level) in cells[range.clone()]
            .iter_mut()
            .zip(imtls.levels_for(imt_index))
        {
            if gmv >= level {
                *cell += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expander::EventExpander;
    use crate::params::{EngineParams, ImtLevels};
    use crate::types::{Hypocenter, LogicTree};

    fn params() -> EngineParams {
        let imtls = ImtLevels::new(vec![
            ("PGA".to_string(), vec![1e-6, 1e-3]),
            ("SA(0.5)".to_string(), vec![1e-6]),
        ])
        .unwrap();
        let mut p = EngineParams::new(imtls);
        p.hazard_curves_from_gmfs = true;
        p
    }

    fn batch(n_occ: u32, num_rlzs: u16) -> (ResolvedBatch, LogicTree) {
        let lt = LogicTree::full_enumeration(num_rlzs, &[GroupId(0)]).unwrap();
        let rupture = Rupture {
            serial: 0,
            group_id: GroupId(0),
            source_id: "s".to_string(),
            magnitude: 6.5,
            hypocenter: Hypocenter {
                lon: 10.0,
                lat: 45.0,
                depth_km: 5.0,
            },
            n_occ,
        };
        let expander = EventExpander::new(&lt, 42);
        let (events, _) = expander.expand(std::slice::from_ref(&rupture), 0).unwrap();
        (
            ResolvedBatch {
                block: RuptureBlock {
                    group_id: GroupId(0),
                    ruptures: vec![rupture],
                },
                events,
            },
            lt,
        )
    }

    #[test]
    fn test_rows_are_site_major_and_ranged() {
        let sites = SiteCollection::from_points(&[(10.0, 45.0), (10.3, 45.2)]);
        let p = params();
        let gmm = SimpleAttenuationModel::default();
        let computer = GmfComputer::new(&gmm, &sites, &p);
        let (batch, _lt) = batch(3, 2);

        let result = computer.compute(&batch).unwrap();
        // 3 occurrences x 2 realizations x 2 sites = 12 rows, no filtering.
        assert_eq!(result.rows.len(), 12);
        assert_eq!(result.site_ranges.len(), 2);

        // Each site's rows occupy exactly its recorded range.
        for range in &result.site_ranges {
            for row in &result.rows[range.start as usize..range.stop as usize] {
                assert_eq!(row.sid, range.sid);
            }
        }
        // Ranges tile the row vector without overlap.
        assert_eq!(result.site_ranges[0].start, 0);
        assert_eq!(result.site_ranges[0].stop, result.site_ranges[1].start);
        assert_eq!(result.site_ranges[1].stop, result.rows.len() as u32);
    }

    #[test]
    fn test_gmvs_are_deterministic() {
        let sites = SiteCollection::from_points(&[(10.0, 45.0)]);
        let p = params();
        let gmm = SimpleAttenuationModel::default();
        let computer = GmfComputer::new(&gmm, &sites, &p);
        let (batch, _lt) = batch(2, 1);

        let a = computer.compute(&batch).unwrap();
        let b = computer.compute(&batch).unwrap();
        assert_eq!(a.rows, b.rows);
    }

    #[test]
    fn test_min_intensity_drops_all_rows() {
        let sites = SiteCollection::from_points(&[(10.0, 45.0)]);
        let mut p = params();
        p.min_intensity = Some(vec![1e9, 1e9]);
        let gmm = SimpleAttenuationModel::default();
        let computer = GmfComputer::new(&gmm, &sites, &p);
        let (batch, _lt) = batch(2, 1);

        let result = computer.compute(&batch).unwrap();
        assert!(result.rows.is_empty());
        assert!(result.site_ranges.is_empty());
    }

    #[test]
    fn test_curve_contributions_bounded() {
        let sites = SiteCollection::from_points(&[(10.0, 45.0)]);
        let mut p = params();
        p.ses_per_logic_tree_path = 1;
        let gmm = SimpleAttenuationModel::default();
        let computer = GmfComputer::new(&gmm, &sites, &p);
        let (batch, _lt) = batch(5, 1);

        let result = computer.compute(&batch).unwrap();
        assert!(!result.curves.is_empty());
        for c in &result.curves {
            assert_eq!(c.poes.len(), p.imtls.total_levels());
            assert!(c.poes.iter().all(|&poe| (0.0..=1.0).contains(&poe)));
        }
    }

    #[test]
    fn test_failing_model_aborts() {
        struct FailingModel;
        impl GroundMotionModel for FailingModel {
            fn evaluate(
                &self,
                rupture: &Rupture,
                _sites: &SiteCollection,
                _imts: &[String],
            ) -> Result<GroundMotion, GmmError> {
                Err(GmmError {
                    serial: rupture.serial,
                    reason: "unsupported magnitude".to_string(),
                })
            }
        }
        let sites = SiteCollection::from_points(&[(10.0, 45.0)]);
        let p = params();
        let computer = GmfComputer::new(&FailingModel, &sites, &p);
        let (batch, _lt) = batch(1, 1);
        assert!(matches!(
            computer.compute(&batch),
            Err(GmfError::Gmm(GmmError { serial: 0, .. }))
        ));
    }

    #[test]
    fn test_stored_input_resolves_to_same_batch() {
        use crate::store::{Datastore, InMemoryDatastore};

        let (batch, _lt) = batch(2, 2);
        let store = InMemoryDatastore::new();
        store.extend("ruptures", &batch.block.ruptures).unwrap();
        store.extend("events", &batch.events).unwrap();

        let resolved = RuptureInput::Stored {
            group_id: GroupId(0),
            serials: (0, 1),
        }
        .resolve(&store)
        .unwrap();

        assert_eq!(resolved.block.ruptures, batch.block.ruptures);
        assert_eq!(resolved.events, batch.events);
    }
}
