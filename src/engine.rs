//! Run orchestration: sampling, ground-motion computation, aggregation and
//! statistics for one event-based calculation.

use chrono::Utc;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::aggregator::{Aggregator, AggregatorError, AggregatorOutput};
use crate::expander::EventExpander;
use crate::gmf::{GmfComputer, GmfError, GroundMotionModel, ResolvedBatch, RuptureInput};
use crate::params::{EngineParams, ForecastVariant, ParamsError};
use crate::sampler::{build_blocks, number_sources, sample_source, SamplerError};
use crate::scheduler::{PoolBuildError, WorkerPool};
use crate::stats::{compute_pmap_stats, make_hazard_map, HazardMap, Statistic, StatsError};
use crate::store::{paths, AttrValue, Datastore};
use crate::types::{
    Event, GmfRow, LevelMismatch, LogicTree, LogicTreeError, ProbabilityMap, Rupture,
    SeismicSource, SiteCollection,
};
use crate::{MAX_EVENTS, MAX_IMTS, MAX_SITES};

/// Top-level engine error: every fatal condition of a run converges here and
/// terminates it. There is no partial success.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid configuration.
    #[error(transparent)]
    Params(#[from] ParamsError),
    /// Malformed logic tree.
    #[error(transparent)]
    LogicTree(#[from] LogicTreeError),
    /// Rupture sampling failed (invalid geometry, serial exhaustion).
    #[error(transparent)]
    Sampler(#[from] SamplerError),
    /// Ground-motion computation failed.
    #[error(transparent)]
    Gmf(#[from] GmfError),
    /// Reduction failed (id sequence, row overflow, store failure).
    #[error(transparent)]
    Aggregator(#[from] AggregatorError),
    /// Statistics computation failed.
    #[error(transparent)]
    Stats(#[from] StatsError),
    /// Worker pool construction failed.
    #[error(transparent)]
    Pool(#[from] PoolBuildError),
    /// A curve contribution did not match the map layout.
    #[error(transparent)]
    Level(#[from] LevelMismatch),
    /// A global bound was exceeded. The fixed-width identifiers depend on
    /// these ceilings, so this is a hard failure, never a truncation.
    #[error("the event based engine is restricted to {max} {quantity}, got {got}")]
    Bounds {
        /// Bounded quantity name.
        quantity: &'static str,
        /// The ceiling.
        max: u64,
        /// The observed count.
        got: u64,
    },
    /// No ground-motion fields were produced although GMF output was
    /// requested; usually the minimum intensity is set above everything the
    /// model generates.
    #[error("no GMFs were generated, perhaps they were all below the minimum intensity threshold")]
    NoGmfsGenerated,
    /// Underlying datastore failure.
    #[error("datastore error: {0}")]
    Store(String),
}

impl EngineError {
    /// Wrap a store error.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::Store(e.to_string())
    }
}

/// Outcome of a completed run.
#[derive(Debug)]
pub struct HazardOutput {
    /// Identifier of the calculation.
    pub calculation_id: Uuid,
    /// Per-realization probability maps (empty curves when hazard curves
    /// were not requested).
    pub pmaps: Vec<ProbabilityMap>,
    /// Statistical curves by statistic name.
    pub stats: BTreeMap<String, ProbabilityMap>,
    /// Hazard maps by statistic name, when poes targets were configured.
    pub hazard_maps: BTreeMap<String, HazardMap>,
    /// Ruptures persisted.
    pub num_ruptures: u64,
    /// Events persisted.
    pub num_events: u64,
    /// GMF rows persisted.
    pub rows_written: u64,
}

/// Event-based hazard engine over one datastore and ground-motion model.
pub struct EventBasedEngine<'a, D: Datastore, G: GroundMotionModel> {
    store: &'a D,
    gmm: &'a G,
    logic_tree: LogicTree,
    sites: SiteCollection,
    params: EngineParams,
    calculation_id: Uuid,
}

impl<'a, D: Datastore, G: GroundMotionModel> EventBasedEngine<'a, D, G> {
    /// Create an engine, validating the configuration and the static
    /// bounds (site and IMT ceilings) up front.
    pub fn new(
        store: &'a D,
        gmm: &'a G,
        logic_tree: LogicTree,
        sites: SiteCollection,
        params: EngineParams,
    ) -> Result<Self, EngineError> {
        params.validate()?;
        check_bound("sites", sites.len() as u64, MAX_SITES)?;
        check_bound("imts", params.imtls.num_imts() as u64, MAX_IMTS)?;
        Ok(Self {
            store,
            gmm,
            logic_tree,
            sites,
            params,
            calculation_id: Uuid::new_v4(),
        })
    }

    /// The run identifier.
    pub fn calculation_id(&self) -> Uuid {
        self.calculation_id
    }

    /// The engine configuration.
    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    /// Run the full calculation over the given sources.
    pub fn execute(&self, sources: &[SeismicSource]) -> Result<HazardOutput, EngineError> {
        let num_rlzs = self.logic_tree.num_realizations();
        tracing::info!(realizations = num_rlzs, "starting event based calculation");

        self.store
            .set_attr("run", "calculation_id", AttrValue::Text(self.calculation_id.to_string()))
            .map_err(EngineError::from_store)?;
        self.store
            .set_attr("run", "start_time", AttrValue::Text(Utc::now().to_rfc3339()))
            .map_err(EngineError::from_store)?;
        self.store
            .set_attr("run", "params_hash", AttrValue::Text(self.params.params_hash()))
            .map_err(EngineError::from_store)?;
        self.store
            .extend(paths::RLZS_BY_GROUP, &self.logic_tree.group_records())
            .map_err(EngineError::from_store)?;

        let pool = WorkerPool::new(self.params.num_workers)?;
        let expander = EventExpander::new(&self.logic_tree, self.params.master_seed);
        let mut agg = Aggregator::new(self.store, expander, &self.params, num_rlzs);

        // Sampling phase: sources fan out to the pool; rupture persistence
        // and event-id assignment happen in the serialized reduction.
        let numbered = number_sources(sources)?;
        pool.map_reduce(
            numbered,
            |src| sample_source(&src, &self.params).map_err(EngineError::from),
            &mut agg,
            |agg, ruptures| agg.persist_ruptures(ruptures).map_err(EngineError::from),
        )?;

        self.estimate_gmf_size(agg.ruptures())?;
        self.sort_events()?;
        check_bound("events", agg.next_eid(), MAX_EVENTS)?;
        tracing::info!(
            ruptures = agg.ruptures().len(),
            events = agg.next_eid(),
            "stored ruptures and events"
        );

        let rupture_only =
            !self.params.ground_motion_fields && !self.params.hazard_curves_from_gmfs;
        if rupture_only || agg.ruptures().is_empty() {
            // Rupture/event-only mode, or nothing sampled: nothing left to
            // compute in parallel. The empty-result policy runs in finalize.
            let out = agg.finish();
            return self.finalize(out);
        }

        // Ground-motion phase over rupture blocks.
        let events = self
            .store
            .read::<Event>(paths::EVENTS)
            .map_err(EngineError::from_store)?;
        let tasks = batches_with_events(
            agg.ruptures().to_vec(),
            &events,
            self.params.rupture_budget,
        );
        let computer = GmfComputer::new(self.gmm, &self.sites, &self.params);
        pool.map_reduce(
            tasks,
            |batch| computer.compute(&batch).map_err(EngineError::from),
            &mut agg,
            |agg, result| agg.reduce_gmf(result).map_err(EngineError::from),
        )?;

        let out = agg.finish();
        self.finalize(out)
    }

    /// Re-aggregate the persisted ruptures and events into fresh probability
    /// maps, without touching the stored GMF table.
    ///
    /// Used for re-simulation from a previous run's rupture store; given the
    /// same seed and configuration it reproduces the in-run maps.
    pub fn replay(&self) -> Result<Vec<ProbabilityMap>, EngineError> {
        let mut params = self.params.clone();
        params.ground_motion_fields = false;
        params.hazard_curves_from_gmfs = true;

        let pool = WorkerPool::new(params.num_workers)?;
        let mut tasks: Vec<ResolvedBatch> = Vec::new();
        for group_id in self.logic_tree.groups() {
            let resolved = RuptureInput::Stored {
                group_id,
                serials: (0, u32::MAX),
            }
            .resolve(self.store)?;
            if resolved.block.is_empty() {
                continue;
            }
            tasks.extend(batches_with_events(
                resolved.block.ruptures,
                &resolved.events,
                params.rupture_budget,
            ));
        }

        let computer = GmfComputer::new(self.gmm, &self.sites, &params);
        let num_levels = params.imtls.total_levels();
        let mut pmaps = vec![ProbabilityMap::new(num_levels); self.logic_tree.num_realizations()];
        pool.map_reduce(
            tasks,
            |batch| computer.compute(&batch).map_err(EngineError::from),
            &mut pmaps,
            |pmaps, result| {
                for c in result.curves {
                    let pmap = pmaps
                        .get_mut(c.rlz.index())
                        .ok_or(AggregatorError::UnknownRealization(c.rlz))?;
                    pmap.update(c.sid, &c.poes)?;
                }
                Ok(())
            },
        )?;
        Ok(pmaps)
    }

    /// Post-run bookkeeping: index datasets, empty-result policy, statistics
    /// and hazard maps.
    fn finalize(&self, out: AggregatorOutput) -> Result<HazardOutput, EngineError> {
        if !out.site_ranges.is_empty() {
            self.write_site_indices(&out)?;
        } else if self.params.ground_motion_fields
            && self.params.forecast_variant == ForecastVariant::Poissonian
        {
            // Rupture-forecast variants legitimately produce empty event
            // sets; for Poissonian models an empty GMF table with GMF
            // output requested is a configuration mistake.
            return Err(EngineError::NoGmfsGenerated);
        }

        let mut stats = BTreeMap::new();
        let mut hazard_maps = BTreeMap::new();
        if self.params.hazard_curves_from_gmfs {
            let requested = self.requested_statistics();
            if !requested.is_empty() {
                tracing::info!("computing statistical hazard curves");
                let weights = self.logic_tree.weights();
                stats = compute_pmap_stats(&out.pmaps, &weights, &requested)?;
                for (name, pmap) in &stats {
                    self.write_curves(name, pmap)?;
                    if !self.params.poes.is_empty() {
                        let hmap = make_hazard_map(pmap, &self.params.imtls, &self.params.poes);
                        self.write_hazard_map(name, &hmap)?;
                        hazard_maps.insert(name.clone(), hmap);
                    }
                }
            }
        }

        self.store
            .set_attr("run", "stop_time", AttrValue::Text(Utc::now().to_rfc3339()))
            .map_err(EngineError::from_store)?;

        Ok(HazardOutput {
            calculation_id: self.calculation_id,
            pmaps: out.pmaps,
            stats,
            hazard_maps,
            num_ruptures: out.num_ruptures,
            num_events: out.num_events,
            rows_written: out.rows_written,
        })
    }

    /// The statistics the configuration asks for.
    fn requested_statistics(&self) -> Vec<Statistic> {
        let mut stats = Vec::new();
        if self.params.mean_hazard_curves {
            stats.push(Statistic::Mean);
        }
        stats.extend(self.params.quantiles.iter().map(|&q| Statistic::Quantile(q)));
        stats
    }

    /// Upper-bound estimate of the GMF table size, stored as an attribute
    /// and logged before the expensive phase starts.
    fn estimate_gmf_size(&self, ruptures: &[Rupture]) -> Result<(), EngineError> {
        let row_size = GmfRow::nominal_size(self.params.imtls.num_imts());
        let sites = self.sites.len() as u64;
        let expander = EventExpander::new(&self.logic_tree, self.params.master_seed);
        let rows: u64 = ruptures
            .iter()
            .map(|r| expander.expected_event_count(r) * sites)
            .sum();
        let nbytes = rows * row_size;
        if nbytes > 0 {
            self.store
                .set_attr(paths::EVENTS, "max_gmf_size", AttrValue::U64(nbytes))
                .map_err(EngineError::from_store)?;
            let qualifier = if self.params.min_intensity.is_some() {
                "less than "
            } else {
                ""
            };
            tracing::info!("estimating {qualifier}{nbytes} bytes of GMFs");
        }
        Ok(())
    }

    /// Re-sort the events dataset by eid before anything downstream reads
    /// it, isolating consumers from the scheduler's completion order.
    fn sort_events(&self) -> Result<(), EngineError> {
        if self.store.dataset_len(paths::EVENTS) == 0 {
            return Ok(());
        }
        let mut events = self
            .store
            .read::<Event>(paths::EVENTS)
            .map_err(EngineError::from_store)?;
        events.sort_by_key(|e| e.eid);
        self.store
            .replace(paths::EVENTS, events)
            .map_err(EngineError::from_store)?;
        Ok(())
    }

    /// Persist the per-site row ranges and the events-per-site summary.
    fn write_site_indices(&self, out: &AggregatorOutput) -> Result<(), EngineError> {
        tracing::info!("saving {}", paths::GMF_INDICES);
        let mut ranges = Vec::new();
        let mut events_by_sid = vec![0u32; self.sites.len()];
        for (sid, site_ranges) in &out.site_ranges {
            for range in site_ranges {
                ranges.push(*range);
                events_by_sid[sid.index()] += range.len();
            }
        }
        self.store
            .extend(paths::GMF_INDICES, &ranges)
            .map_err(EngineError::from_store)?;
        self.store
            .extend(paths::EVENTS_BY_SID, &events_by_sid)
            .map_err(EngineError::from_store)?;

        let total: u64 = events_by_sid.iter().map(|&n| u64::from(n)).sum();
        let max = events_by_sid.iter().copied().max().unwrap_or(0);
        let avg = total as f64 / self.sites.len().max(1) as f64;
        self.store
            .set_attr("gmf_data", "avg_events_by_sid", AttrValue::F64(avg))
            .map_err(EngineError::from_store)?;
        self.store
            .set_attr("gmf_data", "max_events_by_sid", AttrValue::U64(u64::from(max)))
            .map_err(EngineError::from_store)?;
        self.store
            .set_attr(
                "gmf_data",
                "imts",
                AttrValue::Text(self.params.imtls.imt_names().join(" ")),
            )
            .map_err(EngineError::from_store)?;
        Ok(())
    }

    /// Persist one statistic's curves as an `(N, L)` matrix.
    fn write_curves(&self, name: &str, pmap: &ProbabilityMap) -> Result<(), EngineError> {
        let num_levels = self.params.imtls.total_levels();
        let path = format!("{}/{}", paths::HCURVES, name);
        self.store
            .create_matrix(&path, self.sites.len(), num_levels)
            .map_err(EngineError::from_store)?;
        for sid in pmap.sites() {
            let curve = pmap.get(sid).expect("site listed by the map");
            let row: Vec<f32> = curve.poes.iter().map(|&p| p as f32).collect();
            self.store
                .write_row(&path, sid.index(), &row)
                .map_err(EngineError::from_store)?;
        }
        Ok(())
    }

    /// Persist one statistic's hazard map as an `(N, I * P)` matrix.
    fn write_hazard_map(&self, name: &str, hmap: &HazardMap) -> Result<(), EngineError> {
        let cols = self.params.imtls.num_imts() * hmap.poes.len();
        let path = format!("{}/{}", paths::HMAPS, name);
        self.store
            .create_matrix(&path, self.sites.len(), cols)
            .map_err(EngineError::from_store)?;
        self.store
            .set_attr(&path, "nbytes", AttrValue::U64((self.sites.len() * cols * 4) as u64))
            .map_err(EngineError::from_store)?;
        for (sid, levels) in &hmap.levels_by_site {
            let row: Vec<f32> = levels.iter().map(|&v| v as f32).collect();
            self.store
                .write_row(&path, sid.index(), &row)
                .map_err(EngineError::from_store)?;
        }
        Ok(())
    }
}

/// Split ruptures into budget-bounded blocks and attach each block's events.
fn batches_with_events(
    ruptures: Vec<Rupture>,
    events: &[Event],
    budget: u64,
) -> Vec<ResolvedBatch> {
    let mut events_by_serial: BTreeMap<u32, Vec<Event>> = BTreeMap::new();
    for event in events {
        events_by_serial
            .entry(event.rupture_serial)
            .or_default()
            .push(*event);
    }
    build_blocks(ruptures, budget)
        .into_iter()
        .map(|block| {
            let mut block_events = Vec::new();
            for rupture in &block.ruptures {
                if let Some(evs) = events_by_serial.get(&rupture.serial) {
                    block_events.extend(evs.iter().copied());
                }
            }
            ResolvedBatch {
                block,
                events: block_events,
            }
        })
        .collect()
}

/// Enforce one global ceiling.
fn check_bound(quantity: &'static str, got: u64, max: u64) -> Result<(), EngineError> {
    if got > max {
        return Err(EngineError::Bounds { quantity, max, got });
    }
    Ok(())
}
