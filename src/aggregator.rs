//! The reduction step of the map-reduce pipeline.
//!
//! The `Aggregator` is the single writer of the run: it owns the event-id
//! counter, the global row offset, the per-site range lists and the
//! per-realization probability maps. Worker tasks never touch these; they
//! only produce inputs for the aggregator to apply. The scheduler invokes
//! the aggregator serially, in task completion order, which the probability
//! fold tolerates because the Bernoulli combination is commutative — the
//! counters are not, hence the single-writer rule.

use std::collections::BTreeMap;

use crate::expander::{EventExpander, ExpanderError};
use crate::gmf::{CurveContribution, GmfResult};
use crate::params::EngineParams;
use crate::store::{paths, AttrValue, Datastore};
use crate::types::{
    Event, GlobalSiteRange, GmfRow, LevelMismatch, ProbabilityMap, RealizationId, Rupture, SiteId,
};
use crate::MAX_GMF_ROWS;

/// Error raised while folding batch results.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AggregatorError {
    /// Event expansion failed or produced a wrong id sequence.
    #[error(transparent)]
    Expansion(#[from] ExpanderError),
    /// The GMF row table outgrew its 32-bit offset space.
    #[error("the GMF row table would exceed {MAX_GMF_ROWS} rows")]
    RowOverflow,
    /// A contribution referenced a realization outside the dense range.
    #[error("contribution references unknown realization {0}")]
    UnknownRealization(RealizationId),
    /// A contribution did not match the probability map layout.
    #[error(transparent)]
    Level(#[from] LevelMismatch),
    /// Underlying datastore failure.
    #[error("datastore error: {0}")]
    Store(String),
}

impl AggregatorError {
    /// Wrap a store error.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::Store(e.to_string())
    }
}

/// Read-only snapshot of the aggregation once the reduction has completed.
#[derive(Debug)]
pub struct AggregatorOutput {
    /// Per-realization probability maps, dense by realization index.
    pub pmaps: Vec<ProbabilityMap>,
    /// Per-site global row ranges, concatenated in arrival order.
    pub site_ranges: BTreeMap<SiteId, Vec<GlobalSiteRange>>,
    /// Total GMF rows persisted.
    pub rows_written: u64,
    /// Total events persisted.
    pub num_events: u64,
    /// Total ruptures persisted.
    pub num_ruptures: u64,
    /// Every sampled rupture, in serial order.
    pub ruptures: Vec<Rupture>,
}

/// Streaming accumulator for sampling and ground-motion results.
pub struct Aggregator<'a, D: Datastore> {
    store: &'a D,
    expander: EventExpander<'a>,
    params: &'a EngineParams,
    next_eid: u64,
    row_offset: u64,
    site_ranges: BTreeMap<SiteId, Vec<GlobalSiteRange>>,
    pmaps: Vec<ProbabilityMap>,
    ruptures: Vec<Rupture>,
    num_events: u64,
}

impl<'a, D: Datastore> Aggregator<'a, D> {
    /// Create an empty aggregator with one probability map per realization.
    pub fn new(
        store: &'a D,
        expander: EventExpander<'a>,
        params: &'a EngineParams,
        num_realizations: usize,
    ) -> Self {
        let num_levels = params.imtls.total_levels();
        Self {
            store,
            expander,
            params,
            next_eid: 0,
            row_offset: 0,
            site_ranges: BTreeMap::new(),
            pmaps: (0..num_realizations)
                .map(|_| ProbabilityMap::new(num_levels))
                .collect(),
            ruptures: Vec::new(),
            num_events: 0,
        }
    }

    /// Persist one batch of sampled ruptures and their expanded events.
    ///
    /// Event ids are drawn from the aggregator's counter and cross-checked
    /// against the dense sequence the rupture set requires; a mismatch is a
    /// bug in sampling or expansion and aborts the run.
    pub fn persist_ruptures(&mut self, mut batch: Vec<Rupture>) -> Result<(), AggregatorError> {
        if batch.is_empty() {
            return Ok(());
        }
        batch.sort_by_key(|r| r.serial);

        let base_eid = self.next_eid;
        let (events, next_eid) = self.expander.expand(&batch, base_eid)?;
        self.expander.verify_sequence(&batch, &events, base_eid)?;

        self.store
            .extend(paths::RUPTURES, &batch)
            .map_err(AggregatorError::from_store)?;
        self.store
            .extend(paths::EVENTS, &events)
            .map_err(AggregatorError::from_store)?;
        self.bump_nbytes(paths::EVENTS, events.len() as u64 * size_of_event());

        tracing::debug!(
            ruptures = batch.len(),
            events = events.len(),
            next_eid,
            "persisted rupture batch"
        );

        self.next_eid = next_eid;
        self.num_events += events.len() as u64;
        self.ruptures.extend(batch);
        Ok(())
    }

    /// Fold one ground-motion task result into the run state.
    pub fn reduce_gmf(&mut self, result: GmfResult) -> Result<(), AggregatorError> {
        if !result.rows.is_empty() {
            let appended = result.rows.len() as u64;
            let new_offset = self.row_offset + appended;
            if new_offset >= MAX_GMF_ROWS {
                return Err(AggregatorError::RowOverflow);
            }
            // Translate task-relative ranges by the offset *before*
            // advancing it; both steps happen under the reducer's
            // serialization, so no other writer can interleave.
            let offset = self.row_offset as u32;
            for range in &result.site_ranges {
                self.site_ranges
                    .entry(range.sid)
                    .or_default()
                    .push(GlobalSiteRange {
                        sid: range.sid,
                        start: range.start + offset,
                        stop: range.stop + offset,
                    });
            }
            self.row_offset = new_offset;

            self.store
                .extend(paths::GMF_ROWS, &result.rows)
                .map_err(AggregatorError::from_store)?;
            let row_bytes = appended * GmfRow::nominal_size(self.params.imtls.num_imts());
            self.bump_nbytes(paths::GMF_ROWS, row_bytes);
        }

        for CurveContribution { rlz, sid, poes } in result.curves {
            let pmap = self
                .pmaps
                .get_mut(rlz.index())
                .ok_or(AggregatorError::UnknownRealization(rlz))?;
            pmap.update(sid, &poes)?;
        }

        tracing::debug!(
            group = %result.group_id,
            rows = self.row_offset,
            "reduced ground-motion batch"
        );
        Ok(())
    }

    /// Keep the running byte-size attribute of a dataset current.
    ///
    /// Size tracking is progress reporting only: a store failure here is
    /// reported but must never abort the run.
    fn bump_nbytes(&self, path: &str, added: u64) {
        let current = self
            .store
            .get_attr(path, "nbytes")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        if let Err(e) = self
            .store
            .set_attr(path, "nbytes", AttrValue::U64(current + added))
        {
            tracing::warn!(path, error = %e, "failed to update byte counter");
        }
    }

    /// Current event-id counter (the next id to assign).
    pub fn next_eid(&self) -> u64 {
        self.next_eid
    }

    /// Ruptures persisted so far, in arrival order.
    pub fn ruptures(&self) -> &[Rupture] {
        &self.ruptures
    }

    /// Rows appended so far.
    pub fn rows_written(&self) -> u64 {
        self.row_offset
    }

    /// Finish the reduction and expose the read-only outcome.
    pub fn finish(self) -> AggregatorOutput {
        let mut ruptures = self.ruptures;
        ruptures.sort_by_key(|r| r.serial);
        AggregatorOutput {
            pmaps: self.pmaps,
            site_ranges: self.site_ranges,
            rows_written: self.row_offset,
            num_events: self.num_events,
            num_ruptures: ruptures.len() as u64,
            ruptures,
        }
    }
}

/// Nominal persisted size of one event record.
fn size_of_event() -> u64 {
    std::mem::size_of::<Event>() as u64
}
