//! # hazard-kernel
//!
//! Event-based probabilistic seismic hazard engine.
//!
//! The engine answers one question:
//!
//! > Given a source model and a logic tree, what is the probability that
//! > ground motion at each site **exceeds each intensity level** within the
//! > investigation time?
//!
//! ## Core Pipeline
//!
//! 1. Sample a stochastic rupture catalog from each source, deterministically
//! 2. Expand ruptures into events (rupture occurrence x realization)
//! 3. Simulate ground-motion fields per event across the site collection
//! 4. Fold exceedance contributions into per-realization probability maps
//! 5. Combine the maps into weighted statistics and hazard maps
//!
//! ## Architecture
//!
//! ```text
//! Sources → RuptureSampler → EventExpander → GmfComputer → Aggregator
//!                                 ↓                            ↓
//!                           Datastore (events, GMF rows)  ProbabilityMaps
//!                                                             ↓
//!                                                      StatisticsReducer
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same master seed + same source order → bit-identical rupture catalog
//! - Ground-motion values depend only on (seed, event id, site id)
//! - Event ids are dense and re-sorted before downstream reads

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregator;
pub mod canonical;
pub mod engine;
pub mod expander;
pub mod gmf;
pub mod loss;
pub mod params;
pub mod sampler;
pub mod scheduler;
pub mod seeds;
pub mod stats;
pub mod store;
pub mod types;

// Re-exports
pub use aggregator::{Aggregator, AggregatorError, AggregatorOutput};
pub use canonical::{fingerprint64, fingerprint_hex, rupture_set_fingerprint, to_canonical_bytes};
pub use engine::{EngineError, EventBasedEngine, HazardOutput};
pub use expander::{EventExpander, ExpanderError};
pub use gmf::{
    CurveContribution, GmfComputer, GmfError, GmfResult, GmmError, GroundMotion,
    GroundMotionModel, ResolvedBatch, RuptureInput, SimpleAttenuationModel,
};
pub use loss::{
    compute_loss_ratios, cumulative_exceedance_histogram, event_loss_table, loss_ratio_range,
    rates_of_exceedance, VulnerabilityError, VulnerabilityFunction,
};
pub use params::{EngineParams, ForecastVariant, ImtLevels, ParamsError};
pub use sampler::{build_blocks, number_sources, sample_source, NumberedSource, SamplerError};
pub use scheduler::{PoolBuildError, WorkerPool};
pub use stats::{compute_pmap_stats, make_hazard_map, HazardMap, Statistic, StatsError};
pub use store::{AttrValue, Datastore, InMemoryDatastore, Matrix};
pub use types::{
    Event, EventId, GlobalSiteRange, GmfRow, GroupId, Hypocenter, LogicTree, MagnitudeRate,
    ProbabilityCurve, ProbabilityMap, Realization, RealizationId, Rupture, RuptureBlock,
    SeismicSource, Site, SiteCollection, SiteId, SiteRange,
};

/// Maximum number of sites; the GMF row layout stores site ids in 16 bits of
/// address space.
pub const MAX_SITES: u64 = 1 << 16;

/// Maximum number of distinct events per run.
pub const MAX_EVENTS: u64 = 1 << 32;

/// Maximum number of intensity measure types.
pub const MAX_IMTS: u64 = 1 << 8;

/// Maximum number of GMF rows; the global row offset is a 32-bit index.
pub const MAX_GMF_ROWS: u64 = 1 << 32;
