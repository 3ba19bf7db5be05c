//! Datastore contracts.
//!
//! The engine persists through an append-only typed dataset store keyed by
//! path. Record datasets grow incrementally without a pre-declared final
//! size; matrix datasets are created with a fixed shape and filled row by
//! row. Attribute metadata hangs off any path.

pub mod memory;

use serde::{Deserialize, Serialize};

/// Canonical dataset paths used by the engine.
pub mod paths {
    /// Sampled ruptures, in extension order (serial-sorted per batch).
    pub const RUPTURES: &str = "ruptures";
    /// Stochastic events; re-sorted by eid after the run.
    pub const EVENTS: &str = "events";
    /// Ground-motion rows, append-only.
    pub const GMF_ROWS: &str = "gmf_data/rows";
    /// Per-site global row ranges, concatenated per batch.
    pub const GMF_INDICES: &str = "gmf_data/indices";
    /// Events-per-site counts, one row per site.
    pub const EVENTS_BY_SID: &str = "gmf_data/events_by_sid";
    /// Logic-tree association records.
    pub const RLZS_BY_GROUP: &str = "csm_info/rlzs_by_group";
    /// Statistical hazard curves, one matrix per statistic.
    pub const HCURVES: &str = "hcurves";
    /// Hazard maps, one matrix per statistic.
    pub const HMAPS: &str = "hmaps";
}

/// Marker for record types a datastore can hold.
///
/// Blanket-implemented: any clonable, thread-safe static type qualifies.
pub trait DatasetRecord: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> DatasetRecord for T {}

/// Attribute value attached to a dataset path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    /// Unsigned counter (row counts, byte sizes).
    U64(u64),
    /// Floating point summary (averages).
    F64(f64),
    /// Free-form text (IMT lists, identifiers, timestamps).
    Text(String),
}

impl AttrValue {
    /// The value as `u64`, if it is one.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            AttrValue::U64(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as `f64`, if it is one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::F64(v) => Some(*v),
            _ => None,
        }
    }
}

/// Fixed-shape matrix of `f32` cells, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub cols: usize,
    /// Cells in row-major order, `rows * cols` long.
    pub values: Vec<f32>,
}

impl Matrix {
    /// Zero-filled matrix of the given shape.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            values: vec![0.0; rows * cols],
        }
    }

    /// Cell accessor.
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.cols + col]
    }

    /// One row as a slice.
    pub fn row(&self, row: usize) -> &[f32] {
        &self.values[row * self.cols..(row + 1) * self.cols]
    }
}

/// Append-only typed dataset store keyed by path.
///
/// Implementations must keep appends ordered: rows extend the dataset in
/// call order, and `dataset_len` observes every completed `extend`. The
/// engine serializes all writes through its reducer, so implementations do
/// not need multi-writer append semantics.
pub trait Datastore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Append rows to a record dataset, creating it on first use.
    /// Returns the dataset length after the append.
    fn extend<T: DatasetRecord>(&self, path: &str, rows: &[T]) -> Result<u64, Self::Error>;

    /// Read a full record dataset.
    fn read<T: DatasetRecord>(&self, path: &str) -> Result<Vec<T>, Self::Error>;

    /// Replace a record dataset wholesale (used for the post-run event
    /// re-sort, never for incremental writes).
    fn replace<T: DatasetRecord>(&self, path: &str, rows: Vec<T>) -> Result<(), Self::Error>;

    /// Length of a record dataset; missing datasets count as empty.
    fn dataset_len(&self, path: &str) -> u64;

    /// Create a fixed-shape matrix dataset filled with zeros.
    fn create_matrix(&self, path: &str, rows: usize, cols: usize) -> Result<(), Self::Error>;

    /// Overwrite one row of a matrix dataset.
    fn write_row(&self, path: &str, row: usize, values: &[f32]) -> Result<(), Self::Error>;

    /// Read a full matrix dataset.
    fn read_matrix(&self, path: &str) -> Result<Matrix, Self::Error>;

    /// Set an attribute on a path.
    fn set_attr(&self, path: &str, key: &str, value: AttrValue) -> Result<(), Self::Error>;

    /// Read an attribute from a path.
    fn get_attr(&self, path: &str, key: &str) -> Option<AttrValue>;
}

pub use memory::{InMemoryDatastore, InMemoryStoreError};
