//! Seismic source types.
//!
//! A source is an immutable geometry plus rate model; it belongs to exactly
//! one logic-tree group and is read-only for the whole run.

use serde::{Deserialize, Serialize};

use super::ids::GroupId;

/// Error for invalid source geometry.
///
/// Invalid geometry is fatal: downstream ground-motion computation cannot
/// recover a valid answer from a corrupt location.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid hypocenter geometry in source {source_id}: lon={lon}, lat={lat}, depth_km={depth_km}")]
pub struct GeometryError {
    /// Source the bad geometry came from.
    pub source_id: String,
    /// Offending longitude.
    pub lon: f64,
    /// Offending latitude.
    pub lat: f64,
    /// Offending depth.
    pub depth_km: f64,
}

/// Hypocenter location of a source or rupture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hypocenter {
    /// Longitude in decimal degrees, [-180, 180].
    pub lon: f64,
    /// Latitude in decimal degrees, [-90, 90].
    pub lat: f64,
    /// Depth below the surface in kilometers, non-negative.
    pub depth_km: f64,
}

impl Hypocenter {
    /// Check that the location is a representable point on the globe.
    pub fn is_valid(&self) -> bool {
        self.lon.is_finite()
            && self.lat.is_finite()
            && self.depth_km.is_finite()
            && (-180.0..=180.0).contains(&self.lon)
            && (-90.0..=90.0).contains(&self.lat)
            && self.depth_km >= 0.0
    }
}

/// One magnitude bin of a source rate model: events of this magnitude occur
/// with the given annual rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MagnitudeRate {
    /// Moment magnitude.
    pub magnitude: f64,
    /// Mean annual occurrence rate.
    pub annual_rate: f64,
}

/// An immutable seismic source: geometry plus a finite rate model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeismicSource {
    /// Human-readable source identifier.
    pub id: String,
    /// Logic-tree group this source belongs to.
    pub group_id: GroupId,
    /// Hypocenter used for all ruptures of this source.
    pub hypocenter: Hypocenter,
    /// Magnitude/rate bins; each bin can yield at most one sampled rupture.
    pub rates: Vec<MagnitudeRate>,
}

impl SeismicSource {
    /// Upper bound on the number of ruptures this source can produce.
    ///
    /// Used to pre-assign deterministic serial ranges before sampling.
    pub fn max_ruptures(&self) -> usize {
        self.rates.len()
    }

    /// Validate the source geometry.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.hypocenter.is_valid() {
            Ok(())
        } else {
            Err(GeometryError {
                source_id: self.id.clone(),
                lon: self.hypocenter.lon,
                lat: self.hypocenter.lat,
                depth_km: self.hypocenter.depth_km,
            })
        }
    }
}
