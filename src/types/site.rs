//! Site collection types.

use serde::{Deserialize, Serialize};

use super::ids::SiteId;

/// A single site of interest: a surface location where ground motion is
/// simulated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// Dense site identifier.
    pub sid: SiteId,
    /// Longitude in decimal degrees.
    pub lon: f64,
    /// Latitude in decimal degrees.
    pub lat: f64,
}

/// Immutable, ordered collection of sites, read-only for the whole run.
///
/// Site ids are the positions in the collection, so `sites()[sid.index()]`
/// is always the site with that id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteCollection {
    sites: Vec<Site>,
}

impl SiteCollection {
    /// Build a collection from (lon, lat) pairs, assigning dense site ids
    /// in input order.
    pub fn from_points(points: &[(f64, f64)]) -> Self {
        let sites = points
            .iter()
            .enumerate()
            .map(|(i, &(lon, lat))| Site {
                sid: SiteId(i as u32),
                lon,
                lat,
            })
            .collect();
        Self { sites }
    }

    /// Number of sites.
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// All sites in id order.
    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    /// All site ids in order.
    pub fn sids(&self) -> impl Iterator<Item = SiteId> + '_ {
        self.sites.iter().map(|s| s.sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_site_ids() {
        let sites = SiteCollection::from_points(&[(10.0, 45.0), (10.5, 45.5), (11.0, 46.0)]);
        assert_eq!(sites.len(), 3);
        let sids: Vec<_> = sites.sids().collect();
        assert_eq!(sids, vec![SiteId(0), SiteId(1), SiteId(2)]);
        assert_eq!(sites.sites()[1].lon, 10.5);
    }
}
