//! Core data model of the hazard engine.

pub mod event;
pub mod gmf;
pub mod ids;
pub mod logic_tree;
pub mod pmap;
pub mod rupture;
pub mod site;
pub mod source;

pub use event::Event;
pub use gmf::{GlobalSiteRange, GmfRow, SiteRange};
pub use ids::{EventId, GroupId, RealizationId, SiteId};
pub use logic_tree::{GroupRealizations, LogicTree, LogicTreeError, Realization};
pub use pmap::{LevelMismatch, ProbabilityCurve, ProbabilityMap};
pub use rupture::{Rupture, RuptureBlock};
pub use site::{Site, SiteCollection};
pub use source::{GeometryError, Hypocenter, MagnitudeRate, SeismicSource};
