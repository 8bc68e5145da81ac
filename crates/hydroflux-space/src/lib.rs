//! Spatial domains for the hydroflux coupling engine.
//!
//! The engine only ever asks a grid for its shape, cell areas, remapping
//! weights against another grid, and flow-direction routing; everything
//! projection-specific stays inside this crate.

pub mod grid;
pub mod remap;

pub use grid::{FlowOffset, LatLonGrid};
pub use remap::{RemapKind, RemapWeights};

/// Mean Earth radius in metres used for cell areas and overlap fractions.
pub const EARTH_RADIUS: f64 = 6_371_007.181;
