//! hydroflux — a modular hydrology modelling framework.
//!
//! Composes up to six pluggable scientific components (surface-layer,
//! subsurface, open-water and their nutrient counterparts) into one coupled
//! model of the terrestrial water and nutrient cycles. Each component
//! advances its own state on its own grid and timestep; the framework
//! time-aligns and space-remaps the transfers between them, records
//! requested aggregations, and snapshots for exact resume.
//!
//! ```no_run
//! use hydroflux::{Calendar, DateTime, Model};
//!
//! let mut model = Model::from_config("model.yml")?;
//! let start = DateTime::parse("2018-01-01 09:00:00", Calendar::Gregorian)?;
//! let end = DateTime::parse("2019-01-01 09:00:00", Calendar::Gregorian)?;
//! model.spin_up(start, end, 2, None)?;
//! model.simulate(Some(chrono::Duration::days(2)))?;
//! # Ok::<(), hydroflux::ModelError>(())
//! ```

pub mod config;
pub mod model;
pub mod registry;

pub use config::{ComponentConfig, ModelConfig};
pub use model::Model;
pub use registry::{create_component, register_component};

pub use hydroflux_common::{
    AggregationMethod, Calendar, ComponentError, ConfigError, DateTime, IoError, ModelError,
    ShapeError, TimeDomain, UnitsError, WiringError,
};
pub use hydroflux_engine::{
    Category, Component, ComponentAdapter, ComponentDefinition, DataSet, Driver, FieldSeries,
    RecordRequest,
};
pub use hydroflux_space::{LatLonGrid, RemapKind, RemapWeights};

/// Installs the default `tracing` subscriber (env-filtered, compact format).
/// Call once from the application entry point; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
