//! Shared scaffolding for the coupled-model scenarios.

use std::path::{Path, PathBuf};
use std::sync::Once;

use hydroflux_engine::{JsonLinesSink, RecordMeta, RecordRow};
use hydroflux_testkit::{
    DummyOpenWater, DummySubSurface, DummySurfaceLayer, ExplodingOpenWater,
    InertNutrientSurfaceLayer,
};

pub const START: &str = "2019-01-01 09:00:00";
pub const END: &str = "2019-01-17 09:00:00";

/// Registers every testkit component class once per test binary.
pub fn register() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        hydroflux::register_component("hydroflux_testkit", "DummySurfaceLayer", || {
            Box::new(DummySurfaceLayer)
        });
        hydroflux::register_component("hydroflux_testkit", "DummySubSurface", || {
            Box::new(DummySubSurface)
        });
        hydroflux::register_component("hydroflux_testkit", "DummyOpenWater", || {
            Box::new(DummyOpenWater)
        });
        hydroflux::register_component("hydroflux_testkit", "InertNutrientSurfaceLayer", || {
            Box::new(InertNutrientSurfaceLayer)
        });
        hydroflux::register_component("hydroflux_testkit", "ExplodingOpenWater", || {
            Box::new(ExplodingOpenWater::default())
        });
    });
}

/// Options of one component block in a generated configuration.
pub struct Block {
    pub key: &'static str,
    pub class: &'static str,
    pub step_days: i64,
    pub resolution: f64,
    /// Pre-rendered `dataset:` lines (or empty).
    pub dataset: String,
    /// Pre-rendered `parameters:`/`constants:` lines (or empty).
    pub values: String,
    /// Pre-rendered `records:` lines (or empty).
    pub records: String,
}

impl Block {
    pub fn render(&self) -> String {
        let mut out = format!(
            "{key}:\n  module: hydroflux_testkit\n  class: {class}\n  timedomain:\n    start: \"{START}\"\n    end: \"{END}\"\n    step: {step}\n    units: days\n    calendar: gregorian\n  spacedomain:\n    class: LatLonGrid\n    latitude_extent: [51.0, 55.0]\n    latitude_resolution: {res}\n    longitude_extent: [-2.0, 1.0]\n    longitude_resolution: {res}\n",
            key = self.key,
            class = self.class,
            step = self.step_days,
            res = self.resolution,
        );
        out.push_str(&self.dataset);
        out.push_str(&self.values);
        out.push_str(&self.records);
        out
    }
}

pub fn model_yaml(identifier: &str, config_dir: &Path, saving_dir: &Path, blocks: &[Block]) -> String {
    let mut yaml = format!(
        "identifier: {identifier}\nconfig_directory: \"{}\"\nsaving_directory: \"{}\"\n",
        config_dir.display(),
        saving_dir.display(),
    );
    for block in blocks {
        yaml.push_str(&block.render());
    }
    yaml
}

/// `(ny, nx)` of the shared extent at `resolution` degrees.
pub fn shape_at(resolution: f64) -> (usize, usize) {
    (
        (4.0 / resolution).round() as usize,
        (3.0 / resolution).round() as usize,
    )
}

pub fn records_yaml(entries: &[(&str, &str, &str)]) -> String {
    // entries: (variable, window, methods-yaml-list)
    let mut out = String::from("  records:\n");
    let mut last_var: &str = "";
    for &(variable, window, methods) in entries {
        if variable != last_var {
            out.push_str(&format!("    {variable}:\n"));
            last_var = variable;
        }
        out.push_str(&format!("      \"{window}\": {methods}\n"));
    }
    out
}

pub fn record_path(
    dir: &Path,
    identifier: &str,
    tag: &str,
    component: &str,
    variable: &str,
) -> PathBuf {
    dir.join(format!("{identifier}_{tag}_records_{component}_{variable}.jsonl"))
}

pub fn read_records(path: &Path) -> (RecordMeta, Vec<RecordRow>) {
    JsonLinesSink::read(path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()))
}

/// Rows of one (window, method) stream, in time order.
pub fn rows_of(rows: &[RecordRow], window_seconds: i64, method: &str) -> Vec<RecordRow> {
    rows.iter()
        .filter(|r| r.window_seconds == window_seconds && r.method.to_string() == method)
        .cloned()
        .collect()
}
