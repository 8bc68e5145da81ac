//! The public model surface.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::Duration;
use ndarray::Array2;
use rustc_hash::FxHashMap;
use tracing::info;

use hydroflux_common::{
    AggregationMethod, ConfigError, DateTime, ModelError, UnitsError,
};
use hydroflux_engine::{
    ComponentAdapter, DataSet, Driver, ParameterValue, RecordRequest,
};
use hydroflux_space::LatLonGrid;

use crate::config::{
    ComponentConfig, ConfigValue, ModelConfig, SpaceDomainConfig, parse_window,
};
use crate::registry;

/// A fully wired coupled model.
///
/// Construction performs every configuration and wiring check; a value you
/// hold runs. The identifier and saving directory are fields of the value,
/// threaded from the configuration document.
pub struct Model {
    config: ModelConfig,
    driver: Driver,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Model {
    /// Loads a YAML configuration document and builds the model.
    pub fn from_config(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::invalid(
                format!("configuration file '{}'", path.display()),
                e.to_string(),
            )
        })?;
        Self::from_config_str(&text)
    }

    /// As [`Model::from_config`], from an in-memory document.
    pub fn from_config_str(text: &str) -> Result<Self, ModelError> {
        Self::from_config_value(ModelConfig::from_yaml(text)?)
    }

    /// Builds the model from an already-assembled configuration value.
    pub fn from_config_value(config: ModelConfig) -> Result<Self, ModelError> {
        let blocks = config.component_blocks();
        if blocks.is_empty() {
            return Err(ConfigError::invalid("model", "no component blocks").into());
        }
        let mut components = Vec::with_capacity(blocks.len());
        for (category, block) in blocks {
            components.push(build_component(&config, category, block)?);
        }
        let saving_directory = config.resolve(&config.saving_directory);
        let driver = Driver::new(
            config.identifier.clone(),
            saving_directory,
            components,
            config.record_slice.unwrap_or(1),
            config.record_format.clone().unwrap_or_else(|| "jsonl".to_string()),
        )?;
        info!(identifier = %config.identifier, "model constructed");
        Ok(Self { config, driver })
    }

    /// Writes the configuration document this model was built from; a
    /// `from_config`/`to_config` round trip is exact.
    pub fn to_config(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::invalid(
                    format!("configuration file '{}'", path.display()),
                    e.to_string(),
                )
            })?;
        }
        std::fs::write(path, self.config.to_yaml()?).map_err(|e| {
            ConfigError::invalid(
                format!("configuration file '{}'", path.display()),
                e.to_string(),
            )
        })?;
        Ok(())
    }

    pub fn identifier(&self) -> &str {
        self.config.identifier.as_str()
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Pre-run spinning: `cycles` repetitions of `[start, end]` carrying
    /// states forward; zero cycles is a no-op.
    pub fn spin_up(
        &mut self,
        start: DateTime,
        end: DateTime,
        cycles: u32,
        dumping_frequency: Option<Duration>,
    ) -> Result<(), ModelError> {
        self.driver.spin_up(start, end, cycles, dumping_frequency)
    }

    /// Runs the full simulation window.
    pub fn simulate(&mut self, dumping_frequency: Option<Duration>) -> Result<(), ModelError> {
        self.driver.simulate(dumping_frequency)
    }

    /// Continues the run tagged `tag` (`run` or `spinup-N`) from the latest
    /// dump at or before `at`.
    pub fn resume(&mut self, tag: &str, at: DateTime) -> Result<(), ModelError> {
        self.driver.resume(tag, at)
    }

    /// Seeds cold-start transfers from explicit fields instead of zeros.
    pub fn seed_transfers(
        &mut self,
        initial: &FxHashMap<String, Array2<f64>>,
    ) -> Result<(), ModelError> {
        self.driver.seed_transfers(initial)
    }

    /// External cancellation, honoured between ticks.
    pub fn set_cancellation(&mut self, flag: Arc<AtomicBool>) {
        self.driver.set_cancellation(flag);
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Model '{}'", self.config.identifier)?;
        writeln!(f, "  window: {}", self.driver.clock().window())?;
        for adapter in self.driver.adapters() {
            writeln!(
                f,
                "  {}: step {}s on {}",
                adapter.id(),
                adapter.timedomain().step_seconds(),
                adapter.grid()
            )?;
        }
        Ok(())
    }
}

fn build_component(
    config: &ModelConfig,
    category: hydroflux_engine::Category,
    block: &ComponentConfig,
) -> Result<(ComponentAdapter, Vec<RecordRequest>), ModelError> {
    let component = registry::create_component(&block.module, &block.class)?;
    let definition = component.definition();
    if definition.category != category {
        return Err(ConfigError::invalid(
            format!("component block '{category}'"),
            format!(
                "class '{}' declares category '{}'",
                block.class, definition.category
            ),
        )
        .into());
    }

    let timedomain = block.timedomain.build()?;
    let grid = build_grid(&block.spacedomain)?;

    let mut dataset = DataSet::new();
    for (variable, entry) in &block.dataset {
        let files: Vec<_> = entry.files.iter().map(|f| config.resolve(f)).collect();
        dataset.load_variable(variable, &files, &entry.select, timedomain.calendar())?;
    }

    let mut parameters = FxHashMap::default();
    for (name, value) in &block.parameters {
        if let Some(decl) = definition.parameters.iter().find(|p| p.name == *name)
            && decl.units != value.1
        {
            return Err(UnitsError {
                name: name.clone(),
                expected: decl.units.clone(),
                actual: value.1.clone(),
            }
            .into());
        }
        parameters.insert(name.clone(), parameter_value(name, &value.0)?);
    }

    let mut constants = FxHashMap::default();
    for (name, value) in &block.constants {
        if let Some(decl) = definition.constants.iter().find(|c| c.name == *name)
            && decl.units != value.1
        {
            return Err(UnitsError {
                name: name.clone(),
                expected: decl.units.clone(),
                actual: value.1.clone(),
            }
            .into());
        }
        match &value.0 {
            ConfigValue::Scalar(v) => {
                constants.insert(name.clone(), *v);
            }
            ConfigValue::Field(_) => {
                return Err(ConfigError::invalid(
                    format!("constant '{name}'"),
                    "constants must be scalar",
                )
                .into());
            }
        }
    }

    let saving_directory = config.resolve(
        block
            .saving_directory
            .as_deref()
            .unwrap_or(config.saving_directory.as_path()),
    );

    let adapter = ComponentAdapter::new(
        component,
        Arc::new(grid),
        timedomain,
        dataset,
        parameters,
        constants,
        saving_directory,
    )?;

    let mut requests = Vec::new();
    for (variable, windows) in &block.records {
        for (window, methods) in windows {
            let methods = methods
                .iter()
                .map(|m| AggregationMethod::parse(m))
                .collect::<Result<Vec<_>, _>>()?;
            requests.push(RecordRequest {
                variable: variable.clone(),
                window: parse_window(window)?,
                methods,
            });
        }
    }

    Ok((adapter, requests))
}

fn build_grid(space: &SpaceDomainConfig) -> Result<LatLonGrid, ModelError> {
    if space.class != "LatLonGrid" {
        return Err(ConfigError::UnknownClass {
            class: format!("spacedomain '{}'", space.class),
        }
        .into());
    }
    let mut grid = LatLonGrid::from_extent(
        space.latitude_extent,
        space.longitude_extent,
        space.latitude_resolution,
        space.longitude_resolution,
    )?;
    if let Some(mask) = &space.land_sea_mask {
        grid = grid.with_mask(nested_to_array(mask, "land_sea_mask")?)?;
    }
    if let Some(flow) = &space.flow_direction {
        grid = grid.with_flow_direction(nested_to_array(flow, "flow_direction")?)?;
    }
    if let Some(area) = &space.cell_area {
        grid = grid.with_cell_area(nested_to_array(area, "cell_area")?)?;
    }
    Ok(grid)
}

fn nested_to_array<T: Clone>(
    rows: &[Vec<T>],
    what: &str,
) -> Result<ndarray::Array2<T>, ConfigError> {
    let ny = rows.len();
    let nx = rows.first().map(Vec::len).unwrap_or(0);
    if ny == 0 || nx == 0 || rows.iter().any(|r| r.len() != nx) {
        return Err(ConfigError::invalid(what, "ragged or empty 2-D array"));
    }
    let flat: Vec<T> = rows.iter().flat_map(|r| r.iter().cloned()).collect();
    Ok(ndarray::Array2::from_shape_vec((ny, nx), flat).expect("shape"))
}

fn parameter_value(name: &str, value: &ConfigValue) -> Result<ParameterValue, ModelError> {
    Ok(match value {
        ConfigValue::Scalar(v) => ParameterValue::Scalar(*v),
        ConfigValue::Field(rows) => ParameterValue::Field(nested_to_array(
            rows,
            &format!("parameter '{name}'"),
        )?),
    })
}
