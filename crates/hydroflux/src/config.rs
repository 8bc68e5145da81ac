//! The model configuration document.
//!
//! A hierarchical YAML value built once and threaded explicitly through
//! model construction; `Model::to_config` re-serialises the same value, so a
//! load/save round trip is exact. No process-wide mutable configuration
//! exists.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use hydroflux_common::{Calendar, ConfigError, DateTime, TimeDomain};
use hydroflux_engine::Category;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub identifier: String,
    pub config_directory: PathBuf,
    pub saving_directory: PathBuf,
    /// Completed windows buffered per record stream before a flush.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_slice: Option<usize>,
    /// Record file format: `jsonl` (default) or `csv`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surfacelayer: Option<ComponentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsurface: Option<ComponentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openwater: Option<ComponentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nutrientsurfacelayer: Option<ComponentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nutrientsubsurface: Option<ComponentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nutrientopenwater: Option<ComponentConfig>,
}

impl ModelConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: ModelConfig = serde_yaml::from_str(text)
            .map_err(|e| ConfigError::invalid("configuration document", e.to_string()))?;
        if config.identifier.is_empty()
            || config
                .identifier
                .contains(|c: char| c == '/' || c == '\\' || c.is_whitespace())
        {
            return Err(ConfigError::invalid(
                "identifier",
                format!("'{}' must be non-empty without separators", config.identifier),
            ));
        }
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self)
            .map_err(|e| ConfigError::invalid("configuration document", e.to_string()))
    }

    /// The configured component blocks, in category order.
    pub fn component_blocks(&self) -> Vec<(Category, &ComponentConfig)> {
        [
            (Category::SurfaceLayer, &self.surfacelayer),
            (Category::SubSurface, &self.subsurface),
            (Category::OpenWater, &self.openwater),
            (Category::NutrientSurfaceLayer, &self.nutrientsurfacelayer),
            (Category::NutrientSubSurface, &self.nutrientsubsurface),
            (Category::NutrientOpenWater, &self.nutrientopenwater),
        ]
        .into_iter()
        .filter_map(|(cat, block)| block.as_ref().map(|b| (cat, b)))
        .collect()
    }

    /// Resolves a possibly-relative path against the config directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_directory.join(path)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub module: String,
    pub class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saving_directory: Option<PathBuf>,
    pub timedomain: TimeDomainConfig,
    pub spacedomain: SpaceDomainConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dataset: BTreeMap<String, DatasetEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, ValueWithUnits>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constants: BTreeMap<String, ValueWithUnits>,
    /// `variable -> window -> methods`; windows like `"1 day"` or seconds.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub records: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeDomainConfig {
    pub start: String,
    pub end: String,
    pub step: i64,
    pub units: String,
    pub calendar: String,
}

impl TimeDomainConfig {
    pub fn build(&self) -> Result<TimeDomain, ConfigError> {
        let calendar = Calendar::parse(&self.calendar)?;
        let start = DateTime::parse(&self.start, calendar)?;
        let end = DateTime::parse(&self.end, calendar)?;
        let step = step_duration(self.step, &self.units)?;
        TimeDomain::from_start_end(start, end, step)
    }
}

fn step_duration(step: i64, units: &str) -> Result<Duration, ConfigError> {
    if step <= 0 {
        return Err(ConfigError::invalid(
            "timedomain",
            format!("step must be positive, got {step}"),
        ));
    }
    match units.trim().to_ascii_lowercase().as_str() {
        "s" | "second" | "seconds" => Ok(Duration::seconds(step)),
        "minute" | "minutes" => Ok(Duration::minutes(step)),
        "h" | "hour" | "hours" => Ok(Duration::hours(step)),
        "d" | "day" | "days" => Ok(Duration::days(step)),
        other => Err(ConfigError::invalid(
            "timedomain",
            format!("unknown step units '{other}'"),
        )),
    }
}

/// `"86400"`, `"1 day"`, `"8 days"`, `"3 hours"`, ... into a duration.
pub fn parse_window(text: &str) -> Result<Duration, ConfigError> {
    let text = text.trim();
    if let Ok(seconds) = text.parse::<i64>() {
        return step_duration(seconds, "seconds");
    }
    let (count, units) = text.split_once(' ').ok_or_else(|| {
        ConfigError::invalid("record window", format!("cannot parse '{text}'"))
    })?;
    let count: i64 = count
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid("record window", format!("cannot parse '{text}'")))?;
    step_duration(count, units)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceDomainConfig {
    pub class: String,
    pub latitude_extent: (f64, f64),
    pub latitude_resolution: f64,
    pub longitude_extent: (f64, f64),
    pub longitude_resolution: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub land_sea_mask: Option<Vec<Vec<bool>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_direction: Option<Vec<Vec<(i32, i32)>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_area: Option<Vec<Vec<f64>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub files: Vec<PathBuf>,
    pub select: String,
}

/// A `[value, units]` pair; the value may be a scalar or a per-cell field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueWithUnits(pub ConfigValue, pub String);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Scalar(f64),
    Field(Vec<Vec<f64>>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_accept_seconds_and_unit_phrases() {
        assert_eq!(parse_window("86400").unwrap(), Duration::days(1));
        assert_eq!(parse_window("1 day").unwrap(), Duration::days(1));
        assert_eq!(parse_window("8 days").unwrap(), Duration::days(8));
        assert_eq!(parse_window("3 hours").unwrap(), Duration::hours(3));
        assert!(parse_window("fortnight").is_err());
        assert!(parse_window("-2 days").is_err());
    }

    #[test]
    fn identifier_must_be_path_safe() {
        let yaml = |id: &str| {
            format!(
                "identifier: {id}\nconfig_directory: .\nsaving_directory: out\n"
            )
        };
        assert!(ModelConfig::from_yaml(&yaml("demo")).is_ok());
        assert!(ModelConfig::from_yaml(&yaml("de mo")).is_err());
        assert!(ModelConfig::from_yaml(&yaml("a/b")).is_err());
    }

    #[test]
    fn yaml_round_trip_is_exact() {
        let yaml = r#"
identifier: demo
config_directory: /cfg
saving_directory: /out
surfacelayer:
  module: hydroflux_testkit
  class: DummySurfaceLayer
  timedomain:
    start: "2019-01-01 09:00:00"
    end: "2019-01-17 09:00:00"
    step: 1
    units: days
    calendar: gregorian
  spacedomain:
    class: LatLonGrid
    latitude_extent: [51.0, 55.0]
    latitude_resolution: 1.0
    longitude_extent: [-2.0, 1.0]
    longitude_resolution: 1.0
  parameters:
    parameter_c: [3.0, "1"]
  records:
    output_x:
      "1 day": [point]
      "8 days": [sum, mean]
"#;
        let config = ModelConfig::from_yaml(yaml).unwrap();
        let text = config.to_yaml().unwrap();
        let reparsed = ModelConfig::from_yaml(&text).unwrap();
        assert_eq!(text, reparsed.to_yaml().unwrap());
        let td = reparsed
            .surfacelayer
            .as_ref()
            .unwrap()
            .timedomain
            .build()
            .unwrap();
        assert_eq!(td.steps(), 16);
    }
}
