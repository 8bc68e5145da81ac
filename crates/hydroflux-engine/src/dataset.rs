//! Driving-data store: named gridded fields, possibly time-varying.
//!
//! Fields arrive through a small portable JSON schema (`FieldFile`); the
//! CF-NetCDF library the original system reads is an external collaborator,
//! and this module is the seam it would plug into. Fields must already be on
//! the consuming component's grid.

use std::fmt;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use hydroflux_common::{Calendar, ConfigError, DateTime, IoError, TimeDomain};

/// Bucketing frequency of a climatologic input.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClimFrequency {
    Seasonal,
    Monthly,
    Daily,
}

impl ClimFrequency {
    pub fn buckets(self, calendar: Calendar) -> usize {
        match self {
            Self::Seasonal => 4,
            Self::Monthly => 12,
            Self::Daily => calendar.daily_climatology_len(),
        }
    }

    pub fn bucket(self, datetime: DateTime) -> usize {
        match self {
            Self::Seasonal => datetime.season(),
            Self::Monthly => datetime.month() as usize - 1,
            Self::Daily => datetime.daily_climatology_index(),
        }
    }
}

impl fmt::Display for ClimFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Seasonal => "seasonal",
            Self::Monthly => "monthly",
            Self::Daily => "daily",
        })
    }
}

/// One named field as stored in a `DataSet`.
#[derive(Debug, Clone)]
pub enum FieldSeries {
    Static {
        units: String,
        data: Array2<f64>,
    },
    Dynamic {
        units: String,
        /// Seconds-since-reference of each slice, strictly increasing.
        times: Vec<i64>,
        frames: Vec<Array2<f64>>,
    },
    Climatology {
        units: String,
        frequency: ClimFrequency,
        frames: Vec<Array2<f64>>,
    },
}

impl FieldSeries {
    pub fn units(&self) -> &str {
        match self {
            Self::Static { units, .. }
            | Self::Dynamic { units, .. }
            | Self::Climatology { units, .. } => units,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        match self {
            Self::Static { data, .. } => data.dim(),
            Self::Dynamic { frames, .. } | Self::Climatology { frames, .. } => frames[0].dim(),
        }
    }

    /// The slice valid at `datetime`.
    pub fn at(&self, name: &str, datetime: DateTime) -> Result<&Array2<f64>, IoError> {
        match self {
            Self::Static { data, .. } => Ok(data),
            Self::Dynamic { times, frames, .. } => times
                .binary_search(&datetime.seconds())
                .map(|i| &frames[i])
                .map_err(|_| IoError::MissingSlice {
                    name: name.to_string(),
                    datetime: datetime.to_string(),
                }),
            Self::Climatology {
                frequency, frames, ..
            } => Ok(&frames[frequency.bucket(datetime)]),
        }
    }

    /// True when every timestep bound of `domain` has a slice.
    pub fn covers(&self, domain: &TimeDomain) -> bool {
        match self {
            Self::Static { .. } => true,
            Self::Climatology { frequency, frames, .. } => {
                frames.len() == frequency.buckets(domain.calendar())
            }
            Self::Dynamic { times, .. } => (0..domain.steps())
                .all(|i| times.binary_search(&domain.bound(i).seconds()).is_ok()),
        }
    }
}

/// A named collection of gridded fields, interrogable by name.
#[derive(Debug, Clone, Default)]
pub struct DataSet {
    fields: FxHashMap<String, FieldSeries>,
}

impl DataSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, series: FieldSeries) {
        self.fields.insert(name.into(), series);
    }

    pub fn series(&self, name: &str) -> Option<&FieldSeries> {
        self.fields.get(name)
    }

    /// Loads one variable from `files`, selecting the source field named
    /// `select`. Dynamic slices from several files are concatenated in time;
    /// static and climatologic fields must come from exactly one file.
    pub fn load_variable(
        &mut self,
        variable: &str,
        files: &[PathBuf],
        select: &str,
        calendar: Calendar,
    ) -> Result<(), ConfigError> {
        if files.is_empty() {
            return Err(ConfigError::invalid(
                format!("dataset variable '{variable}'"),
                "no files listed",
            ));
        }
        let mut merged: Option<FieldSeries> = None;
        for path in files {
            let series = read_field(path, select, calendar)?;
            merged = Some(match merged {
                None => series,
                Some(acc) => concat_dynamic(variable, acc, series)?,
            });
        }
        let series = merged.expect("at least one file");
        if let FieldSeries::Dynamic { times, .. } = &series
            && !times.windows(2).all(|w| w[1] > w[0])
        {
            return Err(ConfigError::invalid(
                format!("dataset variable '{variable}'"),
                "time slices are not strictly increasing across files",
            ));
        }
        self.fields.insert(variable.to_string(), series);
        Ok(())
    }
}

fn concat_dynamic(
    variable: &str,
    acc: FieldSeries,
    next: FieldSeries,
) -> Result<FieldSeries, ConfigError> {
    match (acc, next) {
        (
            FieldSeries::Dynamic {
                units,
                mut times,
                mut frames,
            },
            FieldSeries::Dynamic {
                units: u2,
                times: t2,
                frames: f2,
            },
        ) => {
            if units != u2 {
                return Err(ConfigError::invalid(
                    format!("dataset variable '{variable}'"),
                    format!("units differ across files ('{units}' vs '{u2}')"),
                ));
            }
            times.extend(t2);
            frames.extend(f2);
            Ok(FieldSeries::Dynamic {
                units,
                times,
                frames,
            })
        }
        _ => Err(ConfigError::invalid(
            format!("dataset variable '{variable}'"),
            "only dynamic fields may span several files",
        )),
    }
}

/* ───────────────────── portable field-file schema ─────────────────────── */

#[derive(Debug, Serialize, Deserialize)]
struct FieldFile {
    fields: Vec<FieldEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FieldEntry {
    name: String,
    units: String,
    kind: FieldKind,
    #[serde(default)]
    frequency: Option<ClimFrequency>,
    #[serde(default)]
    times: Vec<String>,
    data: serde_json::Value,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FieldKind {
    Static,
    Dynamic,
    Climatology,
}

fn read_field(path: &Path, select: &str, calendar: Calendar) -> Result<FieldSeries, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::invalid(
            format!("dataset file '{}'", path.display()),
            format!("cannot read: {e}"),
        )
    })?;
    let file: FieldFile = serde_json::from_str(&text).map_err(|e| {
        ConfigError::invalid(
            format!("dataset file '{}'", path.display()),
            format!("cannot parse: {e}"),
        )
    })?;
    let entry = file
        .fields
        .into_iter()
        .find(|f| f.name == select)
        .ok_or_else(|| ConfigError::Missing {
            what: format!("field in '{}'", path.display()),
            name: select.to_string(),
        })?;
    let bad = |reason: String| {
        ConfigError::invalid(format!("field '{select}' in '{}'", path.display()), reason)
    };

    match entry.kind {
        FieldKind::Static => {
            let data = grid_from_json(&entry.data).map_err(bad)?;
            Ok(FieldSeries::Static {
                units: entry.units,
                data,
            })
        }
        FieldKind::Dynamic => {
            let frames = frames_from_json(&entry.data).map_err(bad)?;
            if frames.len() != entry.times.len() {
                return Err(bad(format!(
                    "{} time labels for {} slices",
                    entry.times.len(),
                    frames.len()
                )));
            }
            let times = entry
                .times
                .iter()
                .map(|t| DateTime::parse(t, calendar).map(|d| d.seconds()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(FieldSeries::Dynamic {
                units: entry.units,
                times,
                frames,
            })
        }
        FieldKind::Climatology => {
            let frequency = entry
                .frequency
                .ok_or_else(|| bad("climatology without frequency".to_string()))?;
            let frames = frames_from_json(&entry.data).map_err(bad)?;
            if frames.len() != frequency.buckets(calendar) {
                return Err(bad(format!(
                    "{} slices for a {frequency} climatology on a {calendar} calendar",
                    frames.len()
                )));
            }
            Ok(FieldSeries::Climatology {
                units: entry.units,
                frequency,
                frames,
            })
        }
    }
}

fn grid_from_json(value: &serde_json::Value) -> Result<Array2<f64>, String> {
    let rows: Vec<Vec<f64>> =
        serde_json::from_value(value.clone()).map_err(|e| format!("not a 2-D array: {e}"))?;
    let ny = rows.len();
    let nx = rows.first().map(Vec::len).unwrap_or(0);
    if ny == 0 || nx == 0 || rows.iter().any(|r| r.len() != nx) {
        return Err("ragged or empty 2-D array".to_string());
    }
    Ok(Array2::from_shape_vec((ny, nx), rows.into_iter().flatten().collect()).expect("shape"))
}

fn frames_from_json(value: &serde_json::Value) -> Result<Vec<Array2<f64>>, String> {
    let slices = value.as_array().ok_or("not a 3-D array")?;
    slices.iter().map(grid_from_json).collect()
}
