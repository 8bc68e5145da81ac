//! Aggregation methods applied to time- or space-oversampled quantities.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Reduction applied when one value must stand for many samples.
///
/// Transfers declare one of `mean`/`sum`/`min`/`max`; `point` (the latest
/// sample) exists for records only.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    #[serde(alias = "average")]
    Mean,
    #[serde(alias = "cumulative")]
    Sum,
    #[serde(alias = "minimum")]
    Min,
    #[serde(alias = "maximum")]
    Max,
    #[serde(alias = "instantaneous")]
    Point,
}

impl AggregationMethod {
    /// Accepts the canonical names and their configuration synonyms.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" | "average" => Ok(Self::Mean),
            "sum" | "cumulative" => Ok(Self::Sum),
            "min" | "minimum" => Ok(Self::Min),
            "max" | "maximum" => Ok(Self::Max),
            "point" | "instantaneous" => Ok(Self::Point),
            other => Err(ConfigError::invalid(
                "aggregation method",
                format!("unknown method '{other}'"),
            )),
        }
    }

    /// Methods a transfer may declare (`point` is records-only).
    pub fn valid_for_transfer(self) -> bool {
        !matches!(self, Self::Point)
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Point => "point",
        })
    }
}
