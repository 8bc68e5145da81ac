//! Model-wide error taxonomy.
//!
//! - **`ConfigError`**    : malformed configuration, impossible alignment
//! - **`WiringError`**    : missing/ambiguous transfer producer
//! - **`ShapeError`**     : runtime array-shape mismatch
//! - **`UnitsError`**     : units mismatch between two ends of a transfer
//! - **`ComponentError`** : a component hook failed (phase + datetime attached)
//! - **`IoError`**        : driving-data read / record write / dump failure
//! - **`ModelError`**     : the umbrella the public API returns
//!
//! `ConfigError` and `WiringError` can only surface during model
//! construction; the rest abort a running simulation after a best-effort
//! dump.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which lifecycle hook a component was executing when it failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Phase {
    Initialise,
    Run,
    Finalise,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initialise => "initialise",
            Self::Run => "run",
            Self::Finalise => "finalise",
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown component class '{class}'")]
    UnknownClass { class: String },

    #[error("invalid {what}: {reason}")]
    Invalid { what: String, reason: String },

    #[error("'{a}' and '{b}' cannot couple: {reason}")]
    Alignment { a: String, b: String, reason: String },

    #[error("parameter '{name}' = {value} outside valid range [{min}, {max}]")]
    ParameterRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("missing required {what} '{name}'")]
    Missing { what: String, name: String },
}

impl ConfigError {
    /// Shorthand for the free-form variant.
    pub fn invalid(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            what: what.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WiringError {
    #[error(
        "no producer for inward '{transfer}' required by '{consumer}' \
         (expected from category '{category}')"
    )]
    Missing {
        transfer: String,
        consumer: String,
        category: String,
    },

    #[error("ambiguous producers for inward '{transfer}' required by '{consumer}': {candidates:?}")]
    Ambiguous {
        transfer: String,
        consumer: String,
        candidates: Vec<String>,
    },

    #[error(
        "transfer '{transfer}' declared with method '{produced}' by '{producer}' \
         but '{consumed}' by '{consumer}'"
    )]
    MethodMismatch {
        transfer: String,
        producer: String,
        produced: String,
        consumer: String,
        consumed: String,
    },
}

/// An array did not have the shape its declaration promised.
#[derive(Debug, Error)]
#[error("'{name}': expected shape {expected:?}, got {actual:?}")]
pub struct ShapeError {
    pub name: String,
    pub expected: Vec<usize>,
    pub actual: Vec<usize>,
}

impl ShapeError {
    pub fn new(name: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        Self {
            name: name.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

#[derive(Debug, Error)]
#[error("units mismatch for '{name}': expected '{expected}', got '{actual}'")]
pub struct UnitsError {
    pub name: String,
    pub expected: String,
    pub actual: String,
}

/// A component hook raised, or produced something its declaration forbids
/// (missing outward, wrong shape, NaN on a valid cell).
#[derive(Debug, Error)]
#[error("component '{component}' failed during {phase} at {datetime}: {cause}")]
pub struct ComponentError {
    pub component: String,
    pub phase: Phase,
    /// ISO rendering of the simulation datetime of the failed call.
    pub datetime: String,
    #[source]
    pub cause: Box<dyn std::error::Error + Send + Sync>,
}

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to {action} '{path}'")]
    File {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode '{path}': {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("failed to encode '{what}': {reason}")]
    Encode { what: String, reason: String },

    #[error("driving data '{name}' has no slice at {datetime}")]
    MissingSlice { name: String, datetime: String },

    #[error("no '{tag}' dump at or before {at}")]
    NoFrame { tag: String, at: String },
}

impl IoError {
    pub fn file(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            action,
            path: path.into(),
            source,
        }
    }
}

/// The umbrella error the public `Model` surface returns.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Wiring(#[from] WiringError),
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Units(#[from] UnitsError),
    #[error(transparent)]
    Component(#[from] Box<ComponentError>),
    #[error(transparent)]
    Io(#[from] IoError),
}

impl From<ComponentError> for ModelError {
    fn from(e: ComponentError) -> Self {
        Self::Component(Box::new(e))
    }
}

impl ModelError {
    /// Taxonomy tag used in the on-disk failure record.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::Wiring(_) => "WiringError",
            Self::Shape(_) => "ShapeError",
            Self::Units(_) => "UnitsError",
            Self::Component(_) => "ComponentError",
            Self::Io(_) => "IOError",
        }
    }
}
