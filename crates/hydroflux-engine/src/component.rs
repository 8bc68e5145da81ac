//! Component descriptors and the plug-in trait.
//!
//! A component is a value presenting (a) a static descriptor of its declared
//! interface and (b) three plain lifecycle hooks. Registration is explicit;
//! there is no discovery by introspection.

use std::fmt;

use chrono::Duration;
use ndarray::Array2;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use hydroflux_common::{AggregationMethod, DateTime};

use crate::state::StateSet;

/// Boxed error a component hook may raise; the adapter wraps it into a
/// `ComponentError` with phase and datetime attached.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// The six parts of the coupled cycle, in driver firing order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    SurfaceLayer,
    SubSurface,
    OpenWater,
    NutrientSurfaceLayer,
    NutrientSubSurface,
    NutrientOpenWater,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::SurfaceLayer,
        Category::SubSurface,
        Category::OpenWater,
        Category::NutrientSurfaceLayer,
        Category::NutrientSubSurface,
        Category::NutrientOpenWater,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "surfacelayer" => Some(Self::SurfaceLayer),
            "subsurface" => Some(Self::SubSurface),
            "openwater" => Some(Self::OpenWater),
            "nutrientsurfacelayer" => Some(Self::NutrientSurfaceLayer),
            "nutrientsubsurface" => Some(Self::NutrientSubSurface),
            "nutrientopenwater" => Some(Self::NutrientOpenWater),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SurfaceLayer => "surfacelayer",
            Self::SubSurface => "subsurface",
            Self::OpenWater => "openwater",
            Self::NutrientSurfaceLayer => "nutrientsurfacelayer",
            Self::NutrientSubSurface => "nutrientsubsurface",
            Self::NutrientOpenWater => "nutrientopenwater",
        })
    }
}

/// A transfer this component consumes.
#[derive(Debug, Clone)]
pub struct InwardDecl {
    pub name: String,
    pub units: String,
    /// Category expected to produce it.
    pub from: Category,
    pub method: AggregationMethod,
    /// Required consumers fail wiring without a producer; optional ones
    /// receive zero.
    pub required: bool,
}

/// A transfer this component produces.
#[derive(Debug, Clone)]
pub struct OutwardDecl {
    pub name: String,
    pub units: String,
    /// Categories allowed to consume it.
    pub to: Vec<Category>,
    pub method: AggregationMethod,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InputKind {
    /// Sliced at the component timestep.
    Dynamic,
    /// Time-invariant.
    Static,
    /// Indexed by the bucket of the current datetime.
    Climatologic(crate::dataset::ClimFrequency),
}

#[derive(Debug, Clone)]
pub struct InputDecl {
    pub name: String,
    pub units: String,
    pub kind: InputKind,
}

#[derive(Debug, Clone)]
pub struct ParameterDecl {
    pub name: String,
    pub units: String,
    /// Inclusive valid range, checked at construction.
    pub valid_range: Option<(f64, f64)>,
}

#[derive(Debug, Clone)]
pub struct ConstantDecl {
    pub name: String,
    pub units: String,
    pub default: f64,
}

/// Extra state axes beyond the grid; an entry is either a literal length or
/// the name of a constant resolved at initialisation.
#[derive(Debug, Clone)]
pub enum Division {
    Fixed(usize),
    Constant(String),
}

#[derive(Debug, Clone)]
pub struct StateDecl {
    pub name: String,
    pub units: String,
    pub divisions: Vec<Division>,
    /// Solver history depth K; the state keeps K+1 past steps plus the slot
    /// being written.
    pub history: usize,
}

#[derive(Debug, Clone)]
pub struct OutputDecl {
    pub name: String,
    pub units: String,
}

/// Everything a component class declares about itself.
#[derive(Debug, Clone)]
pub struct ComponentDefinition {
    pub category: Category,
    pub class: &'static str,
    pub inwards: Vec<InwardDecl>,
    pub outwards: Vec<OutwardDecl>,
    pub inputs: Vec<InputDecl>,
    pub parameters: Vec<ParameterDecl>,
    pub constants: Vec<ConstantDecl>,
    pub states: Vec<StateDecl>,
    pub outputs: Vec<OutputDecl>,
}

impl ComponentDefinition {
    pub fn new(category: Category, class: &'static str) -> Self {
        Self {
            category,
            class,
            inwards: Vec::new(),
            outwards: Vec::new(),
            inputs: Vec::new(),
            parameters: Vec::new(),
            constants: Vec::new(),
            states: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn outward(&self, name: &str) -> Option<&OutwardDecl> {
        self.outwards.iter().find(|o| o.name == name)
    }

    pub fn state(&self, name: &str) -> Option<&StateDecl> {
        self.states.iter().find(|s| s.name == name)
    }
}

/// A parameter value: scalar or per-cell field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Scalar(f64),
    Field(Array2<f64>),
}

impl ParameterValue {
    pub fn scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Field(_) => None,
        }
    }
}

/// Hook context for `initialise`.
///
/// On a cold start `initialised_states` is false and the hook is expected to
/// fill every declared state; on resume the states were restored from a dump
/// and the hook must leave them untouched.
pub struct InitialiseContext<'a> {
    pub initialised_states: bool,
    pub states: &'a mut StateSet,
    pub parameters: &'a FxHashMap<String, ParameterValue>,
    pub constants: &'a FxHashMap<String, f64>,
}

/// Hook context for `run`: staged inputs and inwards in, outwards and
/// outputs back.
pub struct RunContext<'a> {
    pub datetime: DateTime,
    pub timestep: Duration,
    pub(crate) inwards: &'a FxHashMap<String, Array2<f64>>,
    pub(crate) inputs: FxHashMap<&'a str, &'a Array2<f64>>,
    pub(crate) parameters: &'a FxHashMap<String, ParameterValue>,
    pub(crate) constants: &'a FxHashMap<String, f64>,
    pub(crate) states: &'a mut StateSet,
    pub(crate) outwards: FxHashMap<String, Array2<f64>>,
    pub(crate) outputs: FxHashMap<String, Array2<f64>>,
}

impl<'a> RunContext<'a> {
    pub fn inward(&self, name: &str) -> Result<&Array2<f64>, HookError> {
        self.inwards
            .get(name)
            .ok_or_else(|| format!("undeclared inward '{name}'").into())
    }

    pub fn input(&self, name: &str) -> Result<&Array2<f64>, HookError> {
        self.inputs
            .get(name)
            .copied()
            .ok_or_else(|| format!("undeclared input '{name}'").into())
    }

    pub fn parameter(&self, name: &str) -> Result<&ParameterValue, HookError> {
        self.parameters
            .get(name)
            .ok_or_else(|| format!("undeclared parameter '{name}'").into())
    }

    pub fn scalar_parameter(&self, name: &str) -> Result<f64, HookError> {
        self.parameter(name)?
            .scalar()
            .ok_or_else(|| format!("parameter '{name}' is not scalar").into())
    }

    pub fn constant(&self, name: &str) -> Result<f64, HookError> {
        self.constants
            .get(name)
            .copied()
            .ok_or_else(|| format!("undeclared constant '{name}'").into())
    }

    pub fn states(&mut self) -> &mut StateSet {
        self.states
    }

    pub fn set_outward(&mut self, name: impl Into<String>, value: Array2<f64>) {
        self.outwards.insert(name.into(), value);
    }

    pub fn set_output(&mut self, name: impl Into<String>, value: Array2<f64>) {
        self.outputs.insert(name.into(), value);
    }
}

/// Hook context for `finalise`.
pub struct FinaliseContext<'a> {
    pub states: &'a mut StateSet,
    pub parameters: &'a FxHashMap<String, ParameterValue>,
    pub constants: &'a FxHashMap<String, f64>,
}

/// The plug-in seam: an externally authored integrator for one part of the
/// coupled cycle.
///
/// `run` is expected to be a pure function of its declared inputs, inwards,
/// states, parameters and constants; no I/O happens inside a hook.
pub trait Component: Send {
    fn definition(&self) -> ComponentDefinition;

    fn initialise(&mut self, ctx: &mut InitialiseContext<'_>) -> Result<(), HookError>;

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), HookError>;

    fn finalise(&mut self, ctx: &mut FinaliseContext<'_>) -> Result<(), HookError>;

    /// Opaque auxiliary storage carried through dumps, for components with
    /// solver internals beyond their declared states.
    fn shelf(&self) -> Option<serde_json::Value> {
        None
    }

    fn restore_shelf(&mut self, _shelf: serde_json::Value) -> Result<(), HookError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_fire_in_declared_order() {
        let mut sorted = Category::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, Category::ALL.to_vec());
        assert!(Category::SurfaceLayer < Category::NutrientOpenWater);
    }

    #[test]
    fn category_names_round_trip() {
        for cat in Category::ALL {
            assert_eq!(Category::parse(&cat.to_string()), Some(cat));
        }
        assert_eq!(Category::parse("groundwater"), None);
    }
}
