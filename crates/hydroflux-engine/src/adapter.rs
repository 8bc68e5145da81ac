//! Uniform facade around a user-supplied scientific component.
//!
//! The adapter owns the component instance together with everything it needs
//! per call: staged driving data, parameter/constant tables and the state
//! rings. It validates what the component produces before anything else sees
//! it, and wraps hook failures with phase and datetime.

use std::path::PathBuf;
use std::sync::Arc;

use ndarray::{Array2, ArrayD};
use rustc_hash::FxHashMap;
use serde_json::Value as Shelf;

use hydroflux_common::{
    ComponentError, ConfigError, DateTime, ModelError, Phase, ShapeError, TimeDomain, UnitsError,
};
use hydroflux_space::LatLonGrid;

use crate::component::{
    Component, ComponentDefinition, Division, FinaliseContext, InitialiseContext, InputKind,
    ParameterValue, RunContext,
};
use crate::dataset::{DataSet, FieldSeries};
use crate::state::{StateSet, StateVar};

/// What one `run` call produced, validated.
#[derive(Debug, Default)]
pub struct RunProducts {
    pub outwards: FxHashMap<String, Array2<f64>>,
    pub outputs: FxHashMap<String, Array2<f64>>,
}

pub struct ComponentAdapter {
    component: Box<dyn Component>,
    definition: ComponentDefinition,
    id: String,
    grid: Arc<LatLonGrid>,
    timedomain: TimeDomain,
    dataset: DataSet,
    parameters: FxHashMap<String, ParameterValue>,
    constants: FxHashMap<String, f64>,
    states: StateSet,
    saving_directory: PathBuf,
}

impl ComponentAdapter {
    pub fn new(
        component: Box<dyn Component>,
        grid: Arc<LatLonGrid>,
        timedomain: TimeDomain,
        dataset: DataSet,
        parameters: FxHashMap<String, ParameterValue>,
        constants: FxHashMap<String, f64>,
        saving_directory: PathBuf,
    ) -> Result<Self, ModelError> {
        let definition = component.definition();
        let id = format!("{}/{}", definition.category, definition.class);

        let parameters = check_parameters(&definition, &id, parameters, &grid)?;
        let constants = fill_constants(&definition, constants);
        check_inputs(&definition, &id, &dataset, &grid, &timedomain)?;
        let states = allocate_states(&definition, &grid, &constants)?;

        Ok(Self {
            component,
            definition,
            id,
            grid,
            timedomain,
            dataset,
            parameters,
            constants,
            states,
            saving_directory,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn category(&self) -> crate::component::Category {
        self.definition.category
    }

    pub fn definition(&self) -> &ComponentDefinition {
        &self.definition
    }

    pub fn grid(&self) -> &Arc<LatLonGrid> {
        &self.grid
    }

    pub fn timedomain(&self) -> &TimeDomain {
        &self.timedomain
    }

    pub fn saving_directory(&self) -> &PathBuf {
        &self.saving_directory
    }

    pub fn states(&self) -> &StateSet {
        &self.states
    }

    fn component_error(&self, phase: Phase, datetime: DateTime, cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> ModelError {
        ModelError::from(ComponentError {
            component: self.id.clone(),
            phase,
            datetime: datetime.to_string(),
            cause: cause.into(),
        })
    }

    pub fn initialise(&mut self, initialised_states: bool) -> Result<(), ModelError> {
        let mut ctx = InitialiseContext {
            initialised_states,
            states: &mut self.states,
            parameters: &self.parameters,
            constants: &self.constants,
        };
        self.component
            .initialise(&mut ctx)
            .map_err(|cause| ModelError::from(ComponentError {
                component: self.id.clone(),
                phase: Phase::Initialise,
                datetime: self.timedomain.start().to_string(),
                cause,
            }))
    }

    /// Stages inputs for `datetime`, runs the component, validates and
    /// returns its products, and slides the state windows.
    pub fn run(
        &mut self,
        datetime: DateTime,
        inwards: &FxHashMap<String, Array2<f64>>,
    ) -> Result<RunProducts, ModelError> {
        let mut inputs: FxHashMap<&str, &Array2<f64>> = FxHashMap::default();
        for decl in &self.definition.inputs {
            let series = self
                .dataset
                .series(&decl.name)
                .expect("inputs checked at construction");
            let slice = series.at(&decl.name, datetime)?;
            inputs.insert(decl.name.as_str(), slice);
        }

        let mut ctx = RunContext {
            datetime,
            timestep: self.timedomain.step(),
            inwards,
            inputs,
            parameters: &self.parameters,
            constants: &self.constants,
            states: &mut self.states,
            outwards: FxHashMap::default(),
            outputs: FxHashMap::default(),
        };
        if let Err(cause) = self.component.run(&mut ctx) {
            return Err(self.component_error(Phase::Run, datetime, cause));
        }
        let (outwards, outputs) = (ctx.outwards, ctx.outputs);

        let products = RunProducts { outwards, outputs };
        self.validate_products(datetime, &products)?;
        self.states.advance_all();
        Ok(products)
    }

    fn validate_products(
        &self,
        datetime: DateTime,
        products: &RunProducts,
    ) -> Result<(), ModelError> {
        let (ny, nx) = self.grid.shape();
        let declared = self
            .definition
            .outwards
            .iter()
            .map(|o| (&o.name, &products.outwards))
            .chain(self.definition.outputs.iter().map(|o| (&o.name, &products.outputs)));
        for (name, map) in declared {
            let Some(value) = map.get(name.as_str()) else {
                return Err(self.component_error(
                    Phase::Run,
                    datetime,
                    format!("declared variable '{name}' was not produced"),
                ));
            };
            if value.dim() != (ny, nx) {
                let (ay, ax) = value.dim();
                return Err(self.component_error(
                    Phase::Run,
                    datetime,
                    ShapeError::new(name.clone(), &[ny, nx], &[ay, ax]),
                ));
            }
            for ((i, j), v) in value.indexed_iter() {
                if v.is_nan() && self.grid.is_active(i, j) {
                    return Err(self.component_error(
                        Phase::Run,
                        datetime,
                        format!("'{name}' is NaN at active cell ({i}, {j})"),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn finalise(&mut self) -> Result<(), ModelError> {
        let mut ctx = FinaliseContext {
            states: &mut self.states,
            parameters: &self.parameters,
            constants: &self.constants,
        };
        self.component
            .finalise(&mut ctx)
            .map_err(|cause| ModelError::from(ComponentError {
                component: self.id.clone(),
                phase: Phase::Finalise,
                datetime: self.timedomain.end().to_string(),
                cause,
            }))
    }

    /// Resolves a recordable variable at the current step: an outward, an
    /// output, or a state (offset 0, i.e. the step just computed).
    pub fn record_value(&self, name: &str, products: &RunProducts) -> Option<ArrayD<f64>> {
        if let Some(v) = products.outwards.get(name) {
            return Some(v.clone().into_dyn());
        }
        if let Some(v) = products.outputs.get(name) {
            return Some(v.clone().into_dyn());
        }
        self.states
            .var(name)
            .ok()
            .map(|s| s.get_timestep(0).clone())
    }

    /// Units of a recordable variable, for record metadata.
    pub fn variable_units(&self, name: &str) -> Option<String> {
        if let Some(o) = self.definition.outwards.iter().find(|o| o.name == name) {
            return Some(o.units.clone());
        }
        if let Some(o) = self.definition.outputs.iter().find(|o| o.name == name) {
            return Some(o.units.clone());
        }
        self.states.var(name).ok().map(|s| s.units().to_string())
    }

    pub fn shelf(&self) -> Option<Shelf> {
        self.component.shelf()
    }

    pub fn states_snapshot(&self) -> std::collections::BTreeMap<String, crate::state::StateSnapshot> {
        self.states.snapshot()
    }

    pub fn restore_states(
        &mut self,
        snapshots: std::collections::BTreeMap<String, crate::state::StateSnapshot>,
        shelf: Option<Shelf>,
    ) -> Result<(), ModelError> {
        self.states = StateSet::restore(snapshots);
        if let Some(shelf) = shelf
            && let Err(cause) = self.component.restore_shelf(shelf)
        {
            return Err(self.component_error(Phase::Initialise, self.timedomain.start(), cause));
        }
        Ok(())
    }
}

fn check_parameters(
    definition: &ComponentDefinition,
    id: &str,
    supplied: FxHashMap<String, ParameterValue>,
    grid: &LatLonGrid,
) -> Result<FxHashMap<String, ParameterValue>, ModelError> {
    for decl in &definition.parameters {
        let value = supplied
            .get(&decl.name)
            .ok_or_else(|| ConfigError::Missing {
                what: format!("parameter for '{id}'"),
                name: decl.name.clone(),
            })?;
        if let ParameterValue::Field(f) = value {
            grid.check_shape(&decl.name, f)?;
        }
        if let Some((min, max)) = decl.valid_range {
            let out_of_range = match value {
                ParameterValue::Scalar(v) => (!(min..=max).contains(v)).then_some(*v),
                ParameterValue::Field(f) => {
                    f.iter().find(|v| !(min..=max).contains(*v)).copied()
                }
            };
            if let Some(v) = out_of_range {
                return Err(ConfigError::ParameterRange {
                    name: decl.name.clone(),
                    value: v,
                    min,
                    max,
                }
                .into());
            }
        }
    }
    Ok(supplied)
}

fn fill_constants(
    definition: &ComponentDefinition,
    supplied: FxHashMap<String, f64>,
) -> FxHashMap<String, f64> {
    let mut constants = FxHashMap::default();
    for decl in &definition.constants {
        let value = supplied.get(&decl.name).copied().unwrap_or(decl.default);
        constants.insert(decl.name.clone(), value);
    }
    constants
}

fn check_inputs(
    definition: &ComponentDefinition,
    id: &str,
    dataset: &DataSet,
    grid: &LatLonGrid,
    timedomain: &TimeDomain,
) -> Result<(), ModelError> {
    for decl in &definition.inputs {
        let series = dataset
            .series(&decl.name)
            .ok_or_else(|| ConfigError::Missing {
                what: format!("dataset variable for '{id}'"),
                name: decl.name.clone(),
            })?;
        if series.units() != decl.units {
            return Err(UnitsError {
                name: decl.name.clone(),
                expected: decl.units.clone(),
                actual: series.units().to_string(),
            }
            .into());
        }
        let (ny, nx) = grid.shape();
        if series.shape() != (ny, nx) {
            let (ay, ax) = series.shape();
            return Err(ShapeError::new(decl.name.clone(), &[ny, nx], &[ay, ax]).into());
        }
        let kind_ok = match (decl.kind, series) {
            (InputKind::Dynamic, FieldSeries::Dynamic { .. }) => true,
            (InputKind::Static, FieldSeries::Static { .. }) => true,
            (InputKind::Climatologic(f), FieldSeries::Climatology { frequency, .. }) => {
                f == *frequency
            }
            _ => false,
        };
        if !kind_ok {
            return Err(ConfigError::invalid(
                format!("dataset variable '{}'", decl.name),
                "field kind does not match the component's declaration",
            )
            .into());
        }
        if !series.covers(timedomain) {
            return Err(ConfigError::invalid(
                format!("dataset variable '{}'", decl.name),
                format!("does not cover {timedomain}"),
            )
            .into());
        }
    }
    Ok(())
}

fn allocate_states(
    definition: &ComponentDefinition,
    grid: &LatLonGrid,
    constants: &FxHashMap<String, f64>,
) -> Result<StateSet, ModelError> {
    let (ny, nx) = grid.shape();
    let mut states = StateSet::default();
    for decl in &definition.states {
        let mut shape = vec![ny, nx];
        for division in &decl.divisions {
            let len = match division {
                Division::Fixed(n) => *n,
                Division::Constant(name) => {
                    let v = constants.get(name).copied().ok_or_else(|| {
                        ConfigError::Missing {
                            what: format!("division constant for state '{}'", decl.name),
                            name: name.clone(),
                        }
                    })?;
                    if v < 1.0 || v.fract() != 0.0 {
                        return Err(ConfigError::invalid(
                            format!("state '{}'", decl.name),
                            format!("division constant '{name}' = {v} is not a positive integer"),
                        )
                        .into());
                    }
                    v as usize
                }
            };
            if len == 0 {
                return Err(ConfigError::invalid(
                    format!("state '{}'", decl.name),
                    "zero-length division",
                )
                .into());
            }
            shape.push(len);
        }
        states.insert(
            decl.name.clone(),
            StateVar::zeros(&shape, decl.units.clone(), decl.history),
        );
    }
    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Category, ConstantDecl, Division, ParameterDecl, StateDecl};

    fn grid() -> LatLonGrid {
        LatLonGrid::from_extent((51.0, 55.0), (-2.0, 1.0), 1.0, 1.0).unwrap()
    }

    #[test]
    fn division_constants_resolve_at_allocation() {
        let mut definition = ComponentDefinition::new(Category::SubSurface, "Layered");
        definition.constants.push(ConstantDecl {
            name: "n_layers".to_string(),
            units: "1".to_string(),
            default: 4.0,
        });
        definition.states.push(StateDecl {
            name: "moisture".to_string(),
            units: "kg m-2".to_string(),
            divisions: vec![Division::Constant("n_layers".to_string())],
            history: 1,
        });
        let constants = fill_constants(&definition, FxHashMap::default());
        let states = allocate_states(&definition, &grid(), &constants).unwrap();
        assert_eq!(states.var("moisture").unwrap().shape(), &[4, 3, 4]);
    }

    #[test]
    fn parameter_range_violations_are_config_errors() {
        let mut definition = ComponentDefinition::new(Category::OpenWater, "Ranged");
        definition.parameters.push(ParameterDecl {
            name: "residence_time".to_string(),
            units: "s".to_string(),
            valid_range: Some((0.0, 100.0)),
        });
        let mut supplied = FxHashMap::default();
        supplied.insert(
            "residence_time".to_string(),
            ParameterValue::Scalar(250.0),
        );
        let err = check_parameters(&definition, "openwater/Ranged", supplied, &grid());
        assert!(matches!(
            err,
            Err(ModelError::Config(ConfigError::ParameterRange { .. }))
        ));
    }

    #[test]
    fn missing_parameters_are_spotted() {
        let mut definition = ComponentDefinition::new(Category::OpenWater, "Ranged");
        definition.parameters.push(ParameterDecl {
            name: "residence_time".to_string(),
            units: "s".to_string(),
            valid_range: None,
        });
        let err = check_parameters(&definition, "openwater/Ranged", FxHashMap::default(), &grid());
        assert!(matches!(err, Err(ModelError::Config(_))));
    }
}
