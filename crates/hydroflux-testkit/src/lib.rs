//! Dummy components and fixture helpers for integration tests.
//!
//! The three water-cycle dummies implement a fixed algebraic scheme over the
//! transfers `i, j, k, l, m, n` so expected values can be replayed as scalar
//! recurrences in tests:
//!
//! ```text
//! surfacelayer: state_a += 1
//!               transfer_i = driving_a + driving_b + transfer_l + ancillary_c * state_a
//!               transfer_j = driving_a + transfer_k
//! subsurface:   state_b += 2
//!               transfer_k = driving_a + transfer_n
//!               transfer_m = transfer_i + state_b
//!               received_i = transfer_i            (output)
//! openwater:    transfer_l = transfer_j + transfer_m
//!               transfer_n = transfer_j
//!               output_x   = parameter_c * transfer_j + constant_c
//! ```
//!
//! Transfer `i` uses the `sum` method (conservative remap); everything else
//! is `mean`.

pub mod fixtures;

use ndarray::Array2;

use hydroflux_engine::{
    Category, Component, ComponentDefinition, ConstantDecl, FinaliseContext, HookError,
    InitialiseContext, InputDecl, InputKind, InwardDecl, OutputDecl, OutwardDecl, ParameterDecl,
    RunContext, StateDecl,
};

use hydroflux_common::AggregationMethod;

const FLUX_UNITS: &str = "kg m-2 s-1";

fn inward(name: &str, from: Category, method: AggregationMethod, required: bool) -> InwardDecl {
    InwardDecl {
        name: name.to_string(),
        units: FLUX_UNITS.to_string(),
        from,
        method,
        required,
    }
}

fn outward(name: &str, to: &[Category], method: AggregationMethod) -> OutwardDecl {
    OutwardDecl {
        name: name.to_string(),
        units: FLUX_UNITS.to_string(),
        to: to.to_vec(),
        method,
    }
}

fn dynamic_input(name: &str) -> InputDecl {
    InputDecl {
        name: name.to_string(),
        units: FLUX_UNITS.to_string(),
        kind: InputKind::Dynamic,
    }
}

/// Surface-layer dummy: two driving inputs, one static ancillary, one
/// incrementing state.
#[derive(Default)]
pub struct DummySurfaceLayer;

impl Component for DummySurfaceLayer {
    fn definition(&self) -> ComponentDefinition {
        let mut d = ComponentDefinition::new(Category::SurfaceLayer, "DummySurfaceLayer");
        d.inwards = vec![
            inward("transfer_k", Category::SubSurface, AggregationMethod::Mean, true),
            // Optional: a model without open water still runs, reading zero.
            inward("transfer_l", Category::OpenWater, AggregationMethod::Mean, false),
        ];
        d.outwards = vec![
            outward("transfer_i", &[Category::SubSurface], AggregationMethod::Sum),
            outward("transfer_j", &[Category::OpenWater], AggregationMethod::Mean),
        ];
        d.inputs = vec![
            dynamic_input("driving_a"),
            dynamic_input("driving_b"),
            InputDecl {
                name: "ancillary_c".to_string(),
                units: "1".to_string(),
                kind: InputKind::Static,
            },
        ];
        d.states = vec![StateDecl {
            name: "state_a".to_string(),
            units: "kg m-2".to_string(),
            divisions: vec![],
            history: 1,
        }];
        d
    }

    fn initialise(&mut self, ctx: &mut InitialiseContext<'_>) -> Result<(), HookError> {
        if !ctx.initialised_states {
            let zero = ctx.states.var("state_a")?.get_timestep(0).clone() * 0.0;
            ctx.states.var_mut("state_a")?.set_timestep(0, zero)?;
        }
        Ok(())
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), HookError> {
        let driving_a = ctx.input("driving_a")?.clone();
        let driving_b = ctx.input("driving_b")?.clone();
        let ancillary_c = ctx.input("ancillary_c")?.clone();
        let transfer_k = ctx.inward("transfer_k")?.clone();
        let transfer_l = ctx.inward("transfer_l")?.clone();

        let state_a = ctx.states().var("state_a")?.grid(0)? + 1.0;
        ctx.states().var_mut("state_a")?.set_grid(1, state_a.clone())?;

        ctx.set_outward(
            "transfer_i",
            &driving_a + &driving_b + &transfer_l + &(ancillary_c * &state_a),
        );
        ctx.set_outward("transfer_j", &driving_a + &transfer_k);
        Ok(())
    }

    fn finalise(&mut self, _ctx: &mut FinaliseContext<'_>) -> Result<(), HookError> {
        Ok(())
    }
}

/// Subsurface dummy; also echoes the `transfer_i` it received as the output
/// `received_i`, which cross-resolution tests record to check conservation.
#[derive(Default)]
pub struct DummySubSurface;

impl Component for DummySubSurface {
    fn definition(&self) -> ComponentDefinition {
        let mut d = ComponentDefinition::new(Category::SubSurface, "DummySubSurface");
        d.inwards = vec![
            inward("transfer_i", Category::SurfaceLayer, AggregationMethod::Sum, true),
            inward("transfer_n", Category::OpenWater, AggregationMethod::Mean, false),
        ];
        d.outwards = vec![
            outward("transfer_k", &[Category::SurfaceLayer], AggregationMethod::Mean),
            outward("transfer_m", &[Category::OpenWater], AggregationMethod::Mean),
        ];
        d.inputs = vec![dynamic_input("driving_a")];
        d.states = vec![StateDecl {
            name: "state_b".to_string(),
            units: "kg m-2".to_string(),
            divisions: vec![],
            history: 1,
        }];
        d.outputs = vec![OutputDecl {
            name: "received_i".to_string(),
            units: FLUX_UNITS.to_string(),
        }];
        d
    }

    fn initialise(&mut self, ctx: &mut InitialiseContext<'_>) -> Result<(), HookError> {
        if !ctx.initialised_states {
            let zero = ctx.states.var("state_b")?.get_timestep(0).clone() * 0.0;
            ctx.states.var_mut("state_b")?.set_timestep(0, zero)?;
        }
        Ok(())
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), HookError> {
        let driving_a = ctx.input("driving_a")?.clone();
        let transfer_i = ctx.inward("transfer_i")?.clone();
        let transfer_n = ctx.inward("transfer_n")?.clone();

        let state_b = ctx.states().var("state_b")?.grid(0)? + 2.0;
        ctx.states().var_mut("state_b")?.set_grid(1, state_b.clone())?;

        ctx.set_outward("transfer_k", &driving_a + &transfer_n);
        ctx.set_outward("transfer_m", &transfer_i + &state_b);
        ctx.set_output("received_i", transfer_i);
        Ok(())
    }

    fn finalise(&mut self, _ctx: &mut FinaliseContext<'_>) -> Result<(), HookError> {
        Ok(())
    }
}

/// Open-water dummy: stateless, with one parameter and one constant feeding
/// the `output_x` diagnostic.
#[derive(Default)]
pub struct DummyOpenWater;

impl Component for DummyOpenWater {
    fn definition(&self) -> ComponentDefinition {
        let mut d = ComponentDefinition::new(Category::OpenWater, "DummyOpenWater");
        d.inwards = vec![
            inward("transfer_j", Category::SurfaceLayer, AggregationMethod::Mean, true),
            inward("transfer_m", Category::SubSurface, AggregationMethod::Mean, true),
        ];
        d.outwards = vec![
            outward("transfer_l", &[Category::SurfaceLayer], AggregationMethod::Mean),
            outward("transfer_n", &[Category::SubSurface], AggregationMethod::Mean),
        ];
        d.parameters = vec![ParameterDecl {
            name: "parameter_c".to_string(),
            units: "1".to_string(),
            valid_range: Some((0.0, 10.0)),
        }];
        d.constants = vec![ConstantDecl {
            name: "constant_c".to_string(),
            units: "1".to_string(),
            default: 3.0,
        }];
        d.outputs = vec![OutputDecl {
            name: "output_x".to_string(),
            units: FLUX_UNITS.to_string(),
        }];
        d
    }

    fn initialise(&mut self, _ctx: &mut InitialiseContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), HookError> {
        let transfer_j = ctx.inward("transfer_j")?.clone();
        let transfer_m = ctx.inward("transfer_m")?.clone();
        let parameter_c = ctx.scalar_parameter("parameter_c")?;
        let constant_c = ctx.constant("constant_c")?;

        ctx.set_outward("transfer_l", &transfer_j + &transfer_m);
        ctx.set_outward("transfer_n", transfer_j.clone());
        ctx.set_output("output_x", transfer_j * parameter_c + constant_c);
        Ok(())
    }

    fn finalise(&mut self, _ctx: &mut FinaliseContext<'_>) -> Result<(), HookError> {
        Ok(())
    }
}

/// A nutrient-side component declaring nothing at all; it must still tick.
#[derive(Default)]
pub struct InertNutrientSurfaceLayer;

impl Component for InertNutrientSurfaceLayer {
    fn definition(&self) -> ComponentDefinition {
        ComponentDefinition::new(Category::NutrientSurfaceLayer, "InertNutrientSurfaceLayer")
    }

    fn initialise(&mut self, _ctx: &mut InitialiseContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn run(&mut self, _ctx: &mut RunContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn finalise(&mut self, _ctx: &mut FinaliseContext<'_>) -> Result<(), HookError> {
        Ok(())
    }
}

/// An open-water variant whose `run` raises once the given number of steps
/// has completed, for abort-and-dump tests.
#[derive(Default)]
pub struct ExplodingOpenWater {
    steps_taken: u32,
}

impl Component for ExplodingOpenWater {
    fn definition(&self) -> ComponentDefinition {
        let mut d = DummyOpenWater.definition();
        d.class = "ExplodingOpenWater";
        d.parameters.push(ParameterDecl {
            name: "explode_after".to_string(),
            units: "1".to_string(),
            valid_range: None,
        });
        d
    }

    fn initialise(&mut self, ctx: &mut InitialiseContext<'_>) -> Result<(), HookError> {
        if !ctx.initialised_states {
            self.steps_taken = 0;
        }
        Ok(())
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), HookError> {
        let explode_after = ctx.scalar_parameter("explode_after")?;
        if f64::from(self.steps_taken) >= explode_after {
            return Err(format!("deliberate failure after {explode_after} steps").into());
        }
        self.steps_taken += 1;

        let transfer_j = ctx.inward("transfer_j")?.clone();
        let transfer_m = ctx.inward("transfer_m")?.clone();
        let parameter_c = ctx.scalar_parameter("parameter_c")?;
        let constant_c = ctx.constant("constant_c")?;
        ctx.set_outward("transfer_l", &transfer_j + &transfer_m);
        ctx.set_outward("transfer_n", transfer_j.clone());
        ctx.set_output("output_x", transfer_j * parameter_c + constant_c);
        Ok(())
    }

    fn finalise(&mut self, _ctx: &mut FinaliseContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn shelf(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({ "steps_taken": self.steps_taken }))
    }

    fn restore_shelf(&mut self, shelf: serde_json::Value) -> Result<(), HookError> {
        self.steps_taken = shelf
            .get("steps_taken")
            .and_then(|v| v.as_u64())
            .ok_or("malformed shelf")? as u32;
        Ok(())
    }
}

/// Uniform field helper used by the fixtures.
pub fn uniform(shape: (usize, usize), value: f64) -> Array2<f64> {
    Array2::from_elem(shape, value)
}
