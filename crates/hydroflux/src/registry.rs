//! Explicit component registration.
//!
//! Implementations are registered under their `module`/`class` identifiers
//! before a configuration naming them is loaded; nothing is discovered by
//! introspection.

use std::sync::RwLock;

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

use hydroflux_common::ConfigError;
use hydroflux_engine::Component;

/// Produces a fresh, unconfigured component instance.
pub type ComponentFactory = fn() -> Box<dyn Component>;

static REGISTRY: Lazy<RwLock<FxHashMap<(String, String), ComponentFactory>>> =
    Lazy::new(|| RwLock::new(FxHashMap::default()));

/// Registers `factory` under `module`/`class`; the latest registration for a
/// pair wins.
pub fn register_component(module: &str, class: &str, factory: ComponentFactory) {
    REGISTRY
        .write()
        .expect("component registry poisoned")
        .insert((module.to_string(), class.to_string()), factory);
}

/// Instantiates the implementation a configuration block names.
pub fn create_component(module: &str, class: &str) -> Result<Box<dyn Component>, ConfigError> {
    let registry = REGISTRY.read().expect("component registry poisoned");
    let factory = registry
        .get(&(module.to_string(), class.to_string()))
        .ok_or_else(|| ConfigError::UnknownClass {
            class: format!("{module}::{class}"),
        })?;
    Ok(factory())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydroflux_engine::{
        Category, ComponentDefinition, FinaliseContext, HookError, InitialiseContext, RunContext,
    };

    struct Inert;

    impl Component for Inert {
        fn definition(&self) -> ComponentDefinition {
            ComponentDefinition::new(Category::OpenWater, "Inert")
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

    #[test]
    fn registration_is_explicit_and_lookup_fails_otherwise() {
        assert!(create_component("tests", "NotRegistered").is_err());
        register_component("tests", "Inert", || Box::new(Inert));
        let component = create_component("tests", "Inert").unwrap();
        assert_eq!(component.definition().class, "Inert");
    }
}
