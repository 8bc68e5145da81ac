//! Component state variables with a sliding history window.
//!
//! Each state keeps a small fixed-capacity ring of K+2 arrays covering
//! relative offsets -K..=+1: -K..0 are past..present, +1 is the slot the
//! current `run` call writes. `advance` slides the window one step, so the
//! value written at +1 becomes offset 0 for the next call.

use std::collections::BTreeMap;

use ndarray::{ArrayD, Ix2, IxDyn};
use serde::{Deserialize, Serialize};

use crate::component::HookError;

#[derive(Debug, Clone)]
pub struct StateVar {
    units: String,
    history: usize,
    slots: Vec<ArrayD<f64>>,
    head: usize,
}

impl StateVar {
    /// A zero-filled state of the given shape (grid shape, optionally
    /// extended by division axes) with solver history depth `history`.
    pub fn zeros(shape: &[usize], units: impl Into<String>, history: usize) -> Self {
        let len = history + 2;
        Self {
            units: units.into(),
            history,
            slots: vec![ArrayD::zeros(IxDyn(shape)); len],
            head: history,
        }
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn history(&self) -> usize {
        self.history
    }

    pub fn shape(&self) -> &[usize] {
        self.slots[0].shape()
    }

    fn index(&self, offset: i64) -> usize {
        let k = self.history as i64;
        assert!(
            (-k..=1).contains(&offset),
            "state offset {offset} outside -{k}..=1"
        );
        (self.head as i64 + offset).rem_euclid(self.slots.len() as i64) as usize
    }

    /// Value at relative timestep `offset` (-K..=+1).
    pub fn get_timestep(&self, offset: i64) -> &ArrayD<f64> {
        &self.slots[self.index(offset)]
    }

    /// Overwrites the value at relative timestep `offset` (-K..=+1).
    pub fn set_timestep(&mut self, offset: i64, value: ArrayD<f64>) -> Result<(), HookError> {
        if value.shape() != self.shape() {
            return Err(format!(
                "state value shape {:?} does not match {:?}",
                value.shape(),
                self.shape()
            )
            .into());
        }
        let i = self.index(offset);
        self.slots[i] = value;
        Ok(())
    }

    /// 2-D view helpers for the common undivided case.
    pub fn grid(&self, offset: i64) -> Result<ndarray::Array2<f64>, HookError> {
        self.get_timestep(offset)
            .clone()
            .into_dimensionality::<Ix2>()
            .map_err(|_| format!("state is not 2-D (shape {:?})", self.shape()).into())
    }

    pub fn set_grid(&mut self, offset: i64, value: ndarray::Array2<f64>) -> Result<(), HookError> {
        self.set_timestep(offset, value.into_dyn())
    }

    /// Slides the window: the newly written +1 becomes offset 0.
    pub fn advance(&mut self) {
        self.head = (self.head + 1) % self.slots.len();
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let k = self.history as i64;
        StateSnapshot {
            units: self.units.clone(),
            history: self.history,
            slots: (-k..=1).map(|o| self.get_timestep(o).clone()).collect(),
        }
    }

    pub fn restore(snapshot: StateSnapshot) -> Self {
        let history = snapshot.history;
        Self {
            units: snapshot.units,
            history,
            slots: snapshot.slots,
            head: history,
        }
    }
}

/// Serialized form of one state: slots in offset order -K..=+1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub units: String,
    pub history: usize,
    pub slots: Vec<ArrayD<f64>>,
}

/// All states of one component, keyed by name in deterministic order.
#[derive(Debug, Clone, Default)]
pub struct StateSet {
    vars: BTreeMap<String, StateVar>,
}

impl StateSet {
    pub fn insert(&mut self, name: impl Into<String>, var: StateVar) {
        self.vars.insert(name.into(), var);
    }

    pub fn var(&self, name: &str) -> Result<&StateVar, HookError> {
        self.vars
            .get(name)
            .ok_or_else(|| format!("undeclared state '{name}'").into())
    }

    pub fn var_mut(&mut self, name: &str) -> Result<&mut StateVar, HookError> {
        self.vars
            .get_mut(name)
            .ok_or_else(|| format!("undeclared state '{name}'").into())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StateVar)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn advance_all(&mut self) {
        for var in self.vars.values_mut() {
            var.advance();
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, StateSnapshot> {
        self.vars
            .iter()
            .map(|(k, v)| (k.clone(), v.snapshot()))
            .collect()
    }

    pub fn restore(snapshots: BTreeMap<String, StateSnapshot>) -> Self {
        Self {
            vars: snapshots
                .into_iter()
                .map(|(k, s)| (k, StateVar::restore(s)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    fn filled(shape: &[usize], v: f64) -> ArrayD<f64> {
        ArrayD::from_elem(IxDyn(shape), v)
    }

    #[test]
    fn window_slides_after_advance() {
        let mut s = StateVar::zeros(&[2, 2], "kg m-2", 1);
        s.set_timestep(1, filled(&[2, 2], 5.0)).unwrap();
        assert_eq!(s.get_timestep(0)[[0, 0]], 0.0);
        s.advance();
        assert_eq!(s.get_timestep(0)[[0, 0]], 5.0);
        assert_eq!(s.get_timestep(-1)[[0, 0]], 0.0);

        s.set_timestep(1, filled(&[2, 2], 7.0)).unwrap();
        s.advance();
        assert_eq!(s.get_timestep(0)[[0, 0]], 7.0);
        assert_eq!(s.get_timestep(-1)[[0, 0]], 5.0);
    }

    #[test]
    fn deeper_history_is_preserved() {
        let mut s = StateVar::zeros(&[1], "1", 2);
        for step in 1..=4 {
            s.set_timestep(1, filled(&[1], step as f64)).unwrap();
            s.advance();
        }
        assert_eq!(s.get_timestep(0)[[0]], 4.0);
        assert_eq!(s.get_timestep(-1)[[0]], 3.0);
        assert_eq!(s.get_timestep(-2)[[0]], 2.0);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let mut s = StateVar::zeros(&[2, 2], "1", 1);
        assert!(s.set_timestep(1, filled(&[3, 2], 0.0)).is_err());
    }

    #[test]
    fn snapshot_restores_bit_identically() {
        let mut s = StateVar::zeros(&[2], "mm", 1);
        s.set_timestep(1, filled(&[2], 3.5)).unwrap();
        s.advance();
        s.set_timestep(1, filled(&[2], 4.5)).unwrap();

        let restored = StateVar::restore(s.snapshot());
        for offset in -1..=1 {
            assert_eq!(restored.get_timestep(offset), s.get_timestep(offset));
        }
    }

    #[test]
    #[should_panic(expected = "state offset")]
    fn out_of_window_offset_panics() {
        let s = StateVar::zeros(&[1], "1", 1);
        let _ = s.get_timestep(-2);
    }
}
