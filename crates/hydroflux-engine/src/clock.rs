//! The shared model clock.
//!
//! Walks the common simulation window in increments of the fastest component
//! step; a component is due at a tick when its step ratio divides the tick
//! index. The pairwise coupling rule (same calendar, same period, integer
//! step multiples) makes every step a multiple of the fastest, and the base
//! period of the coupled model the slowest step.

use chrono::Duration;

use hydroflux_common::{ConfigError, DateTime, ModelError, TimeDomain};

use crate::adapter::ComponentAdapter;

pub struct Clock {
    /// The full simulation window at the fastest step.
    window: TimeDomain,
    /// Per-adapter step ratios, in adapter order.
    ratios: Vec<u32>,
}

impl Clock {
    pub fn new(adapters: &[ComponentAdapter]) -> Result<Self, ModelError> {
        let Some(first) = adapters.first() else {
            return Err(ConfigError::invalid("model", "no components configured").into());
        };
        for (i, a) in adapters.iter().enumerate() {
            for b in &adapters[i + 1..] {
                a.timedomain().check_coupling(b.timedomain(), a.id(), b.id())?;
            }
        }
        let fast_seconds = adapters
            .iter()
            .map(|a| a.timedomain().step_seconds())
            .min()
            .expect("non-empty");
        let window = TimeDomain::from_start_end(
            first.timedomain().start(),
            first.timedomain().end(),
            Duration::seconds(fast_seconds),
        )?;
        let ratios = adapters
            .iter()
            .map(|a| (a.timedomain().step_seconds() / fast_seconds) as u32)
            .collect();
        Ok(Self { window, ratios })
    }

    pub fn window(&self) -> &TimeDomain {
        &self.window
    }

    pub fn fast_step_seconds(&self) -> i64 {
        self.window.step_seconds()
    }

    /// Base period of the coupled model: the slowest step, in seconds.
    pub fn base_period_seconds(&self) -> i64 {
        self.fast_step_seconds() * i64::from(*self.ratios.iter().max().expect("non-empty"))
    }

    pub fn ratio(&self, adapter_index: usize) -> u32 {
        self.ratios[adapter_index]
    }

    /// True when the component at `adapter_index` runs at tick `tick`.
    pub fn due(&self, adapter_index: usize, tick: usize) -> bool {
        tick % self.ratios[adapter_index] as usize == 0
    }

    /// Converts `[start, end]` into a tick range, requiring both instants to
    /// sit on every component's step bounds.
    pub fn tick_range(&self, start: DateTime, end: DateTime) -> Result<(usize, usize), ModelError> {
        let fast = self.fast_step_seconds();
        let misaligned = |what: &str, at: DateTime| {
            ConfigError::invalid(
                "simulation window",
                format!("{what} {at} does not sit on every component's timestep bounds"),
            )
        };
        for (name, at) in [("start", start), ("end", end)] {
            let off = (at - self.window.start()).num_seconds();
            if off < 0 || at > self.window.end() || off % fast != 0 {
                return Err(misaligned(name, at).into());
            }
            let tick = (off / fast) as usize;
            for &r in &self.ratios {
                if tick % r as usize != 0 {
                    return Err(misaligned(name, at).into());
                }
            }
        }
        let start_tick = ((start - self.window.start()).num_seconds() / fast) as usize;
        let end_tick = ((end - self.window.start()).num_seconds() / fast) as usize;
        if end_tick < start_tick {
            return Err(ConfigError::invalid(
                "simulation window",
                format!("end {end} precedes start {start}"),
            )
            .into());
        }
        Ok((start_tick, end_tick))
    }
}
