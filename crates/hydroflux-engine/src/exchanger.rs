//! Buffer-and-resample mediation of every transfer between components.
//!
//! For each wiring `(source, destination, transfer)` the exchanger keeps one
//! accumulator whose behaviour follows the transfer's aggregation method and
//! the source/destination timestep ratio. Space remapping happens once, on
//! emission from the source; temporal accumulation then works on the
//! destination grid.
//!
//! With the inner clock at the fastest step, `r_src` and `r_dst` are the
//! source and destination steps in inner ticks:
//!
//! - source same or faster (`r_src <= r_dst`): samples pile up in a pending
//!   accumulator and are reduced when the destination reads;
//! - source slower (`r_src > r_dst`): the latest sample is held and yielded
//!   on every destination read inside the source interval; `sum` yields the
//!   held value divided by `r_src / r_dst` so the destination-side total
//!   over the source interval conserves the source total.
//!
//! Accumulators reset on read. On a cold start every buffer is seeded with
//! zero of the transfer's declared units (or from an explicit initial
//! transfers file); components must tolerate zero inwards on tick 0.

use ndarray::Array2;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use hydroflux_common::{
    AggregationMethod, ConfigError, IoError, ModelError, ShapeError, UnitsError, WiringError,
};
use hydroflux_space::{RemapKind, RemapWeights};

use crate::adapter::ComponentAdapter;
use crate::component::Category;

/// Time-side accumulator of one wiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TransferAccumulator {
    method: AggregationMethod,
    /// Source and destination steps in inner ticks.
    r_src: u32,
    r_dst: u32,
    /// Pending samples since the last read (source same-or-faster regime).
    sum: Option<Array2<f64>>,
    count: u32,
    extreme: Option<Array2<f64>>,
    /// Value yielded when nothing is pending: the seed, a restored dump
    /// buffer, or the latest sample of a slower source.
    held: Array2<f64>,
}

impl TransferAccumulator {
    fn new(method: AggregationMethod, r_src: u32, r_dst: u32, shape: (usize, usize)) -> Self {
        Self {
            method,
            r_src,
            r_dst,
            sum: None,
            count: 0,
            extreme: None,
            held: Array2::zeros(shape),
        }
    }

    /// Folds one source sample (already on the destination grid).
    fn push(&mut self, value: Array2<f64>) {
        if self.r_src > self.r_dst {
            // Slower source: hold; sum is spread evenly over the destination
            // reads inside the source interval.
            self.held = match self.method {
                AggregationMethod::Sum => value * (f64::from(self.r_dst) / f64::from(self.r_src)),
                _ => value,
            };
            self.sum = None;
            self.count = 0;
            self.extreme = None;
            return;
        }
        match self.method {
            AggregationMethod::Mean | AggregationMethod::Sum => {
                self.sum = Some(match self.sum.take() {
                    None => value,
                    Some(acc) => acc + value,
                });
                self.count += 1;
            }
            AggregationMethod::Min => self.fold_extreme(value, f64::min),
            AggregationMethod::Max => self.fold_extreme(value, f64::max),
            AggregationMethod::Point => {
                self.extreme = Some(value);
            }
        }
    }

    fn fold_extreme(&mut self, value: Array2<f64>, pick: fn(f64, f64) -> f64) {
        self.extreme = Some(match self.extreme.take() {
            None => value,
            Some(mut acc) => {
                acc.zip_mut_with(&value, |a, &b| *a = pick(*a, b));
                acc
            }
        });
    }

    /// Yields the value for one destination read and resets.
    fn drain(&mut self) -> Array2<f64> {
        match self.method {
            AggregationMethod::Mean => {
                if let Some(sum) = self.sum.take() {
                    // sum / count, not a running mean: the division happens
                    // once so reduction order never shifts rounding.
                    self.held = sum / f64::from(self.count);
                    self.count = 0;
                }
            }
            AggregationMethod::Sum => {
                if let Some(sum) = self.sum.take() {
                    self.held = sum;
                    self.count = 0;
                }
            }
            AggregationMethod::Min | AggregationMethod::Max | AggregationMethod::Point => {
                if let Some(extreme) = self.extreme.take() {
                    self.held = extreme;
                }
            }
        }
        self.held.clone()
    }

    fn seed(&mut self, value: Array2<f64>) {
        self.held = value;
        self.sum = None;
        self.count = 0;
        self.extreme = None;
    }
}

/// One wired transfer.
struct Wiring {
    transfer: String,
    units: String,
    src: Option<Category>,
    dst: Category,
    remap: Option<RemapWeights>,
    acc: TransferAccumulator,
}

/// Holds the authoritative value of every in-flight transfer.
pub struct Exchanger {
    wirings: Vec<Wiring>,
}

impl Exchanger {
    /// Wires every declared inward to exactly one producer and builds the
    /// buffers, remap weights included. Fails with `WiringError` on a
    /// missing or ambiguous producer for a required inward; optional inwards
    /// without a producer read zero for the whole run.
    pub fn new(
        adapters: &[ComponentAdapter],
        fast_step_seconds: i64,
    ) -> Result<Self, ModelError> {
        let mut wirings = Vec::new();
        for consumer in adapters {
            let dst = consumer.category();
            let r_dst = (consumer.timedomain().step_seconds() / fast_step_seconds) as u32;
            for decl in &consumer.definition().inwards {
                if !decl.method.valid_for_transfer() {
                    return Err(ConfigError::invalid(
                        format!("inward '{}' of '{}'", decl.name, consumer.id()),
                        "transfers cannot use the 'point' method",
                    )
                    .into());
                }
                let candidates: Vec<&ComponentAdapter> = adapters
                    .iter()
                    .filter(|p| {
                        p.category() == decl.from
                            && p.definition()
                                .outward(&decl.name)
                                .is_some_and(|o| o.to.contains(&dst))
                    })
                    .collect();
                let producer = match candidates.len() {
                    0 if decl.required => {
                        return Err(WiringError::Missing {
                            transfer: decl.name.clone(),
                            consumer: consumer.id().to_string(),
                            category: decl.from.to_string(),
                        }
                        .into());
                    }
                    0 => {
                        // Optional inward with no producer: a permanent zero.
                        wirings.push(Wiring {
                            transfer: decl.name.clone(),
                            units: decl.units.clone(),
                            src: None,
                            dst,
                            remap: None,
                            acc: TransferAccumulator::new(
                                decl.method,
                                r_dst,
                                r_dst,
                                consumer.grid().shape(),
                            ),
                        });
                        continue;
                    }
                    1 => candidates[0],
                    _ => {
                        return Err(WiringError::Ambiguous {
                            transfer: decl.name.clone(),
                            consumer: consumer.id().to_string(),
                            candidates: candidates.iter().map(|c| c.id().to_string()).collect(),
                        }
                        .into());
                    }
                };
                let outward = producer
                    .definition()
                    .outward(&decl.name)
                    .expect("filtered above");
                if outward.method != decl.method {
                    return Err(WiringError::MethodMismatch {
                        transfer: decl.name.clone(),
                        producer: producer.id().to_string(),
                        produced: outward.method.to_string(),
                        consumer: consumer.id().to_string(),
                        consumed: decl.method.to_string(),
                    }
                    .into());
                }
                if outward.units != decl.units {
                    return Err(UnitsError {
                        name: decl.name.clone(),
                        expected: decl.units.clone(),
                        actual: outward.units.clone(),
                    }
                    .into());
                }

                let remap = if producer.grid().same_domain(consumer.grid()) {
                    None
                } else {
                    let kind = match decl.method {
                        AggregationMethod::Sum => RemapKind::Conservative,
                        _ => RemapKind::AreaWeighted,
                    };
                    let weights = RemapWeights::build(producer.grid(), consumer.grid(), kind);
                    if weights.has_empty_rows() {
                        warn!(
                            transfer = %decl.name,
                            producer = %producer.id(),
                            consumer = %consumer.id(),
                            "remap leaves destination cells without contributors"
                        );
                    }
                    Some(weights)
                };
                let r_src = (producer.timedomain().step_seconds() / fast_step_seconds) as u32;
                wirings.push(Wiring {
                    transfer: decl.name.clone(),
                    units: decl.units.clone(),
                    src: Some(producer.category()),
                    dst,
                    remap,
                    acc: TransferAccumulator::new(
                        decl.method,
                        r_src,
                        r_dst,
                        consumer.grid().shape(),
                    ),
                });
            }
        }
        Ok(Self { wirings })
    }

    /// Publishes one component's outwards, remapping each onto every
    /// consumer's grid and folding into the time accumulators.
    pub fn publish(
        &mut self,
        category: Category,
        outwards: &FxHashMap<String, Array2<f64>>,
    ) -> Result<(), ModelError> {
        for wiring in &mut self.wirings {
            if wiring.src != Some(category) {
                continue;
            }
            let Some(value) = outwards.get(&wiring.transfer) else {
                continue;
            };
            let on_dst = match &wiring.remap {
                None => value.clone(),
                Some(weights) => match wiring.acc.method {
                    AggregationMethod::Min => {
                        weights.apply_reduce(&wiring.transfer, value, f64::min)?
                    }
                    AggregationMethod::Max => {
                        weights.apply_reduce(&wiring.transfer, value, f64::max)?
                    }
                    _ => weights.apply(&wiring.transfer, value)?,
                },
            };
            wiring.acc.push(on_dst);
        }
        Ok(())
    }

    /// Reads (and resets) every inward of one component.
    pub fn take_inwards(&mut self, category: Category) -> FxHashMap<String, Array2<f64>> {
        let mut inwards = FxHashMap::default();
        for wiring in &mut self.wirings {
            if wiring.dst == category {
                inwards.insert(wiring.transfer.clone(), wiring.acc.drain());
            }
        }
        inwards
    }

    /// Seeds buffers from an initial transfers map (destination-grid values);
    /// transfers absent from the map keep their zero seed.
    pub fn seed(&mut self, initial: &FxHashMap<String, Array2<f64>>) -> Result<(), ModelError> {
        for wiring in &mut self.wirings {
            if let Some(value) = initial.get(&wiring.transfer) {
                if value.dim() != wiring.acc.held.dim() {
                    let (ey, ex) = wiring.acc.held.dim();
                    let (ay, ax) = value.dim();
                    return Err(
                        ShapeError::new(wiring.transfer.clone(), &[ey, ex], &[ay, ax]).into(),
                    );
                }
                wiring.acc.seed(value.clone());
            }
        }
        Ok(())
    }

    /// Units a wired transfer was declared with (record metadata reuse).
    pub fn transfer_units(&self, transfer: &str) -> Option<&str> {
        self.wirings
            .iter()
            .find(|w| w.transfer == transfer)
            .map(|w| w.units.as_str())
    }

    pub fn snapshot(&self) -> ExchangerSnapshot {
        ExchangerSnapshot {
            buffers: self
                .wirings
                .iter()
                .map(|w| BufferSnapshot {
                    transfer: w.transfer.clone(),
                    src: w.src,
                    dst: w.dst,
                    acc: w.acc.clone(),
                })
                .collect(),
        }
    }

    /// Restores buffer contents byte-identical from a dump.
    pub fn restore(&mut self, snapshot: ExchangerSnapshot) -> Result<(), ModelError> {
        if snapshot.buffers.len() != self.wirings.len() {
            return Err(IoError::Decode {
                path: "exchanger buffers".into(),
                reason: format!(
                    "{} buffers in dump, {} wirings in model",
                    snapshot.buffers.len(),
                    self.wirings.len()
                ),
            }
            .into());
        }
        for (wiring, buffer) in self.wirings.iter_mut().zip(snapshot.buffers) {
            if wiring.transfer != buffer.transfer
                || wiring.src != buffer.src
                || wiring.dst != buffer.dst
            {
                return Err(IoError::Decode {
                    path: "exchanger buffers".into(),
                    reason: format!(
                        "dump buffer '{}' does not match wiring '{}'",
                        buffer.transfer, wiring.transfer
                    ),
                }
                .into());
            }
            wiring.acc = buffer.acc;
        }
        Ok(())
    }
}

/// Serialized exchanger buffers, in wiring order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangerSnapshot {
    buffers: Vec<BufferSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BufferSnapshot {
    transfer: String,
    src: Option<Category>,
    dst: Category,
    acc: TransferAccumulator,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn acc(method: AggregationMethod, r_src: u32, r_dst: u32) -> TransferAccumulator {
        TransferAccumulator::new(method, r_src, r_dst, (1, 2))
    }

    #[test]
    fn cold_start_reads_yield_the_zero_seed() {
        let mut a = acc(AggregationMethod::Mean, 1, 1);
        assert_eq!(a.drain(), arr2(&[[0.0, 0.0]]));
    }

    #[test]
    fn fast_source_mean_is_duration_weighted() {
        // Source every tick, destination every 4 ticks.
        let mut a = acc(AggregationMethod::Mean, 1, 4);
        for v in [1.0, 2.0, 3.0, 6.0] {
            a.push(arr2(&[[v, 2.0 * v]]));
        }
        assert_eq!(a.drain(), arr2(&[[3.0, 6.0]]));
        // Reset on read: next drain without pushes repeats the held value.
        assert_eq!(a.drain(), arr2(&[[3.0, 6.0]]));
    }

    #[test]
    fn fast_source_sum_totals_the_interval() {
        let mut a = acc(AggregationMethod::Sum, 1, 2);
        a.push(arr2(&[[1.0, 10.0]]));
        a.push(arr2(&[[2.0, 20.0]]));
        assert_eq!(a.drain(), arr2(&[[3.0, 30.0]]));
        a.push(arr2(&[[5.0, 50.0]]));
        a.push(arr2(&[[7.0, 70.0]]));
        assert_eq!(a.drain(), arr2(&[[12.0, 120.0]]));
    }

    #[test]
    fn min_max_reduce_elementwise() {
        let mut lo = acc(AggregationMethod::Min, 1, 2);
        let mut hi = acc(AggregationMethod::Max, 1, 2);
        for v in [[3.0, -1.0], [2.0, 4.0]] {
            lo.push(arr2(&[v]));
            hi.push(arr2(&[v]));
        }
        assert_eq!(lo.drain(), arr2(&[[2.0, -1.0]]));
        assert_eq!(hi.drain(), arr2(&[[3.0, 4.0]]));
    }

    #[test]
    fn slow_source_sum_spreads_over_destination_reads() {
        // Source every 4 ticks, destination every tick.
        let mut a = acc(AggregationMethod::Sum, 4, 1);
        a.push(arr2(&[[8.0, 4.0]]));
        let mut total = arr2(&[[0.0, 0.0]]);
        for _ in 0..4 {
            total = total + a.drain();
        }
        // Destination-side total over the source interval equals the sample.
        assert_eq!(total, arr2(&[[8.0, 4.0]]));
    }

    #[test]
    fn slow_source_mean_holds_the_latest_sample() {
        let mut a = acc(AggregationMethod::Mean, 2, 1);
        a.push(arr2(&[[5.0, 6.0]]));
        assert_eq!(a.drain(), arr2(&[[5.0, 6.0]]));
        assert_eq!(a.drain(), arr2(&[[5.0, 6.0]]));
        a.push(arr2(&[[9.0, 1.0]]));
        assert_eq!(a.drain(), arr2(&[[9.0, 1.0]]));
    }

    #[test]
    fn snapshot_round_trips_pending_state() {
        let mut a = acc(AggregationMethod::Mean, 1, 4);
        a.push(arr2(&[[1.0, 2.0]]));
        a.push(arr2(&[[3.0, 4.0]]));
        let bytes = bincode::serialize(&a).unwrap();
        let mut b: TransferAccumulator = bincode::deserialize(&bytes).unwrap();
        a.push(arr2(&[[5.0, 6.0]]));
        b.push(arr2(&[[5.0, 6.0]]));
        assert_eq!(a.drain(), b.drain());
    }
}
