//! Per-component accumulation of user-requested record aggregations.
//!
//! Users request `{variable -> {window -> methods}}`; the variable may be an
//! outward, an output or a state. At every component tick each active window
//! folds the value in; when a window closes the aggregate becomes a row, and
//! rows are flushed to the sink in slices of `slice_len`. Partial windows at
//! the end of a run are discarded, never written.

use chrono::Duration;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use tracing::warn;

use hydroflux_common::{AggregationMethod, ConfigError, DateTime, IoError, ModelError};

use crate::adapter::{ComponentAdapter, RunProducts};
use crate::sink::{self, RecordMeta, RecordRow, RecordSink};

/// One `{variable -> window -> methods}` request, parsed.
#[derive(Debug, Clone)]
pub struct RecordRequest {
    pub variable: String,
    pub window: Duration,
    pub methods: Vec<AggregationMethod>,
}

/// Accumulator of one (window, method) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecAcc {
    method: AggregationMethod,
    sum: Option<ArrayD<f64>>,
    count: u32,
    /// Extreme for min/max, latest sample for point.
    kept: Option<ArrayD<f64>>,
}

impl RecAcc {
    fn new(method: AggregationMethod) -> Self {
        Self {
            method,
            sum: None,
            count: 0,
            kept: None,
        }
    }

    fn push(&mut self, value: &ArrayD<f64>) {
        match self.method {
            AggregationMethod::Mean | AggregationMethod::Sum => {
                self.sum = Some(match self.sum.take() {
                    None => value.clone(),
                    Some(acc) => acc + value,
                });
                self.count += 1;
            }
            AggregationMethod::Min => self.fold(value, f64::min),
            AggregationMethod::Max => self.fold(value, f64::max),
            AggregationMethod::Point => self.kept = Some(value.clone()),
        }
    }

    fn fold(&mut self, value: &ArrayD<f64>, pick: fn(f64, f64) -> f64) {
        self.kept = Some(match self.kept.take() {
            None => value.clone(),
            Some(mut acc) => {
                acc.zip_mut_with(value, |a, &b| *a = pick(*a, b));
                acc
            }
        });
    }

    /// Closes the window: the aggregate out, the accumulator reset.
    fn emit(&mut self) -> ArrayD<f64> {
        match self.method {
            AggregationMethod::Mean => {
                let sum = self.sum.take().expect("window folded at least one tick");
                let n = f64::from(self.count);
                self.count = 0;
                sum / n
            }
            AggregationMethod::Sum => {
                self.count = 0;
                self.sum.take().expect("window folded at least one tick")
            }
            _ => self.kept.take().expect("window folded at least one tick"),
        }
    }
}

#[derive(Debug)]
struct Stream {
    variable: String,
    window_seconds: i64,
    window_steps: u32,
    accs: Vec<RecAcc>,
    ticks: u32,
    sink_index: usize,
    pending: Vec<RecordRow>,
}

/// Records of one component for one run tag.
pub struct Recorder {
    component: String,
    slice_len: usize,
    sinks: Vec<Box<dyn RecordSink>>,
    streams: Vec<Stream>,
}

impl Recorder {
    /// Builds the record streams and creates (or, on resume, reopens) one
    /// sink per recorded variable under the component's saving directory.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identifier: &str,
        tag: &str,
        adapter: &ComponentAdapter,
        requests: &[RecordRequest],
        slice_len: usize,
        format: &str,
        resume: bool,
    ) -> Result<Self, ModelError> {
        let component = adapter.category().to_string();
        let step_seconds = adapter.timedomain().step_seconds();
        let mut sinks: Vec<Box<dyn RecordSink>> = Vec::new();
        let mut sink_of: Vec<(String, usize)> = Vec::new();
        let mut streams = Vec::new();

        for request in requests {
            let units = adapter
                .variable_units(&request.variable)
                .ok_or_else(|| ConfigError::Missing {
                    what: format!("recordable variable of '{}'", adapter.id()),
                    name: request.variable.clone(),
                })?;
            let window_seconds = request.window.num_seconds();
            if window_seconds <= 0 || window_seconds % step_seconds != 0 {
                return Err(ConfigError::invalid(
                    format!("record window for '{}'", request.variable),
                    format!(
                        "{window_seconds}s is not a positive multiple of the {step_seconds}s step"
                    ),
                )
                .into());
            }
            let mut methods = request.methods.clone();
            methods.sort();
            methods.dedup();
            if methods.is_empty() {
                return Err(ConfigError::invalid(
                    format!("record window for '{}'", request.variable),
                    "no methods requested",
                )
                .into());
            }

            let sink_index = match sink_of.iter().find(|(v, _)| *v == request.variable) {
                Some((_, i)) => *i,
                None => {
                    let file = format!(
                        "{identifier}_{tag}_records_{component}_{}.{format}",
                        request.variable
                    );
                    let path = adapter.saving_directory().join(file);
                    let meta = RecordMeta {
                        identifier: identifier.to_string(),
                        component: component.clone(),
                        variable: request.variable.clone(),
                        units,
                        methods: methods.clone(),
                    };
                    let sink = if resume {
                        sink::reopen_for_path(path)?
                    } else {
                        sink::sink_for_path(path, meta)?
                    };
                    sinks.push(sink);
                    sink_of.push((request.variable.clone(), sinks.len() - 1));
                    sinks.len() - 1
                }
            };

            streams.push(Stream {
                variable: request.variable.clone(),
                window_seconds,
                window_steps: (window_seconds / step_seconds) as u32,
                accs: methods.iter().map(|m| RecAcc::new(*m)).collect(),
                ticks: 0,
                sink_index,
                pending: Vec::new(),
            });
        }

        Ok(Self {
            component,
            slice_len: slice_len.max(1),
            sinks,
            streams,
        })
    }

    /// Folds the component's products of one tick into every stream;
    /// `end_time` is the end of the component step just computed.
    pub fn fold(
        &mut self,
        adapter: &ComponentAdapter,
        products: &RunProducts,
        end_time: DateTime,
    ) -> Result<(), ModelError> {
        for stream in &mut self.streams {
            let value = adapter
                .record_value(&stream.variable, products)
                .expect("recordable variables checked at construction");
            for acc in &mut stream.accs {
                acc.push(&value);
            }
            stream.ticks += 1;
            if stream.ticks == stream.window_steps {
                stream.ticks = 0;
                for acc in &mut stream.accs {
                    let data = acc.emit();
                    stream.pending.push(RecordRow {
                        end_seconds: end_time.seconds(),
                        end_time: end_time.to_string(),
                        window_seconds: stream.window_seconds,
                        method: acc.method,
                        shape: data.shape().to_vec(),
                        data: data.into_iter().collect(),
                    });
                }
                if stream.pending.len() >= self.slice_len {
                    let sink = &mut self.sinks[stream.sink_index];
                    sink.append(&stream.pending)?;
                    stream.pending.clear();
                }
            }
        }
        Ok(())
    }

    /// Flushes every pending completed window (dump boundaries, run end).
    pub fn flush(&mut self) -> Result<(), ModelError> {
        for stream in &mut self.streams {
            if !stream.pending.is_empty() {
                let sink = &mut self.sinks[stream.sink_index];
                sink.append(&stream.pending)?;
                stream.pending.clear();
            }
        }
        Ok(())
    }

    /// Closes the run: flushes, discards partial windows, fsyncs.
    pub fn finish(&mut self) -> Result<(), ModelError> {
        self.flush()?;
        for stream in &self.streams {
            if stream.ticks > 0 {
                warn!(
                    component = %self.component,
                    variable = %stream.variable,
                    ticks = stream.ticks,
                    of = stream.window_steps,
                    "discarding partial aggregation window at end of run"
                );
            }
        }
        for sink in &mut self.sinks {
            sink.sync()?;
        }
        Ok(())
    }

    /// Partial accumulators and flush positions; pending rows are flushed
    /// first so the snapshot only carries in-window state.
    pub fn snapshot(&mut self) -> Result<RecorderSnapshot, ModelError> {
        self.flush()?;
        Ok(RecorderSnapshot {
            streams: self
                .streams
                .iter()
                .map(|s| StreamSnapshot {
                    variable: s.variable.clone(),
                    window_seconds: s.window_seconds,
                    ticks: s.ticks,
                    accs: s.accs.clone(),
                })
                .collect(),
            sink_rows: self.sinks.iter().map(|s| s.rows_written()).collect(),
        })
    }

    /// Restores accumulators and truncates record files back to the dumped
    /// flush positions.
    pub fn restore(&mut self, snapshot: RecorderSnapshot) -> Result<(), ModelError> {
        if snapshot.streams.len() != self.streams.len()
            || snapshot.sink_rows.len() != self.sinks.len()
        {
            return Err(IoError::Decode {
                path: "recorder snapshot".into(),
                reason: "stream layout differs from the dumped run".to_string(),
            }
            .into());
        }
        for (stream, dumped) in self.streams.iter_mut().zip(snapshot.streams) {
            if stream.variable != dumped.variable || stream.window_seconds != dumped.window_seconds
            {
                return Err(IoError::Decode {
                    path: "recorder snapshot".into(),
                    reason: format!(
                        "stream '{}'/{}s does not match dumped '{}'/{}s",
                        stream.variable,
                        stream.window_seconds,
                        dumped.variable,
                        dumped.window_seconds
                    ),
                }
                .into());
            }
            stream.ticks = dumped.ticks;
            stream.accs = dumped.accs;
            stream.pending.clear();
        }
        for (sink, rows) in self.sinks.iter_mut().zip(snapshot.sink_rows) {
            sink.truncate(rows)?;
        }
        Ok(())
    }
}

/// Serialized recorder state for one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderSnapshot {
    streams: Vec<StreamSnapshot>,
    sink_rows: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StreamSnapshot {
    variable: String,
    window_seconds: i64,
    ticks: u32,
    accs: Vec<RecAcc>,
}
