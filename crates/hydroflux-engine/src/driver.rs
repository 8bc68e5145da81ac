//! Drives all components over the shared simulation window.
//!
//! Per tick, in declared category order: stage and read inwards from the
//! exchanger, call `run`, publish outwards back, fold recorded variables.
//! A component therefore sees same-tick outwards from earlier-in-order
//! components and previous-tick outwards from later-in-order ones; there is
//! no fixed-point iteration within a tick.
//!
//! Spin-up repeats a sub-window back-to-back, carrying states (and exchanger
//! buffers) forward and starting fresh record files per cycle. Dumps are
//! emitted every `dumping_frequency` and allow exact resume.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Duration;
use ndarray::Array2;
use rustc_hash::FxHashMap;
use tracing::{debug, error, info, warn};

use hydroflux_common::{ConfigError, DateTime, IoError, ModelError};

use crate::adapter::ComponentAdapter;
use crate::checkpoint::{ComponentFrame, DumpStore, ModelFrame};
use crate::clock::Clock;
use crate::exchanger::Exchanger;
use crate::recorder::{Recorder, RecordRequest};

/// Run tag of the main simulation window.
const RUN_TAG: &str = "run";

pub struct Driver {
    identifier: String,
    saving_directory: PathBuf,
    adapters: Vec<ComponentAdapter>,
    records: Vec<Vec<RecordRequest>>,
    slice_len: usize,
    record_format: String,
    clock: Clock,
    exchanger: Exchanger,
    initialised: bool,
    cancel: Option<Arc<AtomicBool>>,
}

impl Driver {
    /// Builds the coupled model: orders components, checks time alignment,
    /// wires every transfer. Fails before any tick on bad wiring or
    /// configuration.
    pub fn new(
        identifier: impl Into<String>,
        saving_directory: PathBuf,
        components: Vec<(ComponentAdapter, Vec<RecordRequest>)>,
        slice_len: usize,
        record_format: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let mut components = components;
        components.sort_by_key(|(a, _)| a.category());
        for pair in components.windows(2) {
            if pair[0].0.category() == pair[1].0.category() {
                return Err(ConfigError::invalid(
                    "model",
                    format!("two components declare category '{}'", pair[0].0.category()),
                )
                .into());
            }
        }
        let (adapters, records): (Vec<_>, Vec<_>) = components.into_iter().unzip();
        let clock = Clock::new(&adapters)?;
        let exchanger = Exchanger::new(&adapters, clock.fast_step_seconds())?;
        Ok(Self {
            identifier: identifier.into(),
            saving_directory,
            adapters,
            records,
            slice_len,
            record_format: record_format.into(),
            clock,
            exchanger,
            initialised: false,
            cancel: None,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn adapters(&self) -> &[ComponentAdapter] {
        &self.adapters
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// External cancellation, honoured between ticks only.
    pub fn set_cancellation(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    /// Seeds the exchanger for a cold start from an initial transfers map
    /// (values on the consuming grids). Unseeded transfers start at zero.
    pub fn seed_transfers(
        &mut self,
        initial: &FxHashMap<String, Array2<f64>>,
    ) -> Result<(), ModelError> {
        self.exchanger.seed(initial)
    }

    /// Runs `cycles` back-to-back repetitions of `[start, end]` before the
    /// main run. States carry forward across cycles; recorder accumulators
    /// reset and each cycle records to its own files.
    pub fn spin_up(
        &mut self,
        start: DateTime,
        end: DateTime,
        cycles: u32,
        dumping_frequency: Option<Duration>,
    ) -> Result<(), ModelError> {
        if cycles == 0 || start == end {
            info!(identifier = %self.identifier, "spin-up is a no-op");
            return Ok(());
        }
        let (start_tick, end_tick) = self.clock.tick_range(start, end)?;
        self.ensure_initialised()?;
        for cycle in 1..=cycles {
            let tag = format!("spinup-{cycle}");
            info!(identifier = %self.identifier, %tag, %start, %end, "spin-up cycle starting");
            let mut recorders = self.build_recorders(&tag, false)?;
            self.run_window(
                &tag,
                start_tick,
                end_tick,
                start_tick,
                dumping_frequency,
                &mut recorders,
            )?;
        }
        Ok(())
    }

    /// Runs the whole simulation window, then finalises every component.
    pub fn simulate(&mut self, dumping_frequency: Option<Duration>) -> Result<(), ModelError> {
        let window = self.clock.window();
        let (start_tick, end_tick) = self.clock.tick_range(window.start(), window.end())?;
        self.ensure_initialised()?;
        info!(identifier = %self.identifier, window = %self.clock.window(), "simulation starting");
        let mut recorders = self.build_recorders(RUN_TAG, false)?;
        self.run_window(
            RUN_TAG,
            start_tick,
            end_tick,
            start_tick,
            dumping_frequency,
            &mut recorders,
        )?;
        for adapter in &mut self.adapters {
            adapter.finalise()?;
        }
        info!(identifier = %self.identifier, "simulation finished");
        Ok(())
    }

    /// Reconstructs the run tagged `tag` from the latest dump at or before
    /// `at` and continues it to the end of its window.
    pub fn resume(&mut self, tag: &str, at: DateTime) -> Result<(), ModelError> {
        let store = self.dump_store(tag);
        let seconds = store.latest_at(at)?;
        let (model, component_frames) = store.load(seconds)?;
        info!(
            identifier = %self.identifier,
            %tag,
            frame = %model.datetime,
            "resuming from dump"
        );

        for (adapter, frame) in self.adapters.iter_mut().zip(component_frames) {
            adapter.restore_states(frame.states, frame.shelf)?;
            adapter.initialise(true)?;
        }
        self.initialised = true;
        self.exchanger.restore(model.exchanger)?;

        let mut recorders = self.build_recorders(tag, true)?;
        if model.recorders.len() != recorders.len() {
            return Err(IoError::Decode {
                path: "dump".into(),
                reason: "recorder count differs from the dumped run".to_string(),
            }
            .into());
        }
        for (recorder, snapshot) in recorders.iter_mut().zip(model.recorders) {
            recorder.restore(snapshot)?;
        }

        self.run_window(
            tag,
            model.tick as usize,
            model.window_end_tick as usize,
            model.window_start_tick as usize,
            model.dumping_seconds.map(Duration::seconds),
            &mut recorders,
        )?;
        if tag == RUN_TAG {
            for adapter in &mut self.adapters {
                adapter.finalise()?;
            }
        }
        Ok(())
    }

    fn ensure_initialised(&mut self) -> Result<(), ModelError> {
        if !self.initialised {
            for adapter in &mut self.adapters {
                adapter.initialise(false)?;
            }
            self.initialised = true;
        }
        Ok(())
    }

    fn build_recorders(&self, tag: &str, resume: bool) -> Result<Vec<Recorder>, ModelError> {
        self.adapters
            .iter()
            .zip(&self.records)
            .map(|(adapter, requests)| {
                Recorder::new(
                    &self.identifier,
                    tag,
                    adapter,
                    requests,
                    self.slice_len,
                    &self.record_format,
                    resume,
                )
            })
            .collect()
    }

    fn dump_store(&self, tag: &str) -> DumpStore {
        DumpStore::new(
            self.identifier.clone(),
            tag,
            self.saving_directory.clone(),
            self.adapters
                .iter()
                .map(|a| (a.category().to_string(), a.saving_directory().clone()))
                .collect(),
        )
    }

    /// The tick loop over `[start_tick, end_tick)`; `window_start_tick`
    /// anchors dump boundaries when resuming mid-window.
    fn run_window(
        &mut self,
        tag: &str,
        start_tick: usize,
        end_tick: usize,
        window_start_tick: usize,
        dumping_frequency: Option<Duration>,
        recorders: &mut Vec<Recorder>,
    ) -> Result<(), ModelError> {
        let fast = self.clock.fast_step_seconds();
        let dumping_seconds = match dumping_frequency {
            None => None,
            Some(f) => {
                let s = f.num_seconds();
                if s <= 0 || s % self.clock.base_period_seconds() != 0 {
                    return Err(ConfigError::invalid(
                        "dumping_frequency",
                        format!(
                            "{s}s is not a positive multiple of the {}s base period",
                            self.clock.base_period_seconds()
                        ),
                    )
                    .into());
                }
                Some(s)
            }
        };

        for tick in start_tick..end_tick {
            if let Some(flag) = &self.cancel
                && flag.load(Ordering::Relaxed)
            {
                warn!(identifier = %self.identifier, %tag, tick, "cancelled between ticks");
                for recorder in recorders.iter_mut() {
                    recorder.finish()?;
                }
                if dumping_seconds.is_some() {
                    self.write_dump(tag, tick, window_start_tick, end_tick, dumping_seconds, recorders)?;
                }
                return Ok(());
            }

            let datetime = self.clock.window().bound(tick);
            debug!(%tag, tick, %datetime, "tick");
            for index in 0..self.adapters.len() {
                if !self.clock.due(index, tick) {
                    continue;
                }
                let category = self.adapters[index].category();
                let inwards = self.exchanger.take_inwards(category);
                let products = match self.adapters[index].run(datetime, &inwards) {
                    Ok(products) => products,
                    Err(err) => {
                        self.abort(tag, tick, window_start_tick, end_tick, dumping_seconds, recorders, &err);
                        return Err(err);
                    }
                };
                if let Err(err) = self.exchanger.publish(category, &products.outwards) {
                    self.abort(tag, tick, window_start_tick, end_tick, dumping_seconds, recorders, &err);
                    return Err(err);
                }
                let step_end = datetime
                    + Duration::seconds(fast * i64::from(self.clock.ratio(index)));
                if let Err(err) = recorders[index].fold(&self.adapters[index], &products, step_end)
                {
                    self.abort(tag, tick, window_start_tick, end_tick, dumping_seconds, recorders, &err);
                    return Err(err);
                }
            }

            let boundary = tick + 1;
            if let Some(every) = dumping_seconds
                && ((boundary - window_start_tick) as i64 * fast) % every == 0
            {
                self.write_dump(tag, boundary, window_start_tick, end_tick, dumping_seconds, recorders)?;
            }
        }

        for recorder in recorders.iter_mut() {
            recorder.finish()?;
        }
        Ok(())
    }

    /// Emits one checkpoint frame at tick boundary `tick`.
    fn write_dump(
        &mut self,
        tag: &str,
        tick: usize,
        window_start_tick: usize,
        window_end_tick: usize,
        dumping_seconds: Option<i64>,
        recorders: &mut [Recorder],
    ) -> Result<(), ModelError> {
        let at = self.clock.window().bound(tick);
        let recorder_snapshots = recorders
            .iter_mut()
            .map(|r| r.snapshot())
            .collect::<Result<Vec<_>, _>>()?;
        let model = ModelFrame {
            datetime: at.to_string(),
            seconds: at.seconds(),
            tick: tick as u64,
            window_start_tick: window_start_tick as u64,
            window_end_tick: window_end_tick as u64,
            dumping_seconds,
            exchanger: self.exchanger.snapshot(),
            recorders: recorder_snapshots,
        };
        let component_frames = self
            .adapters
            .iter()
            .map(|a| ComponentFrame {
                states: a.states_snapshot(),
                shelf: a.shelf(),
            })
            .collect();
        self.dump_store(tag).write(at, model, component_frames)?;
        info!(identifier = %self.identifier, %tag, %at, "dump written");
        Ok(())
    }

    /// Best-effort dump plus on-disk failure record before surfacing `err`.
    #[allow(clippy::too_many_arguments)]
    fn abort(
        &mut self,
        tag: &str,
        tick: usize,
        window_start_tick: usize,
        window_end_tick: usize,
        dumping_seconds: Option<i64>,
        recorders: &mut [Recorder],
        err: &ModelError,
    ) {
        error!(identifier = %self.identifier, %tag, tick, %err, "aborting simulation");
        if let Err(dump_err) = self.write_dump(
            tag,
            tick,
            window_start_tick,
            window_end_tick,
            dumping_seconds,
            recorders,
        ) {
            error!(%dump_err, "final dump failed");
        }
        let record = serde_json::json!({
            "error": err.tag(),
            "tag": tag,
            "datetime": self.clock.window().bound(tick).to_string(),
            "message": err.to_string(),
        });
        let path = self
            .saving_directory
            .join(format!("{}_error.json", self.identifier));
        if let Err(io_err) = std::fs::create_dir_all(&self.saving_directory)
            .and_then(|_| std::fs::write(&path, record.to_string()))
        {
            error!(%io_err, "failure record could not be written");
        }
    }
}
