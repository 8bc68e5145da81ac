//! The hydroflux coupling engine.
//!
//! Runs a set of independently authored scientific components in lock-step
//! over a shared simulation window, marshalling named transfers between
//! mismatched space/time resolutions, recording time-aggregated outputs and
//! snapshotting for exact resume.
//!
//! Execution is single-threaded and deterministic: bit-identical replay
//! given identical inputs and dumps is a hard requirement, so reductions run
//! in fixed order and `mean` is always `sum / count`.

pub mod adapter;
pub mod checkpoint;
pub mod clock;
pub mod component;
pub mod dataset;
pub mod driver;
pub mod exchanger;
pub mod recorder;
pub mod sink;
pub mod state;

pub use adapter::{ComponentAdapter, RunProducts};
pub use checkpoint::{ComponentFrame, DumpStore, ModelFrame};
pub use clock::Clock;
pub use component::{
    Category, Component, ComponentDefinition, ConstantDecl, Division, FinaliseContext, HookError,
    InitialiseContext, InputDecl, InputKind, InwardDecl, OutputDecl, OutwardDecl, ParameterDecl,
    ParameterValue, RunContext, StateDecl,
};
pub use dataset::{ClimFrequency, DataSet, FieldSeries};
pub use driver::Driver;
pub use exchanger::{Exchanger, ExchangerSnapshot};
pub use recorder::{RecordRequest, Recorder, RecorderSnapshot};
pub use sink::{CsvSink, JsonLinesSink, RecordMeta, RecordRow, RecordSink, sink_for_path};
pub use state::{StateSet, StateSnapshot, StateVar};
