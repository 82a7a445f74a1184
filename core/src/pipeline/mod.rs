// orderflow/src/pipeline/mod.rs

//! A small ordered-step pipeline used to express the multi-step order workflows.
//!
//! Each step has a name, an optional flag and an optional skip condition. Handlers run
//! against a shared [`ContextData`] and decide whether the pipeline continues or stops.
//! Failures inside an optional step are logged and swallowed, which is how best-effort
//! side effects (timeline entries, notifications) are kept out of the critical path.

pub mod context_data;
pub mod control;
pub mod definition;
pub mod execution;
pub mod step;

pub use context_data::ContextData;
pub use control::{PipelineControl, PipelineResult};
pub use definition::{Handler, Pipeline};
pub use step::{SkipCondition, StepDef};
