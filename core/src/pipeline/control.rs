// orderflow/src/pipeline/control.rs

/// Returned by a handler to continue with the next handler/step or halt the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineControl {
  Continue,
  /// Halt immediately. No later handler of this step or any later step runs.
  Stop,
}

/// Outcome of a full pipeline execution that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineResult {
  Completed,
  Stopped,
}
