// orderflow/src/pipeline/execution.rs

//! `Pipeline::run()`: executes steps in order against one shared context.

use super::context_data::ContextData;
use super::control::{PipelineControl, PipelineResult};
use super::definition::{Handler, Pipeline};
use crate::error::OrderflowError;
use tracing::{event, instrument, span, Instrument, Level};

enum PhaseOutcome<Err> {
  Continue,
  Stopped,
  Failed(Err),
}

impl<TData, Err> Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<OrderflowError> + Send + Sync + 'static,
{
  /// Runs every step in order.
  ///
  /// A handler error in a non-optional step aborts the run and is returned as-is. In an
  /// optional step the error is logged and the run moves on to the next step.
  #[instrument(
    name = "Pipeline::run",
    skip_all,
    fields(
      pipeline_context_data_type = %std::any::type_name::<TData>(),
      num_steps = self.steps.len(),
    ),
    err(Display)
  )]
  pub async fn run(&self, ctx_data: ContextData<TData>) -> Result<PipelineResult, Err> {
    event!(Level::DEBUG, "Pipeline execution starting.");

    for (step_idx, step_def) in self.steps.iter().enumerate() {
      let step_name = step_def.name.as_str();
      let step_span = span!(
        Level::INFO,
        "pipeline_step_execution",
        step_name = step_name,
        step_index = step_idx,
        optional = step_def.optional
      );

      if let Some(skip_cond) = &step_def.skip_if {
        if skip_cond(ctx_data.clone()) {
          event!(parent: &step_span, Level::DEBUG, "Step skipped due to 'skip_if' condition.");
          continue;
        }
      }

      let on_handlers = self.on.get(step_name).filter(|v| !v.is_empty());
      let after_handlers = self.after.get(step_name).filter(|v| !v.is_empty());

      if on_handlers.is_none() && after_handlers.is_none() {
        if step_def.optional {
          event!(parent: &step_span, Level::DEBUG, "Optional step has no handlers, skipping.");
          continue;
        }
        event!(parent: &step_span, Level::ERROR, "Non-optional step has no handlers.");
        return Err(Err::from(OrderflowError::HandlerMissing {
          step_name: step_def.name.clone(),
        }));
      }

      let outcome = async {
        if let Some(handlers) = on_handlers {
          match run_phase(handlers, &ctx_data, "on").await {
            PhaseOutcome::Continue => {}
            other => return other,
          }
        }
        if let Some(handlers) = after_handlers {
          return run_phase(handlers, &ctx_data, "after").await;
        }
        PhaseOutcome::Continue
      }
      .instrument(step_span.clone())
      .await;

      match outcome {
        PhaseOutcome::Continue => {
          event!(parent: &step_span, Level::DEBUG, "Step finished.");
        }
        PhaseOutcome::Stopped => {
          event!(parent: &step_span, Level::INFO, "Pipeline stopped by a handler.");
          return Ok(PipelineResult::Stopped);
        }
        PhaseOutcome::Failed(e) if step_def.optional => {
          event!(parent: &step_span, Level::WARN, error = %e, "Optional step failed; continuing.");
        }
        PhaseOutcome::Failed(e) => {
          event!(parent: &step_span, Level::ERROR, error = %e, "Step failed.");
          return Err(e);
        }
      }
    }

    event!(Level::DEBUG, "Pipeline execution completed.");
    Ok(PipelineResult::Completed)
  }
}

async fn run_phase<TData, Err>(
  handlers: &[Handler<TData, Err>],
  ctx_data: &ContextData<TData>,
  phase: &'static str,
) -> PhaseOutcome<Err>
where
  TData: 'static + Send + Sync,
{
  for (handler_idx, handler_fn) in handlers.iter().enumerate() {
    let handler_span = span!(Level::DEBUG, "step_handler", phase, handler_index = handler_idx);
    match handler_fn(ctx_data.clone()).instrument(handler_span).await {
      Ok(PipelineControl::Continue) => {}
      Ok(PipelineControl::Stop) => return PhaseOutcome::Stopped,
      Err(e) => return PhaseOutcome::Failed(e),
    }
  }
  PhaseOutcome::Continue
}
