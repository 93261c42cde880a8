use std::time::Instant;

use tracing::{debug, error, info, warn};

use tripwire_core::context::StepContext;
use tripwire_core::error::{Result, TripwireError};
use tripwire_core::run::{RunReport, RunState, StateCell};
use tripwire_core::step::{Flow, StepNode};

use super::options::GraphOptions;
use crate::template;
use crate::variables::Variables;

/// Everything a graph thread owns while it runs.
pub(crate) struct Run {
    pub head: Option<Box<StepNode>>,
    pub variables: Variables,
    pub ctx: StepContext,
    pub options: GraphOptions,
    pub state: StateCell,
}

impl Run {
    /// Thread entry point: drive the chain on a private single-threaded runtime.
    pub fn on_own_thread(self) -> Result<RunReport> {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                self.state.set(RunState::Failed(e.to_string()));
                return Err(e.into());
            }
        };
        runtime.block_on(self.drive())
    }

    async fn drive(mut self) -> Result<RunReport> {
        self.state.set(RunState::Running);
        info!(
            graph_id = %self.ctx.graph_id,
            graph = %self.ctx.graph_name,
            repeat = self.options.repeat,
            "Graph started"
        );

        let started = Instant::now();
        let mut cycles = 0u64;
        let mut steps = 0u64;

        let outcome = loop {
            cycles += 1;
            if let Err(e) = self.traverse(&mut steps).await {
                break Err(e);
            }
            if !self.options.another_cycle(cycles) {
                break Ok(());
            }
            if !self.pause().await {
                break Err(TripwireError::Cancelled);
            }
        };

        let state = match &outcome {
            Ok(()) => RunState::Completed,
            Err(TripwireError::Cancelled) => RunState::Cancelled,
            Err(e) => RunState::Failed(e.to_string()),
        };
        self.state.set(state.clone());

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &state {
            RunState::Failed(message) => error!(
                graph_id = %self.ctx.graph_id,
                graph = %self.ctx.graph_name,
                error = %message,
                cycles,
                steps,
                "Graph failed"
            ),
            _ => info!(
                graph_id = %self.ctx.graph_id,
                graph = %self.ctx.graph_name,
                state = ?state,
                cycles,
                steps,
                elapsed_ms,
                "Graph finished"
            ),
        }

        match outcome {
            Err(e) if !matches!(e, TripwireError::Cancelled) => Err(e),
            _ => Ok(RunReport {
                graph_id: self.ctx.graph_id.clone(),
                graph_name: self.ctx.graph_name.clone(),
                state,
                cycles,
                steps_executed: steps,
                variables: self.variables.into_inner(),
            }),
        }
    }

    /// Walk the chain once from the head. A branch halt ends the walk early
    /// without error.
    async fn traverse(&mut self, steps: &mut u64) -> Result<()> {
        let mut cursor = self.head.as_deref_mut();

        while let Some(node) = cursor {
            if self.ctx.cancel.is_cancelled() {
                return Err(TripwireError::Cancelled);
            }

            let inputs = template::substitute(node.inputs(), &self.variables);
            debug!(
                graph_id = %self.ctx.graph_id,
                step = %node.name,
                kind = node.kind(),
                "Executing step"
            );

            let result = tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => None,
                result = node.execute(&inputs, &self.ctx) => Some(result),
            };
            let Some(result) = result else {
                debug!(graph_id = %self.ctx.graph_id, step = %node.name, "Step abandoned on cancel");
                return Err(TripwireError::Cancelled);
            };

            let flow = match result {
                Ok(flow) => flow,
                Err(e) => {
                    warn!(
                        graph_id = %self.ctx.graph_id,
                        step = %node.name,
                        kind = node.kind(),
                        error = %e,
                        "Step failed"
                    );
                    return Err(e);
                }
            };

            *steps += 1;
            self.variables.record(&node.name, node.produced_outputs());

            if flow == Flow::Halt {
                debug!(graph_id = %self.ctx.graph_id, step = %node.name, "Traversal halted");
                return Ok(());
            }
            cursor = node.next.as_deref_mut();
        }

        Ok(())
    }

    /// Wait out the cycle delay. False when cancelled meanwhile.
    async fn pause(&self) -> bool {
        if self.options.cycle_delay.is_zero() {
            tokio::task::yield_now().await;
            return !self.ctx.cancel.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.options.cycle_delay) => true,
        }
    }
}
