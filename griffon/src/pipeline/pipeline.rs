//! Plan executor.

use super::metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
use super::stage::{ExecutionMode, Stage};
use super::task::BoxedTask;
use crate::errors::{ImagingError, ImagingResult};
use futures::future::try_join_all;
use std::time::Instant;

pub struct ExecutionPlan<Ctx> {
    stages: Vec<Stage<BoxedTask<Ctx>>>,
}

impl<Ctx> ExecutionPlan<Ctx> {
    pub fn new(stages: Vec<Stage<BoxedTask<Ctx>>>) -> Self {
        Self { stages }
    }

    pub fn task_count(&self) -> usize {
        self.stages.iter().map(Stage::len).sum()
    }

    pub fn stages(self) -> Vec<Stage<BoxedTask<Ctx>>> {
        self.stages
    }
}

pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Run every stage of `plan` in order against a shared context.
    ///
    /// Stops at the first failing task. Tasks of a parallel stage that were
    /// still running when a sibling failed are dropped.
    pub async fn execute<Ctx>(plan: ExecutionPlan<Ctx>, ctx: Ctx) -> ImagingResult<PipelineMetrics>
    where
        Ctx: Clone,
    {
        let total_start = Instant::now();
        let mut stage_metrics = Vec::new();

        for (index, stage) in plan.stages().into_iter().enumerate() {
            let execution = stage.execution;
            let stage_start = Instant::now();

            let task_metrics = match execution {
                ExecutionMode::Parallel => {
                    let futures = stage.tasks.into_iter().map(|task| {
                        let ctx = ctx.clone();
                        async move { run_task(index, task, ctx).await }
                    });
                    try_join_all(futures).await?
                }
                ExecutionMode::Sequential => {
                    let mut task_metrics = Vec::new();
                    for task in stage.tasks {
                        task_metrics.push(run_task(index, task, ctx.clone()).await?);
                    }
                    task_metrics
                }
            };

            stage_metrics.push(StageMetrics {
                index,
                execution,
                duration_ms: stage_start.elapsed().as_millis(),
                tasks: task_metrics,
            });
        }

        Ok(PipelineMetrics {
            total_duration_ms: total_start.elapsed().as_millis(),
            stages: stage_metrics,
        })
    }
}

async fn run_task<Ctx>(stage: usize, task: BoxedTask<Ctx>, ctx: Ctx) -> ImagingResult<TaskMetrics> {
    let name = task.name().to_string();
    let task_start = Instant::now();
    tracing::debug!(stage, task = %name, "Task started");
    task.run(ctx)
        .await
        .inspect_err(|e: &ImagingError| tracing::debug!(stage, task = %name, error = %e, "Task failed"))?;
    let duration_ms = task_start.elapsed().as_millis();
    tracing::debug!(stage, task = %name, duration_ms, "Task finished");
    Ok(TaskMetrics { name, duration_ms })
}
