//! Stage/task pipeline used by multi-step host workflows.
//!
//! A plan is a list of stages run in order. Each stage runs its tasks either
//! concurrently or one after another; the first failing task aborts the plan
//! and its error is returned unchanged.
//!
//! ```text
//! ExecutionPlan → Stages → Tasks
//! ```
//!
//! ```ignore
//! let plan = ExecutionPlan::new(vec![
//!     Stage::sequential(vec![Box::new(ResetStagingTask)]),
//!     Stage::parallel(vec![Box::new(DownloadTask::kernel()), Box::new(DownloadTask::initrd())]),
//! ]);
//! let metrics = PipelineExecutor::execute(plan, ctx).await?;
//! ```

mod metrics;
#[allow(clippy::module_inception)]
mod pipeline;
mod stage;
mod task;

pub use metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
pub use pipeline::{ExecutionPlan, PipelineExecutor};
pub use stage::{ExecutionMode, Stage};
pub use task::{BoxedTask, PipelineTask};
